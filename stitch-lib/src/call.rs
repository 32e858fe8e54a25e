// BSD 2-Clause License
//
// Copyright (c) 2019, 2020 Alasdair Armstrong
//
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
// notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
// notice, this list of conditions and the following disclaimer in the
// documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Call records describe one completed function invocation observed
//! during symbolic execution: its arguments, the memory reachable
//! through pointer arguments before and after the call, the return
//! value, and the path constraints that held at entry and at return.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::exp::Exp;

/// A value captured from memory at call entry or at return.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Traced {
    /// Nobody asked for this value to be traced.
    Untraced,
    /// The value was requested, but the write that would produce it
    /// was never observed. Serializers refuse to render these.
    Pending,
    Resolved(Exp),
}

impl Traced {
    pub fn is_traced(&self) -> bool {
        !matches!(self, Traced::Untraced)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Traced::Pending)
    }

    pub fn resolved(&self) -> Option<&Exp> {
        match self {
            Traced::Resolved(exp) => Some(exp),
            _ => None,
        }
    }
}

/// The memory a data pointer refers to. Fields are keyed by byte
/// offset and describe the traced parts of a structure recursively;
/// the description is deliberately partial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointee {
    /// Field name, empty for the outermost pointee.
    pub name: String,
    pub type_name: String,
    pub addr: u64,
    pub value_in: Traced,
    pub value_out: Traced,
    pub fields: BTreeMap<i64, Pointee>,
}

impl Pointee {
    pub fn new(type_name: &str) -> Self {
        Pointee {
            name: String::new(),
            type_name: type_name.to_string(),
            addr: 0,
            value_in: Traced::Untraced,
            value_out: Traced::Untraced,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(name: &str, addr: u64) -> Self {
        Pointee { name: name.to_string(), addr, ..Pointee::new("") }
    }

    pub fn with_in(mut self, value: Traced) -> Self {
        self.value_in = value;
        self
    }

    pub fn with_out(mut self, value: Traced) -> Self {
        self.value_out = value;
        self
    }

    pub fn with_field(mut self, offset: i64, field: Pointee) -> Self {
        self.fields.insert(offset, field);
        self
    }

    pub fn is_traced(&self) -> bool {
        self.value_in.is_traced() || self.value_out.is_traced()
    }

    /// True if this pointee, or any field below it, has a value that
    /// was requested but never resolved.
    pub fn has_pending(&self) -> bool {
        self.value_in.is_pending() || self.value_out.is_pending() || self.fields.values().any(Pointee::has_pending)
    }

    fn same_shape(&self, other: &Pointee) -> bool {
        self.value_in.is_traced() == other.value_in.is_traced()
            && self.value_out.is_traced() == other.value_out.is_traced()
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|((off1, f1), (off2, f2))| off1 == off2 && f1.name == f2.name && f1.same_shape(f2))
    }
}

/// What an argument or return value points to, if anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ptr {
    NonPtr,
    /// A function pointer, identified by the name of its target.
    /// Function pointers are never traced through.
    FunPtr(String),
    DataPtr(Pointee),
}

impl Ptr {
    pub fn is_ptr(&self) -> bool {
        !matches!(self, Ptr::NonPtr)
    }

    fn same_shape(&self, other: &Ptr) -> bool {
        match (self, other) {
            (Ptr::NonPtr, Ptr::NonPtr) => true,
            (Ptr::FunPtr(_), Ptr::FunPtr(_)) => true,
            (Ptr::DataPtr(p1), Ptr::DataPtr(p2)) => p1.same_shape(p2),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArg {
    pub name: String,
    pub value: Exp,
    pub ptr: Ptr,
}

impl CallArg {
    pub fn new(name: &str, value: Exp) -> Self {
        CallArg { name: name.to_string(), value, ptr: Ptr::NonPtr }
    }

    pub fn pointer(name: &str, value: Exp, ptr: Ptr) -> Self {
        CallArg { name: name.to_string(), value, ptr }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetVal {
    /// `None` for functions returning `void`.
    pub value: Option<Exp>,
    pub ptr: Ptr,
}

impl RetVal {
    pub fn void() -> Self {
        RetVal { value: None, ptr: Ptr::NonPtr }
    }

    pub fn value(value: Exp) -> Self {
        RetVal { value: Some(value), ptr: Ptr::NonPtr }
    }

    pub fn pointer(value: Exp, ptr: Ptr) -> Self {
        RetVal { value: Some(value), ptr }
    }

    fn same_shape(&self, other: &RetVal) -> bool {
        self.value.is_some() == other.value.is_some() && self.ptr.same_shape(&other.ptr)
    }
}

/// A pointer whose lifetime does not coincide with the call, such as
/// state that persists between calls. It may become accessible only
/// during the call (opening), stop being accessible (closing), or be
/// accessible on both sides (changing).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraPtr {
    pub name: String,
    pub ptr: u64,
    pub accessible_in: bool,
    pub accessible_out: bool,
    pub pointee: Pointee,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallRecord {
    pub function: String,
    /// Source line of the call site.
    pub line: u32,
    pub args: Vec<CallArg>,
    pub extra_ptrs: BTreeMap<u64, ExtraPtr>,
    pub ret: RetVal,
    pub call_context: Vec<Exp>,
    pub return_context: Vec<Exp>,
    pub returned: bool,
}

/// Two records are equal when they call the same function with
/// structurally equal argument, extra pointer, and return values.
/// The call site and the contexts do not take part.
impl PartialEq for CallRecord {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function
            && self.args == other.args
            && self.extra_ptrs == other.extra_ptrs
            && self.ret == other.ret
    }
}

impl Eq for CallRecord {}

impl CallRecord {
    /// True if both records invoke the same function with arguments
    /// and return values of the same shape, whatever the symbolic
    /// values involved.
    pub fn same_invocation(&self, other: &CallRecord) -> bool {
        self.function == other.function
            && self.args.len() == other.args.len()
            && self.args.iter().zip(other.args.iter()).all(|(a1, a2)| a1.name == a2.name && a1.ptr.same_shape(&a2.ptr))
            && self.ret.same_shape(&other.ret)
    }

    /// True if rendering this record would need a value that was
    /// never resolved.
    pub fn has_pending(&self) -> bool {
        let ptr_pending = |ptr: &Ptr| match ptr {
            Ptr::DataPtr(pointee) => pointee.has_pending(),
            _ => false,
        };
        self.args.iter().any(|arg| ptr_pending(&arg.ptr))
            || ptr_pending(&self.ret.ptr)
            || self.extra_ptrs.values().any(|extra| extra.pointee.has_pending())
    }
}

/// A call that has been entered but has not yet returned. Only
/// `returning` produces a `CallRecord`, so records for calls that
/// never return cannot be constructed by accident.
#[derive(Clone, Debug)]
pub struct PendingCall {
    function: String,
    line: u32,
    args: Vec<CallArg>,
    extra_ptrs: BTreeMap<u64, ExtraPtr>,
    call_context: Vec<Exp>,
}

impl PendingCall {
    pub fn new(function: &str, line: u32) -> Self {
        PendingCall {
            function: function.to_string(),
            line,
            args: Vec::new(),
            extra_ptrs: BTreeMap::new(),
            call_context: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: CallArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn extra_ptr(mut self, key: u64, extra: ExtraPtr) -> Self {
        self.extra_ptrs.insert(key, extra);
        self
    }

    pub fn call_context(mut self, context: Vec<Exp>) -> Self {
        self.call_context = context;
        self
    }

    pub fn returning(self, ret: RetVal, return_context: Vec<Exp>) -> CallRecord {
        CallRecord {
            function: self.function,
            line: self.line,
            args: self.args,
            extra_ptrs: self.extra_ptrs,
            ret,
            call_context: self.call_context,
            return_context,
            returned: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(len_out: Exp) -> Pointee {
        Pointee::new("struct packet")
            .with_in(Traced::Resolved(Exp::var("pkt")))
            .with_out(Traced::Resolved(Exp::var("pkt")))
            .with_field(4, Pointee::field("len", 4).with_out(Traced::Resolved(len_out)))
    }

    fn receive(ret: u64, len_out: Exp) -> CallRecord {
        PendingCall::new("receive", 10)
            .arg(CallArg::new("port", Exp::bits(1, 16)))
            .arg(CallArg::pointer("p", Exp::var("p_addr"), Ptr::DataPtr(packet(len_out))))
            .returning(RetVal::value(Exp::bits(ret, 32)), vec![])
    }

    #[test]
    fn equality_ignores_site_and_context() {
        let a = receive(0, Exp::bits(64, 16));
        let mut b = receive(0, Exp::bits(64, 16));
        b.line = 99;
        b.call_context = vec![Exp::Bool(true)];
        assert_eq!(a, b);
        assert!(a.returned);
    }

    #[test]
    fn values_distinguish_but_shape_groups() {
        let a = receive(0, Exp::bits(64, 16));
        let b = receive(1, Exp::bits(64, 16));
        let c = receive(0, Exp::var("len"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.same_invocation(&b));
        assert!(a.same_invocation(&c));
    }

    #[test]
    fn shape_differences() {
        let a = receive(0, Exp::bits(64, 16));

        let mut void = a.clone();
        void.ret = RetVal::void();
        assert!(!a.same_invocation(&void));

        let mut fewer_fields = a.clone();
        fewer_fields.args[1].ptr = Ptr::DataPtr(Pointee::new("struct packet").with_in(Traced::Resolved(Exp::var("pkt"))));
        assert!(!a.same_invocation(&fewer_fields));

        let mut fun_ptr = a.clone();
        fun_ptr.args[1].ptr = Ptr::FunPtr("handler".to_string());
        assert!(!a.same_invocation(&fun_ptr));

        let mut other = a.clone();
        other.function = "send".to_string();
        assert!(!a.same_invocation(&other));
    }

    #[test]
    fn pending_is_found_in_fields() {
        let a = receive(0, Exp::bits(64, 16));
        assert!(!a.has_pending());
        let mut b = a.clone();
        b.args[1].ptr = Ptr::DataPtr(packet(Exp::bits(0, 16)).with_field(8, Pointee::field("data", 8).with_out(Traced::Pending)));
        assert!(b.has_pending());
    }
}
