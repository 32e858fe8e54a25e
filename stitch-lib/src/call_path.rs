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

//! Per-state call path recording, and the two encodings of a call
//! path: a line-oriented human readable form, and a structured
//! S-expression form meant to be read by the contract stitching
//! tools.
//!
//! Both writers are partial-failure aware. A record that refers to a
//! traced value that was never resolved is not written at all, and
//! the writer returns `Ok(false)` so the caller knows the output was
//! truncated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::call::*;
use crate::error::Error;
use crate::exp::{write_exp, Exp};
use crate::log;
use crate::merge::StateId;
use crate::sexp::{self, Sexp};

/// The calls made along one execution state, and the path
/// constraints that held when that state terminated.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CallPath {
    pub calls: Vec<CallRecord>,
    pub constraints: Vec<Exp>,
}

impl CallPath {
    pub fn new() -> Self {
        CallPath::default()
    }
}

/// Accumulates the call path of every live execution state. The
/// scheduler owns the states; this only holds their paths, keyed by
/// state id.
#[derive(Default)]
pub struct CallPathRecorder {
    paths: HashMap<StateId, CallPath>,
}

impl CallPathRecorder {
    pub fn new() -> Self {
        CallPathRecorder::default()
    }

    pub fn record_call(&mut self, state: StateId, record: CallRecord) {
        log_from!(state.0, log::CALL_PATH, &format!("Recorded call to {}", record.function));
        self.paths.entry(state).or_default().calls.push(record)
    }

    /// A forked state starts with a copy of its parent's path.
    pub fn fork(&mut self, parent: StateId, child: StateId) {
        let path = self.paths.get(&parent).cloned().unwrap_or_default();
        self.paths.insert(child, path);
    }

    pub fn path(&self, state: StateId) -> Option<&CallPath> {
        self.paths.get(&state)
    }

    /// Removes the path of a terminated state, attaching the state's
    /// final constraints.
    pub fn finish(&mut self, state: StateId, constraints: Vec<Exp>) -> CallPath {
        let mut path = self.paths.remove(&state).unwrap_or_default();
        path.constraints = constraints;
        path
    }

    /// Drops the path of a state which was absorbed by a merge.
    pub fn discard(&mut self, state: StateId) {
        self.paths.remove(&state);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn write_traced(buf: &mut dyn Write, traced: &Traced) -> std::io::Result<bool> {
    match traced {
        Traced::Untraced => Ok(true),
        Traced::Pending => Ok(false),
        Traced::Resolved(exp) => {
            write_exp(buf, exp)?;
            Ok(true)
        }
    }
}

fn write_arg_pointee_text(buf: &mut dyn Write, pointee: &Pointee) -> std::io::Result<bool> {
    if !pointee.is_traced() {
        write!(buf, "[...]")?;
        return Ok(true);
    }
    write!(buf, "[")?;
    if !write_traced(buf, &pointee.value_in)? {
        return Ok(false);
    }
    write!(buf, "->")?;
    if !write_traced(buf, &pointee.value_out)? {
        return Ok(false);
    }
    write!(buf, "]")?;
    for field in pointee.fields.values() {
        write!(buf, "[{}:", field.name)?;
        if field.is_traced() {
            if !write_traced(buf, &field.value_in)? {
                return Ok(false);
            }
            write!(buf, "->")?;
            if !write_traced(buf, &field.value_out)? {
                return Ok(false);
            }
            write!(buf, "]")?
        } else {
            write!(buf, "(...)]")?
        }
    }
    Ok(true)
}

fn write_ret_pointee_text(buf: &mut dyn Write, pointee: &Pointee) -> std::io::Result<bool> {
    if !pointee.value_out.is_traced() {
        write!(buf, "[...]")?;
        return Ok(true);
    }
    write!(buf, "[")?;
    if !write_traced(buf, &pointee.value_out)? {
        return Ok(false);
    }
    write!(buf, "]")?;
    for field in pointee.fields.values() {
        write!(buf, "[{}:", field.name)?;
        if field.value_out.is_traced() {
            if !write_traced(buf, &field.value_out)? {
                return Ok(false);
            }
            write!(buf, "]")?
        } else {
            write!(buf, "(...)]")?
        }
    }
    Ok(true)
}

fn write_call_text_unbuffered(buf: &mut dyn Write, call: &CallRecord) -> std::io::Result<bool> {
    write!(buf, "{}:{}(", call.line, call.function)?;
    for (i, arg) in call.args.iter().enumerate() {
        if i > 0 {
            write!(buf, ",")?
        }
        write!(buf, "{}:", arg.name)?;
        write_exp(buf, &arg.value)?;
        match &arg.ptr {
            Ptr::NonPtr => (),
            Ptr::FunPtr(name) => write!(buf, "&{}", name)?,
            Ptr::DataPtr(pointee) => {
                write!(buf, "&")?;
                if !write_arg_pointee_text(buf, pointee)? {
                    return Ok(false);
                }
            }
        }
    }
    write!(buf, ") -> ")?;
    match &call.ret.value {
        None => write!(buf, "[]")?,
        Some(value) => {
            write_exp(buf, value)?;
            match &call.ret.ptr {
                Ptr::NonPtr => (),
                Ptr::FunPtr(name) => write!(buf, "&{}", name)?,
                Ptr::DataPtr(pointee) => {
                    write!(buf, "&")?;
                    if !write_ret_pointee_text(buf, pointee)? {
                        return Ok(false);
                    }
                }
            }
        }
    }
    writeln!(buf)?;
    for extra in call.extra_ptrs.values() {
        write!(buf, "extra: {}&{} = &[", extra.name, extra.ptr)?;
        if extra.pointee.value_in.is_traced() {
            if !write_traced(buf, &extra.pointee.value_in)? {
                return Ok(false);
            }
        } else {
            write!(buf, "(...)")?
        }
        if extra.pointee.value_out.is_traced() {
            write!(buf, " -> ")?;
            if !write_traced(buf, &extra.pointee.value_out)? {
                return Ok(false);
            }
        } else {
            write!(buf, "-> (...)")?
        }
        writeln!(buf, "]")?
    }
    Ok(true)
}

/// Write a single call in the human readable format. Nothing is
/// written if the call refers to an unresolved value.
pub fn write_call_text(buf: &mut dyn Write, call: &CallRecord) -> std::io::Result<bool> {
    assert!(call.returned, "Call to {} was recorded before it returned", call.function);
    let mut line = Vec::new();
    if write_call_text_unbuffered(&mut line, call)? {
        buf.write_all(&line)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Write the human readable trace of a whole path: every call in
/// order, then the path constraints. The call section stops at the
/// first call which cannot be rendered; the constraints are always
/// written.
pub fn write_call_path_text(buf: &mut dyn Write, path: &CallPath) -> std::io::Result<bool> {
    let mut complete = true;
    for call in &path.calls {
        if !write_call_text(buf, call)? {
            complete = false;
            break;
        }
    }
    writeln!(buf, ";;-- Constraints --")?;
    for constraint in &path.constraints {
        write_exp(buf, constraint)?;
        writeln!(buf)?
    }
    Ok(complete)
}

fn write_pointee_sexp(buf: &mut dyn Write, pointee: &Pointee, out: bool) -> std::io::Result<bool> {
    write!(buf, "((full (")?;
    if !write_traced(buf, if out { &pointee.value_out } else { &pointee.value_in })? {
        return Ok(false);
    }
    write!(buf, "))\n (sname ({}))\n", pointee.type_name)?;
    write!(buf, "(break_down (")?;
    for field in pointee.fields.values() {
        write!(buf, "\n((fname \"{}\") (value ", field.name)?;
        if !write_pointee_sexp(buf, field, out)? {
            return Ok(false);
        }
        write!(buf, ") (addr {}))", field.addr)?
    }
    write!(buf, ")))")?;
    Ok(true)
}

fn write_arg_sexp(buf: &mut dyn Write, arg: &CallArg) -> std::io::Result<bool> {
    write!(buf, "\n((aname \"{}\")\n(value ", arg.name)?;
    write_exp(buf, &arg.value)?;
    write!(buf, ")\n(ptr ")?;
    match &arg.ptr {
        Ptr::NonPtr => write!(buf, "Nonptr")?,
        Ptr::FunPtr(name) => write!(buf, "(Funptr \"{}\")", name)?,
        Ptr::DataPtr(pointee) if !pointee.is_traced() => write!(buf, "Apathptr")?,
        Ptr::DataPtr(pointee) => {
            write!(buf, "(Curioptr\n((before ")?;
            if !write_pointee_sexp(buf, pointee, false)? {
                return Ok(false);
            }
            write!(buf, ")\n(after ")?;
            if !write_pointee_sexp(buf, pointee, true)? {
                return Ok(false);
            }
            write!(buf, ")))\n")?
        }
    }
    write!(buf, "))")?;
    Ok(true)
}

fn write_ret_sexp(buf: &mut dyn Write, ret: &RetVal) -> std::io::Result<bool> {
    let value = match &ret.value {
        None => {
            write!(buf, "(ret ())")?;
            return Ok(true);
        }
        Some(value) => value,
    };
    write!(buf, "(ret (((value ")?;
    write_exp(buf, value)?;
    write!(buf, ")\n(ptr ")?;
    match &ret.ptr {
        Ptr::NonPtr => write!(buf, "Nonptr")?,
        Ptr::FunPtr(name) => write!(buf, "(Funptr \"{}\")", name)?,
        Ptr::DataPtr(pointee) if !pointee.is_traced() => write!(buf, "Apathptr")?,
        Ptr::DataPtr(pointee) => {
            write!(buf, "(Curioptr ((before ((full ()) (sname ()) (break_down ()))) (after ")?;
            if !write_pointee_sexp(buf, pointee, true)? {
                return Ok(false);
            }
            write!(buf, ")))\n")?
        }
    }
    write!(buf, "))))\n")?;
    Ok(true)
}

fn write_extra_ptr_sexp(buf: &mut dyn Write, extra: &ExtraPtr) -> std::io::Result<bool> {
    write!(buf, "\n((pname \"{}\")\n(value {})\n(ptee ", extra.name, extra.ptr)?;
    let complete = match (extra.accessible_in, extra.accessible_out) {
        (true, true) => {
            write!(buf, "(Changing (")?;
            let complete = write_pointee_sexp(buf, &extra.pointee, false)? && {
                writeln!(buf)?;
                write_pointee_sexp(buf, &extra.pointee, true)?
            };
            write!(buf, "))\n")?;
            complete
        }
        (true, false) => {
            write!(buf, "(Closing ")?;
            let complete = write_pointee_sexp(buf, &extra.pointee, false)?;
            write!(buf, ")\n")?;
            complete
        }
        (false, true) => {
            write!(buf, "(Opening ")?;
            let complete = write_pointee_sexp(buf, &extra.pointee, true)?;
            write!(buf, ")\n")?;
            complete
        }
        (false, false) => {
            warn!(format!(
                "Extra pointer {} must be accessible at the beginning of a call, at its end, or both",
                extra.name
            ));
            false
        }
    };
    if !complete {
        return Ok(false);
    }
    write!(buf, "))\n")?;
    Ok(true)
}

fn write_call_sexp_unbuffered(buf: &mut dyn Write, call: &CallRecord) -> std::io::Result<bool> {
    write!(buf, "((fun_name \"{}\")\n (args (", call.function)?;
    for arg in &call.args {
        if !write_arg_sexp(buf, arg)? {
            return Ok(false);
        }
    }
    write!(buf, "))\n(extra_ptrs (")?;
    for extra in call.extra_ptrs.values() {
        if !write_extra_ptr_sexp(buf, extra)? {
            return Ok(false);
        }
    }
    write!(buf, "))\n")?;
    if !write_ret_sexp(buf, &call.ret)? {
        return Ok(false);
    }
    write!(buf, "(call_context (")?;
    for exp in &call.call_context {
        writeln!(buf)?;
        write_exp(buf, exp)?
    }
    write!(buf, "))\n(ret_context (")?;
    for exp in &call.return_context {
        writeln!(buf)?;
        write_exp(buf, exp)?
    }
    write!(buf, ")))\n")?;
    Ok(true)
}

/// Write a single call as an S-expression. Nothing is written if the
/// call refers to an unresolved value, so the output is always well
/// formed.
pub fn write_call_sexp(buf: &mut dyn Write, call: &CallRecord) -> std::io::Result<bool> {
    assert!(call.returned, "Call to {} was recorded before it returned", call.function);
    let mut sexp = Vec::new();
    if write_call_sexp_unbuffered(&mut sexp, call)? {
        buf.write_all(&sexp)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Write every call of a path as a sequence of S-expressions,
/// stopping at the first call which cannot be rendered.
pub fn write_call_path_sexp(buf: &mut dyn Write, path: &[CallRecord]) -> std::io::Result<bool> {
    for call in path {
        if !write_call_sexp(buf, call)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn decode_err<T>(msg: &str) -> Result<T, Error> {
    Err(Error::Decode(msg.to_string()))
}

fn read_exp(sexp: &Sexp) -> Result<Exp, Error> {
    Exp::from_sexp(sexp).ok_or_else(|| Error::Decode(format!("bad symbolic value {}", sexp)))
}

fn read_name(sexp: &Sexp, tag: &str) -> Result<String, Error> {
    match sexp.field(tag).and_then(Sexp::as_string) {
        Some(name) => Ok(name.to_string()),
        None => decode_err(&format!("missing {}", tag)),
    }
}

/// Reads one of the two pointee views written by `write_pointee_sexp`.
/// Field offsets are not part of the encoding, so fields are keyed by
/// their position.
fn read_pointee(sexp: &Sexp, out: bool) -> Result<Pointee, Error> {
    let full = match sexp.field("full").and_then(Sexp::as_list) {
        Some([]) => Traced::Untraced,
        Some([exp]) => Traced::Resolved(read_exp(exp)?),
        _ => return decode_err("bad full value in pointee"),
    };
    let type_name = match sexp.field("sname").and_then(Sexp::as_list) {
        Some(words) => words.iter().map(|w| w.to_string()).collect::<Vec<_>>().join(" "),
        None => return decode_err("missing sname in pointee"),
    };
    let mut fields = BTreeMap::new();
    let break_down = sexp.field("break_down").and_then(Sexp::as_list).ok_or(Error::Decode("missing break_down".to_string()))?;
    for (i, field) in break_down.iter().enumerate() {
        let value = field.field("value").ok_or(Error::Decode("missing field value".to_string()))?;
        let mut pointee = read_pointee(value, out)?;
        pointee.name = read_name(field, "fname")?;
        pointee.addr = field.field("addr").and_then(Sexp::as_u64).unwrap_or(0);
        fields.insert(i as i64, pointee);
    }
    let (value_in, value_out) = if out { (Traced::Untraced, full) } else { (full, Traced::Untraced) };
    Ok(Pointee { name: String::new(), type_name, addr: 0, value_in, value_out, fields })
}

/// Combine the before and after views of the same pointee.
fn combine_pointees(mut before: Pointee, after: Pointee) -> Pointee {
    before.value_out = after.value_out;
    let mut after_fields = after.fields;
    for (offset, field) in before.fields.iter_mut() {
        if let Some(after_field) = after_fields.remove(offset) {
            *field = combine_pointees(field.clone(), after_field)
        }
    }
    before.fields.extend(after_fields);
    before
}

fn read_ptr(sexp: &Sexp) -> Result<Ptr, Error> {
    if sexp.is_atom("Nonptr") {
        return Ok(Ptr::NonPtr);
    }
    if sexp.is_atom("Apathptr") {
        return Ok(Ptr::DataPtr(Pointee::new("")));
    }
    if let Some(name) = sexp.tagged("Funptr").and_then(Sexp::as_string) {
        return Ok(Ptr::FunPtr(name.to_string()));
    }
    if let Some(views) = sexp.tagged("Curioptr") {
        let before = views.field("before").ok_or(Error::Decode("missing before".to_string()))?;
        let after = views.field("after").ok_or(Error::Decode("missing after".to_string()))?;
        return Ok(Ptr::DataPtr(combine_pointees(read_pointee(before, false)?, read_pointee(after, true)?)));
    }
    decode_err(&format!("bad pointer kind {}", sexp))
}

fn read_extra_ptr(sexp: &Sexp) -> Result<ExtraPtr, Error> {
    let name = read_name(sexp, "pname")?;
    let ptr = sexp.field("value").and_then(Sexp::as_u64).ok_or(Error::Decode("bad extra pointer value".to_string()))?;
    let ptee = sexp.field("ptee").ok_or(Error::Decode("missing ptee".to_string()))?;
    let (accessible_in, accessible_out, pointee) = if let Some(views) = ptee.tagged("Changing") {
        match views.as_list() {
            Some([before, after]) => (true, true, combine_pointees(read_pointee(before, false)?, read_pointee(after, true)?)),
            _ => return decode_err("Changing needs two pointee views"),
        }
    } else if let Some(before) = ptee.tagged("Closing") {
        (true, false, read_pointee(before, false)?)
    } else if let Some(after) = ptee.tagged("Opening") {
        (false, true, read_pointee(after, true)?)
    } else {
        return decode_err("bad extra pointer access");
    };
    Ok(ExtraPtr { name, ptr, accessible_in, accessible_out, pointee })
}

/// Decode a call written by `write_call_sexp`. The call site is not
/// part of the structured encoding and is left as zero.
pub fn read_call_sexp(sexp: &Sexp) -> Result<CallRecord, Error> {
    let function = read_name(sexp, "fun_name")?;

    let mut args = Vec::new();
    for arg in sexp.field("args").and_then(Sexp::as_list).ok_or(Error::Decode("missing args".to_string()))? {
        let value = read_exp(arg.field("value").ok_or(Error::Decode("missing arg value".to_string()))?)?;
        let ptr = read_ptr(arg.field("ptr").ok_or(Error::Decode("missing arg ptr".to_string()))?)?;
        args.push(CallArg { name: read_name(arg, "aname")?, value, ptr })
    }

    let mut extra_ptrs = BTreeMap::new();
    for extra in sexp.field("extra_ptrs").and_then(Sexp::as_list).ok_or(Error::Decode("missing extra_ptrs".to_string()))? {
        let extra = read_extra_ptr(extra)?;
        extra_ptrs.insert(extra.ptr, extra);
    }

    let ret = match sexp.field("ret").and_then(Sexp::as_list) {
        Some([]) => RetVal::void(),
        Some([ret]) => {
            let value = read_exp(ret.field("value").ok_or(Error::Decode("missing ret value".to_string()))?)?;
            let ptr = read_ptr(ret.field("ptr").ok_or(Error::Decode("missing ret ptr".to_string()))?)?;
            RetVal { value: Some(value), ptr }
        }
        _ => return decode_err("bad ret"),
    };

    let context = |tag: &str| -> Result<Vec<Exp>, Error> {
        match sexp.field(tag).and_then(Sexp::as_list) {
            Some(exps) => exps.iter().map(read_exp).collect(),
            None => decode_err(&format!("missing {}", tag)),
        }
    };

    Ok(CallRecord {
        function,
        line: 0,
        args,
        extra_ptrs,
        ret,
        call_context: context("call_context")?,
        return_context: context("ret_context")?,
        returned: true,
    })
}

/// Decode a sequence of calls written by `write_call_path_sexp`.
pub fn read_call_path_sexp(input: &str) -> Result<Vec<CallRecord>, Error> {
    sexp::parse_many(input)?.iter().map(read_call_sexp).collect()
}
