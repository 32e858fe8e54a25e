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

//! Symbolic values as they appear in recorded call paths. These are
//! an opaque view of the interpreter's expressions: enough structure
//! to compare values for equality, print them in SMT-LIB syntax, and
//! read them back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

use crate::sexp::Sexp;
use crate::lexer::NAT_REGEX;
use crate::sexp_lexer::ATOM_REGEX;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exp {
    /// A named symbolic input, e.g. a symbolic array created for a
    /// program variable.
    Var(String),
    /// A bitvector literal of the given width (at most 64 bits).
    Bits64(u64, u32),
    Bool(bool),
    Not(Box<Exp>),
    Bvnot(Box<Exp>),
    Bvneg(Box<Exp>),
    Eq(Box<Exp>, Box<Exp>),
    Neq(Box<Exp>, Box<Exp>),
    And(Box<Exp>, Box<Exp>),
    Or(Box<Exp>, Box<Exp>),
    Bvand(Box<Exp>, Box<Exp>),
    Bvor(Box<Exp>, Box<Exp>),
    Bvxor(Box<Exp>, Box<Exp>),
    Bvadd(Box<Exp>, Box<Exp>),
    Bvsub(Box<Exp>, Box<Exp>),
    Bvmul(Box<Exp>, Box<Exp>),
    Bvudiv(Box<Exp>, Box<Exp>),
    Bvurem(Box<Exp>, Box<Exp>),
    Bvult(Box<Exp>, Box<Exp>),
    Bvule(Box<Exp>, Box<Exp>),
    Bvslt(Box<Exp>, Box<Exp>),
    Bvsle(Box<Exp>, Box<Exp>),
    Bvshl(Box<Exp>, Box<Exp>),
    Bvlshr(Box<Exp>, Box<Exp>),
    Concat(Box<Exp>, Box<Exp>),
    Select(Box<Exp>, Box<Exp>),
    Extract(u32, u32, Box<Exp>),
    ZeroExtend(u32, Box<Exp>),
    SignExtend(u32, Box<Exp>),
    Ite(Box<Exp>, Box<Exp>, Box<Exp>),
}

fn write_bits64(buf: &mut dyn Write, bits: u64, len: u32) -> std::io::Result<()> {
    if len % 4 == 0 {
        write!(buf, "#x{:0width$x}", bits, width = (len / 4) as usize)
    } else {
        write!(buf, "#b{:0width$b}", bits, width = len as usize)
    }
}

/// Names that would read back as something other than a variable
/// are written between bars.
fn write_var(buf: &mut dyn Write, name: &str) -> std::io::Result<()> {
    let bare = name != "true"
        && name != "false"
        && !NAT_REGEX.is_match(name)
        && ATOM_REGEX.find(name).map_or(false, |mat| mat.end() == name.len());
    if bare {
        write!(buf, "{}", name)
    } else {
        write!(buf, "|{}|", name)
    }
}

fn write_unop(buf: &mut dyn Write, op: &str, exp: &Exp) -> std::io::Result<()> {
    write!(buf, "({} ", op)?;
    write_exp(buf, exp)?;
    write!(buf, ")")
}

fn write_binop(buf: &mut dyn Write, op: &str, lhs: &Exp, rhs: &Exp) -> std::io::Result<()> {
    write!(buf, "({} ", op)?;
    write_exp(buf, lhs)?;
    write!(buf, " ")?;
    write_exp(buf, rhs)?;
    write!(buf, ")")
}

pub fn write_exp(buf: &mut dyn Write, exp: &Exp) -> std::io::Result<()> {
    use Exp::*;
    match exp {
        Var(v) => write_var(buf, v),
        Bits64(bits, len) => write_bits64(buf, *bits, *len),
        Bool(b) => write!(buf, "{}", b),
        Not(exp) => write_unop(buf, "not", exp),
        Bvnot(exp) => write_unop(buf, "bvnot", exp),
        Bvneg(exp) => write_unop(buf, "bvneg", exp),
        Eq(lhs, rhs) => write_binop(buf, "=", lhs, rhs),
        Neq(lhs, rhs) => {
            write!(buf, "(not ")?;
            write_binop(buf, "=", lhs, rhs)?;
            write!(buf, ")")
        }
        And(lhs, rhs) => write_binop(buf, "and", lhs, rhs),
        Or(lhs, rhs) => write_binop(buf, "or", lhs, rhs),
        Bvand(lhs, rhs) => write_binop(buf, "bvand", lhs, rhs),
        Bvor(lhs, rhs) => write_binop(buf, "bvor", lhs, rhs),
        Bvxor(lhs, rhs) => write_binop(buf, "bvxor", lhs, rhs),
        Bvadd(lhs, rhs) => write_binop(buf, "bvadd", lhs, rhs),
        Bvsub(lhs, rhs) => write_binop(buf, "bvsub", lhs, rhs),
        Bvmul(lhs, rhs) => write_binop(buf, "bvmul", lhs, rhs),
        Bvudiv(lhs, rhs) => write_binop(buf, "bvudiv", lhs, rhs),
        Bvurem(lhs, rhs) => write_binop(buf, "bvurem", lhs, rhs),
        Bvult(lhs, rhs) => write_binop(buf, "bvult", lhs, rhs),
        Bvule(lhs, rhs) => write_binop(buf, "bvule", lhs, rhs),
        Bvslt(lhs, rhs) => write_binop(buf, "bvslt", lhs, rhs),
        Bvsle(lhs, rhs) => write_binop(buf, "bvsle", lhs, rhs),
        Bvshl(lhs, rhs) => write_binop(buf, "bvshl", lhs, rhs),
        Bvlshr(lhs, rhs) => write_binop(buf, "bvlshr", lhs, rhs),
        Concat(lhs, rhs) => write_binop(buf, "concat", lhs, rhs),
        Select(array, index) => write_binop(buf, "select", array, index),
        Extract(i, j, exp) => {
            write!(buf, "((_ extract {} {}) ", i, j)?;
            write_exp(buf, exp)?;
            write!(buf, ")")
        }
        ZeroExtend(n, exp) => {
            write!(buf, "((_ zero_extend {}) ", n)?;
            write_exp(buf, exp)?;
            write!(buf, ")")
        }
        SignExtend(n, exp) => {
            write!(buf, "((_ sign_extend {}) ", n)?;
            write_exp(buf, exp)?;
            write!(buf, ")")
        }
        Ite(cond, then_exp, else_exp) => {
            write!(buf, "(ite ")?;
            write_exp(buf, cond)?;
            write!(buf, " ")?;
            write_exp(buf, then_exp)?;
            write!(buf, " ")?;
            write_exp(buf, else_exp)?;
            write!(buf, ")")
        }
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut buf = Vec::new();
        write_exp(&mut buf, self).map_err(|_| fmt::Error)?;
        write!(f, "{}", String::from_utf8_lossy(&buf))
    }
}

fn bits_from_str(digits: &str, radix: u32, bits_per_digit: u32) -> Option<Exp> {
    let len = digits.len() as u32 * bits_per_digit;
    if len > 64 || len == 0 {
        return None;
    }
    u64::from_str_radix(digits, radix).ok().map(|bits| Exp::Bits64(bits, len))
}

fn indexed<'a, 's>(sexp: &'a Sexp<'s>, op: &str) -> Option<&'a [Sexp<'s>]> {
    match sexp.as_list()? {
        [underscore, name, indices @ ..] if underscore.is_atom("_") && name.is_atom(op) => Some(indices),
        _ => None,
    }
}

impl Exp {
    /// Read back an expression written by `write_exp`.
    pub fn from_sexp(sexp: &Sexp) -> Option<Exp> {
        use Exp::*;
        match sexp {
            Sexp::Atom("true") => Some(Bool(true)),
            Sexp::Atom("false") => Some(Bool(false)),
            Sexp::Atom(v) => {
                let v = v.strip_prefix('|').and_then(|v| v.strip_suffix('|')).unwrap_or(v);
                Some(Var(v.to_string()))
            }
            Sexp::Hex(h) => bits_from_str(h, 16, 4),
            Sexp::Bin(b) => bits_from_str(b, 2, 1),
            Sexp::List(xs) => {
                let (f, args) = xs.split_first()?;
                if let Some(indices) = indexed(f, "extract") {
                    let (i, j) = (indices.first()?.as_u64()? as u32, indices.get(1)?.as_u64()? as u32);
                    return Some(Extract(i, j, Box::new(Exp::from_sexp(args.first()?)?)));
                }
                if let Some(indices) = indexed(f, "zero_extend") {
                    let n = indices.first()?.as_u64()? as u32;
                    return Some(ZeroExtend(n, Box::new(Exp::from_sexp(args.first()?)?)));
                }
                if let Some(indices) = indexed(f, "sign_extend") {
                    let n = indices.first()?.as_u64()? as u32;
                    return Some(SignExtend(n, Box::new(Exp::from_sexp(args.first()?)?)));
                }
                let args = args.iter().map(Exp::from_sexp).collect::<Option<Vec<_>>>()?;
                let mut args = args.into_iter().map(Box::new);
                let exp = match (f.as_str()?, args.len()) {
                    ("not", 1) => match *args.next()? {
                        Eq(lhs, rhs) => Neq(lhs, rhs),
                        exp => Not(Box::new(exp)),
                    },
                    ("bvnot", 1) => Bvnot(args.next()?),
                    ("bvneg", 1) => Bvneg(args.next()?),
                    ("ite", 3) => Ite(args.next()?, args.next()?, args.next()?),
                    (op, 2) => {
                        let (lhs, rhs) = (args.next()?, args.next()?);
                        match op {
                            "=" => Eq(lhs, rhs),
                            "and" => And(lhs, rhs),
                            "or" => Or(lhs, rhs),
                            "bvand" => Bvand(lhs, rhs),
                            "bvor" => Bvor(lhs, rhs),
                            "bvxor" => Bvxor(lhs, rhs),
                            "bvadd" => Bvadd(lhs, rhs),
                            "bvsub" => Bvsub(lhs, rhs),
                            "bvmul" => Bvmul(lhs, rhs),
                            "bvudiv" => Bvudiv(lhs, rhs),
                            "bvurem" => Bvurem(lhs, rhs),
                            "bvult" => Bvult(lhs, rhs),
                            "bvule" => Bvule(lhs, rhs),
                            "bvslt" => Bvslt(lhs, rhs),
                            "bvsle" => Bvsle(lhs, rhs),
                            "bvshl" => Bvshl(lhs, rhs),
                            "bvlshr" => Bvlshr(lhs, rhs),
                            "concat" => Concat(lhs, rhs),
                            "select" => Select(lhs, rhs),
                            _ => return None,
                        }
                    }
                    _ => return None,
                };
                Some(exp)
            }
            _ => None,
        }
    }

    pub fn var(name: &str) -> Self {
        Exp::Var(name.to_string())
    }

    pub fn bits(bits: u64, len: u32) -> Self {
        Exp::Bits64(bits, len)
    }
}
