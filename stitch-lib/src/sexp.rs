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

//! A small reader for the S-expressions produced by the structured
//! call path writer. Atoms and strings borrow from the input.

use std::fmt;
use std::iter::Peekable;

use crate::error::Error;
use crate::sexp_lexer::{SexpLexer, Tok};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sexp<'s> {
    Atom(&'s str),
    String(&'s str),
    I128(i128),
    Hex(&'s str),
    Bin(&'s str),
    List(Vec<Sexp<'s>>),
}

impl<'s> fmt::Display for Sexp<'s> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Sexp::*;
        match self {
            Atom(s) => write!(f, "{}", s),
            String(s) => write!(f, "\"{}\"", s),
            I128(i) => write!(f, "{}", i),
            Hex(b) => write!(f, "#x{}", b),
            Bin(b) => write!(f, "#b{}", b),
            List(xs) => {
                write!(f, "(")?;
                let mut first = true;
                for x in xs {
                    if !first {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", x)?;
                    first = false;
                }
                write!(f, ")")
            }
        }
    }
}

impl<'s> Sexp<'s> {
    pub fn is_fn(&self, name: &str, args: usize) -> bool {
        match self {
            Sexp::List(sexps) if sexps.len() > args => {
                if let Sexp::Atom(f) = sexps[0] {
                    f == name
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub fn is_atom(&self, s: &str) -> bool {
        match self {
            Sexp::Atom(atom) => *atom == s,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&'s str> {
        match self {
            Sexp::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&'s str> {
        match self {
            Sexp::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Sexp::I128(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Sexp::List(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(&Self, &Self)> {
        match self {
            Sexp::List(xs) if xs.len() == 2 => Some((&xs[0], &xs[1])),
            _ => None,
        }
    }

    /// For a tagged pair `(tag value)` returns the value, as used by
    /// every field of a structured call record.
    pub fn tagged(&self, tag: &str) -> Option<&Self> {
        match self.as_pair() {
            Some((t, value)) if t.is_atom(tag) => Some(value),
            _ => None,
        }
    }

    /// Finds the first tagged pair `(tag value)` in a list of pairs.
    pub fn field(&self, tag: &str) -> Option<&Self> {
        self.as_list()?.iter().find_map(|sexp| sexp.tagged(tag))
    }

    pub fn dest_list(self) -> Option<Vec<Self>> {
        match self {
            Sexp::List(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn dest_cons(self) -> Option<(Self, Vec<Self>)> {
        match self {
            Sexp::List(mut list) if !list.is_empty() => {
                let tl = list.drain(1..).collect();
                let hd = list.remove(0);
                Some((hd, tl))
            }
            _ => None,
        }
    }

    pub fn dest_fn(self, name: &str) -> Option<Vec<Self>> {
        match self.dest_cons() {
            Some((f, xs)) if f.is_atom(name) => Some(xs),
            _ => None,
        }
    }
}

fn parse_one<'s, I>(toks: &mut Peekable<I>) -> Result<Sexp<'s>, Error>
where
    I: Iterator<Item = Result<(usize, Tok<'s>, usize), crate::lexer::LexError>>,
{
    // Lists are built with an explicit stack so deeply nested
    // pointee descriptions cannot exhaust the call stack.
    let mut stack: Vec<Vec<Sexp<'s>>> = Vec::new();
    loop {
        let (pos, tok, _) = match toks.next() {
            Some(span) => span?,
            None => return Err(Error::Parse("unexpected end of input".to_string())),
        };
        let atom = match tok {
            Tok::Lparen => {
                stack.push(Vec::new());
                continue;
            }
            Tok::Rparen => match stack.pop() {
                Some(xs) => Sexp::List(xs),
                None => return Err(Error::Parse(format!("unbalanced `)` at position {}", pos))),
            },
            Tok::Atom(a) => Sexp::Atom(a),
            Tok::String(s) => Sexp::String(s),
            Tok::Hex(h) => Sexp::Hex(h),
            Tok::Bin(b) => Sexp::Bin(b),
            Tok::Nat(n) => match n.parse::<i128>() {
                Ok(n) => Sexp::I128(n),
                Err(_) => return Err(Error::Parse(format!("integer {} out of range at position {}", n, pos))),
            },
        };
        match stack.last_mut() {
            Some(xs) => xs.push(atom),
            None => return Ok(atom),
        }
    }
}

/// Parse exactly one S-expression.
pub fn parse(input: &str) -> Result<Sexp<'_>, Error> {
    let mut toks = SexpLexer::new(input).peekable();
    let sexp = parse_one(&mut toks)?;
    match toks.next() {
        None => Ok(sexp),
        Some(Ok((pos, tok, _))) => Err(Error::Parse(format!("trailing {} at position {}", tok, pos))),
        Some(Err(err)) => Err(err.into()),
    }
}

/// Parse a sequence of top-level S-expressions, such as a call path
/// written one call per expression.
pub fn parse_many(input: &str) -> Result<Vec<Sexp<'_>>, Error> {
    let mut toks = SexpLexer::new(input).peekable();
    let mut sexps = Vec::new();
    while toks.peek().is_some() {
        sexps.push(parse_one(&mut toks)?)
    }
    Ok(sexps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested() {
        let sexp = parse("((fun_name \"f\") (args ()) (ret ()))").unwrap();
        assert_eq!(sexp.field("fun_name").and_then(Sexp::as_string), Some("f"));
        assert_eq!(sexp.field("args").and_then(Sexp::as_list).map(|xs| xs.len()), Some(0));
        assert!(sexp.field("missing").is_none());
    }

    #[test]
    fn parse_display_agree() {
        let input = "(bvadd |x y| #x0f (_ extract 7 0) -3)";
        let sexp = parse(input).unwrap();
        assert_eq!(sexp.to_string(), input);
        assert!(sexp.is_fn("bvadd", 2));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse("(a b"), Err(Error::Parse(_))));
        assert!(matches!(parse(")"), Err(Error::Parse(_))));
        assert!(matches!(parse("(a) b"), Err(Error::Parse(_))));
        assert!(matches!(parse("(a |)"), Err(Error::Lex(_))));
    }

    #[test]
    fn parse_many_with_comments() {
        let sexps = parse_many("; id: 1(10)\n(a)\n; id: 2(11)\n(b)\n").unwrap();
        assert_eq!(sexps.len(), 2);
        assert!(sexps[1].is_fn("b", 0));
        assert!(parse_many("").unwrap().is_empty());
    }
}
