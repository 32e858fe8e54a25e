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

//! Aggregation of per-call costs into per-path totals. Cost lines
//! have the form `<path id> <cost>`. A negative cost means the cost
//! of that component is unknown, and poisons the total of its path
//! to -1, as does overflow.

use std::collections::BTreeMap;
use std::io::BufRead;

use crate::error::Error;

#[derive(Clone, Debug, Default)]
pub struct CostTotals {
    totals: BTreeMap<u32, i64>,
}

impl CostTotals {
    pub fn new() -> Self {
        CostTotals::default()
    }

    pub fn add(&mut self, path_id: u32, cost: i64) {
        let total = self.totals.entry(path_id).or_insert(0);
        *total = if *total < 0 || cost < 0 { -1 } else { total.checked_add(cost).unwrap_or(-1) }
    }

    pub fn total(&self, path_id: u32) -> Option<i64> {
        self.totals.get(&path_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, i64)> + '_ {
        self.totals.iter().map(|(id, total)| (*id, *total))
    }

    /// The path with the largest total. Ties go to the lowest path id.
    pub fn worst_case(&self) -> Option<(u32, i64)> {
        self.iter().fold(None, |worst, (id, total)| match worst {
            Some((_, max)) if max >= total => worst,
            _ => Some((id, total)),
        })
    }

    pub fn parse_line(line: &str) -> Result<(u32, i64), Error> {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some(id), Some(cost), None) => {
                let id = id.parse::<u32>().map_err(|e| Error::Parse(format!("bad path id {}: {}", id, e)))?;
                let cost = cost.parse::<i64>().map_err(|e| Error::Parse(format!("bad cost {}: {}", cost, e)))?;
                Ok((id, cost))
            }
            _ => Err(Error::Parse(format!("expected `<path id> <cost>`, found `{}`", line))),
        }
    }

    /// Add every cost line from `input`. Blank lines are skipped.
    pub fn read_from<R: BufRead>(&mut self, input: R) -> Result<(), Error> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (id, cost) = Self::parse_line(&line)?;
            self.add(id, cost)
        }
        Ok(())
    }
}
