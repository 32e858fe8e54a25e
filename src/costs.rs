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

use std::fs::File;
use std::io::{self, BufReader};
use std::process::exit;

use stitch_lib::cost::CostTotals;

mod opts;

fn main() {
    let code = stitch_main();
    exit(code)
}

fn stitch_main() -> i32 {
    let mut opts = opts::common_opts();
    opts.optflag("w", "worst", "only print the worst case path");

    let matches = opts::parse(&opts);

    let mut totals = CostTotals::new();
    if matches.free.is_empty() {
        let stdin = io::stdin();
        if let Err(e) = totals.read_from(stdin.lock()) {
            eprintln!("<stdin>: {}", e);
            return 1;
        }
    }
    for file in &matches.free {
        let result = File::open(file).map_err(Into::into).and_then(|fd| totals.read_from(BufReader::new(fd)));
        if let Err(e) = result {
            eprintln!("{}: {}", file, e);
            return 1;
        }
    }

    if !matches.opt_present("worst") {
        for (path_id, total) in totals.iter() {
            println!("{} {}", path_id, total)
        }
    }

    match totals.worst_case() {
        Some((path_id, total)) => {
            println!("worst case: path {} with cost {}", path_id, total);
            0
        }
        None => {
            eprintln!("No costs given");
            1
        }
    }
}
