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

use crossbeam::queue::SegQueue;
use crossbeam::thread;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use stitch_lib::archive::{archive_files, ArchivedPath};
use stitch_lib::error::Error;
use stitch_lib::log;
use stitch_lib::output::OutputDir;

mod opts;
use opts::CommonOpts;

fn main() {
    let code = stitch_main();
    exit(code)
}

/// Load every archive in `files`, spreading the work over
/// `num_threads` workers. Failures are returned alongside the file
/// that caused them.
fn load_archives(files: &[PathBuf], num_threads: usize) -> SegQueue<Result<ArchivedPath, (PathBuf, Error)>> {
    let queue = SegQueue::new();
    let next = AtomicUsize::new(0);

    let result = thread::scope(|scope| {
        for _ in 0..num_threads.max(1) {
            scope.spawn(|_| loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let file = match files.get(i) {
                    Some(file) => file,
                    None => break,
                };
                queue.push(ArchivedPath::from_file(file).map_err(|e| (file.clone(), e)))
            });
        }
    });

    if result.is_err() {
        eprintln!("A worker thread panicked while loading archives");
        exit(1)
    }
    queue
}

fn stitch_main() -> i32 {
    let mut opts = opts::common_opts();
    opts.reqopt("i", "input", "directory containing call-path archives", "DIR");
    opts.optflag("", "traces", "also write a human readable trace for every path");
    opts.optflag("", "text", "dump prefixes in the human readable format");

    let matches = opts::parse(&opts);
    let CommonOpts { num_threads, config } = opts::parse_common(&opts, &matches);

    let input = matches.opt_str("input").unwrap_or_else(|| opts::print_usage(&opts, 1));
    let output = matches.opt_str("output").unwrap_or_else(|| input.clone());

    let files = match archive_files(&input) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Could not list archives in {}: {}", input, e);
            return 1;
        }
    };

    let now = Instant::now();
    let queue = load_archives(&files, num_threads);
    log!(log::VERBOSE, &format!("Loading {} archives took: {}ms", files.len(), now.elapsed().as_millis()));

    let mut paths = Vec::new();
    let mut failed = false;
    while let Some(result) = queue.pop() {
        match result {
            Ok(archived) => paths.push(archived),
            Err((file, e)) => {
                eprintln!("{}: {}", file.display(), e);
                failed = true
            }
        }
    }
    if failed {
        return 1;
    }
    paths.sort_by_key(|archived| archived.path_id);

    let mut trace_opts = config.trace.clone();
    trace_opts.dump_call_trace_prefixes = true;
    trace_opts.archive_call_paths = false;
    trace_opts.dump_call_traces |= matches.opt_present("traces");
    if matches.opt_present("text") {
        trace_opts.prefix_format = stitch_lib::config::PrefixFormat::Text
    }

    let mut output = match OutputDir::new(&output, trace_opts) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Could not create output directory {}: {}", output, e);
            return 1;
        }
    };

    for archived in &paths {
        if let Err(e) = output.add_call_path(&archived.path, archived.path_id) {
            eprintln!("Failed to write call path {}: {}", archived.path_id, e);
            return 1;
        }
    }

    match output.dump_call_path_prefixes() {
        Ok(true) => 0,
        Ok(false) => 2,
        Err(e) => {
            eprintln!("Failed to dump call path prefixes: {}", e);
            1
        }
    }
}
