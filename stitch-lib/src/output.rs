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

//! The output directory of an exploration: one numbered human
//! readable trace per finished path, optional bincode archives of
//! the same paths, and the call tree whose prefixes are dumped once
//! exploration is over.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::archive::ArchivedPath;
use crate::call_path::{write_call_path_text, CallPath};
use crate::call_tree::{CallTree, PrefixSink};
use crate::config::{PrefixFormat, TraceOpts};
use crate::error::Error;
use crate::log;

fn open_output_file(dir: &Path, name: &str) -> Option<BufWriter<File>> {
    match File::create(dir.join(name)) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            warn!(format!("Could not open output file {}: {}", dir.join(name).display(), e));
            None
        }
    }
}

/// Hands out `call-prefix%06d.txt` files, numbered from 1.
pub struct PrefixFiles {
    dir: PathBuf,
    index: u32,
}

impl PrefixFiles {
    pub fn count(&self) -> u32 {
        self.index
    }
}

impl PrefixSink for PrefixFiles {
    fn open_next_prefix(&mut self) -> Option<Box<dyn Write>> {
        self.index += 1;
        let file = open_output_file(&self.dir, &format!("call-prefix{:06}.txt", self.index))?;
        Some(Box::new(file))
    }
}

pub struct OutputDir {
    dir: PathBuf,
    opts: TraceOpts,
    call_path_index: u32,
    tree: CallTree,
    prefixes: PrefixFiles,
}

impl OutputDir {
    pub fn new<P: AsRef<Path>>(dir: P, opts: TraceOpts) -> Result<Self, Error> {
        fs::create_dir_all(&dir)?;
        let dir = dir.as_ref().to_path_buf();
        Ok(OutputDir {
            prefixes: PrefixFiles { dir: dir.clone(), index: 0 },
            dir,
            opts,
            call_path_index: 1,
            tree: CallTree::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    /// Handle the call path of a finished state, returning the id it
    /// was given. Output files that cannot be opened are skipped with
    /// a warning.
    pub fn process_call_path(&mut self, path: &CallPath) -> Result<u32, Error> {
        let path_id = self.call_path_index;
        self.call_path_index += 1;
        self.add_call_path(path, path_id)?;
        Ok(path_id)
    }

    /// Like [process_call_path](Self::process_call_path), for a path
    /// whose id was assigned elsewhere, such as a path read back from
    /// an archive.
    pub fn add_call_path(&mut self, path: &CallPath, path_id: u32) -> Result<(), Error> {
        if self.opts.dump_call_trace_prefixes {
            self.tree.add_call_path(&path.calls, path_id)
        }

        if self.opts.dump_call_traces {
            if let Some(mut file) = open_output_file(&self.dir, &format!("call-path{:06}.txt", path_id)) {
                if !write_call_path_text(&mut file, path)? {
                    log!(log::CALL_PATH, &format!("Call path {} has unresolved values, trace truncated", path_id))
                }
                file.flush()?
            }
        }

        if self.opts.archive_call_paths {
            let archived = ArchivedPath { path_id, path: path.clone() };
            if let Err(e) = archived.write_to(&self.dir) {
                warn!(format!("Could not archive call path {}: {}", path_id, e))
            }
        }

        Ok(())
    }

    /// Dump the prefixes of every path added so far, in the configured
    /// format. Returns `false` if some prefix had to be truncated.
    pub fn dump_call_path_prefixes(&mut self) -> Result<bool, Error> {
        if !self.opts.dump_call_trace_prefixes {
            return Ok(true);
        }
        let complete = match self.opts.prefix_format {
            PrefixFormat::Sexp => self.tree.dump_prefixes_sexp(&mut self.prefixes)?,
            PrefixFormat::Text => self.tree.dump_prefixes_text(&mut self.prefixes)?,
        };
        if !complete {
            warn!("Some call path prefixes were truncated")
        }
        log!(log::PREFIX, &format!("{} prefix files in {}", self.prefixes.count(), self.dir.display()));
        Ok(complete)
    }
}
