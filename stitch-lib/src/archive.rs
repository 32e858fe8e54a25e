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

use serde::{Deserialize, Serialize};

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::call_path::CallPath;
use crate::error::Error;

/// A finished call path together with its path id, stored with
/// bincode so the call tree can be rebuilt without re-running the
/// exploration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedPath {
    pub path_id: u32,
    pub path: CallPath,
}

pub fn archive_file_name(path_id: u32) -> String {
    format!("call-path{:06}.bin", path_id)
}

impl ArchivedPath {
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, Error> {
        let file = dir.as_ref().join(archive_file_name(self.path_id));
        let fd = BufWriter::new(File::create(&file)?);
        bincode::serialize_into(fd, self)?;
        Ok(file)
    }

    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self, Error> {
        let fd = BufReader::new(File::open(file)?);
        Ok(bincode::deserialize_from(fd)?)
    }
}

/// Every call path archive in `dir`, in file name order.
pub fn archive_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let file = entry?.path();
        let is_archive = file
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with("call-path") && name.ends_with(".bin"));
        if is_archive {
            files.push(file)
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::*;
    use crate::exp::Exp;
    use std::env;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("stitch-archive-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn archives_are_found_and_read_back() {
        let dir = scratch_dir("read");
        let call = PendingCall::new("f", 4)
            .arg(CallArg::new("n", Exp::var("n")))
            .returning(RetVal::value(Exp::bits(1, 8)), vec![Exp::Bool(true)]);
        for path_id in [2, 1] {
            let path = CallPath { calls: vec![call.clone()], constraints: vec![Exp::var("c")] };
            ArchivedPath { path_id, path }.write_to(&dir).unwrap();
        }
        fs::write(dir.join("call-prefix000001.txt"), "()").unwrap();

        let files = archive_files(&dir).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("call-path000001.bin"));

        let archived = ArchivedPath::from_file(&files[1]).unwrap();
        assert_eq!(archived.path_id, 2);
        assert_eq!(archived.path.calls, vec![call]);
        assert_eq!(archived.path.calls[0].line, 4);
        assert_eq!(archived.path.constraints, vec![Exp::var("c")]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = scratch_dir("corrupt");
        fs::write(dir.join("call-path000001.bin"), [0xffu8; 3]).unwrap();
        assert!(matches!(ArchivedPath::from_file(dir.join("call-path000001.bin")), Err(Error::Archive(_))));
        assert!(matches!(ArchivedPath::from_file(dir.join("missing.bin")), Err(Error::Io(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}
