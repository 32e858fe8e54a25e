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

//! This module loads a TOML file containing the options for merging
//! and for call path output.

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use toml::Value;

use crate::log;

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOpts {
    /// Honour join-entry and join-exit markers
    pub enabled: bool,
    pub debug: bool,
    /// Release parked states when no open state is expected to close soon
    pub incomplete: bool,
    pub debug_incomplete: bool,
    /// An open state is prioritized when its distance from the
    /// join-entry is below this multiple of the mean close distance
    pub prioritize_factor: f64,
}

impl Default for MergeOpts {
    fn default() -> Self {
        MergeOpts { enabled: false, debug: false, incomplete: false, debug_incomplete: false, prioritize_factor: 2.0 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrefixFormat {
    Sexp,
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceOpts {
    /// Write a `call-path%06d.txt` file for every finished path
    pub dump_call_traces: bool,
    /// Build the call tree and write `call-prefix%06d.txt` files
    pub dump_call_trace_prefixes: bool,
    pub prefix_format: PrefixFormat,
    /// Write a `call-path%06d.bin` archive for every finished path
    pub archive_call_paths: bool,
}

impl Default for TraceOpts {
    fn default() -> Self {
        TraceOpts {
            dump_call_traces: false,
            dump_call_trace_prefixes: false,
            prefix_format: PrefixFormat::Sexp,
            archive_call_paths: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StitchConfig {
    pub merge: MergeOpts,
    pub trace: TraceOpts,
}

fn get_table_bool(config: &Value, table: &str, key: &str, default: bool) -> Result<bool, String> {
    match config.get(table).and_then(|table| table.get(key)) {
        None => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| format!("{}.{} must be a boolean", table, key)),
    }
}

fn get_table_float(config: &Value, table: &str, key: &str, default: f64) -> Result<f64, String> {
    match config.get(table).and_then(|table| table.get(key)) {
        None => Ok(default),
        Some(Value::Float(f)) if *f > 0.0 => Ok(*f),
        Some(Value::Integer(i)) if *i > 0 => Ok(*i as f64),
        Some(value) => Err(format!("{}.{} must be a positive number, found {}", table, key, value)),
    }
}

fn get_prefix_format(config: &Value) -> Result<PrefixFormat, String> {
    match config.get("trace").and_then(|table| table.get("prefix_format")) {
        None => Ok(PrefixFormat::Sexp),
        Some(value) => match value.as_str() {
            Some("sexp") => Ok(PrefixFormat::Sexp),
            Some("text") => Ok(PrefixFormat::Text),
            _ => Err(format!("trace.prefix_format must be \"sexp\" or \"text\", found {}", value)),
        },
    }
}

impl StitchConfig {
    pub fn parse(contents: &str) -> Result<Self, String> {
        let config = match contents.parse::<Value>() {
            Ok(config) => config,
            Err(e) => return Err(format!("Error when parsing configuration: {}", e)),
        };

        let defaults = StitchConfig::default();

        Ok(StitchConfig {
            merge: MergeOpts {
                enabled: get_table_bool(&config, "merge", "enabled", defaults.merge.enabled)?,
                debug: get_table_bool(&config, "merge", "debug", defaults.merge.debug)?,
                incomplete: get_table_bool(&config, "merge", "incomplete", defaults.merge.incomplete)?,
                debug_incomplete: get_table_bool(&config, "merge", "debug_incomplete", defaults.merge.debug_incomplete)?,
                prioritize_factor: get_table_float(&config, "merge", "prioritize_factor", defaults.merge.prioritize_factor)?,
            },
            trace: TraceOpts {
                dump_call_traces: get_table_bool(&config, "trace", "dump_call_traces", defaults.trace.dump_call_traces)?,
                dump_call_trace_prefixes: get_table_bool(
                    &config,
                    "trace",
                    "dump_call_trace_prefixes",
                    defaults.trace.dump_call_trace_prefixes,
                )?,
                prefix_format: get_prefix_format(&config)?,
                archive_call_paths: get_table_bool(&config, "trace", "archive_call_paths", defaults.trace.archive_call_paths)?,
            },
        })
    }

    /// Use a default configuration when none is specified
    pub fn new() -> Result<Self, String> {
        Self::parse(include_str!("../default_config.toml"))
    }

    /// Load the configuration from a TOML file.
    pub fn from_file<P>(path: P) -> Result<Self, String>
    where
        P: AsRef<Path>,
    {
        let mut contents = String::new();
        match File::open(&path) {
            Ok(mut handle) => match handle.read_to_string(&mut contents) {
                Ok(_) => (),
                Err(e) => return Err(format!("Unexpected failure while reading config: {}", e)),
            },
            Err(e) => return Err(format!("Error when loading config '{}': {}", path.as_ref().display(), e)),
        };
        Self::parse(&contents)
    }

    /// Turn on the log flags requested by the debug options.
    pub fn apply_log_flags(&self) {
        if self.merge.debug {
            log::add_flags(log::MERGE)
        }
        if self.merge.debug_incomplete {
            log::add_flags(log::INCOMPLETE_MERGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        assert_eq!(StitchConfig::new().unwrap(), StitchConfig::default());
    }

    #[test]
    fn partial_config() {
        let config = StitchConfig::parse("[merge]\nenabled = true\nprioritize_factor = 3\n[trace]\nprefix_format = \"text\"\n").unwrap();
        assert!(config.merge.enabled);
        assert!(!config.merge.incomplete);
        assert_eq!(config.merge.prioritize_factor, 3.0);
        assert_eq!(config.trace.prefix_format, PrefixFormat::Text);
        assert!(!config.trace.dump_call_traces);
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(StitchConfig::parse("[merge]\nenabled = 1\n").unwrap_err().contains("merge.enabled"));
        assert!(StitchConfig::parse("[merge]\nprioritize_factor = -1.0\n").is_err());
        assert!(StitchConfig::parse("[trace]\nprefix_format = \"json\"\n").is_err());
        assert!(StitchConfig::parse("[merge\n").is_err());
    }
}
