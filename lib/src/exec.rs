// Copyright 2026 The Cvsmap Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Subprocess execution behind an injectable seam, so tests can substitute
//! canned CVS output.

use std::process::Command;
use std::process::Stdio;

use bstr::ByteSlice as _;
use thiserror::Error;

/// Error from starting a subprocess.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Could not execute {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a program with an explicit argv array and collects its output.
pub trait Executor {
    /// Runs `program` with `args`, reading standard output to completion.
    ///
    /// A process that starts but exits nonzero still yields its output
    /// (`diff` exits 1 whenever the inputs differ).
    fn output(&mut self, program: &str, args: &[String]) -> Result<Vec<u8>, ExecError>;
}

/// The real thing: spawns processes synchronously.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn output(&mut self, program: &str, args: &[String]) -> Result<Vec<u8>, ExecError> {
        tracing::debug!(program, ?args, "running subprocess");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::Spawn {
                program: program.to_owned(),
                source,
            })?;
        if !output.status.success() {
            tracing::debug!(program, status = %output.status, "subprocess exited nonzero");
        }
        if !output.stderr.is_empty() {
            tracing::debug!(program, stderr = %output.stderr.to_str_lossy(), "subprocess stderr");
        }
        Ok(output.stdout)
    }
}
