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

//! Driving the external `cvs` tool and serving the tracking engine from
//! its output, with the store's diff table as a write-through cache.

use bstr::BString;
use thiserror::Error;

use crate::alignment::refine_diff;
use crate::diff::Diff;
use crate::exec::ExecError;
use crate::exec::Executor;
use crate::log::FileLog;
use crate::log::LogParseError;
use crate::revision::Revision;
use crate::store::FileId;
use crate::store::KeyedStore;
use crate::tracking::DiffOracle;
use crate::tracking::OracleError;

/// Error from one CVS interaction.
#[derive(Debug, Error)]
pub enum CvsError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Cannot parse CVS log for {file}")]
    Log {
        file: String,
        #[source]
        source: LogParseError,
    },
}

/// Command configuration for every `cvs` invocation.
///
/// Built once at startup and passed by reference; nothing here mutates
/// afterwards.
#[derive(Clone, Debug)]
pub struct CvsConfig {
    /// The executable to run.
    pub cvs_program: String,
    /// Repository root forwarded as `-d`. `None` lets cvs use the checkout's
    /// own root.
    pub cvs_root: Option<String>,
    /// Flags for the `log` subcommand.
    pub log_flags: Vec<String>,
    /// Flags for the `diff` subcommand.
    pub diff_flags: Vec<String>,
}

impl Default for CvsConfig {
    fn default() -> Self {
        Self {
            cvs_program: "cvs".to_owned(),
            cvs_root: None,
            log_flags: vec!["-b".to_owned()],
            diff_flags: ["-kk", "-N", "-b"].map(str::to_owned).to_vec(),
        }
    }
}

impl CvsConfig {
    /// Default configuration with the repository root taken from the
    /// `CVSROOT` environment variable if set.
    pub fn from_env() -> Self {
        Self {
            cvs_root: std::env::var("CVSROOT").ok().filter(|root| !root.is_empty()),
            ..Self::default()
        }
    }

    fn subcommand_args(&self, subcommand: &str, flags: &[String]) -> Vec<String> {
        let mut args = vec!["-l".to_owned(), "-f".to_owned()];
        if let Some(root) = &self.cvs_root {
            args.push("-d".to_owned());
            args.push(root.clone());
        }
        args.push(subcommand.to_owned());
        args.extend(flags.iter().cloned());
        args
    }
}

/// Wraps an [`Executor`] with the specific command forms this pipeline
/// drives cvs with.
#[derive(Debug)]
pub struct CvsClient<'cfg, E> {
    config: &'cfg CvsConfig,
    executor: E,
}

impl<'cfg, E: Executor> CvsClient<'cfg, E> {
    pub fn new(config: &'cfg CvsConfig, executor: E) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &CvsConfig {
        self.config
    }

    /// Runs `cvs log -b` for one file and parses the result.
    pub fn file_log(&mut self, file: &str) -> Result<FileLog, CvsError> {
        let mut args = self
            .config
            .subcommand_args("log", &self.config.log_flags);
        args.push(file.to_owned());
        let output = self.executor.output(&self.config.cvs_program, &args)?;
        FileLog::parse(&output).map_err(|source| CvsError::Log {
            file: file.to_owned(),
            source,
        })
    }

    /// Diffs two revisions of one file. The result is refined (coarse
    /// change hunks split by alignment) and top-aligned, ready for the
    /// tracking engine.
    pub fn diff(
        &mut self,
        file: &str,
        from: &Revision,
        to: &Revision,
    ) -> Result<Diff, CvsError> {
        let mut args = self
            .config
            .subcommand_args("diff", &self.config.diff_flags);
        args.push(format!("-r{from}"));
        args.push(format!("-r{to}"));
        args.push(file.to_owned());
        let output = self.executor.output(&self.config.cvs_program, &args)?;
        let mut diff = refine_diff(Diff::parse(&output));
        diff.align_top();
        Ok(diff)
    }

    /// The file's content at `revision`, via `cvs update -p`.
    pub fn source(&mut self, file: &str, revision: &Revision) -> Result<BString, CvsError> {
        let mut args = self.config.subcommand_args("update", &[]);
        args.push("-p".to_owned());
        args.push(format!("-r{revision}"));
        args.push(file.to_owned());
        let output = self.executor.output(&self.config.cvs_program, &args)?;
        Ok(BString::from(output))
    }

    /// Number of lines the file has at `revision` (newline count, the way
    /// `wc -l` reports it).
    pub fn line_count(&mut self, file: &str, revision: &Revision) -> Result<u32, CvsError> {
        let source = self.source(file, revision)?;
        Ok(source.iter().filter(|&&byte| byte == b'\n').count() as u32)
    }
}

/// [`DiffOracle`] over a [`CvsClient`], caching pairwise diffs in the
/// store's diff table.
///
/// The cache key is the newer revision of a consecutive pair, holding the
/// diff of that revision against the next older one; a request in the
/// opposite orientation is served by inverting the cached hunks. With
/// `read_cache` set, cached diffs are preferred and cvs is only invoked on
/// a miss; otherwise every computed diff is written back.
pub struct StoreDiffOracle<'a, 'cfg, E: Executor> {
    client: &'a mut CvsClient<'cfg, E>,
    store: Option<&'a mut KeyedStore>,
    file: &'a str,
    file_id: FileId,
    log: &'a FileLog,
    read_cache: bool,
}

impl<'a, 'cfg, E: Executor> StoreDiffOracle<'a, 'cfg, E> {
    pub fn new(
        client: &'a mut CvsClient<'cfg, E>,
        store: Option<&'a mut KeyedStore>,
        file: &'a str,
        file_id: FileId,
        log: &'a FileLog,
        read_cache: bool,
    ) -> Self {
        Self {
            client,
            store,
            file,
            file_id,
            log,
            read_cache,
        }
    }

    /// The revision right below `revision` in the log, if any.
    fn next_older(&self, revision: &Revision) -> Option<&Revision> {
        let position = self.log.position(revision)?;
        self.log.entries.get(position + 1).map(|entry| &entry.revision)
    }
}

impl<E: Executor> DiffOracle for StoreDiffOracle<'_, '_, E> {
    fn diff(&mut self, from: &Revision, to: &Revision) -> Result<Diff, OracleError> {
        // `backward` is the canonical cache orientation: newer -> next
        // older, keyed by the newer revision.
        let backward = self.next_older(from) == Some(to);
        let forward = self.next_older(to) == Some(from);

        if self.read_cache && let Some(store) = &self.store {
            let key = if backward { Some(from) } else if forward { Some(to) } else { None };
            if let Some(key) = key {
                match store.get_diff(self.file_id, key) {
                    Ok(Some(diff)) => {
                        return Ok(if backward { diff } else { diff.inverted() });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(revision = %key, "unusable cached diff, recomputing: {err}");
                    }
                }
            }
        }

        let diff = self
            .client
            .diff(self.file, from, to)
            .map_err(OracleError::new)?;

        if !self.read_cache && let Some(store) = &mut self.store {
            let cached = if backward {
                Some((from, diff.clone()))
            } else if forward {
                Some((to, diff.inverted()))
            } else {
                None
            };
            if let Some((key, canonical)) = cached
                && let Err(err) = store.put_diff(self.file_id, key, &canonical)
            {
                tracing::warn!(revision = %key, "cannot cache diff: {err}");
            }
        }
        Ok(diff)
    }

    fn line_count(&mut self, revision: &Revision) -> Result<u32, OracleError> {
        self.client
            .line_count(self.file, revision)
            .map_err(OracleError::new)
    }
}
