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

//! Emission of the cmt and offset files consumed by the full-text
//! indexer.
//!
//! One cmt record per line of a file's newest revision: a header
//! `<line>:<root> <package> <file_id>:<revisions newest-first>`, then for
//! each touching revision the fields `revision`, `date`, `author`,
//! `lines` and `comments`, each introduced by an `\x03` byte, and the
//! terminator `\x03\x02\n`. The offset file carries one line per file
//! giving the record number its block starts at.

use std::io::Write;

use bstr::BStr;
use bstr::BString;
use thiserror::Error;

use crate::cvs::CvsClient;
use crate::cvs::CvsError;
use crate::exec::Executor;
use crate::log::FileLog;
use crate::revision::Revision;
use crate::store::KeyedStore;
use crate::store::StoreError;
use crate::tracking::LineMap;

const FIELD_MARK: &[u8] = b"\x03";
const RECORD_END: &[u8] = b"\x03\x02\n";

/// Error from materialising cmt/offset output.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Cannot write output")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One revision's worth of fields in a cmt record.
struct RevisionFields<'a> {
    revision: &'a Revision,
    date: &'a str,
    author: &'a str,
    lines: &'a str,
    comment: &'a BStr,
}

/// Writes cmt records and the matching offset lines, tracking the running
/// record number across files.
pub struct CmtWriter<C: Write, O: Write> {
    cmt: C,
    offset: O,
    next_record: u64,
}

impl<C: Write, O: Write> CmtWriter<C, O> {
    pub fn new(cmt: C, offset: O) -> Self {
        Self {
            cmt,
            offset,
            next_record: 1,
        }
    }

    /// Emits every line of one tracked file, plus its offset entry.
    pub fn write_file(
        &mut self,
        root: &str,
        package: &str,
        repository_path: &str,
        file_id: u32,
        log: &FileLog,
        map: &LineMap,
    ) -> Result<(), MaterializeError> {
        self.write_offset(package, repository_path)?;
        for (line, indices) in map.lines() {
            let fields: Vec<RevisionFields> = indices
                .iter()
                .map(|&index| {
                    let entry = &log.entries[index as usize];
                    RevisionFields {
                        revision: &entry.revision,
                        date: &entry.date,
                        author: &entry.author,
                        lines: &entry.lines,
                        comment: entry.comment.as_ref(),
                    }
                })
                .collect();
            self.write_record(line, root, package, file_id, &fields)?;
        }
        Ok(())
    }

    fn write_offset(
        &mut self,
        package: &str,
        repository_path: &str,
    ) -> Result<(), MaterializeError> {
        writeln!(
            self.offset,
            "{package}/{repository_path} {}\x02",
            self.next_record
        )?;
        Ok(())
    }

    fn write_record(
        &mut self,
        line: u32,
        root: &str,
        package: &str,
        file_id: u32,
        fields: &[RevisionFields],
    ) -> Result<(), MaterializeError> {
        write!(self.cmt, "{line}:{root} {package} {file_id}:")?;
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                write!(self.cmt, " ")?;
            }
            write!(self.cmt, "{}", field.revision)?;
        }
        for field in fields {
            self.cmt.write_all(FIELD_MARK)?;
            write!(self.cmt, "revision {}", field.revision)?;
            self.cmt.write_all(FIELD_MARK)?;
            write!(self.cmt, "date {}", field.date)?;
            self.cmt.write_all(FIELD_MARK)?;
            write!(self.cmt, "author {}", field.author)?;
            self.cmt.write_all(FIELD_MARK)?;
            write!(self.cmt, "lines {}", field.lines)?;
            self.cmt.write_all(FIELD_MARK)?;
            self.cmt.write_all(b"comments ")?;
            self.cmt.write_all(field.comment)?;
        }
        self.cmt.write_all(RECORD_END)?;
        self.next_record += 1;
        Ok(())
    }

    /// Flushes both sinks.
    pub fn flush(&mut self) -> Result<(), MaterializeError> {
        self.cmt.flush()?;
        self.offset.flush()?;
        Ok(())
    }
}

/// Re-emits cmt/offset output from a store opened read-only, fetching each
/// file's log and newest source through cvs.
///
/// Comment text prefers the store's comment table; the other per-revision
/// fields come from the freshly fetched log. Files whose log or source
/// cannot be fetched are skipped.
pub fn materialize_store<E: Executor, C: Write, O: Write>(
    store: &KeyedStore,
    client: &mut CvsClient<'_, E>,
    writer: &mut CmtWriter<C, O>,
    root: &str,
    package: &str,
) -> Result<(), MaterializeError> {
    for file_id in 1..=store.file_count()? {
        let Some(path) = store.get_filename(file_id)? else {
            continue;
        };
        let (log, line_count) = match fetch_file(client, &path) {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(file = %path, "skipping file: {err}");
                continue;
            }
        };
        writer.write_offset(package, &path)?;
        for line in 1..=line_count {
            let revisions = store.get_line_revisions(file_id, line)?;
            let mut fields = Vec::with_capacity(revisions.len());
            for revision in &revisions {
                let comment = match store.get_commit(file_id, revision)? {
                    Some(comment_id) => store.get_comment(comment_id)?,
                    None => None,
                };
                let entry = log.entries.iter().find(|e| e.revision == *revision);
                fields.push(OwnedFields {
                    revision: revision.clone(),
                    date: entry.map(|e| e.date.clone()).unwrap_or_default(),
                    author: entry.map(|e| e.author.clone()).unwrap_or_default(),
                    lines: entry.map(|e| e.lines.clone()).unwrap_or_default(),
                    comment: comment
                        .or_else(|| entry.map(|e| e.comment.clone()))
                        .unwrap_or_default(),
                });
            }
            let borrowed: Vec<RevisionFields> = fields
                .iter()
                .map(|f| RevisionFields {
                    revision: &f.revision,
                    date: &f.date,
                    author: &f.author,
                    lines: &f.lines,
                    comment: f.comment.as_ref(),
                })
                .collect();
            writer.write_record(line, root, package, file_id, &borrowed)?;
        }
    }
    writer.flush()
}

struct OwnedFields {
    revision: Revision,
    date: String,
    author: String,
    lines: String,
    comment: BString,
}

fn fetch_file<E: Executor>(
    client: &mut CvsClient<'_, E>,
    path: &str,
) -> Result<(FileLog, u32), CvsError> {
    let log = client.file_log(path)?;
    let line_count = match log.newest() {
        Some(newest) => {
            let revision = newest.revision.clone();
            client.line_count(path, &revision)?
        }
        None => 0,
    };
    Ok((log, line_count))
}
