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

//! Parser for `cvs log -b` output.

use bstr::BString;
use bstr::ByteSlice as _;
use thiserror::Error;

use crate::revision::Revision;
use crate::revision::RevisionParseError;

/// Line separating the file header and the individual entries (28 dashes).
const SEPARATOR: &[u8] = b"----------------------------";
/// Line terminating one file's log (77 equals signs).
const END_MARKER: &[u8] =
    b"=============================================================================";

const WORKING_FILE_TAG: &[u8] = b"Working file: ";
const RCS_FILE_TAG: &[u8] = b"RCS file: ";
const REVISION_TAG: &[u8] = b"revision ";
const DATE_TAG: &str = "date: ";
const BRANCHES_TAG: &[u8] = b"branches:";
const EMPTY_COMMENT: &[u8] = b"*** empty log message ***";

/// Error from parsing a whole `cvs log` stream.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LogParseError {
    #[error("CVS log output has no file header")]
    MissingHeader,
}

#[derive(Debug, Error)]
enum EntryParseError {
    #[error("Expected a revision line, got {0:?}")]
    NotARevisionLine(String),
    #[error("Bad revision number")]
    BadRevision(#[source] RevisionParseError),
    #[error("Expected a date line, got {0:?}")]
    NotADateLine(String),
    #[error("Log entry cut short")]
    UnexpectedEof,
}

/// One revision of one file as reported by `cvs log`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub revision: Revision,
    pub date: String,
    pub author: String,
    pub state: String,
    /// The `lines: +a -d` summary; empty for the initial revision.
    pub lines: String,
    /// Commit comment, newline-terminated per comment line. The
    /// `*** empty log message ***` placeholder is normalised to empty.
    pub comment: BString,
}

/// The log of one file: header fields plus entries ordered newest first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileLog {
    /// The `Working file:` header value.
    pub working_file: String,
    /// The `RCS file:` header value (absolute `,v` path).
    pub rcs_file: String,
    /// Entries as emitted by CVS, newest first.
    pub entries: Vec<LogEntry>,
    /// True if a malformed entry stopped the parse early.
    pub truncated: bool,
}

impl FileLog {
    /// Parses one file's worth of `cvs log -b` output.
    ///
    /// A malformed entry is discarded and terminates the entry list; the
    /// entries read so far are kept and [`FileLog::truncated`] is set.
    pub fn parse(input: &[u8]) -> Result<Self, LogParseError> {
        let mut lines = input.lines().peekable();
        let mut working_file = String::new();
        let mut rcs_file = String::new();
        let mut saw_separator = false;
        for line in lines.by_ref() {
            if let Some(value) = line.strip_prefix(RCS_FILE_TAG) {
                rcs_file = value.to_str_lossy().into_owned();
            } else if let Some(value) = line.strip_prefix(WORKING_FILE_TAG) {
                working_file = value.to_str_lossy().into_owned();
            } else if line == SEPARATOR {
                saw_separator = true;
                break;
            }
        }
        if !saw_separator {
            return Err(LogParseError::MissingHeader);
        }

        let mut entries = Vec::new();
        let mut truncated = false;
        loop {
            match lines.peek() {
                None => break,
                Some(&line) if line == END_MARKER => break,
                Some(_) => {}
            }
            match parse_entry(&mut lines) {
                Ok((entry, is_last)) => {
                    entries.push(entry);
                    if is_last {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(file = %working_file, "discarding log entry: {err}");
                    truncated = true;
                    break;
                }
            }
        }
        Ok(Self {
            working_file,
            rcs_file,
            entries,
            truncated,
        })
    }

    /// The newest revision's entry.
    pub fn newest(&self) -> Option<&LogEntry> {
        self.entries.first()
    }

    /// The oldest revision's entry.
    pub fn oldest(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Position of `revision` in the entry list, if present.
    pub fn position(&self, revision: &Revision) -> Option<usize> {
        self.entries.iter().position(|e| e.revision == *revision)
    }

    /// The RCS path relative to `cvs_root`, without the `,v` suffix.
    pub fn repository_path(&self, cvs_root: &str) -> String {
        let path = self
            .rcs_file
            .strip_prefix(cvs_root)
            .map(|rest| rest.strip_prefix('/').unwrap_or(rest))
            .unwrap_or(&self.rcs_file);
        path.strip_suffix(",v").unwrap_or(path).to_owned()
    }
}

fn parse_entry<'a>(
    lines: &mut impl Iterator<Item = &'a [u8]>,
) -> Result<(LogEntry, bool), EntryParseError> {
    let line = lines.next().ok_or(EntryParseError::UnexpectedEof)?;
    let revision_text = line
        .strip_prefix(REVISION_TAG)
        .ok_or_else(|| EntryParseError::NotARevisionLine(line.to_str_lossy().into_owned()))?;
    // The revision number may be followed by lock information.
    let revision_text = revision_text
        .split_str("\t")
        .next()
        .unwrap_or(revision_text)
        .to_str_lossy();
    let revision: Revision = revision_text
        .trim()
        .parse()
        .map_err(EntryParseError::BadRevision)?;

    let line = lines.next().ok_or(EntryParseError::UnexpectedEof)?;
    let text = line.to_str_lossy();
    let fields = text
        .strip_prefix(DATE_TAG)
        .ok_or_else(|| EntryParseError::NotADateLine(text.clone().into_owned()))?;
    let (date, rest) = fields
        .split_once(';')
        .ok_or_else(|| EntryParseError::NotADateLine(text.clone().into_owned()))?;
    let mut author = "";
    let mut state = "";
    let mut lines_summary = "";
    for part in rest.split(';') {
        let part = part.trim_start();
        if let Some(value) = part.strip_prefix("author: ") {
            author = value;
        } else if let Some(value) = part.strip_prefix("state: ") {
            state = value;
        } else if let Some(value) = part.strip_prefix("lines: ") {
            lines_summary = value;
        }
    }
    let mut entry = LogEntry {
        revision,
        date: date.trim().to_owned(),
        author: author.trim_end().to_owned(),
        state: state.trim_end().to_owned(),
        lines: lines_summary.trim_end().to_owned(),
        comment: BString::default(),
    };

    for line in lines {
        if line.starts_with(BRANCHES_TAG) {
            continue;
        }
        if line == SEPARATOR {
            return Ok((entry, false));
        }
        if line == END_MARKER {
            return Ok((entry, true));
        }
        if line == EMPTY_COMMENT {
            continue;
        }
        entry.comment.extend_from_slice(line);
        entry.comment.push(b'\n');
    }
    Err(EntryParseError::UnexpectedEof)
}
