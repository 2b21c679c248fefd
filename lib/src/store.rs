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

//! The keyed store: the typed tables the pipeline persists its outputs in,
//! sharing a single SQLite file.
//!
//! Logical tables and their schemas:
//!
//! | table            | key                | value         | duplicates |
//! |------------------|--------------------|---------------|------------|
//! | `filename`       | `file_id`          | pathname      | no         |
//! | `file_id`        | pathname           | `file_id`     | no         |
//! | `comment`        | `comment_id`       | comment text  | no         |
//! | `commit`         | `file_id:revision` | `comment_id`  | no         |
//! | `commit_files`   | `comment_id`       | file+revision | insertion  |
//! | `file_revisions` | `file_id`          | revision      | insertion  |
//! | `line_revisions` | `file_id:line`     | revision      | insertion  |
//! | `revision_lines` | `file_id:revision` | line          | insertion  |
//! | `diff`           | `file_id:revision` | encoded diff  | no         |
//!
//! Mirrored pairs (`filename`/`file_id`, `commit`/`commit_files`,
//! `line_revisions`/`revision_lines`) share one physical table with an
//! index per direction; duplicate-allowing tables iterate in insertion
//! (rowid) order.

use std::path::Path;

use bstr::BStr;
use bstr::BString;
use bstr::ByteSlice as _;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension as _;
use rusqlite::params;
use thiserror::Error;

use crate::diff::Diff;
use crate::diff::DiffParseError;
use crate::revision::Revision;
use crate::revision::RevisionParseError;

/// Dense 1-based identifier assigned to each file in insertion order.
pub type FileId = u32;

/// Dense 1-based identifier assigned to each stored comment.
pub type CommentId = u32;

/// Error from a store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is open read-only")]
    ReadOnly,
    #[error(transparent)]
    Backend(#[from] rusqlite::Error),
    #[error("Corrupt revision {text:?} in store")]
    CorruptRevision {
        text: String,
        #[source]
        source: RevisionParseError,
    },
    #[error("Corrupt cached diff for file {file_id} revision {revision}")]
    CorruptDiff {
        file_id: FileId,
        revision: Revision,
        #[source]
        source: DiffParseError,
    },
}

/// How a store is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreMode {
    ReadOnly,
    ReadWrite,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        file_id  INTEGER PRIMARY KEY,
        pathname TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS comments (
        comment_id INTEGER PRIMARY KEY,
        comment    BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS commits (
        file_id    INTEGER NOT NULL,
        revision   TEXT NOT NULL,
        comment_id INTEGER NOT NULL,
        UNIQUE(file_id, revision)
    );
    CREATE INDEX IF NOT EXISTS commits_by_comment ON commits(comment_id);
    CREATE TABLE IF NOT EXISTS file_revisions (
        file_id  INTEGER NOT NULL,
        revision TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS file_revisions_by_file ON file_revisions(file_id);
    CREATE TABLE IF NOT EXISTS mappings (
        file_id  INTEGER NOT NULL,
        line     INTEGER NOT NULL,
        revision TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS mappings_by_line ON mappings(file_id, line);
    CREATE INDEX IF NOT EXISTS mappings_by_revision ON mappings(file_id, revision);
    CREATE TABLE IF NOT EXISTS diffs (
        file_id  INTEGER NOT NULL,
        revision TEXT NOT NULL,
        hunks    TEXT NOT NULL,
        UNIQUE(file_id, revision)
    );
";

/// The bundle of tables backing the whole pipeline.
///
/// A writer keeps an open transaction; [`KeyedStore::sync`] commits it and
/// starts the next one, and [`KeyedStore::close`] commits and releases the
/// file. There is at most one writer per store file.
pub struct KeyedStore {
    connection: Option<Connection>,
    mode: StoreMode,
}

impl KeyedStore {
    /// Opens (and for [`StoreMode::ReadWrite`], creates) the store file.
    pub fn open(path: &Path, mode: StoreMode) -> Result<Self, StoreError> {
        let connection = match mode {
            StoreMode::ReadOnly => {
                Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
            }
            StoreMode::ReadWrite => {
                let connection = Connection::open(path)?;
                connection.execute_batch(SCHEMA)?;
                connection.execute_batch("BEGIN")?;
                connection
            }
        };
        Ok(Self {
            connection: Some(connection),
            mode,
        })
    }

    fn connection(&self) -> &Connection {
        self.connection.as_ref().expect("store is not closed")
    }

    fn writable(&self) -> Result<&Connection, StoreError> {
        match self.mode {
            StoreMode::ReadOnly => Err(StoreError::ReadOnly),
            StoreMode::ReadWrite => Ok(self.connection()),
        }
    }

    /// Drops all rows from every table; dense ids restart at 1.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.writable()?.execute_batch(
            "DELETE FROM files;
             DELETE FROM comments;
             DELETE FROM commits;
             DELETE FROM file_revisions;
             DELETE FROM mappings;
             DELETE FROM diffs;",
        )?;
        Ok(())
    }

    /// Returns the id for `pathname`, assigning the next dense id on first
    /// sight.
    pub fn put_filename(&mut self, pathname: &str) -> Result<FileId, StoreError> {
        if let Some(file_id) = self.get_file_id(pathname)? {
            return Ok(file_id);
        }
        let connection = self.writable()?;
        connection.execute("INSERT INTO files (pathname) VALUES (?1)", params![pathname])?;
        Ok(connection.last_insert_rowid() as FileId)
    }

    /// Looks up a pathname by file id.
    pub fn get_filename(&self, file_id: FileId) -> Result<Option<String>, StoreError> {
        let mut statement = self
            .connection()
            .prepare_cached("SELECT pathname FROM files WHERE file_id = ?1")?;
        Ok(statement
            .query_row(params![file_id], |row| row.get(0))
            .optional()?)
    }

    /// Looks up a file id by pathname.
    pub fn get_file_id(&self, pathname: &str) -> Result<Option<FileId>, StoreError> {
        let mut statement = self
            .connection()
            .prepare_cached("SELECT file_id FROM files WHERE pathname = ?1")?;
        Ok(statement
            .query_row(params![pathname], |row| row.get(0))
            .optional()?)
    }

    /// Number of files known to the store.
    pub fn file_count(&self) -> Result<u32, StoreError> {
        let mut statement = self
            .connection()
            .prepare_cached("SELECT COUNT(*) FROM files")?;
        Ok(statement.query_row([], |row| row.get(0))?)
    }

    /// Appends a comment, returning its dense id.
    pub fn put_comment(&mut self, comment: &BStr) -> Result<CommentId, StoreError> {
        let connection = self.writable()?;
        connection.execute(
            "INSERT INTO comments (comment) VALUES (?1)",
            params![comment.as_bytes()],
        )?;
        Ok(connection.last_insert_rowid() as CommentId)
    }

    /// Looks up a comment text.
    pub fn get_comment(&self, comment_id: CommentId) -> Result<Option<BString>, StoreError> {
        let mut statement = self
            .connection()
            .prepare_cached("SELECT comment FROM comments WHERE comment_id = ?1")?;
        let text: Option<Vec<u8>> = statement
            .query_row(params![comment_id], |row| row.get(0))
            .optional()?;
        Ok(text.map(BString::from))
    }

    /// Records which comment a file revision was committed with.
    pub fn put_commit(
        &mut self,
        file_id: FileId,
        revision: &Revision,
        comment_id: CommentId,
    ) -> Result<(), StoreError> {
        self.writable()?.execute(
            "INSERT OR REPLACE INTO commits (file_id, revision, comment_id) VALUES (?1, ?2, ?3)",
            params![file_id, revision.to_string(), comment_id],
        )?;
        Ok(())
    }

    /// The comment id a file revision was committed with.
    pub fn get_commit(
        &self,
        file_id: FileId,
        revision: &Revision,
    ) -> Result<Option<CommentId>, StoreError> {
        let mut statement = self.connection().prepare_cached(
            "SELECT comment_id FROM commits WHERE file_id = ?1 AND revision = ?2",
        )?;
        Ok(statement
            .query_row(params![file_id, revision.to_string()], |row| row.get(0))
            .optional()?)
    }

    /// All file revisions committed with `comment_id`, in insertion order.
    pub fn get_commit_files(
        &self,
        comment_id: CommentId,
    ) -> Result<Vec<(FileId, Revision)>, StoreError> {
        let mut statement = self.connection().prepare_cached(
            "SELECT file_id, revision FROM commits WHERE comment_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![comment_id], |row| {
            Ok((row.get::<_, FileId>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (file_id, text) = row?;
            result.push((file_id, parse_revision(text)?));
        }
        Ok(result)
    }

    /// Appends one revision to a file's revision list.
    pub fn put_file_revision(
        &mut self,
        file_id: FileId,
        revision: &Revision,
    ) -> Result<(), StoreError> {
        self.writable()?.execute(
            "INSERT INTO file_revisions (file_id, revision) VALUES (?1, ?2)",
            params![file_id, revision.to_string()],
        )?;
        Ok(())
    }

    /// All revisions recorded for a file, in insertion order.
    pub fn get_file_revisions(&self, file_id: FileId) -> Result<Vec<Revision>, StoreError> {
        let mut statement = self.connection().prepare_cached(
            "SELECT revision FROM file_revisions WHERE file_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![file_id], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(parse_revision(row?)?);
        }
        Ok(result)
    }

    /// Records that `revision` touched `line`; feeds both the
    /// `line_revisions` and `revision_lines` directions.
    pub fn put_line_mapping(
        &mut self,
        file_id: FileId,
        revision: &Revision,
        line: u32,
    ) -> Result<(), StoreError> {
        self.writable()?.execute(
            "INSERT INTO mappings (file_id, line, revision) VALUES (?1, ?2, ?3)",
            params![file_id, line, revision.to_string()],
        )?;
        Ok(())
    }

    /// The revisions that touched a line, in insertion order.
    pub fn get_line_revisions(
        &self,
        file_id: FileId,
        line: u32,
    ) -> Result<Vec<Revision>, StoreError> {
        let mut statement = self.connection().prepare_cached(
            "SELECT revision FROM mappings WHERE file_id = ?1 AND line = ?2 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![file_id, line], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(parse_revision(row?)?);
        }
        Ok(result)
    }

    /// The lines a revision touched, in insertion order.
    pub fn get_revision_lines(
        &self,
        file_id: FileId,
        revision: &Revision,
    ) -> Result<Vec<u32>, StoreError> {
        let mut statement = self.connection().prepare_cached(
            "SELECT line FROM mappings WHERE file_id = ?1 AND revision = ?2 ORDER BY rowid",
        )?;
        let rows =
            statement.query_map(params![file_id, revision.to_string()], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Caches the (refined, top-aligned) diff of `revision` against the
    /// next older revision.
    pub fn put_diff(
        &mut self,
        file_id: FileId,
        revision: &Revision,
        diff: &Diff,
    ) -> Result<(), StoreError> {
        self.writable()?.execute(
            "INSERT OR REPLACE INTO diffs (file_id, revision, hunks) VALUES (?1, ?2, ?3)",
            params![file_id, revision.to_string(), diff.encode()],
        )?;
        Ok(())
    }

    /// Fetches a cached diff; the decoded hunks are already top-aligned.
    pub fn get_diff(
        &self,
        file_id: FileId,
        revision: &Revision,
    ) -> Result<Option<Diff>, StoreError> {
        let mut statement = self
            .connection()
            .prepare_cached("SELECT hunks FROM diffs WHERE file_id = ?1 AND revision = ?2")?;
        let text: Option<String> = statement
            .query_row(params![file_id, revision.to_string()], |row| row.get(0))
            .optional()?;
        let Some(text) = text else {
            return Ok(None);
        };
        let mut diff = Diff::decode(&text).map_err(|source| StoreError::CorruptDiff {
            file_id,
            revision: revision.clone(),
            source,
        })?;
        diff.mark_aligned();
        Ok(Some(diff))
    }

    /// Commits the pending batch of inserts and starts the next one.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        if self.mode == StoreMode::ReadWrite {
            self.connection().execute_batch("COMMIT; BEGIN")?;
        }
        Ok(())
    }

    /// Flushes pending writes and releases the store file.
    pub fn close(mut self) -> Result<(), StoreError> {
        let connection = self.connection.take().expect("store is not closed");
        if self.mode == StoreMode::ReadWrite {
            connection.execute_batch("COMMIT")?;
        }
        connection.close().map_err(|(_, err)| StoreError::from(err))
    }
}

impl Drop for KeyedStore {
    fn drop(&mut self) {
        // Close was not called; commit what we have rather than losing it.
        if let Some(connection) = self.connection.take()
            && self.mode == StoreMode::ReadWrite
            && let Err(err) = connection.execute_batch("COMMIT")
        {
            tracing::warn!("could not flush store on drop: {err}");
        }
    }
}

fn parse_revision(text: String) -> Result<Revision, StoreError> {
    text.parse()
        .map_err(|source| StoreError::CorruptRevision { text, source })
}
