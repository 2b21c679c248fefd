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

//! The per-file pipeline and the batch driver: log, track, persist, emit.

use std::io::Write;

use thiserror::Error;
use tracing::instrument;

use crate::cvs::CvsClient;
use crate::cvs::CvsError;
use crate::cvs::StoreDiffOracle;
use crate::exec::Executor;
use crate::materialize::CmtWriter;
use crate::materialize::MaterializeError;
use crate::revision::Revision;
use crate::store::KeyedStore;
use crate::store::StoreError;
use crate::tracking::TrackError;
use crate::tracking::TrackOptions;
use crate::tracking::Tracker;

/// Error from mapping one file or a batch.
#[derive(Debug, Error)]
pub enum MapError {
    #[error(transparent)]
    Cvs(#[from] CvsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

impl MapError {
    /// Whether the batch should stop instead of moving to the next file.
    fn is_fatal(&self) -> bool {
        match self {
            Self::Cvs(_) | Self::Track(_) => false,
            Self::Store(_) | Self::Materialize(_) => true,
        }
    }
}

/// Caller choices for a mapping run.
#[derive(Clone, Debug)]
pub struct MapOptions {
    /// Data-root label recorded in every cmt header.
    pub root: String,
    /// Package (module) name recorded in cmt headers and offset paths.
    pub package: String,
    /// Serve diffs from the store's cache instead of invoking cvs.
    pub read_cache: bool,
    /// Track from this revision instead of each file's newest one.
    pub start_revision: Option<Revision>,
    /// Commit the store once per this many files.
    pub sync_rate: u32,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            root: "root0".to_owned(),
            package: String::new(),
            read_cache: false,
            start_revision: None,
            sync_rate: 20,
        }
    }
}

/// What one file contributed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileSummary {
    pub path: String,
    pub lines: u32,
    pub mappings: u64,
    pub revisions: usize,
}

/// Aggregate counters over a batch run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MapStats {
    pub files: u32,
    pub lines: u64,
    pub mappings: u64,
    pub total_revisions: u64,
    pub max_revisions: usize,
    pub max_revisions_file: String,
}

impl MapStats {
    fn add(&mut self, summary: &FileSummary) {
        self.files += 1;
        self.lines += u64::from(summary.lines);
        self.mappings += summary.mappings;
        self.total_revisions += summary.revisions as u64;
        if summary.revisions > self.max_revisions {
            self.max_revisions = summary.revisions;
            self.max_revisions_file = summary.path.clone();
        }
    }

    /// Mean number of revisions per mapped file.
    pub fn average_revisions(&self) -> f64 {
        if self.files == 0 {
            0.0
        } else {
            self.total_revisions as f64 / f64::from(self.files)
        }
    }

    /// Mean number of touching revisions per line of code.
    pub fn average_mappings_per_line(&self) -> f64 {
        if self.lines == 0 {
            0.0
        } else {
            self.mappings as f64 / self.lines as f64
        }
    }
}

/// Runs the whole pipeline for one file: fetch and parse the log, track
/// its lines, persist filenames, revisions, comments, commits and line
/// mappings, and emit the cmt records.
///
/// Returns `None` when the file has no usable log entries.
#[instrument(skip_all, fields(file = %file))]
pub fn map_file<E: Executor>(
    client: &mut CvsClient<'_, E>,
    store: &mut KeyedStore,
    tracker: &dyn Tracker,
    writer: &mut CmtWriter<impl Write, impl Write>,
    options: &MapOptions,
    file: &str,
) -> Result<Option<FileSummary>, MapError> {
    let log = client.file_log(file)?;
    if log.entries.is_empty() {
        tracing::warn!(file, "log has no revisions, skipping");
        return Ok(None);
    }

    let cvs_root = client.config().cvs_root.clone().unwrap_or_default();
    let path = log.repository_path(&cvs_root);
    let file_id = store.put_filename(&path)?;
    for entry in &log.entries {
        store.put_file_revision(file_id, &entry.revision)?;
        let comment_id = store.put_comment(entry.comment.as_ref())?;
        store.put_commit(file_id, &entry.revision, comment_id)?;
    }

    let track_options = TrackOptions {
        start_revision: options.start_revision.clone(),
    };
    let map = {
        let mut oracle = StoreDiffOracle::new(
            &mut *client,
            Some(&mut *store),
            file,
            file_id,
            &log,
            options.read_cache,
        );
        tracker.track(&log, &mut oracle, &track_options)?
    };

    for (line, indices) in map.lines() {
        for &index in indices {
            store.put_line_mapping(file_id, &log.entries[index as usize].revision, line)?;
        }
    }
    writer.write_file(&options.root, &options.package, &path, file_id, &log, &map)?;

    Ok(Some(FileSummary {
        path,
        lines: map.line_count(),
        mappings: map.mappings(),
        revisions: log.entries.len(),
    }))
}

/// Maps a batch of files, committing the store every
/// [`MapOptions::sync_rate`] files.
///
/// A file whose log or diffs cannot be obtained is skipped with a warning;
/// store or output failures stop the batch.
pub fn map_files<E: Executor>(
    client: &mut CvsClient<'_, E>,
    store: &mut KeyedStore,
    tracker: &dyn Tracker,
    writer: &mut CmtWriter<impl Write, impl Write>,
    options: &MapOptions,
    files: impl IntoIterator<Item = String>,
) -> Result<MapStats, MapError> {
    let mut stats = MapStats::default();
    for (index, file) in files.into_iter().enumerate() {
        tracing::info!(file = %file, "mapping");
        match map_file(client, store, tracker, writer, options, &file) {
            Ok(Some(summary)) => stats.add(&summary),
            Ok(None) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => tracing::warn!(file = %file, "skipping file: {err}"),
        }
        if options.sync_rate > 0 && (index + 1) % options.sync_rate as usize == 0 {
            store.sync()?;
        }
    }
    writer.flush()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::BackwardLineTracker;

    #[test]
    fn test_stats_aggregation() {
        let mut stats = MapStats::default();
        stats.add(&FileSummary {
            path: "a.c".to_owned(),
            lines: 10,
            mappings: 25,
            revisions: 3,
        });
        stats.add(&FileSummary {
            path: "b.c".to_owned(),
            lines: 2,
            mappings: 2,
            revisions: 7,
        });
        assert_eq!(stats.files, 2);
        assert_eq!(stats.lines, 12);
        assert_eq!(stats.mappings, 27);
        assert_eq!(stats.max_revisions, 7);
        assert_eq!(stats.max_revisions_file, "b.c");
        assert_eq!(stats.average_revisions(), 5.0);
        assert_eq!(stats.average_mappings_per_line(), 2.25);
    }

    #[test]
    fn test_tracker_is_object_safe() {
        // The batch driver takes the strategy as a trait object.
        let _tracker: &dyn Tracker = &BackwardLineTracker;
    }
}
