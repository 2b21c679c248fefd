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

//! The line-tracking engine: maps every line of a file's newest revision to
//! the run of revisions it has lived through.
//!
//! Two interchangeable strategies implement the same contract: a backward
//! walk over an array of per-line cells, and a forward walk over live line
//! ranges kept in two ordered sets. Given identical input they produce
//! identical maps.

use std::collections::BTreeSet;

use itertools::Itertools as _;
use smallvec::SmallVec;
use thiserror::Error;

use crate::diff::Diff;
use crate::diff::DiffEntry;
use crate::diff::DiffKind;
use crate::log::FileLog;
use crate::range::LineRange;
use crate::revision::Revision;

/// Failure of the diff oracle backing the engine.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct OracleError(Box<dyn std::error::Error + Send + Sync>);

impl OracleError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

/// Produces the inputs the engine needs: pairwise diffs and line counts.
pub trait DiffOracle {
    /// The diff between two revisions of the tracked file, refined
    /// (§change hunks split to adds/deletes/1-to-1 changes) and
    /// top-aligned. Source ranges are `from`-relative, destination ranges
    /// `to`-relative.
    fn diff(&mut self, from: &Revision, to: &Revision) -> Result<Diff, OracleError>;

    /// Number of lines the tracked file has at `revision`.
    fn line_count(&mut self, revision: &Revision) -> Result<u32, OracleError>;
}

/// Index of a revision in the originating [`FileLog`] (0 = newest).
pub type RevisionIndex = u32;

type RevisionList = SmallVec<[RevisionIndex; 2]>;

/// Per-line revision lists for the newest revision of one file.
///
/// For each line, the list holds the revisions from the one that introduced
/// the line's current content up to the newest, ordered newest first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineMap {
    cells: Vec<RevisionList>,
}

impl LineMap {
    /// Number of lines in the newest revision.
    pub fn line_count(&self) -> u32 {
        self.cells.len() as u32
    }

    /// Revision indices for a 1-based line number, newest first.
    pub fn revisions(&self, line: u32) -> &[RevisionIndex] {
        &self.cells[line as usize - 1]
    }

    /// Iterates `(line_number, revision_indices)` in line order.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &[RevisionIndex])> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, list)| ((i + 1) as u32, list.as_slice()))
    }

    /// Total number of line-revision pairs.
    pub fn mappings(&self) -> u64 {
        self.cells.iter().map(|list| list.len() as u64).sum()
    }
}

/// Error from tracking one file.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("File log has no revisions")]
    EmptyLog,
    #[error("Starting revision {0} is not in the log")]
    UnknownStartRevision(Revision),
    #[error("Line count of revision {revision} unavailable")]
    MissingLineCount {
        revision: Revision,
        #[source]
        source: OracleError,
    },
}

/// Caller choices for one tracking run.
#[derive(Clone, Debug, Default)]
pub struct TrackOptions {
    /// Track from this revision instead of the newest one in the log.
    pub start_revision: Option<Revision>,
}

/// A line-tracking strategy.
pub trait Tracker {
    /// Builds the [`LineMap`] for the file described by `log`.
    ///
    /// A diff the oracle cannot produce skips that revision pair; a missing
    /// line count for the starting point is fatal for the file.
    fn track(
        &self,
        log: &FileLog,
        oracle: &mut dyn DiffOracle,
        options: &TrackOptions,
    ) -> Result<LineMap, TrackError>;
}

fn start_position(log: &FileLog, options: &TrackOptions) -> Result<usize, TrackError> {
    match &options.start_revision {
        None if log.entries.is_empty() => Err(TrackError::EmptyLog),
        None => Ok(0),
        Some(revision) => log
            .position(revision)
            .ok_or_else(|| TrackError::UnknownStartRevision(revision.clone())),
    }
}

fn push_unique(list: &mut RevisionList, value: RevisionIndex) {
    if list.last() != Some(&value) {
        list.push(value);
    }
}

/// Walks the log newest to oldest, keeping one cell per line of the newest
/// revision. Each cell carries the line's coordinate in the revision
/// currently reached (0 once the line stops existing) and the revisions
/// collected so far.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackwardLineTracker;

impl Tracker for BackwardLineTracker {
    fn track(
        &self,
        log: &FileLog,
        oracle: &mut dyn DiffOracle,
        options: &TrackOptions,
    ) -> Result<LineMap, TrackError> {
        let start = start_position(log, options)?;
        let entries = &log.entries[start..];
        let newest = &entries[0];
        let length = oracle
            .line_count(&newest.revision)
            .map_err(|source| TrackError::MissingLineCount {
                revision: newest.revision.clone(),
                source,
            })?;

        // Cell 0 is a sentinel so that cell indexes equal line numbers.
        let mut coords: Vec<u32> = (0..=length).collect();
        let mut cells: Vec<RevisionList> = vec![RevisionList::new(); length as usize + 1];
        for cell in &mut cells[1..] {
            cell.push(start as RevisionIndex);
        }

        for (offset, (newer, older)) in entries.iter().tuple_windows().enumerate() {
            let diff = match oracle.diff(&newer.revision, &older.revision) {
                Ok(diff) => diff,
                Err(err) => {
                    tracing::warn!(
                        from = %newer.revision,
                        to = %older.revision,
                        "diff unavailable, skipping revision pair: {err}"
                    );
                    continue;
                }
            };
            for entry in diff.entries() {
                apply_backward_entry(&mut coords, entry);
            }
            // Every line still alive also exists in the older revision.
            let older_index = (start + offset + 1) as RevisionIndex;
            for (&coord, cell) in coords.iter().zip(&mut cells).skip(1) {
                if coord != 0 {
                    push_unique(cell, older_index);
                }
            }
            debug_assert!(
                coords.iter().filter(|&&c| c != 0).tuple_windows().all(|(a, b)| a < b),
                "live cell coordinates must stay strictly increasing"
            );
        }

        cells.remove(0);
        Ok(LineMap { cells })
    }
}

/// Updates cell coordinates for one hunk of the newer-to-older diff.
///
/// Hunks are read against the walk direction: a `delete` hunk names the
/// lines introduced by the newer revision (they stop existing in the older
/// one), an `add` hunk names lines present only in the older revision, and
/// a refined `change` hunk ends a line's content identity.
fn apply_backward_entry(coords: &mut [u32], entry: &DiffEntry) {
    let src = entry.src;
    let delta = entry.size_delta();
    match entry.kind {
        DiffKind::Add => {
            for coord in &mut coords[1..] {
                if *coord != 0 && *coord >= src.begin() {
                    *coord = shifted(*coord, delta);
                }
            }
        }
        // Lines covered by the hunk stop existing in the older revision;
        // the newer one introduced (delete) or rewrote (change) them.
        // Lines above move by the hunk's size delta, which is zero for a
        // refined 1-to-1 change.
        DiffKind::Delete | DiffKind::Change => {
            for coord in &mut coords[1..] {
                if *coord == 0 || *coord < src.begin() {
                    continue;
                }
                if *coord < src.end() {
                    *coord = 0;
                } else {
                    *coord = shifted(*coord, delta);
                }
            }
        }
    }
}

fn shifted(coord: u32, delta: i64) -> u32 {
    match u32::try_from(i64::from(coord) + delta) {
        Ok(coord) => coord,
        Err(_) => {
            tracing::warn!(coord, delta, "line coordinate shifted out of bounds");
            0
        }
    }
}

/// Walks the log oldest to newest, keeping live line ranges in an arena
/// indexed by two ordered sets (keyed by range begin and range end, with
/// the arena index as insertion-order tie-breaker).
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardRangeTracker;

impl Tracker for ForwardRangeTracker {
    fn track(
        &self,
        log: &FileLog,
        oracle: &mut dyn DiffOracle,
        options: &TrackOptions,
    ) -> Result<LineMap, TrackError> {
        let start = start_position(log, options)?;
        let entries = &log.entries[start..];
        let oldest_offset = entries.len() - 1;
        let oldest = &entries[oldest_offset];
        let length = oracle
            .line_count(&oldest.revision)
            .map_err(|source| TrackError::MissingLineCount {
                revision: oldest.revision.clone(),
                source,
            })?;

        let mut arena = RangeArena::default();
        if length > 0 {
            let span = LineRange::new(1, length + 1).expect("1 <= length + 1");
            arena.insert(span, RevisionList::from_slice(&[(start + oldest_offset) as u32]));
        }

        for offset in (1..=oldest_offset).rev() {
            let older = &entries[offset];
            let newer = &entries[offset - 1];
            let diff = match oracle.diff(&older.revision, &newer.revision) {
                Ok(diff) => diff,
                Err(err) => {
                    tracing::warn!(
                        from = %older.revision,
                        to = %newer.revision,
                        "diff unavailable, skipping revision pair: {err}"
                    );
                    continue;
                }
            };
            let newer_index = (start + offset - 1) as RevisionIndex;
            for entry in diff.entries() {
                arena.apply(entry, newer_index);
            }
            // Every surviving range also exists in the newer revision.
            for &(_, index) in &arena.by_begin {
                push_unique(&mut arena.records[index as usize].revisions, newer_index);
            }
        }

        Ok(arena.into_line_map())
    }
}

/// A live range of lines and the revisions it has existed in, oldest
/// first.
#[derive(Clone, Debug)]
struct RangeRecord {
    span: LineRange,
    revisions: RevisionList,
}

#[derive(Debug, Default)]
struct RangeArena {
    records: Vec<RangeRecord>,
    /// `(span.begin, arena index)`, kept in step with `records`.
    by_begin: BTreeSet<(u32, u32)>,
    /// `(span.end, arena index)`, kept in step with `records`.
    by_end: BTreeSet<(u32, u32)>,
}

impl RangeArena {
    fn insert(&mut self, span: LineRange, revisions: RevisionList) {
        if span.is_empty() {
            return;
        }
        let index = self.records.len() as u32;
        self.by_begin.insert((span.begin(), index));
        self.by_end.insert((span.end(), index));
        self.records.push(RangeRecord { span, revisions });
    }

    fn detach(&mut self, index: u32) {
        let span = self.records[index as usize].span;
        self.by_begin.remove(&(span.begin(), index));
        self.by_end.remove(&(span.end(), index));
    }

    fn set_span(&mut self, index: u32, span: LineRange) {
        if span.is_empty() {
            return;
        }
        self.by_begin.insert((span.begin(), index));
        self.by_end.insert((span.end(), index));
        self.records[index as usize].span = span;
    }

    /// Applies one hunk of an older-to-newer diff: carves out the source
    /// range, shifts everything above it by the hunk's size delta, and
    /// starts a fresh range for added or changed destination lines.
    fn apply(&mut self, entry: &DiffEntry, newer_index: RevisionIndex) {
        let src = entry.src;
        let delta = entry.size_delta();

        // Ranges ending at or below the hunk are untouched.
        let affected: Vec<u32> = self
            .by_end
            .range((src.begin() + 1, u32::MIN)..)
            .map(|&(_, index)| index)
            .collect();
        for index in affected {
            self.detach(index);
            let span = self.records[index as usize].span;
            let below = (span.begin() < src.begin()).then(|| {
                LineRange::new(span.begin(), span.end().min(src.begin())).unwrap()
            });
            let above = (span.end() > src.end()).then(|| {
                let mut piece =
                    LineRange::new(span.begin().max(src.end()), span.end()).unwrap();
                if let Err(err) = piece.shift(delta) {
                    tracing::warn!(hunk = %entry, "cannot shift line range: {err}");
                }
                piece
            });
            match (below, above) {
                (Some(below), Some(above)) => {
                    let revisions = self.records[index as usize].revisions.clone();
                    self.set_span(index, below);
                    self.insert(above, revisions);
                }
                (Some(piece), None) | (None, Some(piece)) => self.set_span(index, piece),
                (None, None) => {}
            }
        }

        match entry.kind {
            DiffKind::Add | DiffKind::Change => {
                self.insert(entry.dst, RevisionList::from_slice(&[newer_index]));
            }
            DiffKind::Delete => {}
        }
    }

    /// Expands the ranges into per-line revision lists, newest first.
    fn into_line_map(self) -> LineMap {
        let mut cells: Vec<RevisionList> = Vec::new();
        for &(begin, index) in &self.by_begin {
            let record = &self.records[index as usize];
            debug_assert_eq!(
                begin as usize,
                cells.len() + 1,
                "line coverage must be contiguous from line 1"
            );
            for _ in 0..record.span.len() {
                cells.push(record.revisions.iter().rev().copied().collect());
            }
        }
        LineMap { cells }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bstr::BString;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::alignment::refine_diff;
    use crate::log::LogEntry;

    #[derive(Default)]
    struct StubOracle {
        lengths: HashMap<Revision, u32>,
        diffs: HashMap<(Revision, Revision), Diff>,
    }

    impl StubOracle {
        fn length(mut self, revision: &str, length: u32) -> Self {
            self.lengths.insert(revision.parse().unwrap(), length);
            self
        }

        /// Registers the diff `from -> to` given as wire text with content,
        /// refined and top-aligned like the real oracle does.
        fn diff(mut self, from: &str, to: &str, text: &str) -> Self {
            let mut diff = refine_diff(Diff::parse(text.as_bytes()));
            diff.align_top();
            self.diffs
                .insert((from.parse().unwrap(), to.parse().unwrap()), diff);
            self
        }
    }

    impl DiffOracle for StubOracle {
        fn diff(&mut self, from: &Revision, to: &Revision) -> Result<Diff, OracleError> {
            if let Some(diff) = self.diffs.get(&(from.clone(), to.clone())) {
                Ok(diff.clone())
            } else if let Some(diff) = self.diffs.get(&(to.clone(), from.clone())) {
                Ok(diff.inverted())
            } else {
                Err(OracleError::new(format!("no diff {from} -> {to}")))
            }
        }

        fn line_count(&mut self, revision: &Revision) -> Result<u32, OracleError> {
            self.lengths
                .get(revision)
                .copied()
                .ok_or_else(|| OracleError::new(format!("no length for {revision}")))
        }
    }

    fn make_log(revisions: &[&str]) -> FileLog {
        FileLog {
            working_file: "a.c".to_owned(),
            rcs_file: "/cvs/a.c,v".to_owned(),
            entries: revisions
                .iter()
                .map(|text| LogEntry {
                    revision: text.parse().unwrap(),
                    date: "2001/01/01 00:00:00".to_owned(),
                    author: "someone".to_owned(),
                    state: "Exp".to_owned(),
                    lines: String::new(),
                    comment: BString::from(format!("commit {text}\n")),
                })
                .collect(),
            truncated: false,
        }
    }

    /// Runs both strategies, asserts they agree, and resolves revision
    /// indices to revision strings.
    fn track_both(log: &FileLog, oracle: &mut StubOracle) -> Vec<Vec<String>> {
        let options = TrackOptions::default();
        let backward = BackwardLineTracker.track(log, oracle, &options).unwrap();
        let forward = ForwardRangeTracker.track(log, oracle, &options).unwrap();
        assert_eq!(backward, forward, "strategies must produce identical maps");
        resolve(log, &backward)
    }

    fn resolve(log: &FileLog, map: &LineMap) -> Vec<Vec<String>> {
        map.lines()
            .map(|(_, indices)| {
                indices
                    .iter()
                    .map(|&i| log.entries[i as usize].revision.to_string())
                    .collect()
            })
            .collect()
    }

    fn revs(lists: &[&[&str]]) -> Vec<Vec<String>> {
        lists
            .iter()
            .map(|list| list.iter().map(|r| (*r).to_owned()).collect())
            .collect()
    }

    #[test]
    fn test_single_revision_file() {
        let log = make_log(&["1.1"]);
        let mut oracle = StubOracle::default().length("1.1", 3);
        let map = track_both(&log, &mut oracle);
        assert_eq!(map, revs(&[&["1.1"], &["1.1"], &["1.1"]]));
    }

    #[test]
    fn test_pure_append() {
        let log = make_log(&["1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.2", 5)
            .length("1.1", 3)
            .diff("1.2", "1.1", "4,5d3\n< four\n< five\n");
        let map = track_both(&log, &mut oracle);
        assert_eq!(
            map,
            revs(&[
                &["1.2", "1.1"],
                &["1.2", "1.1"],
                &["1.2", "1.1"],
                &["1.2"],
                &["1.2"],
            ])
        );
    }

    #[test]
    fn test_pure_delete_forward() {
        let log = make_log(&["1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.2", 3)
            .length("1.1", 5)
            .diff("1.2", "1.1", "3a4,5\n> four\n> five\n");
        let map = track_both(&log, &mut oracle);
        assert_eq!(
            map,
            revs(&[&["1.2", "1.1"], &["1.2", "1.1"], &["1.2", "1.1"]])
        );
    }

    #[test]
    fn test_one_to_one_change() {
        let log = make_log(&["1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.2", 3)
            .length("1.1", 3)
            .diff("1.2", "1.1", "2c2\n< the new text\n---\n> the old text\n");
        let map = track_both(&log, &mut oracle);
        assert_eq!(
            map,
            revs(&[&["1.2", "1.1"], &["1.2"], &["1.2", "1.1"]])
        );
    }

    #[test]
    fn test_coarse_change_block_refined() {
        // The hunk reports lines 2-3 changed, but alignment finds line 2
        // untouched; only line 3 loses its history.
        let log = make_log(&["1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.2", 3)
            .length("1.1", 3)
            .diff("1.2", "1.1", "2,3c2,3\n< apple\n< banana\n---\n> apple\n> cherry\n");
        let map = track_both(&log, &mut oracle);
        assert_eq!(
            map,
            revs(&[&["1.2", "1.1"], &["1.2", "1.1"], &["1.2"]])
        );
    }

    #[test]
    fn test_three_revisions() {
        let log = make_log(&["1.3", "1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.3", 4)
            .length("1.2", 3)
            .length("1.1", 3)
            .diff("1.3", "1.2", "3d2\n< added line\n")
            .diff("1.2", "1.1", "2c2\n< x2 new\n---\n> x2 old\n");
        let map = track_both(&log, &mut oracle);
        assert_eq!(
            map,
            revs(&[
                &["1.3", "1.2", "1.1"],
                &["1.3", "1.2"],
                &["1.3"],
                &["1.3", "1.2", "1.1"],
            ])
        );
    }

    #[test]
    fn test_empty_file() {
        let log = make_log(&["1.1"]);
        let mut oracle = StubOracle::default().length("1.1", 0);
        let map = track_both(&log, &mut oracle);
        assert_eq!(map, revs(&[]));
    }

    #[test]
    fn test_completeness() {
        let log = make_log(&["1.3", "1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.3", 6)
            .length("1.2", 5)
            .length("1.1", 2)
            .diff("1.3", "1.2", "1d0\n< newest line\n")
            .diff("1.2", "1.1", "2,4d1\n< a\n< b\n< c\n");
        let options = TrackOptions::default();
        let map = BackwardLineTracker.track(&log, &mut oracle, &options).unwrap();
        assert_eq!(map.line_count(), 6);
        for (line, indices) in map.lines() {
            assert!(!indices.is_empty(), "line {line} has no revisions");
        }
        assert_eq!(
            resolve(&log, &map),
            resolve(&log, &ForwardRangeTracker.track(&log, &mut oracle, &options).unwrap())
        );
    }

    #[test]
    fn test_missing_diff_skips_pair() {
        let log = make_log(&["1.3", "1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.3", 2)
            .diff("1.3", "1.2", "");
        // The 1.2 -> 1.1 diff is unavailable: the pair is skipped and 1.1
        // never recorded.
        let map = BackwardLineTracker
            .track(&log, &mut oracle, &TrackOptions::default())
            .unwrap();
        assert_eq!(
            resolve(&log, &map),
            revs(&[&["1.3", "1.2"], &["1.3", "1.2"]])
        );
    }

    #[test]
    fn test_missing_line_count_is_fatal() {
        let log = make_log(&["1.2", "1.1"]);
        let mut oracle = StubOracle::default();
        let result = BackwardLineTracker.track(&log, &mut oracle, &TrackOptions::default());
        assert!(matches!(
            result,
            Err(TrackError::MissingLineCount { .. })
        ));
    }

    #[test]
    fn test_start_revision_override() {
        let log = make_log(&["1.3", "1.2", "1.1"]);
        let mut oracle = StubOracle::default()
            .length("1.2", 2)
            .length("1.1", 2)
            .diff("1.2", "1.1", "2c2\n< after\n---\n> before\n");
        let options = TrackOptions {
            start_revision: Some("1.2".parse().unwrap()),
        };
        let backward = BackwardLineTracker.track(&log, &mut oracle, &options).unwrap();
        let forward = ForwardRangeTracker.track(&log, &mut oracle, &options).unwrap();
        assert_eq!(backward, forward);
        assert_eq!(
            resolve(&log, &backward),
            revs(&[&["1.2", "1.1"], &["1.2"]])
        );

        let unknown = TrackOptions {
            start_revision: Some("8.9".parse().unwrap()),
        };
        assert!(matches!(
            BackwardLineTracker.track(&log, &mut oracle, &unknown),
            Err(TrackError::UnknownStartRevision(_))
        ));
    }

    #[test]
    fn test_empty_log_is_an_error() {
        let log = make_log(&[]);
        let mut oracle = StubOracle::default();
        assert!(matches!(
            BackwardLineTracker.track(&log, &mut oracle, &TrackOptions::default()),
            Err(TrackError::EmptyLog)
        ));
    }
}
