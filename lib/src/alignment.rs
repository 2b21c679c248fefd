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

//! Dynamic-programming sequence alignment, and the refinement of coarse
//! `change` hunks into adds, deletes and 1-to-1 changes.

use bstr::BString;
use bstr::ByteSlice as _;

use crate::diff::Diff;
use crate::diff::DiffEntry;
use crate::diff::DiffKind;
use crate::range::LineRange;

/// One move of an alignment path, in source order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlignStep {
    /// Source item `src` lines up with destination item `dst` (0-based).
    Pair { src: usize, dst: usize },
    /// Source item aligned against a gap.
    SrcOnly { src: usize },
    /// Destination item aligned against a gap.
    DstOnly { dst: usize },
}

/// Result of a local alignment search.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalAlignment {
    /// Value of the best cell.
    pub score: i32,
    /// Half-open 0-based span of the destination window the source aligned
    /// into.
    pub dst_range: (usize, usize),
    pub steps: Vec<AlignStep>,
}

/// Globally aligns two sequences, forcing both to start and end aligned.
///
/// `score(a, b)` rates pairing two items; `None` stands for the gap
/// element. The returned path visits every item of both sequences.
pub fn global_align<T, F>(src: &[T], dst: &[T], mut score: F) -> Vec<AlignStep>
where
    F: FnMut(Option<&T>, Option<&T>) -> i32,
{
    let m = src.len();
    let n = dst.len();
    let mut matrix = Matrix::new(m, n);
    for i in 1..=m {
        let value = matrix.get(i - 1, 0) + score(Some(&src[i - 1]), None);
        matrix.set(i, 0, value);
    }
    for j in 1..=n {
        let value = matrix.get(0, j - 1) + score(None, Some(&dst[j - 1]));
        matrix.set(0, j, value);
    }
    for i in 1..=m {
        for j in 1..=n {
            let value = (matrix.get(i - 1, j - 1) + score(Some(&src[i - 1]), Some(&dst[j - 1])))
                .max(matrix.get(i - 1, j) + score(Some(&src[i - 1]), None))
                .max(matrix.get(i, j - 1) + score(None, Some(&dst[j - 1])));
            matrix.set(i, j, value);
        }
    }

    let mut steps = walk_back(&matrix, src, dst, m, n, &mut score, false);
    steps.reverse();
    steps
}

/// Aligns a short source block locally inside a longer destination.
///
/// The first matrix row is zero, so the alignment may start at any
/// destination offset; reconstruction begins at the highest-scoring cell of
/// the final row.
pub fn local_align<T, F>(src: &[T], dst: &[T], mut score: F) -> LocalAlignment
where
    F: FnMut(Option<&T>, Option<&T>) -> i32,
{
    let m = src.len();
    let n = dst.len();
    let mut matrix = Matrix::new(m, n);
    for i in 1..=m {
        let value = matrix.get(i - 1, 0) + score(Some(&src[i - 1]), None);
        matrix.set(i, 0, value);
    }
    for i in 1..=m {
        for j in 1..=n {
            let value = (matrix.get(i - 1, j - 1) + score(Some(&src[i - 1]), Some(&dst[j - 1])))
                .max(matrix.get(i - 1, j) + score(Some(&src[i - 1]), None))
                .max(matrix.get(i, j - 1) + score(None, Some(&dst[j - 1])));
            matrix.set(i, j, value);
        }
    }

    let (best_j, best) = (0..=n)
        .map(|j| (j, matrix.get(m, j)))
        .max_by_key(|&(_, value)| value)
        .expect("matrix has at least one column");
    let mut steps = walk_back(&matrix, src, dst, m, best_j, &mut score, true);
    steps.reverse();
    let dst_start = best_j
        - steps
            .iter()
            .filter(|step| !matches!(step, AlignStep::SrcOnly { .. }))
            .count();
    LocalAlignment {
        score: best,
        dst_range: (dst_start, best_j),
        steps,
    }
}

struct Matrix {
    values: Vec<i32>,
    columns: usize,
}

impl Matrix {
    fn new(m: usize, n: usize) -> Self {
        Self {
            values: vec![0; (m + 1) * (n + 1)],
            columns: n + 1,
        }
    }

    fn get(&self, i: usize, j: usize) -> i32 {
        self.values[i * self.columns + j]
    }

    fn set(&mut self, i: usize, j: usize, value: i32) {
        self.values[i * self.columns + j] = value;
    }
}

/// Reconstructs the path from `(i, j)` back to the matrix origin, or, for a
/// local alignment, back to the first row. Emitted in reverse order.
fn walk_back<T, F>(
    matrix: &Matrix,
    src: &[T],
    dst: &[T],
    mut i: usize,
    mut j: usize,
    score: &mut F,
    local: bool,
) -> Vec<AlignStep>
where
    F: FnMut(Option<&T>, Option<&T>) -> i32,
{
    let mut steps = Vec::with_capacity(i + j);
    while i > 0 || (!local && j > 0) {
        let value = matrix.get(i, j);
        if i > 0
            && j > 0
            && value == matrix.get(i - 1, j - 1) + score(Some(&src[i - 1]), Some(&dst[j - 1]))
        {
            steps.push(AlignStep::Pair {
                src: i - 1,
                dst: j - 1,
            });
            i -= 1;
            j -= 1;
        } else if i > 0 && value == matrix.get(i - 1, j) + score(Some(&src[i - 1]), None) {
            steps.push(AlignStep::SrcOnly { src: i - 1 });
            i -= 1;
        } else {
            debug_assert!(j > 0, "alignment walk cannot move past the origin");
            steps.push(AlignStep::DstOnly { dst: j - 1 });
            j -= 1;
        }
    }
    steps
}

/// Score for pairing two characters: match rewards, mismatch and gaps cost.
pub fn char_score(a: Option<u8>, b: Option<u8>) -> i32 {
    match (a, b) {
        (Some(a), Some(b)) if a == b => 2,
        _ => -1,
    }
}

/// Optimal global character-alignment value of two byte strings.
pub fn char_align_score(src: &[u8], dst: &[u8]) -> i32 {
    // Only the value is needed, so two rolling rows suffice.
    let n = dst.len();
    let mut prev: Vec<i32> = (0..=n).map(|j| -(j as i32)).collect();
    let mut current = vec![0; n + 1];
    for (i, &a) in src.iter().enumerate() {
        current[0] = -((i + 1) as i32);
        for (j, &b) in dst.iter().enumerate() {
            current[j + 1] = (prev[j] + char_score(Some(a), Some(b)))
                .max(prev[j + 1] - 1)
                .max(current[j] - 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[n]
}

/// The gap element used when a whole line aligns against nothing.
const LINE_SPACE: &[u8] = b"\x02";

fn trimmed(line: &BString) -> &[u8] {
    line.trim_with(|c| c == ' ' || c == '\t')
}

/// Score for pairing two lines: the optimal character-alignment value of
/// their whitespace-trimmed text.
pub fn line_score(a: Option<&BString>, b: Option<&BString>) -> i32 {
    match (a, b) {
        (Some(a), Some(b)) => char_align_score(trimmed(a), trimmed(b)),
        (Some(a), None) => char_align_score(trimmed(a), LINE_SPACE),
        (None, Some(b)) => char_align_score(LINE_SPACE, trimmed(b)),
        (None, None) => unreachable!("both sides of a pairing cannot be gaps"),
    }
}

/// Replaces each coarse `change` hunk carrying captured content by the
/// aligned sequence of adds, deletes and strictly 1-to-1 changes; lines
/// that align to an unmodified partner produce no hunk at all.
pub fn refine_diff(diff: Diff) -> Diff {
    let aligned = diff.is_aligned();
    let mut entries = Vec::new();
    for entry in diff.into_entries() {
        if entry.kind == DiffKind::Change
            && entry.src_lines.len() == entry.src.len() as usize
            && entry.dst_lines.len() == entry.dst.len() as usize
        {
            entries.extend(refine_change(&entry));
        } else {
            if entry.kind == DiffKind::Change {
                tracing::warn!(hunk = %entry, "change hunk has no captured content; kept coarse");
            }
            entries.push(entry);
        }
    }
    Diff::from_entries(entries, aligned)
}

fn refine_change(entry: &DiffEntry) -> Vec<DiffEntry> {
    let steps = global_align(&entry.src_lines, &entry.dst_lines, line_score);
    let mut builder = RefineBuilder {
        src_base: entry.src.begin(),
        dst_base: entry.dst.begin(),
        src_pos: 0,
        dst_pos: 0,
        run: Run::None,
        out: Vec::new(),
    };
    for step in steps {
        builder.push(step, &entry.src_lines, &entry.dst_lines);
    }
    builder.flush();
    builder.out
}

enum Run {
    None,
    Delete { src_first: u32, dst_point: u32, lines: Vec<BString> },
    Add { dst_first: u32, src_point: u32, lines: Vec<BString> },
}

struct RefineBuilder {
    src_base: u32,
    dst_base: u32,
    src_pos: u32,
    dst_pos: u32,
    run: Run,
    out: Vec<DiffEntry>,
}

impl RefineBuilder {
    fn push(&mut self, step: AlignStep, src_lines: &[BString], dst_lines: &[BString]) {
        match step {
            AlignStep::Pair { src, dst } => {
                self.flush();
                if trimmed(&src_lines[src]) != trimmed(&dst_lines[dst]) {
                    let src_at = self.src_base + self.src_pos;
                    let dst_at = self.dst_base + self.dst_pos;
                    let mut change = DiffEntry::new(
                        LineRange::new(src_at, src_at + 1).unwrap(),
                        LineRange::new(dst_at, dst_at + 1).unwrap(),
                        DiffKind::Change,
                    );
                    change.src_lines.push(src_lines[src].clone());
                    change.dst_lines.push(dst_lines[dst].clone());
                    self.out.push(change);
                }
                self.src_pos += 1;
                self.dst_pos += 1;
            }
            AlignStep::SrcOnly { src } => {
                match &mut self.run {
                    Run::Delete { lines, .. } => lines.push(src_lines[src].clone()),
                    _ => {
                        self.flush();
                        self.run = Run::Delete {
                            src_first: self.src_base + self.src_pos,
                            dst_point: self.dst_base + self.dst_pos,
                            lines: vec![src_lines[src].clone()],
                        };
                    }
                }
                self.src_pos += 1;
            }
            AlignStep::DstOnly { dst } => {
                match &mut self.run {
                    Run::Add { lines, .. } => lines.push(dst_lines[dst].clone()),
                    _ => {
                        self.flush();
                        self.run = Run::Add {
                            dst_first: self.dst_base + self.dst_pos,
                            src_point: self.src_base + self.src_pos,
                            lines: vec![dst_lines[dst].clone()],
                        };
                    }
                }
                self.dst_pos += 1;
            }
        }
    }

    fn flush(&mut self) {
        match std::mem::replace(&mut self.run, Run::None) {
            Run::None => {}
            Run::Delete { src_first, dst_point, lines } => {
                let mut entry = DiffEntry::new(
                    LineRange::new(src_first, src_first + lines.len() as u32).unwrap(),
                    LineRange::point(dst_point),
                    DiffKind::Delete,
                );
                entry.src_lines = lines;
                self.out.push(entry);
            }
            Run::Add { dst_first, src_point, lines } => {
                let mut entry = DiffEntry::new(
                    LineRange::point(src_point),
                    LineRange::new(dst_first, dst_first + lines.len() as u32).unwrap(),
                    DiffKind::Add,
                );
                entry.dst_lines = lines;
                self.out.push(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<BString> {
        texts.iter().map(|t| BString::from(*t)).collect()
    }

    fn change_hunk(src: LineRange, dst: LineRange, from: &[&str], to: &[&str]) -> DiffEntry {
        let mut entry = DiffEntry::new(src, dst, DiffKind::Change);
        entry.src_lines = lines(from);
        entry.dst_lines = lines(to);
        entry
    }

    fn range(begin: u32, end: u32) -> LineRange {
        LineRange::new(begin, end).unwrap()
    }

    #[test]
    fn test_char_align_score() {
        assert_eq!(char_align_score(b"abc", b"abc"), 6);
        assert_eq!(char_align_score(b"abc", b"abd"), 3);
        // A shared subsequence is found across an insertion.
        assert_eq!(char_align_score(b"ac", b"abc"), 3);
        assert_eq!(char_align_score(b"", b"abc"), -3);
        assert_eq!(char_align_score(b"", b""), 0);
    }

    #[test]
    fn test_global_align_prefers_matches() {
        let src = lines(&["aaaa", "bbbb"]);
        let dst = lines(&["bbbb", "cccc"]);
        let steps = global_align(&src, &dst, line_score);
        assert_eq!(
            steps,
            vec![
                AlignStep::SrcOnly { src: 0 },
                AlignStep::Pair { src: 1, dst: 0 },
                AlignStep::DstOnly { dst: 1 },
            ]
        );
    }

    #[test]
    fn test_refine_keeps_only_modified_lines() {
        // 2,3c2,3 where the first pair is unchanged: only line 3 remains a
        // change.
        let entry = change_hunk(
            range(2, 4),
            range(2, 4),
            &["apple", "banana"],
            &["apple", "cherry"],
        );
        let refined = refine_change(&entry);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].kind, DiffKind::Change);
        assert_eq!(refined[0].src, range(3, 4));
        assert_eq!(refined[0].dst, range(3, 4));
        assert_eq!(refined[0].src_lines, ["banana"]);
        assert_eq!(refined[0].dst_lines, ["cherry"]);
    }

    #[test]
    fn test_refine_emits_add_and_delete() {
        // The old first line disappears and a new last line appears around a
        // common middle: one delete plus one add, no change.
        let entry = change_hunk(
            range(2, 4),
            range(2, 4),
            &["aaaa", "bbbb"],
            &["bbbb", "cccc"],
        );
        let refined = refine_change(&entry);
        assert_eq!(refined.len(), 2);
        assert_eq!(refined[0].kind, DiffKind::Delete);
        assert_eq!(refined[0].src, range(2, 3));
        assert_eq!(refined[0].dst, LineRange::point(2));
        assert_eq!(refined[1].kind, DiffKind::Add);
        assert_eq!(refined[1].src, LineRange::point(4));
        assert_eq!(refined[1].dst, range(3, 4));
    }

    #[test]
    fn test_refine_ignores_leading_whitespace() {
        let entry = change_hunk(range(1, 2), range(1, 2), &["    x = 1;"], &["\tx = 1;"]);
        assert_eq!(refine_change(&entry), vec![]);
    }

    #[test]
    fn test_refine_coalesces_runs() {
        // Two unrelated extra lines coalesce into a single two-line add.
        let entry = change_hunk(
            range(5, 6),
            range(5, 8),
            &["keep me"],
            &["keep me", "first new line", "second new line"],
        );
        let refined = refine_change(&entry);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].kind, DiffKind::Add);
        assert_eq!(refined[0].src, LineRange::point(6));
        assert_eq!(refined[0].dst, range(6, 8));
        assert_eq!(refined[0].dst_lines.len(), 2);
    }

    #[test]
    fn test_refine_diff_leaves_other_kinds_alone() {
        let diff = Diff::parse(b"3a4,5\n> one\n> two\n6,7c7,8\n< aaaa\n< bbbb\n---\n> aaaa\n> cccc\n");
        let refined = refine_diff(diff);
        let kinds: Vec<DiffKind> = refined.entries().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [DiffKind::Add, DiffKind::Change]);
        assert_eq!(refined.entries()[1].src, range(7, 8));
    }

    #[test]
    fn test_local_align_finds_window() {
        let src: Vec<u8> = b"abc".to_vec();
        let dst: Vec<u8> = b"xxabcyy".to_vec();
        let result = local_align(&src, &dst, |a, b| char_score(a.copied(), b.copied()));
        assert_eq!(result.score, 6);
        assert_eq!(result.dst_range, (2, 5));
        assert_eq!(
            result.steps,
            vec![
                AlignStep::Pair { src: 0, dst: 2 },
                AlignStep::Pair { src: 1, dst: 3 },
                AlignStep::Pair { src: 2, dst: 4 },
            ]
        );
    }
}
