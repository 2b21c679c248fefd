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

//! Classical `diff` hunks: parsing, top alignment and the cache text form.

use std::fmt;

use bstr::BString;
use bstr::ByteSlice as _;
use thiserror::Error;

use crate::range::LineRange;

/// Error from decoding the compact cache form of a diff.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiffParseError {
    #[error("Invalid diff hunk group {0:?}")]
    InvalidGroup(String),
}

/// What one hunk does, named from the source side's point of view.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DiffKind {
    /// Lines present only on the destination side.
    Add,
    /// Lines replaced by other lines.
    Change,
    /// Lines present only on the source side.
    Delete,
}

impl DiffKind {
    fn as_char(self) -> char {
        match self {
            Self::Add => 'a',
            Self::Change => 'c',
            Self::Delete => 'd',
        }
    }
}

/// One hunk of a diff between two file versions.
///
/// Range conventions follow the wire form: `3a4,5` has `src = [4, 4)` and
/// `dst = [4, 6)`; `4,5d3` has `src = [4, 6)` and `dst = [4, 4)`; `3,4c5,6`
/// has `src = [3, 5)` and `dst = [5, 7)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiffEntry {
    pub src: LineRange,
    pub dst: LineRange,
    pub kind: DiffKind,
    /// Captured `< ` lines, populated when parsing a content diff.
    pub src_lines: Vec<BString>,
    /// Captured `> ` lines, populated when parsing a content diff.
    pub dst_lines: Vec<BString>,
}

impl DiffEntry {
    /// A hunk without captured content.
    pub fn new(src: LineRange, dst: LineRange, kind: DiffKind) -> Self {
        Self {
            src,
            dst,
            kind,
            src_lines: vec![],
            dst_lines: vec![],
        }
    }

    /// How many lines this hunk grows (or shrinks) the file by.
    pub fn size_delta(&self) -> i64 {
        i64::from(self.dst.len()) - i64::from(self.src.len())
    }

    /// The classical hunk header for this entry, e.g. `4,5d3`.
    fn wire_header(&self) -> String {
        fn pair(first: u32, last: u32) -> String {
            if first == last {
                format!("{first}")
            } else {
                format!("{first},{last}")
            }
        }
        let kind = self.kind.as_char();
        match self.kind {
            DiffKind::Add => {
                let s = self.src.begin() - 1;
                format!("{s}{kind}{}", pair(self.dst.begin(), self.dst.end() - 1))
            }
            DiffKind::Delete => {
                let d = self.dst.begin() - 1;
                format!("{}{kind}{d}", pair(self.src.begin(), self.src.end() - 1))
            }
            DiffKind::Change => {
                format!(
                    "{}{kind}{}",
                    pair(self.src.begin(), self.src.end() - 1),
                    pair(self.dst.begin(), self.dst.end() - 1)
                )
            }
        }
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.wire_header())
    }
}

/// An ordered list of hunks between two versions of one file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Diff {
    entries: Vec<DiffEntry>,
    aligned: bool,
}

impl Diff {
    /// Wraps already-built hunks. `aligned` states whether their source
    /// ranges are in the post-edit coordinate space (see
    /// [`Diff::align_top()`]).
    pub fn from_entries(entries: Vec<DiffEntry>, aligned: bool) -> Self {
        debug_assert!(
            entries.is_sorted_by_key(|e| e.src.begin()),
            "hunks must be ordered by source position"
        );
        Self { entries, aligned }
    }

    /// Parses `diff` output, capturing hunk content.
    ///
    /// Anything that is neither a hunk header nor hunk content (such as the
    /// `Index:`/`retrieving revision` preamble cvs prints) is skipped; the
    /// parser resynchronises on the next hunk header.
    pub fn parse(input: &[u8]) -> Self {
        let mut entries: Vec<DiffEntry> = Vec::new();
        let mut lines = input.lines().peekable();
        while let Some(line) = lines.next() {
            let Some(mut entry) = parse_wire_header(line) else {
                continue;
            };
            while let Some(&content) = lines.peek() {
                if let Some(text) = content.strip_prefix(b"< ") {
                    entry.src_lines.push(text.into());
                } else if let Some(text) = content.strip_prefix(b"> ") {
                    entry.dst_lines.push(text.into());
                } else if content == b"<" {
                    entry.src_lines.push(BString::default());
                } else if content == b">" {
                    entry.dst_lines.push(BString::default());
                } else if content != b"---" && !content.starts_with(b"\\") {
                    break;
                }
                lines.next();
            }
            if entries
                .last()
                .is_some_and(|prev| prev.src.begin() > entry.src.begin())
            {
                tracing::warn!(hunk = %entry, "discarding out-of-order diff hunk");
                continue;
            }
            entries.push(entry);
        }
        Self {
            entries,
            aligned: false,
        }
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DiffEntry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether source ranges are expressed in the post-edit coordinate
    /// space.
    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    /// Marks decoded hunks as already top-aligned (the cache stores them
    /// that way).
    pub fn mark_aligned(&mut self) {
        self.aligned = true;
    }

    /// Rewrites each hunk's source range by the cumulative size delta of
    /// the preceding hunks, so that successive hunks refer to the
    /// coordinate space with the earlier edits already applied.
    pub fn align_top(&mut self) {
        self.shift_sources(1);
        self.aligned = true;
    }

    /// Undoes [`Diff::align_top()`].
    pub fn unalign_top(&mut self) {
        self.shift_sources(-1);
        self.aligned = false;
    }

    fn shift_sources(&mut self, direction: i64) {
        let mut offset = 0;
        for entry in &mut self.entries {
            if let Err(err) = entry.src.shift(direction * offset) {
                tracing::warn!(hunk = %entry, "cannot shift diff hunk: {err}");
            }
            offset += entry.size_delta();
        }
    }

    /// The same diff read in the opposite direction: sides swapped, adds
    /// and deletes exchanged.
    ///
    /// Top alignment is re-derived for the new direction; the coordinate
    /// shift of the original direction does not survive a plain swap.
    pub fn inverted(&self) -> Self {
        let mut unaligned = self.clone();
        if self.aligned {
            unaligned.unalign_top();
        }
        let entries = unaligned
            .entries
            .into_iter()
            .map(|entry| DiffEntry {
                src: entry.dst,
                dst: entry.src,
                kind: match entry.kind {
                    DiffKind::Add => DiffKind::Delete,
                    DiffKind::Delete => DiffKind::Add,
                    DiffKind::Change => DiffKind::Change,
                },
                src_lines: entry.dst_lines,
                dst_lines: entry.src_lines,
            })
            .collect();
        let mut inverted = Self {
            entries,
            aligned: false,
        };
        if self.aligned {
            inverted.align_top();
        }
        inverted
    }

    /// Encodes the hunks as concatenated `.`-terminated wire headers, the
    /// form kept in the store's diff table.
    pub fn encode(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&entry.wire_header());
            text.push('.');
        }
        text
    }

    /// Decodes the cache text form produced by [`Diff::encode()`].
    pub fn decode(text: &str) -> Result<Self, DiffParseError> {
        let mut entries = Vec::new();
        for group in text.split_terminator('.') {
            let entry = parse_wire_header(group.as_bytes())
                .ok_or_else(|| DiffParseError::InvalidGroup(group.to_owned()))?;
            entries.push(entry);
        }
        Ok(Self {
            entries,
            aligned: false,
        })
    }
}

/// Parses a hunk header of the form `s1[,s2]{a|c|d}d1[,d2]`.
fn parse_wire_header(line: &[u8]) -> Option<DiffEntry> {
    fn number(input: &mut &[u8]) -> Option<u32> {
        let digits = input.len() - input.trim_start_with(|c| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        let (text, rest) = input.split_at(digits);
        *input = rest;
        // Leave headroom for the +1 conversions to half-open ranges.
        text.to_str().ok()?.parse::<u32>().ok().filter(|n| *n < u32::MAX)
    }
    fn number_pair(input: &mut &[u8]) -> Option<(u32, u32)> {
        let first = number(input)?;
        if let Some(rest) = input.strip_prefix(b",") {
            *input = rest;
            Some((first, number(input)?))
        } else {
            Some((first, first))
        }
    }

    let mut input = line;
    let (s1, s2) = number_pair(&mut input)?;
    let (&kind, rest) = input.split_first()?;
    input = rest;
    let (d1, d2) = number_pair(&mut input)?;
    if !input.is_empty() || s2 < s1 || d2 < d1 {
        return None;
    }
    let (src, dst, kind) = match kind {
        b'a' => {
            let src = LineRange::point(s1 + 1);
            let dst = LineRange::new(d1, d2 + 1).ok()?;
            (src, dst, DiffKind::Add)
        }
        b'd' => {
            let src = LineRange::new(s1, s2 + 1).ok()?;
            let dst = LineRange::point(d1 + 1);
            (src, dst, DiffKind::Delete)
        }
        b'c' => {
            let src = LineRange::new(s1, s2 + 1).ok()?;
            let dst = LineRange::new(d1, d2 + 1).ok()?;
            (src, dst, DiffKind::Change)
        }
        _ => return None,
    };
    Some(DiffEntry::new(src, dst, kind))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn range(begin: u32, end: u32) -> LineRange {
        LineRange::new(begin, end).unwrap()
    }

    #[test]
    fn test_parse_wire_headers() {
        let entry = parse_wire_header(b"3a4,5").unwrap();
        assert_eq!(entry.kind, DiffKind::Add);
        assert_eq!(entry.src, LineRange::point(4));
        assert_eq!(entry.dst, range(4, 6));

        let entry = parse_wire_header(b"4,5d3").unwrap();
        assert_eq!(entry.kind, DiffKind::Delete);
        assert_eq!(entry.src, range(4, 6));
        assert_eq!(entry.dst, LineRange::point(4));

        let entry = parse_wire_header(b"3,4c5,6").unwrap();
        assert_eq!(entry.kind, DiffKind::Change);
        assert_eq!(entry.src, range(3, 5));
        assert_eq!(entry.dst, range(5, 7));

        for garbage in ["", "3", "3a", "a4", "3x4", "3a4,5 trailing", "5,4d3"] {
            assert!(parse_wire_header(garbage.as_bytes()).is_none(), "{garbage}");
        }
    }

    #[test]
    fn test_parse_content_diff() {
        let input = indoc! {"
            Index: main.cpp
            ===================================================================
            RCS file: /home/cvs/kdenetwork/kmail/main.cpp,v
            retrieving revision 1.2
            retrieving revision 1.1
            diff -kk -N -b -r1.2 -r1.1
            2,3c2,3
            < apple
            < banana
            ---
            > apple
            > cherry
            6d5
            < stray
            7a7,8
            > one
            > two
        "};
        let diff = Diff::parse(input.as_bytes());
        assert_eq!(diff.entries().len(), 3);

        let change = &diff.entries()[0];
        assert_eq!(change.kind, DiffKind::Change);
        assert_eq!(change.src_lines, ["apple", "banana"]);
        assert_eq!(change.dst_lines, ["apple", "cherry"]);

        let delete = &diff.entries()[1];
        assert_eq!(delete.kind, DiffKind::Delete);
        assert_eq!(delete.src_lines, ["stray"]);
        assert!(delete.dst_lines.is_empty());

        let add = &diff.entries()[2];
        assert_eq!(add.kind, DiffKind::Add);
        assert_eq!(add.dst_lines, ["one", "two"]);
    }

    #[test]
    fn test_align_top() {
        // 2a3,4 grows the file by two lines, so the later hunks' source
        // positions move right by two in the post-edit space.
        let mut diff = Diff::parse(b"2a3,4\n7,8d8\n10c12\n");
        diff.align_top();
        assert!(diff.is_aligned());
        let entries = diff.entries();
        assert_eq!(entries[0].src, LineRange::point(3));
        assert_eq!(entries[1].src, range(9, 11));
        assert_eq!(entries[1].dst, LineRange::point(9));
        // The change follows an add (+2) and a delete (-2).
        assert_eq!(entries[2].src, range(10, 11));
    }

    #[test]
    fn test_align_unalign_round_trip() {
        let original = Diff::parse(b"2a3,4\n7,8d8\n10c12\n12,14c14,16\n");
        let mut diff = original.clone();
        diff.align_top();
        diff.unalign_top();
        assert_eq!(diff.entries(), original.entries());
    }

    #[test]
    fn test_encode_matches_wire_form() {
        let entry = DiffEntry::new(range(4, 6), LineRange::point(4), DiffKind::Delete);
        let diff = Diff::from_entries(vec![entry], false);
        assert_eq!(diff.encode(), "4,5d3.");

        let decoded = Diff::decode("4,5d3.").unwrap();
        assert_eq!(decoded.entries()[0].src, range(4, 6));
        assert_eq!(decoded.entries()[0].dst, LineRange::point(4));
        assert_eq!(decoded.entries()[0].kind, DiffKind::Delete);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let diff = Diff::parse(b"2a3,4\n4,5d3\n3,4c5,6\n9c9\n");
        let decoded = Diff::decode(&diff.encode()).unwrap();
        assert_eq!(decoded.entries(), diff.entries());
        assert_eq!(decoded.encode(), diff.encode());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            Diff::decode("4,5e3."),
            Err(DiffParseError::InvalidGroup("4,5e3".to_owned()))
        );
    }

    #[test]
    fn test_inverted() {
        let diff = Diff::parse(b"3a4,5\n8,9d6\n");
        let inverted = diff.inverted();
        assert_eq!(inverted.entries()[0].kind, DiffKind::Delete);
        assert_eq!(inverted.entries()[0].src, range(4, 6));
        assert_eq!(inverted.entries()[0].dst, LineRange::point(4));
        assert_eq!(inverted.entries()[1].kind, DiffKind::Add);
        assert_eq!(inverted.entries()[1].src, LineRange::point(7));
        assert_eq!(inverted.entries()[1].dst, range(8, 10));
        // Inverting twice is the identity.
        assert_eq!(inverted.inverted().entries(), diff.entries());
    }

    #[test]
    fn test_inverted_rederives_alignment() {
        // Two deletions, top-aligned: the second hunk's source sits in the
        // space where the first deletion already happened.
        let mut diff = Diff::parse(b"1d0\n4d2\n");
        diff.align_top();
        assert_eq!(diff.entries()[1].src, range(3, 4));

        // Read the other way they are two insertions, and the second one
        // lands after the first insertion has widened the file.
        let inverted = diff.inverted();
        assert!(inverted.is_aligned());
        assert_eq!(inverted.entries()[0].kind, DiffKind::Add);
        assert_eq!(inverted.entries()[0].src, LineRange::point(1));
        assert_eq!(inverted.entries()[0].dst, range(1, 2));
        assert_eq!(inverted.entries()[1].src, LineRange::point(4));
        assert_eq!(inverted.entries()[1].dst, range(4, 5));
    }
}
