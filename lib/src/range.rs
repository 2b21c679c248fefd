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

//! Half-open intervals of 1-based line numbers.

use std::fmt;

use thiserror::Error;

/// Error from a line-range operation that would break `begin <= end`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RangeError {
    #[error("Range begin {begin} exceeds end {end}")]
    Inverted { begin: u32, end: u32 },
    #[error("Shifting {range} by {offset} goes out of bounds")]
    ShiftOutOfBounds { range: LineRange, offset: i64 },
    #[error("Ranges {0} and {1} do not overlap")]
    NoOverlap(LineRange, LineRange),
}

/// A half-open interval `[begin, end)` of 1-based line numbers.
///
/// The interval is empty iff `begin == end`; an empty range still marks a
/// position (e.g. the insertion point of an `add` hunk).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct LineRange {
    begin: u32,
    end: u32,
}

impl LineRange {
    /// Creates `[begin, end)`, requiring `begin <= end`.
    pub fn new(begin: u32, end: u32) -> Result<Self, RangeError> {
        if begin > end {
            return Err(RangeError::Inverted { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// The empty range `[pos, pos)`.
    pub fn point(pos: u32) -> Self {
        Self { begin: pos, end: pos }
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of lines covered.
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn contains(&self, pos: u32) -> bool {
        self.begin <= pos && pos < self.end
    }

    /// Moves the whole range by `offset`, keeping its length.
    pub fn shift(&mut self, offset: i64) -> Result<(), RangeError> {
        let begin = checked_pos(self.begin, offset)
            .ok_or(RangeError::ShiftOutOfBounds { range: *self, offset })?;
        let end = checked_pos(self.end, offset)
            .ok_or(RangeError::ShiftOutOfBounds { range: *self, offset })?;
        self.begin = begin;
        self.end = end;
        Ok(())
    }

    /// Moves only `begin`; the result must stay within `[0, end]`.
    pub fn shift_begin(&mut self, offset: i64) -> Result<(), RangeError> {
        match checked_pos(self.begin, offset) {
            Some(begin) if begin <= self.end => {
                self.begin = begin;
                Ok(())
            }
            _ => Err(RangeError::ShiftOutOfBounds { range: *self, offset }),
        }
    }

    /// Moves only `end`; the result must stay at or above `begin`.
    pub fn shift_end(&mut self, offset: i64) -> Result<(), RangeError> {
        match checked_pos(self.end, offset) {
            Some(end) if self.begin <= end => {
                self.end = end;
                Ok(())
            }
            _ => Err(RangeError::ShiftOutOfBounds { range: *self, offset }),
        }
    }

    /// Removes the overlap with `other` from this range.
    ///
    /// The part of `self` below `other` stays in `self`; the part above
    /// `other` is returned (and may be empty).
    pub fn subtract(&mut self, other: &Self) -> Self {
        let upper_begin = other.end.clamp(self.begin, self.end);
        let upper = Self { begin: upper_begin, end: self.end };
        self.end = other.begin.clamp(self.begin, self.end);
        upper
    }

    /// The smallest range covering both inputs.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// The common part of two overlapping ranges.
    pub fn intersect(&self, other: &Self) -> Result<Self, RangeError> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        if begin > end {
            return Err(RangeError::NoOverlap(*self, *other));
        }
        Ok(Self { begin, end })
    }
}

fn checked_pos(pos: u32, offset: i64) -> Option<u32> {
    u32::try_from(i64::from(pos) + offset).ok()
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn range(begin: u32, end: u32) -> LineRange {
        LineRange::new(begin, end).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted() {
        assert_matches!(
            LineRange::new(5, 4),
            Err(RangeError::Inverted { begin: 5, end: 4 })
        );
    }

    #[test]
    fn test_len_and_empty() {
        assert_eq!(range(4, 6).len(), 2);
        assert!(!range(4, 6).is_empty());
        assert!(LineRange::point(4).is_empty());
        assert_eq!(LineRange::point(4).len(), 0);
    }

    #[test]
    fn test_shift() {
        let mut r = range(4, 6);
        r.shift(2).unwrap();
        assert_eq!(r, range(6, 8));
        r.shift(-5).unwrap();
        assert_eq!(r, range(1, 3));
        assert_matches!(r.shift(-2), Err(RangeError::ShiftOutOfBounds { .. }));
        assert_eq!(r, range(1, 3));
    }

    #[test]
    fn test_shift_begin_end() {
        let mut r = range(4, 6);
        r.shift_begin(2).unwrap();
        assert_eq!(r, range(6, 6));
        assert_matches!(r.shift_begin(1), Err(RangeError::ShiftOutOfBounds { .. }));
        r.shift_end(3).unwrap();
        assert_eq!(r, range(6, 9));
        assert_matches!(r.shift_end(-4), Err(RangeError::ShiftOutOfBounds { .. }));
    }

    #[test]
    fn test_subtract_middle_splits() {
        let mut r = range(1, 10);
        let upper = r.subtract(&range(4, 6));
        assert_eq!(r, range(1, 4));
        assert_eq!(upper, range(6, 10));
    }

    #[test]
    fn test_subtract_disjoint() {
        // Subtrahend entirely above: everything stays in the lower part.
        let mut r = range(1, 4);
        let upper = r.subtract(&range(6, 8));
        assert_eq!(r, range(1, 4));
        assert!(upper.is_empty());

        // Subtrahend entirely below: everything moves to the returned part.
        let mut r = range(6, 8);
        let upper = r.subtract(&range(1, 4));
        assert!(r.is_empty());
        assert_eq!(upper, range(6, 8));
    }

    #[test]
    fn test_subtract_covering() {
        let mut r = range(4, 6);
        let upper = r.subtract(&range(1, 10));
        assert!(r.is_empty());
        assert!(upper.is_empty());
    }

    #[test]
    fn test_union_intersect() {
        assert_eq!(range(1, 4).union(&range(3, 8)), range(1, 8));
        assert_eq!(range(1, 4).intersect(&range(3, 8)).unwrap(), range(3, 4));
        assert_matches!(
            range(1, 3).intersect(&range(5, 8)),
            Err(RangeError::NoOverlap(..))
        );
        // Touching ranges intersect in an empty range at the boundary.
        assert_eq!(range(1, 3).intersect(&range(3, 8)).unwrap(), range(3, 3));
    }
}
