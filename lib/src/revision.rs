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

//! Dotted CVS revision identifiers.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools as _;
use thiserror::Error;

/// Error from parsing a dotted revision identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RevisionParseError {
    #[error("Empty revision")]
    Empty,
    #[error("Empty component in revision {0:?}")]
    EmptyComponent(String),
    #[error("Invalid character {character:?} in revision {text:?}")]
    InvalidCharacter { character: char, text: String },
    #[error("Component out of range in revision {0:?}")]
    ComponentOverflow(String),
}

/// A CVS revision number such as `1.2` or `1.2.3.4`.
///
/// Ordering is componentwise numeric, so `1.9 < 1.10`. A revision that is a
/// strict prefix of another compares less than it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Revision(Vec<u32>);

impl Revision {
    /// Creates a revision from its numeric components.
    ///
    /// Panics if `components` is empty; revisions parsed from CVS output
    /// always have at least one component.
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        let components = components.into();
        assert!(!components.is_empty(), "revision must have components");
        Self(components)
    }

    /// The numeric components, most significant first.
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(RevisionParseError::Empty);
        }
        if let Some(character) = text.chars().find(|c| !c.is_ascii_digit() && *c != '.') {
            return Err(RevisionParseError::InvalidCharacter {
                character,
                text: text.to_owned(),
            });
        }
        let components: Vec<u32> = text
            .split('.')
            .map(|component| {
                if component.is_empty() {
                    Err(RevisionParseError::EmptyComponent(text.to_owned()))
                } else {
                    component
                        .parse()
                        .map_err(|_| RevisionParseError::ComponentOverflow(text.to_owned()))
                }
            })
            .try_collect()?;
        Ok(Self(components))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0.iter().join("."))
    }
}
