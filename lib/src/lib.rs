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

//! Library for cvsmap: indexes a CVS-hosted source tree so that every line
//! of every file in its current revision maps to the revisions it has
//! lived through, together with their commit comments.
//!
//! The pipeline parses `cvs log` and `cvs diff` output ([`log`], [`diff`]),
//! refines coarse change hunks by sequence alignment ([`alignment`]),
//! propagates line ownership across the revision history ([`tracking`]),
//! persists the results in a keyed store ([`store`]) and emits the per-line
//! comment records consumed by a full-text indexer ([`materialize`]).

pub mod alignment;
pub mod cvs;
pub mod diff;
pub mod exec;
pub mod log;
pub mod mapper;
pub mod materialize;
pub mod range;
pub mod revision;
pub mod store;
pub mod tracking;
