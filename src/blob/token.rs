//! Identity types for workers and the edges between them.
//!
//! A [`Token`] names a directed edge by the identifiers of the two workers it
//! connects. Worker identifiers are stable across re-partitioning, so tokens
//! stay valid when the same stream graph is split into a different set of
//! blobs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a worker (filter, splitter or joiner) in the stream graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub i32);

impl WorkerId {
    /// Sentinel for "outside the graph".
    pub const BOUNDARY: WorkerId = WorkerId(Token::BOUNDARY);

    #[inline]
    pub fn is_boundary(self) -> bool {
        self == Self::BOUNDARY
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_boundary() {
            write!(f, "WorkerId(BOUNDARY)")
        } else {
            write!(f, "WorkerId({})", self.0)
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for WorkerId {
    fn from(id: i32) -> Self {
        WorkerId(id)
    }
}

/// Directed edge between two workers, or between a worker and the graph boundary.
///
/// Ordering is by upstream identifier, then downstream identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token {
    upstream: i32,
    downstream: i32,
}

impl Token {
    /// Identifier used for the graph boundary on either end of a token.
    pub const BOUNDARY: i32 = -1;

    pub const fn new(upstream: i32, downstream: i32) -> Self {
        Self {
            upstream,
            downstream,
        }
    }

    /// Token for an edge between two workers.
    pub fn between(upstream: WorkerId, downstream: WorkerId) -> Self {
        Self::new(upstream.0, downstream.0)
    }

    /// Token feeding the first worker from outside the graph.
    pub fn overall_input(first: WorkerId) -> Self {
        Self::new(Self::BOUNDARY, first.0)
    }

    /// Token draining the last worker to outside the graph.
    pub fn overall_output(last: WorkerId) -> Self {
        Self::new(last.0, Self::BOUNDARY)
    }

    #[inline]
    pub fn upstream(self) -> WorkerId {
        WorkerId(self.upstream)
    }

    #[inline]
    pub fn downstream(self) -> WorkerId {
        WorkerId(self.downstream)
    }

    #[inline]
    pub fn is_overall_input(self) -> bool {
        self.upstream == Self::BOUNDARY
    }

    #[inline]
    pub fn is_overall_output(self) -> bool {
        self.downstream == Self::BOUNDARY
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}, {})", self.upstream, self.downstream)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Serde adapter for `Token`-keyed maps.
///
/// Tokens are structs, which text formats such as JSON cannot use as map keys,
/// so the map travels as a sequence of `(token, value)` pairs.
pub(crate) mod token_map {
    use super::Token;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, V>(map: &BTreeMap<Token, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<Token, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let pairs: Vec<(Token, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
