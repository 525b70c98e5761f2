//! Newtype identifiers: every table/array index is wrapped in a small
//! `#[repr(transparent)]` tuple struct with a named sentinel rather than
//! passing bare integers around.

use std::fmt;

/// An index into a [`crate::tree::LocalTree`]'s node arena.
///
/// `NodeIndex::NULL` plays the role of the spec's "sentinel" value for an
/// absent parent, child, or search result.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const NULL: NodeIndex = NodeIndex(u32::MAX);

    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    pub fn some(self) -> Option<NodeIndex> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<usize> for NodeIndex {
    fn from(value: usize) -> Self {
        NodeIndex(value as u32)
    }
}

impl From<u32> for NodeIndex {
    fn from(value: u32) -> Self {
        NodeIndex(value)
    }
}

impl From<Option<NodeIndex>> for NodeIndex {
    fn from(value: Option<NodeIndex>) -> Self {
        value.unwrap_or(NodeIndex::NULL)
    }
}

/// An index into the discretized time grid, `t[0..K-1]` in `spec.md §3`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeIdx(pub u32);

impl TimeIdx {
    pub const NULL: TimeIdx = TimeIdx(u32::MAX);

    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    pub fn index(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

impl fmt::Display for TimeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<usize> for TimeIdx {
    fn from(value: usize) -> Self {
        TimeIdx(value as u32)
    }
}

impl From<u32> for TimeIdx {
    fn from(value: u32) -> Self {
        TimeIdx(value)
    }
}

impl std::ops::Add<u32> for TimeIdx {
    type Output = TimeIdx;
    fn add(self, rhs: u32) -> TimeIdx {
        TimeIdx(self.0 + rhs)
    }
}

/// An external sequence (leaf/sample) identifier. Stable across the lifetime
/// of a `LocalTrees`, even as leaves are removed and re-threaded by the
/// Resampler; see `spec.md §3` ("Leaves carry an external `seqid`").
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeqId(pub u32);

impl SeqId {
    pub const NULL: SeqId = SeqId(u32::MAX);

    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for SeqId {
    fn from(value: usize) -> Self {
        SeqId(value as u32)
    }
}

impl From<u32> for SeqId {
    fn from(value: u32) -> Self {
        SeqId(value)
    }
}

/// An index of a [`crate::local_trees::Block`] within a [`crate::local_trees::LocalTrees`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockIndex(pub u32);

impl BlockIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for BlockIndex {
    fn from(value: usize) -> Self {
        BlockIndex(value as u32)
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
