//! Core identifier types for partix.
//!
//! These types provide type-safe wrappers around the numeric identifiers that
//! cross the engine boundary, preventing accidental misuse of one id space
//! for another (a dependency id passed where a table id is expected, etc.).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog table identifier.
///
/// Table ids are scoped to one catalog version: they are the 1-based
/// position of the table in the database's table list, so adding or
/// dropping a table may renumber others. Table *names* are the stable
/// identity across catalog versions.
///
/// # Example
///
/// ```rust
/// use partix_common::types::TableId;
///
/// let id = TableId::from_position(0);
/// assert_eq!(id.as_i32(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TableId(i32);

impl TableId {
    /// Creates a new `TableId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Creates the id of the table at `position` in the catalog table list.
    #[inline]
    #[must_use]
    pub const fn from_position(position: usize) -> Self {
        Self(position as i32 + 1)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TableId {
    #[inline]
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

/// Plan fragment identifier, as declared in the catalog.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FragmentId(i64);

impl FragmentId {
    /// Creates a new `FragmentId`.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentId({})", self.0)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for FragmentId {
    #[inline]
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

/// Dependency identifier for intermediate results within a fragment batch.
///
/// `DependencyId::NONE` (-1) means "no dependency".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DependencyId(i32);

impl DependencyId {
    /// No dependency.
    pub const NONE: Self = Self(-1);

    /// Creates a new `DependencyId`.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true unless this is `NONE`.
    #[inline]
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "DependencyId(NONE)")
        } else {
            write!(f, "DependencyId({})", self.0)
        }
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for DependencyId {
    #[inline]
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

/// Caller-assigned undo token.
///
/// Tokens attach undo records to a quantum. `UndoToken::NO_OP` is the
/// reserved value that `set_undo_token` ignores.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UndoToken(i64);

impl UndoToken {
    /// Reserved "no-op" token.
    pub const NO_OP: Self = Self(i64::MAX);

    /// Creates a new `UndoToken`.
    #[inline]
    #[must_use]
    pub const fn new(token: i64) -> Self {
        Self(token)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this is the reserved no-op token.
    #[inline]
    #[must_use]
    pub const fn is_no_op(self) -> bool {
        self.0 == Self::NO_OP.0
    }
}

impl fmt::Debug for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_no_op() {
            write!(f, "UndoToken(NO_OP)")
        } else {
            write!(f, "UndoToken({})", self.0)
        }
    }
}

impl fmt::Display for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UndoToken {
    #[inline]
    fn from(token: i64) -> Self {
        Self::new(token)
    }
}

/// Transaction identifier assigned by the caller.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(i64);

impl TxnId {
    /// Creates a new `TxnId`.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TxnId {
    #[inline]
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

/// Catalog version. Each accepted update advances it by exactly one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CatalogVersion(u64);

impl CatalogVersion {
    /// The version of a freshly constructed engine.
    pub const INITIAL: Self = Self(0);

    /// Creates a new `CatalogVersion`.
    #[inline]
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the version that must follow this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CatalogVersion({})", self.0)
    }
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
