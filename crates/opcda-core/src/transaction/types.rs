//! Core value types of the transaction engine.

use std::fmt;
use std::sync::Arc;

/// Correlates a pending request with its eventual completion callback.
///
/// Id `0` is reserved for unsolicited, subscription-driven pushes and is
/// never assigned to a slot; every other id is `slot index + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u32);

impl TransactionId {
    /// The reserved id carried by unsolicited pushes.
    pub const UNSOLICITED: Self = Self(0);

    /// The transaction id of the request occupying `index`.
    #[must_use]
    pub fn from_slot(index: usize) -> Self {
        // Slot tables are far smaller than u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        Self(index as u32 + 1)
    }

    /// The slot index this id correlates to, or `None` for the unsolicited
    /// id.
    #[must_use]
    pub fn slot(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0 as usize - 1)
        }
    }

    /// Returns `true` for the reserved unsolicited id.
    #[must_use]
    pub fn is_unsolicited(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded item payload, produced by the external transport decoding
/// layer and passed through this engine unmodified.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    /// No value (e.g. a bad-quality sample).
    Empty,
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer value.
    I32(i32),
    /// 64-bit integer value.
    I64(i64),
    /// Floating-point value.
    F64(f64),
    /// Text value.
    Text(Arc<str>),
}

/// Data quality of an item sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u16);

impl Quality {
    /// The sample is good.
    pub const GOOD: Self = Self(0x00C0);
    /// The sample quality is uncertain.
    pub const UNCERTAIN: Self = Self(0x0040);
    /// The sample is bad.
    pub const BAD: Self = Self(0x0000);

    const MASTER_MASK: u16 = 0x00C0;

    /// Returns `true` if the master quality bits read good.
    #[must_use]
    pub fn is_good(self) -> bool {
        self.0 & Self::MASTER_MASK == Self::GOOD.0
    }
}

/// One decoded item update as delivered by a transport callback.
///
/// Folds the wire protocol's parallel per-item arrays (client handles, raw
/// values, qualities, timestamps, status codes) into one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    /// Client-side handle identifying the item.
    pub client_handle: u32,
    /// Decoded value.
    pub value: ItemValue,
    /// Sample quality.
    pub quality: Quality,
    /// Source timestamp (100ns intervals since the transport epoch).
    pub timestamp: i64,
    /// Per-item status code.
    pub status: i32,
}

/// A shared batch of item updates, cheap to republish on broadcasts.
pub type ItemUpdateBatch = Arc<[ItemUpdate]>;
