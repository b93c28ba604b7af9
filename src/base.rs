// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Core identifier types for every stored record.
//!
//! All identifiers wrap a `u64` and are handed out by an [`IdSequence`],
//! mirroring the auto-increment primary keys of a relational table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

record_id!(
    /// Identifier of a registered user (buyer or seller).
    UserId
);
record_id!(
    /// Identifier of an event tickets are sold for.
    EventId
);
record_id!(
    /// Identifier of a sale window.
    SaleId
);
record_id!(
    /// Identifier of a single sellable ticket unit.
    TicketId
);
record_id!(
    /// Identifier of an ownership record created when a unit is sold.
    PurchasedTicketId
);
record_id!(
    /// Identifier of a transfer request.
    TransferId
);
record_id!(
    /// Identifier of a payment attempt.
    PaymentId
);

/// Monotonic id allocator, one per table.
///
/// Ids start at 1 and are never reused, even when the allocating
/// unit of work is rolled back.
#[derive(Debug)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next<T: From<u64>>(&self) -> T {
        T::from(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
