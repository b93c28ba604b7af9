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

//! Engine tuning knobs.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Limits and policies applied by the [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on units bought in one grouped purchase.
    pub max_group_quantity: u32,
    /// Upper bound on units created by one seller batch.
    pub max_batch_amount: u32,
    /// How long a charge may block before it is treated as declined.
    ///
    /// Inventory row locks are held for at most this long while waiting.
    pub payment_timeout: Duration,
    /// Fraction of a completed charge paid out to the event's seller.
    pub seller_share: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_group_quantity: 10,
            max_batch_amount: 1000,
            payment_timeout: Duration::from_secs(5),
            seller_share: dec!(0.95),
        }
    }
}
