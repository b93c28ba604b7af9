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

//! Sale windows.
//!
//! A window is *active* while `start <= now <= end`. Tickets of an active
//! window can be bought but not edited; tickets of an inactive window can
//! be edited but not bought.
//!
//! Windows of one event never overlap. The check runs while holding the
//! event's entry in the per-event index, so two concurrent creations for
//! the same event cannot both pass it.

use crate::TicketingError;
use crate::base::{EventId, IdSequence, SaleId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    pub id: SaleId,
    pub event_id: EventId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SaleWindow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        is_active(self, now)
    }
}

/// Returns `true` when `now` lies inside the window, bounds included.
pub fn is_active(window: &SaleWindow, now: DateTime<Utc>) -> bool {
    window.start <= now && now <= window.end
}

/// Half-open overlap test for `[s1, e1)` and `[s2, e2)`.
///
/// Windows that merely touch (`e1 == s2`) do not overlap.
pub fn windows_overlap(
    s1: DateTime<Utc>,
    e1: DateTime<Utc>,
    s2: DateTime<Utc>,
    e2: DateTime<Utc>,
) -> bool {
    s1 < e2 && s2 < e1
}

/// Storage for sale windows.
#[derive(Debug, Default)]
pub struct SaleBook {
    windows: DashMap<SaleId, SaleWindow>,
    by_event: DashMap<EventId, Vec<SaleId>>,
    ids: IdSequence,
}

impl SaleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new window for `event_id`.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::InvalidSaleWindow`] - `start` is not before `end`.
    /// - [`TicketingError::SaleWindowOverlap`] - another window of the event overlaps.
    pub fn create(
        &self,
        event_id: EventId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SaleWindow, TicketingError> {
        if start >= end {
            return Err(TicketingError::InvalidSaleWindow);
        }

        let mut event_sales = self.by_event.entry(event_id).or_default();
        self.check_overlap(&event_sales, None, start, end)?;

        let window = SaleWindow {
            id: self.ids.next(),
            event_id,
            start,
            end,
        };
        self.windows.insert(window.id, window);
        event_sales.push(window.id);
        Ok(window)
    }

    /// Moves an existing window to new bounds.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::SaleNotFound`] - unknown window.
    /// - [`TicketingError::InvalidSaleWindow`] - `start` is not before `end`.
    /// - [`TicketingError::SaleWindowOverlap`] - another window of the event overlaps.
    pub fn update(
        &self,
        sale_id: SaleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SaleWindow, TicketingError> {
        if start >= end {
            return Err(TicketingError::InvalidSaleWindow);
        }

        let event_id = self.get(sale_id)?.event_id;
        let event_sales = self.by_event.entry(event_id).or_default();
        self.check_overlap(&event_sales, Some(sale_id), start, end)?;

        let mut window = self
            .windows
            .get_mut(&sale_id)
            .ok_or(TicketingError::SaleNotFound(sale_id))?;
        window.start = start;
        window.end = end;
        Ok(*window)
    }

    pub fn remove(&self, sale_id: SaleId) -> Result<SaleWindow, TicketingError> {
        let event_id = self.get(sale_id)?.event_id;
        let mut event_sales = self.by_event.entry(event_id).or_default();
        let (_, window) = self
            .windows
            .remove(&sale_id)
            .ok_or(TicketingError::SaleNotFound(sale_id))?;
        event_sales.retain(|id| *id != sale_id);
        Ok(window)
    }

    pub fn get(&self, sale_id: SaleId) -> Result<SaleWindow, TicketingError> {
        self.windows
            .get(&sale_id)
            .map(|window| *window)
            .ok_or(TicketingError::SaleNotFound(sale_id))
    }

    /// Windows of an event, earliest first.
    pub fn list_by_event(&self, event_id: EventId) -> Vec<SaleWindow> {
        let ids = match self.by_event.get(&event_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let mut windows: Vec<SaleWindow> = ids
            .iter()
            .filter_map(|id| self.windows.get(id).map(|window| *window))
            .collect();
        windows.sort_by_key(|window| (window.start, window.id));
        windows
    }

    fn check_overlap(
        &self,
        event_sales: &[SaleId],
        exclude: Option<SaleId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), TicketingError> {
        for id in event_sales.iter().filter(|id| Some(**id) != exclude) {
            if let Some(existing) = self.windows.get(id) {
                if windows_overlap(start, end, existing.start, existing.end) {
                    return Err(TicketingError::SaleWindowOverlap { existing: *id });
                }
            }
        }
        Ok(())
    }
}
