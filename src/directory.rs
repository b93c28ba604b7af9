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

//! Users and events.
//!
//! Profile and event management live outside this crate. The directory
//! only keeps what the sales core reads: who a user is, who sells an
//! event, and whether the event was approved for sales.

use crate::TicketingError;
use crate::base::{EventId, IdSequence, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub date: DateTime<Utc>,
    pub seller_id: UserId,
    pub status: EventStatus,
}

/// Registry of users and events.
#[derive(Debug, Default)]
pub struct Directory {
    users: DashMap<UserId, User>,
    /// Lower-cased email to user id.
    emails: DashMap<String, UserId>,
    events: DashMap<EventId, Event>,
    user_ids: IdSequence,
    event_ids: IdSequence,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user. Emails are unique, compared case-insensitively.
    ///
    /// Registering an email that is already known returns the existing id.
    pub fn register_user(&self, email: &str, name: &str) -> Result<UserId, TicketingError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(TicketingError::MissingField("email"));
        }

        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let id: UserId = self.user_ids.next();
                self.users.insert(
                    id,
                    User {
                        id,
                        email: email.to_string(),
                        name: name.to_string(),
                    },
                );
                entry.insert(id);
                Ok(id)
            }
        }
    }

    /// Registers an event in the `Pending` state.
    pub fn register_event(
        &self,
        seller_id: UserId,
        title: &str,
        date: DateTime<Utc>,
    ) -> Result<EventId, TicketingError> {
        if !self.users.contains_key(&seller_id) {
            return Err(TicketingError::UserNotFound(seller_id));
        }
        if title.trim().is_empty() {
            return Err(TicketingError::MissingField("title"));
        }

        let id: EventId = self.event_ids.next();
        self.events.insert(
            id,
            Event {
                id,
                title: title.to_string(),
                date,
                seller_id,
                status: EventStatus::Pending,
            },
        );
        Ok(id)
    }

    pub fn set_event_status(
        &self,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<(), TicketingError> {
        let mut event = self
            .events
            .get_mut(&event_id)
            .ok_or(TicketingError::EventNotFound(event_id))?;
        event.status = status;
        Ok(())
    }

    pub fn user(&self, user_id: UserId) -> Result<User, TicketingError> {
        self.users
            .get(&user_id)
            .map(|user| user.clone())
            .ok_or(TicketingError::UserNotFound(user_id))
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.trim().to_lowercase())?;
        self.users.get(&id).map(|user| user.clone())
    }

    pub fn event(&self, event_id: EventId) -> Result<Event, TicketingError> {
        self.events
            .get(&event_id)
            .map(|event| event.clone())
            .ok_or(TicketingError::EventNotFound(event_id))
    }

    /// Loads an event and checks `seller_id` sells it.
    pub fn event_of_seller(
        &self,
        event_id: EventId,
        seller_id: UserId,
    ) -> Result<Event, TicketingError> {
        let event = self.event(event_id)?;
        if event.seller_id != seller_id {
            return Err(TicketingError::NotEventSeller {
                event: event_id,
                user: seller_id,
            });
        }
        Ok(event)
    }
}
