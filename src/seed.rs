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

//! Fixture loading from CSV.
//!
//! Rows are loaded straight into the stores, so sale windows may already
//! be open and events start approved. Rows refer to earlier rows through
//! their `key` label.
//!
//! # CSV Format
//!
//! Columns: `kind, key, parent, email, title, price, ticket_type, vip, place, amount, start, end`
//!
//! | kind | parent | uses |
//! |------|--------|------|
//! | `user` | | `email`, `title` (name) |
//! | `event` | seller user key | `title`, `start` (event date) |
//! | `sale` | event key | `start`, `end` |
//! | `tickets` | sale key | `title`, `price`, `ticket_type`, `vip`, `place`, `amount` |
//!
//! Timestamps are Unix seconds.
//!
//! ```csv
//! kind,key,parent,email,title,price,ticket_type,vip,place,amount,start,end
//! user,alice,,alice@example.com,Alice,,,,,,,
//! event,gig,alice,,Rooftop Gig,,,,,,1767225600,
//! sale,early,gig,,,,,,,,1735689600,1767139200
//! tickets,floor,early,,Floor,25.00,regular,false,Hall A,100,,
//! ```

use crate::directory::EventStatus;
use crate::inventory::{NewTickets, TicketType};
use crate::{Engine, EventId, SaleId, TicketingError, UserId};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct SeedRecord {
    kind: String,
    key: String,
    #[serde(default)]
    parent: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    title: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    price: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    ticket_type: Option<TicketType>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    vip: Option<bool>,
    #[serde(default)]
    place: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    start: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    end: Option<i64>,
}

#[derive(Error, Debug)]
enum RowError {
    #[error("unknown kind {0:?}")]
    UnknownKind(String),

    #[error("missing column {0}")]
    MissingColumn(&'static str),

    #[error("unknown parent {0:?}")]
    UnknownParent(String),

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Ticketing(#[from] TicketingError),
}

/// Rows loaded per kind, plus skipped rows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub events: usize,
    pub sales: usize,
    pub tickets: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct Keys {
    users: HashMap<String, UserId>,
    events: HashMap<String, EventId>,
    sales: HashMap<String, (SaleId, EventId)>,
}

/// Loads fixtures from a CSV reader into `engine`.
///
/// Malformed rows and rows the stores refuse are logged and skipped.
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
pub fn load_seed<R: Read>(engine: &Engine, reader: R) -> Result<SeedSummary, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut keys = Keys::default();
    let mut summary = SeedSummary::default();

    for (line, result) in rdr.deserialize::<SeedRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping malformed seed row");
                summary.skipped += 1;
                continue;
            }
        };

        if let Err(e) = apply(engine, &mut keys, &mut summary, &record) {
            warn!(line = line + 2, key = %record.key, error = %e, "Skipping seed row");
            summary.skipped += 1;
        }
    }

    info!(
        users = summary.users,
        events = summary.events,
        sales = summary.sales,
        tickets = summary.tickets,
        skipped = summary.skipped,
        "Seed loaded"
    );
    Ok(summary)
}

pub fn load_seed_file(engine: &Engine, path: &Path) -> Result<SeedSummary, csv::Error> {
    let file = std::fs::File::open(path)?;
    load_seed(engine, std::io::BufReader::new(file))
}

fn apply(
    engine: &Engine,
    keys: &mut Keys,
    summary: &mut SeedSummary,
    record: &SeedRecord,
) -> Result<(), RowError> {
    match record.kind.to_lowercase().as_str() {
        "user" => {
            let id = engine
                .directory
                .register_user(&record.email, &record.title)?;
            keys.users.insert(record.key.clone(), id);
            summary.users += 1;
        }
        "event" => {
            let seller = *keys
                .users
                .get(&record.parent)
                .ok_or_else(|| RowError::UnknownParent(record.parent.clone()))?;
            let date = timestamp(record.start.ok_or(RowError::MissingColumn("start"))?)?;
            let id = engine.directory.register_event(seller, &record.title, date)?;
            engine
                .directory
                .set_event_status(id, EventStatus::Approved)?;
            keys.events.insert(record.key.clone(), id);
            summary.events += 1;
        }
        "sale" => {
            let event = *keys
                .events
                .get(&record.parent)
                .ok_or_else(|| RowError::UnknownParent(record.parent.clone()))?;
            let start = timestamp(record.start.ok_or(RowError::MissingColumn("start"))?)?;
            let end = timestamp(record.end.ok_or(RowError::MissingColumn("end"))?)?;
            let sale = engine.sales.create(event, start, end)?;
            keys.sales.insert(record.key.clone(), (sale.id, event));
            summary.sales += 1;
        }
        "tickets" => {
            let (sale_id, event_id) = *keys
                .sales
                .get(&record.parent)
                .ok_or_else(|| RowError::UnknownParent(record.parent.clone()))?;
            let batch = NewTickets {
                event_id,
                sale_id,
                price: record.price.ok_or(RowError::MissingColumn("price"))?,
                ticket_type: record.ticket_type.unwrap_or(TicketType::Regular),
                is_vip: record.vip.unwrap_or(false),
                title: record.title.clone(),
                description: String::new(),
                place: record.place.clone(),
                amount: record.amount.ok_or(RowError::MissingColumn("amount"))?,
            };
            if batch.price < Decimal::ZERO {
                return Err(TicketingError::InvalidPrice.into());
            }
            summary.tickets += engine.inventory.create_batch(&batch).len();
        }
        other => return Err(RowError::UnknownKind(other.to_string())),
    }
    Ok(())
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, RowError> {
    DateTime::from_timestamp(secs, 0).ok_or(RowError::InvalidTimestamp(secs))
}
