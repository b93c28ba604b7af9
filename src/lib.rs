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

//! # Ticket Ledger
//!
//! This library sells finite ticket inventory inside time-boxed sale
//! windows, without ever selling a unit twice, and lets buyers hand their
//! tickets to other users through an explicit accept/reject workflow.
//!
//! ## Core Components
//!
//! - [`Engine`]: Owns every store and runs purchases, transfers and seller operations
//! - [`Inventory`]: Ticket units with pessimistic row locking
//! - [`SaleBook`]: Sale windows and the activity rule
//! - [`OwnershipLedger`]: Who holds which purchased ticket
//! - [`PaymentGateway`]: The external payment processor seam
//! - [`TicketingError`]: Error types, each mapped to an [`ErrorKind`]
//!
//! ## Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//! use ticket_ledger_rs::{
//!     Engine, EngineConfig, EventStatus, ManualClock, NewTickets, PaymentMethod,
//!     PurchaseGroupRequest, SimulatedGateway, TicketType,
//! };
//!
//! let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()));
//! let engine = Engine::with_parts(
//!     clock.clone(),
//!     Arc::new(SimulatedGateway::always_approve()),
//!     EngineConfig::default(),
//! );
//!
//! // A seller with an approved event and a sale opening in an hour
//! let seller = engine.directory().register_user("seller@example.com", "Seller").unwrap();
//! let buyer = engine.directory().register_user("buyer@example.com", "Buyer").unwrap();
//! let event = engine
//!     .directory()
//!     .register_event(seller, "Open Air", Utc.with_ymd_and_hms(2025, 7, 1, 20, 0, 0).unwrap())
//!     .unwrap();
//! engine.directory().set_event_status(event, EventStatus::Approved).unwrap();
//! let sale = engine
//!     .create_sale(seller, event, clock.now() + Duration::hours(1), clock.now() + Duration::days(7))
//!     .unwrap();
//!
//! let tickets = NewTickets {
//!     event_id: event,
//!     sale_id: sale.id,
//!     price: dec!(30.00),
//!     ticket_type: TicketType::Regular,
//!     is_vip: false,
//!     title: "Lawn".into(),
//!     description: String::new(),
//!     place: "North".into(),
//!     amount: 5,
//! };
//! engine.create_tickets(seller, &tickets).unwrap();
//!
//! // Once the sale opens, buy two
//! clock.advance(Duration::hours(2));
//! let receipt = engine
//!     .purchase_group(
//!         buyer,
//!         &PurchaseGroupRequest {
//!             event_id: event,
//!             sale_id: sale.id,
//!             price: dec!(30.00),
//!             ticket_type: TicketType::Regular,
//!             is_vip: false,
//!             title: "Lawn".into(),
//!             place: "North".into(),
//!             quantity: 2,
//!             payment_method: PaymentMethod::Card,
//!         },
//!     )
//!     .unwrap();
//!
//! assert_eq!(receipt.purchased_tickets.len(), 2);
//! assert_eq!(receipt.total_amount, dec!(60.00));
//! assert_eq!(engine.user_tickets(buyer).len(), 2);
//! ```
//!
//! ## Thread Safety
//!
//! All stores are concurrent maps; row-level locks serialize units of work
//! touching the same tickets while unrelated purchases run in parallel.

pub mod api;
mod base;
mod clock;
mod config;
pub mod directory;
mod engine;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod payment;
pub mod purchase;
pub mod sale;
pub mod seed;
pub mod transfer;

pub use base::{
    EventId, IdSequence, PaymentId, PurchasedTicketId, SaleId, TicketId, TransferId, UserId,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use directory::{Directory, Event, EventStatus, User};
pub use engine::Engine;
pub use error::{ErrorKind, TicketingError};
pub use inventory::{
    Inventory, LockedTickets, NewTickets, TicketGroup, TicketGroupKey, TicketPatch, TicketType,
    TicketUnit,
};
pub use ledger::{OwnershipLedger, PurchasedTicket};
pub use payment::{
    GatewayError, PaymentBook, PaymentGateway, PaymentKind, PaymentMethod, PaymentReceipt,
    PaymentRecord, PaymentStatus, SimulatedGateway,
};
pub use purchase::{PurchaseGroupRequest, PurchaseReceipt, PurchaseTicketRequest};
pub use sale::{SaleBook, SaleWindow};
pub use transfer::{DoneTransfer, TransferRecord, TransferStatus};
