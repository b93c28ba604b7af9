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

//! Ownership transfer integration tests.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::{Arc, Barrier};
use std::thread;
use ticket_ledger_rs::{
    Engine, EngineConfig, ErrorKind, EventStatus, ManualClock, NewTickets, PaymentMethod,
    PurchaseGroupRequest, PurchasedTicketId, SimulatedGateway, TicketType, TicketingError,
    TransferId, TransferStatus, UserId,
};

struct Setup {
    engine: Arc<Engine>,
    seller: UserId,
    alice: UserId,
    bob: UserId,
    carol: UserId,
    /// Owned by alice.
    ticket: PurchasedTicketId,
}

fn make_setup() -> Setup {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 9, 1, 18, 0, 0).unwrap(),
    ));
    let engine = Engine::with_parts(
        clock.clone(),
        Arc::new(SimulatedGateway::always_approve()),
        EngineConfig::default(),
    );
    let directory = engine.directory();
    let seller = directory.register_user("venue@example.com", "Venue").unwrap();
    let alice = directory.register_user("alice@example.com", "Alice").unwrap();
    let bob = directory.register_user("bob@example.com", "Bob").unwrap();
    let carol = directory.register_user("carol@example.com", "Carol").unwrap();

    let event = directory
        .register_event(seller, "Derby", clock.now() + Duration::days(3))
        .unwrap();
    directory
        .set_event_status(event, EventStatus::Approved)
        .unwrap();
    let sale = engine
        .create_sale(
            seller,
            event,
            clock.now() + Duration::minutes(10),
            clock.now() + Duration::days(2),
        )
        .unwrap();
    engine
        .create_tickets(
            seller,
            &NewTickets {
                event_id: event,
                sale_id: sale.id,
                price: dec!(18.00),
                ticket_type: TicketType::Regular,
                is_vip: false,
                title: "Terrace".into(),
                description: String::new(),
                place: "East".into(),
                amount: 3,
            },
        )
        .unwrap();
    clock.advance(Duration::hours(1));

    let receipt = engine
        .purchase_group(
            alice,
            &PurchaseGroupRequest {
                event_id: event,
                sale_id: sale.id,
                price: dec!(18.00),
                ticket_type: TicketType::Regular,
                is_vip: false,
                title: "Terrace".into(),
                place: "East".into(),
                quantity: 1,
                payment_method: PaymentMethod::GooglePay,
            },
        )
        .unwrap();

    Setup {
        ticket: receipt.purchased_tickets[0].id,
        engine: Arc::new(engine),
        seller,
        alice,
        bob,
        carol,
    }
}

#[test]
fn accept_moves_ownership_and_records_history() {
    let s = make_setup();

    let transfer = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert_eq!(s.engine.active_transfers(s.alice).len(), 1);
    assert_eq!(s.engine.active_transfers(s.bob).len(), 1);
    assert!(s.engine.active_transfers(s.carol).is_empty());

    let accepted = s.engine.accept_transfer(transfer.id, s.bob).unwrap();
    assert_eq!(accepted.status, TransferStatus::Accepted);
    assert!(accepted.resolved_at.is_some());

    assert_eq!(s.engine.purchased_ticket(s.ticket).unwrap().owner, s.bob);
    assert!(s.engine.user_tickets(s.alice).is_empty());
    assert_eq!(s.engine.user_tickets(s.bob).len(), 1);

    let history = s.engine.transfer_history(s.alice);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_user, s.alice);
    assert_eq!(history[0].to_user, s.bob);
    assert_eq!(s.engine.transfer_history(s.bob), history);
    assert!(s.engine.active_transfers(s.bob).is_empty());
}

#[test]
fn terminal_transfer_cannot_be_resolved_again() {
    let s = make_setup();
    let transfer = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();
    s.engine.accept_transfer(transfer.id, s.bob).unwrap();

    let again = s.engine.accept_transfer(transfer.id, s.bob);
    assert_eq!(
        again,
        Err(TicketingError::TransferNotPending {
            transfer: transfer.id,
            status: TransferStatus::Accepted
        })
    );
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Conflict);

    let reject = s.engine.reject_transfer(transfer.id, s.bob).unwrap_err();
    assert_eq!(reject.kind(), ErrorKind::Conflict);
}

#[test]
fn reject_keeps_owner_and_frees_the_ticket() {
    let s = make_setup();
    let transfer = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();

    let rejected = s.engine.reject_transfer(transfer.id, s.bob).unwrap();
    assert_eq!(rejected.status, TransferStatus::Rejected);
    assert_eq!(s.engine.purchased_ticket(s.ticket).unwrap().owner, s.alice);
    assert_eq!(s.engine.rejected_transfers(s.alice).len(), 1);
    assert_eq!(s.engine.rejected_transfers(s.bob).len(), 1);
    assert!(s.engine.transfer_history(s.alice).is_empty());

    // A new offer is allowed once the previous one is closed.
    assert!(s
        .engine
        .initiate_transfer(s.alice, s.ticket, "carol@example.com")
        .is_ok());
}

#[test]
fn second_pending_transfer_is_conflict() {
    let s = make_setup();
    s.engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();

    let second = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "carol@example.com");
    assert_eq!(
        second,
        Err(TicketingError::TransferAlreadyPending(s.ticket))
    );
}

#[test]
fn initiate_preconditions() {
    let s = make_setup();

    assert_eq!(
        s.engine
            .initiate_transfer(s.bob, s.ticket, "carol@example.com"),
        Err(TicketingError::NotTicketOwner {
            ticket: s.ticket,
            user: s.bob
        })
    );
    assert_eq!(
        s.engine
            .initiate_transfer(s.alice, s.ticket, "ALICE@example.com"),
        Err(TicketingError::SelfTransfer)
    );
    assert_eq!(
        s.engine
            .initiate_transfer(s.alice, s.ticket, "nobody@example.com"),
        Err(TicketingError::RecipientNotFound)
    );
    assert_eq!(
        s.engine
            .initiate_transfer(s.alice, PurchasedTicketId(999), "bob@example.com"),
        Err(TicketingError::PurchasedTicketNotFound(PurchasedTicketId(999)))
    );

    s.engine.mark_used(s.ticket, s.seller).unwrap();
    assert_eq!(
        s.engine
            .initiate_transfer(s.alice, s.ticket, "bob@example.com"),
        Err(TicketingError::TicketAlreadyUsed(s.ticket))
    );
}

#[test]
fn only_recipient_may_resolve() {
    let s = make_setup();
    let transfer = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();

    for user in [s.alice, s.carol] {
        assert_eq!(
            s.engine.accept_transfer(transfer.id, user),
            Err(TicketingError::NotTransferRecipient {
                transfer: transfer.id,
                user
            })
        );
    }
    assert_eq!(
        s.engine.accept_transfer(TransferId(42), s.bob),
        Err(TicketingError::TransferNotFound(TransferId(42)))
    );
    assert_eq!(s.engine.purchased_ticket(s.ticket).unwrap().owner, s.alice);
}

#[test]
fn cancel_is_terminal_and_frees_the_slot() {
    let s = make_setup();
    let transfer = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();

    let cancelled = s.engine.cancel_transfer(transfer.id).unwrap();
    assert_eq!(cancelled.status, TransferStatus::Cancelled);
    assert_eq!(s.engine.rejected_transfers(s.bob), vec![cancelled]);
    assert!(s.engine.accept_transfer(transfer.id, s.bob).is_err());
    assert!(s.engine.cancel_transfer(transfer.id).is_err());

    assert!(s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .is_ok());
}

#[test]
fn chained_transfers_follow_current_owner() {
    let s = make_setup();
    let first = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();
    s.engine.accept_transfer(first.id, s.bob).unwrap();

    // alice no longer owns it
    assert!(matches!(
        s.engine.initiate_transfer(s.alice, s.ticket, "carol@example.com"),
        Err(TicketingError::NotTicketOwner { .. })
    ));

    let second = s
        .engine
        .initiate_transfer(s.bob, s.ticket, "carol@example.com")
        .unwrap();
    s.engine.accept_transfer(second.id, s.carol).unwrap();

    assert_eq!(s.engine.purchased_ticket(s.ticket).unwrap().owner, s.carol);
    assert_eq!(s.engine.transfer_history(s.bob).len(), 2);
    assert_eq!(s.engine.transfer_history(s.carol).len(), 1);
}

#[test]
fn racing_initiations_create_one_pending_transfer() {
    let s = make_setup();
    let recipients = ["bob@example.com", "carol@example.com"];
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&s.engine);
            let barrier = Arc::clone(&barrier);
            let (alice, ticket) = (s.alice, s.ticket);
            thread::spawn(move || {
                barrier.wait();
                engine.initiate_transfer(alice, ticket, recipients[i % 2])
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().filter(|result| result.is_err()).all(|result| {
        *result == Err(TicketingError::TransferAlreadyPending(s.ticket))
    }));
    assert_eq!(s.engine.active_transfers(s.alice).len(), 1);
}

#[test]
fn racing_accept_and_reject_resolve_once() {
    let s = make_setup();
    let transfer = s
        .engine
        .initiate_transfer(s.alice, s.ticket, "bob@example.com")
        .unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let accept = {
        let engine = Arc::clone(&s.engine);
        let barrier = Arc::clone(&barrier);
        let bob = s.bob;
        thread::spawn(move || {
            barrier.wait();
            engine.accept_transfer(transfer.id, bob).is_ok()
        })
    };
    let reject = {
        let engine = Arc::clone(&s.engine);
        let barrier = Arc::clone(&barrier);
        let bob = s.bob;
        thread::spawn(move || {
            barrier.wait();
            engine.reject_transfer(transfer.id, bob).is_ok()
        })
    };

    let accepted = accept.join().unwrap();
    let rejected = reject.join().unwrap();
    assert!(accepted ^ rejected);

    let owner = s.engine.purchased_ticket(s.ticket).unwrap().owner;
    assert_eq!(owner, if accepted { s.bob } else { s.alice });
}
