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

//! Concurrent purchase tests using parking_lot's built-in deadlock detector.
//!
//! Buyers race for the same ticket groups from many threads. The tests
//! check that no unit is sold twice, that losers see a conflict, and that
//! the row locks never form a cycle.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::deadlock;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use ticket_ledger_rs::{
    Engine, EngineConfig, ErrorKind, EventId, EventStatus, ManualClock, NewTickets,
    PaymentMethod, PurchaseGroupRequest, PurchaseTicketRequest, SaleId, SimulatedGateway,
    TicketType, TicketingError, UserId,
};

// === Helpers ===

struct Venue {
    engine: Arc<Engine>,
    event: EventId,
    sale: SaleId,
}

fn make_venue(batches: &[(&str, u32)]) -> Venue {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap(),
    ));
    let engine = Engine::with_parts(
        clock.clone(),
        Arc::new(SimulatedGateway::always_approve()),
        EngineConfig::default(),
    );
    let seller = engine
        .directory()
        .register_user("box-office@example.com", "Box Office")
        .unwrap();
    let event = engine
        .directory()
        .register_event(seller, "Final", clock.now() + ChronoDuration::days(10))
        .unwrap();
    engine
        .directory()
        .set_event_status(event, EventStatus::Approved)
        .unwrap();
    let sale = engine
        .create_sale(
            seller,
            event,
            clock.now() + ChronoDuration::hours(1),
            clock.now() + ChronoDuration::days(5),
        )
        .unwrap();

    for (title, amount) in batches {
        engine
            .create_tickets(
                seller,
                &NewTickets {
                    event_id: event,
                    sale_id: sale.id,
                    price: dec!(12.50),
                    ticket_type: TicketType::Regular,
                    is_vip: false,
                    title: (*title).into(),
                    description: String::new(),
                    place: "Ground".into(),
                    amount: *amount,
                },
            )
            .unwrap();
    }
    clock.advance(ChronoDuration::hours(2));

    Venue {
        engine: Arc::new(engine),
        event,
        sale: sale.id,
    }
}

fn make_buyers(engine: &Engine, count: usize) -> Vec<UserId> {
    (0..count)
        .map(|i| {
            engine
                .directory()
                .register_user(&format!("fan{i}@example.com"), "Fan")
                .unwrap()
        })
        .collect()
}

fn make_request(venue: &Venue, title: &str, quantity: u32) -> PurchaseGroupRequest {
    PurchaseGroupRequest {
        event_id: venue.event,
        sale_id: venue.sale,
        price: dec!(12.50),
        ticket_type: TicketType::Regular,
        is_vip: false,
        title: title.into(),
        place: "Ground".into(),
        quantity,
        payment_method: PaymentMethod::Stripe,
    }
}

/// Spawns a background thread that checks for deadlocks every 100ms.
/// Clear the returned flag to stop it.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Tests ===

/// Two buyers, one unit: exactly one wins.
#[test]
fn last_unit_is_sold_once() {
    let venue = make_venue(&[("Solo", 1)]);
    let buyers = make_buyers(&venue.engine, 2);
    let barrier = Arc::new(Barrier::new(buyers.len()));

    let handles: Vec<_> = buyers
        .iter()
        .map(|&buyer| {
            let engine = Arc::clone(&venue.engine);
            let barrier = Arc::clone(&barrier);
            let request = make_request(&venue, "Solo", 1);
            thread::spawn(move || {
                barrier.wait();
                engine.purchase_group(buyer, &request)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let loser = results
        .into_iter()
        .find_map(Result::err)
        .expect("one buyer must lose");
    assert_eq!(
        loser,
        TicketingError::InsufficientInventory {
            requested: 1,
            available: 0
        }
    );
    assert_eq!(loser.kind(), ErrorKind::Conflict);

    let owned: usize = buyers
        .iter()
        .map(|&buyer| venue.engine.user_tickets(buyer).len())
        .sum();
    assert_eq!(owned, 1);
}

/// Two buyers each want all five units: one gets them all, the other none.
#[test]
fn whole_group_goes_to_one_buyer() {
    let venue = make_venue(&[("Block", 5)]);
    let buyers = make_buyers(&venue.engine, 2);
    let barrier = Arc::new(Barrier::new(buyers.len()));

    let handles: Vec<_> = buyers
        .iter()
        .map(|&buyer| {
            let engine = Arc::clone(&venue.engine);
            let barrier = Arc::clone(&barrier);
            let request = make_request(&venue, "Block", 5);
            thread::spawn(move || {
                barrier.wait();
                engine.purchase_group(buyer, &request).is_ok()
            })
        })
        .collect();

    let wins: Vec<bool> = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .collect();
    assert_eq!(wins.iter().filter(|won| **won).count(), 1);

    let mut counts: Vec<usize> = buyers
        .iter()
        .map(|&buyer| venue.engine.user_tickets(buyer).len())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![0, 5]);
}

/// Many buyers across overlapping groups; sold units stay distinct and
/// every group keeps its counts consistent.
#[test]
fn no_deadlock_or_double_sale_under_stress() {
    let detector = start_deadlock_detector();
    let venue = make_venue(&[("North", 40), ("South", 40), ("East", 20)]);

    const NUM_THREADS: usize = 32;
    const OPS_PER_THREAD: usize = 10;

    let buyers = make_buyers(&venue.engine, NUM_THREADS);
    let titles = ["North", "South", "East"];
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = buyers
        .iter()
        .enumerate()
        .map(|(thread_id, &buyer)| {
            let engine = Arc::clone(&venue.engine);
            let barrier = Arc::clone(&barrier);
            let requests: Vec<_> = (0..OPS_PER_THREAD)
                .map(|i| {
                    let title = titles[(thread_id + i) % titles.len()];
                    make_request(&venue, title, (i % 3) as u32 + 1)
                })
                .collect();
            thread::spawn(move || {
                barrier.wait();
                let mut bought = 0;
                for request in &requests {
                    match engine.purchase_group(buyer, request) {
                        Ok(receipt) => bought += receipt.purchased_tickets.len(),
                        Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
                    }
                }
                bought
            })
        })
        .collect();

    let bought: usize = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .sum();

    let mut sold_units = HashSet::new();
    for &buyer in &buyers {
        for ticket in venue.engine.user_tickets(buyer) {
            assert!(sold_units.insert(ticket.ticket_id), "unit sold twice");
        }
    }
    assert_eq!(sold_units.len(), bought);

    let groups = venue.engine.ticket_groups(venue.event).unwrap();
    for group in &groups {
        assert_eq!(group.available + group.sold + group.held, group.total);
    }
    let sold: u32 = groups.iter().map(|group| group.sold).sum();
    assert_eq!(sold as usize, bought);

    stop_deadlock_detector(detector);
}

/// Single-unit purchases racing group purchases over the same units.
#[test]
fn no_deadlock_mixed_single_and_group_purchases() {
    let detector = start_deadlock_detector();
    let venue = make_venue(&[("Mixed", 30)]);
    let units: Vec<_> = venue
        .engine
        .event_tickets(venue.event)
        .unwrap()
        .into_iter()
        .map(|unit| unit.id)
        .collect();

    const NUM_THREADS: usize = 16;
    let buyers = make_buyers(&venue.engine, NUM_THREADS);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = buyers
        .iter()
        .enumerate()
        .map(|(thread_id, &buyer)| {
            let engine = Arc::clone(&venue.engine);
            let barrier = Arc::clone(&barrier);
            let group = make_request(&venue, "Mixed", 2);
            // Walk the units from opposite ends on alternate threads.
            let mut singles = units.clone();
            if thread_id % 2 == 1 {
                singles.reverse();
            }
            thread::spawn(move || {
                barrier.wait();
                for (i, ticket_id) in singles.into_iter().enumerate().take(6) {
                    if i % 2 == 0 {
                        let _ = engine.purchase_group(buyer, &group);
                    }
                    let _ = engine.purchase_ticket(
                        buyer,
                        &PurchaseTicketRequest {
                            ticket_id,
                            quantity: 1,
                            payment_method: PaymentMethod::Card,
                        },
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let owned: usize = buyers
        .iter()
        .map(|&buyer| venue.engine.user_tickets(buyer).len())
        .sum();
    let groups = venue.engine.ticket_groups(venue.event).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].sold as usize, owned);
    assert!(owned <= 30);

    stop_deadlock_detector(detector);
}
