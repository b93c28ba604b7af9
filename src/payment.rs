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

//! Payment records and the gateway seam.
//!
//! Payment records follow a state machine:
//! - [`Pending`] → [`Completed`] or [`Failed`] (one gateway outcome)
//! - [`Completed`] → [`Refunded`] (explicit refund only)
//!
//! A charge is never retried. The gateway call runs on a helper thread
//! and the caller waits at most the configured timeout; a timeout counts
//! as a decline. If the gateway approves after the caller gave up, the
//! helper thread refunds the charge.
//!
//! [`Pending`]: PaymentStatus::Pending
//! [`Completed`]: PaymentStatus::Completed
//! [`Failed`]: PaymentStatus::Failed
//! [`Refunded`]: PaymentStatus::Refunded

use crate::TicketingError;
use crate::base::{EventId, IdSequence, PaymentId, UserId};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, RecvTimeoutError};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    PayPal,
    GooglePay,
    Stripe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// Direction of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// Money taken from a buyer through the gateway.
    Charge,
    /// Seller share of a completed charge.
    Payout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub user_id: UserId,
    pub kind: PaymentKind,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub description: String,
    pub event_id: Option<EventId>,
    pub created_at: DateTime<Utc>,
    pub transaction_id: Option<String>,
    pub message: String,
}

/// What the buyer sees about a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub transaction_id: Option<String>,
    pub message: String,
}

impl From<&PaymentRecord> for PaymentReceipt {
    fn from(record: &PaymentRecord) -> Self {
        Self {
            payment_id: record.id,
            status: record.status,
            amount: record.amount,
            transaction_id: record.transaction_id.clone(),
            message: record.message.clone(),
        }
    }
}

// === Gateway ===

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayApproval {
    pub transaction_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    Declined(String),

    #[error("gateway timeout")]
    Timeout,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous payment processor.
///
/// Implementations may block; callers bound the wait themselves.
pub trait PaymentGateway: Send + Sync {
    fn charge(&self, request: &ChargeRequest) -> Result<GatewayApproval, GatewayError>;

    /// Reverses an approved charge, returning the refund reference.
    fn refund(&self, transaction_id: &str, amount: Decimal) -> Result<String, GatewayError>;
}

/// A gateway that approves a fixed share of charges after a fixed delay.
///
/// Outcomes come from a seeded [`StdRng`], so a given seed always yields
/// the same approve/decline sequence.
#[derive(Debug)]
pub struct SimulatedGateway {
    success_rate: f64,
    delay: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedGateway {
    pub fn new(seed: u64, success_rate: f64, delay: Duration) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            delay,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn always_approve() -> Self {
        Self::new(0, 1.0, Duration::ZERO)
    }

    pub fn always_decline() -> Self {
        Self::new(0, 0.0, Duration::ZERO)
    }
}

impl PaymentGateway for SimulatedGateway {
    fn charge(&self, request: &ChargeRequest) -> Result<GatewayApproval, GatewayError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let approved = self.rng.lock().gen_bool(self.success_rate);
        if approved {
            Ok(GatewayApproval {
                transaction_id: format!("MOCK_{}_{}", request.payment_id, Uuid::new_v4().simple()),
            })
        } else {
            Err(GatewayError::Declined(
                "insufficient funds or card declined".to_string(),
            ))
        }
    }

    fn refund(&self, _transaction_id: &str, _amount: Decimal) -> Result<String, GatewayError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(format!("MOCK_REFUND_{}", Uuid::new_v4().simple()))
    }
}

// === Payment book ===

/// A charge to run.
#[derive(Debug, Clone)]
pub struct ChargeOrder {
    pub user_id: UserId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub description: String,
    pub event_id: Option<EventId>,
}

/// Payment records plus the gateway they are settled through.
pub struct PaymentBook {
    records: DashMap<PaymentId, Arc<Mutex<PaymentRecord>>>,
    ids: IdSequence,
    gateway: Arc<dyn PaymentGateway>,
    timeout: Duration,
}

impl PaymentBook {
    pub fn new(gateway: Arc<dyn PaymentGateway>, timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ids: IdSequence::new(),
            gateway,
            timeout,
        }
    }

    /// Records a pending charge, settles it, and records the outcome.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::InvalidAmount`] - amount is zero or negative; nothing is recorded.
    /// - [`TicketingError::PaymentDeclined`] - gateway declined, failed or timed out;
    ///   the record ends `Failed`.
    pub fn charge(
        &self,
        order: ChargeOrder,
        now: DateTime<Utc>,
    ) -> Result<PaymentReceipt, TicketingError> {
        if order.amount <= Decimal::ZERO {
            return Err(TicketingError::InvalidAmount);
        }

        let payment_id: PaymentId = self.ids.next();
        let record = Arc::new(Mutex::new(PaymentRecord {
            id: payment_id,
            user_id: order.user_id,
            kind: PaymentKind::Charge,
            method: order.method,
            amount: order.amount,
            status: PaymentStatus::Pending,
            description: order.description.clone(),
            event_id: order.event_id,
            created_at: now,
            transaction_id: None,
            message: String::new(),
        }));
        self.records.insert(payment_id, Arc::clone(&record));

        let request = ChargeRequest {
            payment_id,
            amount: order.amount,
            method: order.method,
            description: order.description,
        };
        let outcome = self.call_gateway(request);

        let mut record = record.lock();
        debug_assert_eq!(record.status, PaymentStatus::Pending);
        match outcome {
            Ok(approval) => {
                record.status = PaymentStatus::Completed;
                record.transaction_id = Some(approval.transaction_id);
                record.message = "Payment processed successfully".to_string();
                info!(
                    payment_id = %payment_id,
                    user_id = %record.user_id,
                    amount = %record.amount,
                    "Payment completed"
                );
                Ok(PaymentReceipt::from(&*record))
            }
            Err(reason) => {
                record.status = PaymentStatus::Failed;
                record.message = format!("Payment failed - {reason}");
                warn!(
                    payment_id = %payment_id,
                    user_id = %record.user_id,
                    amount = %record.amount,
                    %reason,
                    "Payment failed"
                );
                Err(TicketingError::PaymentDeclined {
                    payment: payment_id,
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Records the seller share of a completed charge. No gateway call.
    pub fn record_payout(
        &self,
        seller_id: UserId,
        amount: Decimal,
        event_id: EventId,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentId, TicketingError> {
        if amount <= Decimal::ZERO {
            return Err(TicketingError::InvalidAmount);
        }

        let payment_id: PaymentId = self.ids.next();
        self.records.insert(
            payment_id,
            Arc::new(Mutex::new(PaymentRecord {
                id: payment_id,
                user_id: seller_id,
                kind: PaymentKind::Payout,
                method: PaymentMethod::Card,
                amount,
                status: PaymentStatus::Completed,
                description: format!("Revenue from: {description}"),
                event_id: Some(event_id),
                created_at: now,
                transaction_id: None,
                message: String::new(),
            })),
        );
        Ok(payment_id)
    }

    /// Refunds a completed charge.
    ///
    /// The record stays locked for the duration of the gateway call, so
    /// concurrent refunds of the same payment cannot both go through.
    pub fn refund(&self, payment_id: PaymentId) -> Result<PaymentReceipt, TicketingError> {
        let record = self
            .records
            .get(&payment_id)
            .map(|record| Arc::clone(record.value()))
            .ok_or(TicketingError::PaymentNotFound(payment_id))?;
        let mut record = record.lock();

        let transaction_id = match (&record.kind, record.status, &record.transaction_id) {
            (PaymentKind::Charge, PaymentStatus::Completed, Some(transaction_id)) => {
                transaction_id.clone()
            }
            _ => {
                return Err(TicketingError::PaymentNotRefundable {
                    payment: payment_id,
                    status: record.status,
                });
            }
        };

        let reference = self
            .gateway
            .refund(&transaction_id, record.amount)
            .map_err(|reason| TicketingError::RefundFailed {
                payment: payment_id,
                reason: reason.to_string(),
            })?;

        record.status = PaymentStatus::Refunded;
        record.message = format!("Refunded ({reference})");
        info!(payment_id = %payment_id, %reference, "Payment refunded");
        Ok(PaymentReceipt::from(&*record))
    }

    pub fn get(&self, payment_id: PaymentId) -> Result<PaymentRecord, TicketingError> {
        self.records
            .get(&payment_id)
            .map(|record| record.lock().clone())
            .ok_or(TicketingError::PaymentNotFound(payment_id))
    }

    /// Records of a user, oldest first.
    pub fn list_by_user(&self, user_id: UserId) -> Vec<PaymentRecord> {
        let handles: Vec<Arc<Mutex<PaymentRecord>>> = self
            .records
            .iter()
            .map(|record| Arc::clone(record.value()))
            .collect();

        let mut records: Vec<PaymentRecord> = handles
            .iter()
            .filter_map(|record| {
                let record = record.lock();
                (record.user_id == user_id).then(|| record.clone())
            })
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    fn call_gateway(&self, request: ChargeRequest) -> Result<GatewayApproval, GatewayError> {
        let (tx, rx) = channel::bounded(1);
        let gateway = Arc::clone(&self.gateway);
        let amount = request.amount;
        let payment_id = request.payment_id;

        let spawned = thread::Builder::new()
            .name(format!("payment-{payment_id}"))
            .spawn(move || {
                let outcome = gateway.charge(&request);
                if let Err(unsent) = tx.send(outcome) {
                    if let Ok(approval) = unsent.into_inner() {
                        refund_late_approval(gateway.as_ref(), payment_id, &approval, amount);
                    }
                }
            });
        if let Err(e) = spawned {
            return Err(GatewayError::Unavailable(e.to_string()));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(GatewayError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(GatewayError::Unavailable(
                "gateway worker exited without an answer".to_string(),
            )),
        }
    }
}

impl fmt::Debug for PaymentBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentBook")
            .field("records", &self.records.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The caller already recorded this charge as failed; undo it at the gateway.
fn refund_late_approval(
    gateway: &dyn PaymentGateway,
    payment_id: PaymentId,
    approval: &GatewayApproval,
    amount: Decimal,
) {
    warn!(
        payment_id = %payment_id,
        transaction_id = %approval.transaction_id,
        "Gateway approved a charge after the timeout, refunding"
    );
    if let Err(reason) = gateway.refund(&approval.transaction_id, amount) {
        error!(
            payment_id = %payment_id,
            transaction_id = %approval.transaction_id,
            %reason,
            "Refund of late approval failed"
        );
    }
}
