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

//! REST API over the [`Engine`].
//!
//! ## Endpoints
//!
//! - `POST /tickets/purchase-group` - Buy units of a ticket group
//! - `POST /tickets/purchase` - Buy one unit by id
//! - `POST /tickets/transfer` - Offer a purchased ticket to another user
//! - `GET /tickets/my` - Purchased tickets of the caller
//! - `POST /transfers/{id}/accept` - Accept a transfer as its recipient
//! - `POST /transfers/{id}/reject` - Reject a transfer as its recipient
//! - `GET /transfers/active` - Pending transfers of the caller
//! - `GET /transfers/rejected` - Rejected or cancelled transfers of the caller
//! - `GET /transfers/history` - Accepted transfers of the caller
//! - `GET /events/{id}/tickets` - Ticket groups of an event with units left
//!
//! The caller is identified by the `x-user-id` header.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/tickets/purchase-group \
//!   -H "Content-Type: application/json" -H "x-user-id: 2" \
//!   -d '{"event_id": 1, "sale_id": 1, "price": "25.00", "type": "regular",
//!        "is_vip": false, "title": "Floor", "place": "Hall A",
//!        "quantity": 2, "payment_method": "card"}'
//! ```

use crate::{
    DoneTransfer, Engine, ErrorKind, EventId, PurchaseGroupRequest, PurchaseReceipt,
    PurchaseTicketRequest, PurchasedTicket, PurchasedTicketId, TicketGroup, TicketingError,
    TransferId, TransferRecord, UserId,
};
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_user_email: String,
    pub purchased_ticket_id: PurchasedTicketId,
}

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

pub enum ApiError {
    Ticketing(TicketingError),
    /// Missing or malformed caller identity.
    Unauthenticated,
    /// A blocking task panicked or was cancelled.
    Internal(String),
}

impl From<TicketingError> for ApiError {
    fn from(err: TicketingError) -> Self {
        ApiError::Ticketing(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Ticketing(err) => {
                // Business rule failures (bad input, wrong caller, wrong
                // state, sold out) are all reported as bad requests.
                let status = match err.kind() {
                    ErrorKind::Validation | ErrorKind::Unauthorized | ErrorKind::Conflict => {
                        StatusCode::BAD_REQUEST
                    }
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::ExternalService => match &err {
                        TicketingError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
                        _ => StatusCode::BAD_GATEWAY,
                    },
                };
                (status, error_code(&err), err.to_string())
            }
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                format!("missing or invalid {USER_HEADER} header"),
            ),
            ApiError::Internal(message) => {
                error!(%message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "internal error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn error_code(err: &TicketingError) -> &'static str {
    use TicketingError::*;
    match err {
        InvalidQuantity { .. } => "INVALID_QUANTITY",
        InvalidAmount => "INVALID_AMOUNT",
        InvalidPrice => "INVALID_PRICE",
        MissingField(_) => "MISSING_FIELD",
        InvalidSaleWindow => "INVALID_SALE_WINDOW",
        SaleStartNotInFuture => "SALE_START_NOT_IN_FUTURE",
        SaleEventMismatch { .. } => "SALE_EVENT_MISMATCH",
        SelfTransfer => "SELF_TRANSFER",
        EventNotFound(_) => "EVENT_NOT_FOUND",
        SaleNotFound(_) => "SALE_NOT_FOUND",
        TicketNotFound(_) => "TICKET_NOT_FOUND",
        PurchasedTicketNotFound(_) => "PURCHASED_TICKET_NOT_FOUND",
        TransferNotFound(_) => "TRANSFER_NOT_FOUND",
        PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
        UserNotFound(_) => "USER_NOT_FOUND",
        RecipientNotFound => "RECIPIENT_NOT_FOUND",
        NoUnsoldTickets => "NO_UNSOLD_TICKETS",
        NotEventSeller { .. } => "NOT_EVENT_SELLER",
        NotTicketOwner { .. } => "NOT_TICKET_OWNER",
        NotTransferRecipient { .. } => "NOT_TRANSFER_RECIPIENT",
        SaleNotActive(_) => "SALE_NOT_ACTIVE",
        SaleAlreadyActive(_) => "SALE_ALREADY_ACTIVE",
        EventNotApproved(_) => "EVENT_NOT_APPROVED",
        InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
        SaleWindowOverlap { .. } => "SALE_WINDOW_OVERLAP",
        SaleHasSoldTickets(_) => "SALE_HAS_SOLD_TICKETS",
        TicketAlreadySold(_) => "TICKET_ALREADY_SOLD",
        TicketAlreadyUsed(_) => "TICKET_ALREADY_USED",
        TransferAlreadyPending(_) => "TRANSFER_ALREADY_PENDING",
        TransferNotPending { .. } => "TRANSFER_NOT_PENDING",
        OwnershipChanged(_) => "OWNERSHIP_CHANGED",
        PaymentNotRefundable { .. } => "PAYMENT_NOT_REFUNDABLE",
        PaymentDeclined { .. } => "PAYMENT_DECLINED",
        RefundFailed { .. } => "REFUND_FAILED",
    }
}

// === Caller Identity ===

/// The user making the request, read from [`USER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|id| Caller(UserId(id)))
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Runs a blocking engine operation off the async runtime.
///
/// Purchases hold row locks and wait on the payment gateway, so no
/// engine call runs on a runtime worker.
async fn run_blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> Result<T, TicketingError> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

// === Handlers ===

/// POST /tickets/purchase-group
async fn purchase_group(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Json(request): Json<PurchaseGroupRequest>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), ApiError> {
    let receipt = run_blocking(&state, move |engine| engine.purchase_group(buyer, &request)).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /tickets/purchase
async fn purchase_ticket(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Json(request): Json<PurchaseTicketRequest>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), ApiError> {
    let receipt =
        run_blocking(&state, move |engine| engine.purchase_ticket(buyer, &request)).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /tickets/transfer
async fn initiate_transfer(
    State(state): State<AppState>,
    Caller(sender): Caller,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferRecord>), ApiError> {
    let record = run_blocking(&state, move |engine| {
        engine.initiate_transfer(sender, request.purchased_ticket_id, &request.to_user_email)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /tickets/my
async fn my_tickets(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<PurchasedTicket>>, ApiError> {
    let tickets = run_blocking(&state, move |engine| Ok(engine.user_tickets(user))).await?;
    Ok(Json(tickets))
}

/// POST /transfers/{id}/accept
async fn accept_transfer(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<u64>,
) -> Result<Json<TransferRecord>, ApiError> {
    let record =
        run_blocking(&state, move |engine| engine.accept_transfer(TransferId(id), user)).await?;
    Ok(Json(record))
}

/// POST /transfers/{id}/reject
async fn reject_transfer(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(id): Path<u64>,
) -> Result<Json<TransferRecord>, ApiError> {
    let record =
        run_blocking(&state, move |engine| engine.reject_transfer(TransferId(id), user)).await?;
    Ok(Json(record))
}

/// GET /transfers/active
async fn active_transfers(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<TransferRecord>>, ApiError> {
    let records = run_blocking(&state, move |engine| Ok(engine.active_transfers(user))).await?;
    Ok(Json(records))
}

/// GET /transfers/rejected
async fn rejected_transfers(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<TransferRecord>>, ApiError> {
    let records = run_blocking(&state, move |engine| Ok(engine.rejected_transfers(user))).await?;
    Ok(Json(records))
}

/// GET /transfers/history
async fn transfer_history(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<DoneTransfer>>, ApiError> {
    let history = run_blocking(&state, move |engine| Ok(engine.transfer_history(user))).await?;
    Ok(Json(history))
}

/// GET /events/{id}/tickets
async fn event_ticket_groups(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<TicketGroup>>, ApiError> {
    let groups =
        run_blocking(&state, move |engine| engine.available_ticket_groups(EventId(id))).await?;
    Ok(Json(groups))
}

// === Router ===

pub fn router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/tickets/purchase-group", post(purchase_group))
        .route("/tickets/purchase", post(purchase_ticket))
        .route("/tickets/transfer", post(initiate_transfer))
        .route("/tickets/my", get(my_tickets))
        .route("/transfers/{id}/accept", post(accept_transfer))
        .route("/transfers/{id}/reject", post(reject_transfer))
        .route("/transfers/active", get(active_transfers))
        .route("/transfers/rejected", get(rejected_transfers))
        .route("/transfers/history", get(transfer_history))
        .route("/events/{id}/tickets", get(event_ticket_groups))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PaymentId, SaleId, TransferStatus};

    #[test]
    fn kinds_map_to_status_codes() {
        let status = |err: TicketingError| ApiError::from(err).into_response().status();

        assert_eq!(status(TicketingError::InvalidAmount), StatusCode::BAD_REQUEST);
        assert_eq!(status(TicketingError::SaleNotFound(SaleId(1))), StatusCode::NOT_FOUND);
        assert_eq!(
            status(TicketingError::NotTicketOwner {
                ticket: PurchasedTicketId(1),
                user: UserId(1)
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(TicketingError::PaymentDeclined {
                payment: PaymentId(1),
                reason: "card declined".into()
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status(TicketingError::RefundFailed {
                payment: PaymentId(1),
                reason: "gateway timeout".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn purchase_and_transfer_rule_failures_are_bad_requests() {
        let status = |err: TicketingError| ApiError::from(err).into_response().status();
        let failures = [
            TicketingError::InsufficientInventory {
                requested: 2,
                available: 1,
            },
            TicketingError::SaleNotActive(SaleId(1)),
            TicketingError::EventNotApproved(EventId(1)),
            TicketingError::TransferNotPending {
                transfer: TransferId(1),
                status: TransferStatus::Accepted,
            },
            TicketingError::NotTransferRecipient {
                transfer: TransferId(1),
                user: UserId(2),
            },
        ];

        for err in failures {
            assert_eq!(status(err), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn missing_caller_is_unauthenticated() {
        let response = ApiError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
