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

//! HTTP intake for the dispatcher.
//!
//! ## Endpoints
//!
//! - `POST /ask_money` - Request a disbursement for `receiverAddress`
//! - `GET /available` - Number of funding identities currently available
//! - `GET /tokens` - Assets and amounts paid out per disbursement
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:2880/ask_money \
//!   -H "Content-Type: application/json" \
//!   -d '{"receiverAddress": "0x6c10d9c1744f149d4b17660e14faa247964749c7"}'
//!
//! curl http://localhost:2880/available
//! ```

use crate::base::{QueueIndex, Recipient};
use crate::config::AssetRequirement;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::queue::{Disbursement, TransferReceipt};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

// === Request/Response DTOs ===

/// Request body for `POST /ask_money`.
#[derive(Debug, Deserialize, Serialize)]
pub struct AskMoneyRequest {
    #[serde(rename = "receiverAddress")]
    pub receiver_address: String,
}

/// Response body for a completed disbursement.
#[derive(Debug, Deserialize, Serialize)]
pub struct AskMoneyResponse {
    pub status: String,
    pub recipient: String,
    pub queue: QueueIndex,
    pub transfers: Vec<TransferReceipt>,
}

impl From<Disbursement> for AskMoneyResponse {
    fn from(disbursement: Disbursement) -> Self {
        Self {
            status: "ok".to_string(),
            recipient: disbursement.recipient.to_string(),
            queue: disbursement.queue,
            transfers: disbursement.transfers,
        }
    }
}

/// Response body for `GET /available`.
#[derive(Debug, Deserialize, Serialize)]
pub struct AvailabilityResponse {
    pub available_queues: usize,
    pub identities: usize,
}

/// Response body for errors.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

// === Error Handling ===

/// Wrapper for converting `DispatchError` into HTTP responses.
pub struct AppError(DispatchError);

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            DispatchError::InvalidRecipient(_) => (StatusCode::BAD_REQUEST, "INVALID_RECIPIENT"),
            DispatchError::DuplicateRequest => (StatusCode::CONFLICT, "DUPLICATE_REQUEST"),
            DispatchError::QueueExhausted => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_EXHAUSTED"),
            DispatchError::TransferFailure { .. } => (StatusCode::BAD_GATEWAY, "TRANSFER_FAILURE"),
            DispatchError::Abandoned => (StatusCode::INTERNAL_SERVER_ERROR, "ABANDONED"),
            DispatchError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /ask_money - Disburse the configured assets to a recipient.
///
/// A body without a string `receiverAddress` is answered as an invalid
/// recipient.
async fn ask_money(
    State(state): State<AppState>,
    payload: Result<Json<AskMoneyRequest>, JsonRejection>,
) -> Result<Json<AskMoneyResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(%rejection, "unreadable ask_money body");
        DispatchError::InvalidRecipient("missing receiver address".to_string())
    })?;
    let recipient: Recipient = request.receiver_address.parse()?;
    let disbursement = state.dispatcher.submit(recipient).await?;
    Ok(Json(disbursement.into()))
}

/// GET /available - Availability summary.
async fn available(State(state): State<AppState>) -> Json<AvailabilityResponse> {
    Json(AvailabilityResponse {
        available_queues: state.dispatcher.available_count(),
        identities: state.dispatcher.identity_count(),
    })
}

/// GET /tokens - Configured asset list.
async fn tokens(State(state): State<AppState>) -> Json<Vec<AssetRequirement>> {
    Json(state.dispatcher.assets().to_vec())
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ask_money", post(ask_money))
        .route("/available", get(available))
        .route("/tokens", get(tokens))
        .with_state(state)
}
