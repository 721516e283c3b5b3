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

//! # Faucet Dispatch
//!
//! This library turns "pay this recipient" requests into multi-asset
//! transfers spread across a pool of funding identities.
//!
//! ## Core Components
//!
//! - [`Dispatcher`]: Intake, routing, and lifecycle of the worker pool
//! - [`IdempotencyGuard`]: At most one pending or completed claim per recipient
//! - [`Router`]: Round-robin over the currently available queues
//! - [`DisbursementQueue`]: FIFO of requests owned by one funding identity
//! - [`Worker`]: Executes and confirms one request at a time per identity
//! - [`Supervisor`]: Restarts crashed workers with exponential backoff
//! - [`AvailabilityMonitor`]: Gates identities on their balances
//! - [`LedgerClient`]: Seam to the ledger; [`MemoryLedger`] is the in-process one
//!
//! ## Example
//!
//! ```
//! use faucet_dispatch::{AssetId, DispatchError, Dispatcher, FaucetConfig, MemoryLedger};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = FaucetConfig::from_toml_str(r#"
//!     [[assets]]
//!     asset_id = "ETH"
//!     amount = "1"
//!
//!     [[assets]]
//!     asset_id = "DAI"
//!     amount = "300"
//!
//!     [[identities]]
//!     address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"
//! "#).unwrap();
//!
//! let ledger = Arc::new(MemoryLedger::new());
//! ledger.set_balance(&config.identities[0], &AssetId::new("ETH"), dec!(10));
//! ledger.set_balance(&config.identities[0], &AssetId::new("DAI"), dec!(3000));
//!
//! let dispatcher = Dispatcher::new(&config, ledger).unwrap();
//! dispatcher.start();
//!
//! let recipient: faucet_dispatch::Recipient =
//!     "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147".parse().unwrap();
//! let receipt = dispatcher.submit(recipient.clone()).await.unwrap();
//! assert_eq!(receipt.transfers.len(), 2);
//!
//! // A paid recipient is never paid twice
//! let again = dispatcher.submit(recipient).await;
//! assert!(matches!(again, Err(DispatchError::DuplicateRequest)));
//!
//! dispatcher.shutdown().await;
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Requests for one funding identity execute strictly in arrival order, one
//! at a time. Different identities run in parallel.

mod base;
pub mod clock;
pub mod config;
mod dispatcher;
pub mod error;
mod guard;
pub mod ledger;
mod monitor;
mod queue;
mod router;
pub mod server;
pub mod supervisor;
mod worker;

pub use base::{AssetId, OperationRef, QueueIndex, Recipient};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{
    AssetRequirement, DemoBalance, DemoConfig, DispatchConfig, FaucetConfig, FundingIdentity,
    ServerConfig,
};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, DispatchError, LedgerError, ProbeError, WorkerCrash};
pub use guard::{ClaimState, IdempotencyGuard};
pub use ledger::{FaultPlan, LedgerCall, LedgerClient, MemoryLedger, OperationStatus};
pub use monitor::AvailabilityMonitor;
pub use queue::{
    CompletionHandle, Disbursement, DisbursementQueue, InFlight, Outcome, Request, Ticket,
    TransferReceipt,
};
pub use router::Router;
pub use supervisor::{Backoff, RestartPolicy, Supervisor, SupervisorState, SupervisorStatus};
pub use worker::{ConfirmBackoff, Worker};
