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

//! Error types for dispatching, ledger access, supervision, and configuration.

use crate::base::{AssetId, QueueIndex};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to the caller of [`Dispatcher::submit`](crate::Dispatcher::submit).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Recipient identifier is not a well-formed address
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    /// Recipient already has a pending or successful disbursement
    #[error("recipient already has a pending or completed disbursement")]
    DuplicateRequest,

    /// No funding identity currently holds enough balance
    #[error("no funding identity is currently available")]
    QueueExhausted,

    /// A transfer was rejected or its confirmation reported failure
    #[error("transfer of {asset} failed: {reason}")]
    TransferFailure { asset: AssetId, reason: String },

    /// The worker crashed before the request was settled
    #[error("request was abandoned by a crashed worker")]
    Abandoned,

    /// The dispatcher no longer accepts requests
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Errors reported by a [`LedgerClient`](crate::LedgerClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger refused the operation; retrying will not help
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// The ledger could not be reached or answered with a transient error
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The client for this identity is unusable until reinitialised
    #[error("fatal ledger client error: {0}")]
    Fatal(String),
}

/// An unexpected failure that escaped a worker's run loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("worker {queue} crashed: {reason}")]
pub struct WorkerCrash {
    pub queue: QueueIndex,
    pub reason: String,
}

/// A balance probe failed during an availability cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("balance probe for identity {queue} asset {asset} failed: {source}")]
pub struct ProbeError {
    pub queue: QueueIndex,
    pub asset: AssetId,
    #[source]
    pub source: LedgerError,
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the expected schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// No asset requirements configured
    #[error("at least one asset requirement is required")]
    NoAssets,

    /// No funding identities configured
    #[error("at least one funding identity is required")]
    NoIdentities,

    /// Asset amount is zero or negative
    #[error("amount for asset {0} must be positive")]
    NonPositiveAmount(AssetId),

    /// Backoff base is zero or exceeds its cap
    #[error("invalid {0} backoff: base must be non-zero and not exceed cap")]
    InvalidBackoff(&'static str),

    /// Polling or probing interval is zero
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    /// Same funding identity listed twice
    #[error("funding identity {0} is listed more than once")]
    DuplicateIdentity(String),
}
