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

//! Ledger client seam.
//!
//! The dispatcher never builds, signs, or broadcasts transfers itself. It
//! drives a [`LedgerClient`] through three calls: submit a transfer, poll an
//! operation's status, and read a balance.

mod memory;

pub use memory::{FaultPlan, LedgerCall, MemoryLedger};

use crate::base::{AssetId, OperationRef, Recipient};
use crate::config::FundingIdentity;
use crate::error::LedgerError;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Confirmation state of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Not yet known to be final.
    Pending,
    /// Confirmed on the ledger.
    Success,
    /// Terminally failed on the ledger.
    Failed(String),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submits a transfer from `from` to `to`.
    async fn transfer(
        &self,
        from: &FundingIdentity,
        to: &Recipient,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<OperationRef, LedgerError>;

    /// Reports the current status of a submitted operation.
    async fn status(&self, operation: &OperationRef) -> Result<OperationStatus, LedgerError>;

    /// Reads the balance `identity` holds of `asset`.
    async fn balance(&self, identity: &FundingIdentity, asset: &AssetId)
    -> Result<Decimal, LedgerError>;
}
