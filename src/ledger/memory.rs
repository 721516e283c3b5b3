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

//! In-process ledger.
//!
//! Holds per-identity balances and settles transfers locally. Used by the
//! demo binary and by tests, which can script faults through [`FaultPlan`]
//! and inspect the ordered [`LedgerCall`] log.
//!
//! # Example
//!
//! ```
//! use faucet_dispatch::{AssetId, FundingIdentity, LedgerClient, MemoryLedger, OperationStatus};
//! use rust_decimal_macros::dec;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ledger = MemoryLedger::new();
//! let faucet = FundingIdentity::new("0x6c10d9c1744f149d4b17660e14faa247964749c7");
//! let eth = AssetId::new("ETH");
//! ledger.set_balance(&faucet, &eth, dec!(5));
//!
//! let to = "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147".parse().unwrap();
//! let op = ledger.transfer(&faucet, &to, &eth, dec!(2)).await.unwrap();
//!
//! assert_eq!(ledger.status(&op).await.unwrap(), OperationStatus::Success);
//! assert_eq!(ledger.balance(&faucet, &eth).await.unwrap(), dec!(3));
//! # }
//! ```

use super::{LedgerClient, OperationStatus};
use crate::base::{AssetId, OperationRef, Recipient};
use crate::config::{DemoConfig, FundingIdentity};
use crate::error::LedgerError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// A ledger call, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Transfer {
        from: String,
        to: Recipient,
        asset: AssetId,
    },
    Status {
        operation: OperationRef,
    },
    Balance {
        identity: String,
        asset: AssetId,
    },
}

/// Scripted faults, each consumed by the first matching call.
#[derive(Debug, Default, Clone)]
pub struct FaultPlan {
    /// Assets whose next transfer is rejected at submission.
    pub reject_transfer: VecDeque<AssetId>,
    /// Assets whose next transfer is accepted but fails on confirmation.
    pub fail_confirmation: VecDeque<AssetId>,
    /// Number of upcoming transfers that fail with [`LedgerError::Fatal`].
    pub fatal_transfers: u32,
    /// Number of upcoming status polls that fail with [`LedgerError::Unavailable`].
    pub unavailable_status: u32,
    /// While set, every balance query fails with [`LedgerError::Unavailable`].
    pub balances_unavailable: bool,
}

impl FaultPlan {
    fn take_asset(list: &mut VecDeque<AssetId>, asset: &AssetId) -> bool {
        match list.iter().position(|a| a == asset) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct WalletData {
    balances: HashMap<AssetId, Decimal>,
}

impl WalletData {
    fn balance(&self, asset: &AssetId) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    fn credit(&mut self, asset: &AssetId, amount: Decimal) {
        *self.balances.entry(asset.clone()).or_insert(Decimal::ZERO) += amount;
    }

    fn debit(&mut self, asset: &AssetId, amount: Decimal) -> Result<(), LedgerError> {
        let balance = self.balance(asset);
        if balance < amount {
            return Err(LedgerError::Rejected("insufficient funds".to_string()));
        }
        self.balances.insert(asset.clone(), balance - amount);
        debug_assert!(
            self.balance(asset) >= Decimal::ZERO,
            "Invariant violated: balance of {asset} went negative"
        );
        Ok(())
    }
}

#[derive(Debug)]
struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    fn new() -> Self {
        Self {
            inner: Mutex::new(WalletData {
                balances: HashMap::new(),
            }),
        }
    }
}

#[derive(Debug)]
struct OperationRecord {
    outcome: OperationStatus,
    polls_remaining: u32,
}

/// Ledger that keeps every balance in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    /// Wallets keyed by lower-cased address.
    wallets: DashMap<String, Wallet>,
    operations: DashMap<OperationRef, OperationRecord>,
    next_operation: AtomicU64,
    /// Polls an operation reports `Pending` before its outcome.
    confirmation_polls: u32,
    faults: Mutex<FaultPlan>,
    /// Call log; `None` when recording is off.
    calls: Option<Mutex<Vec<LedgerCall>>>,
}

impl MemoryLedger {
    /// Ledger that records every call for inspection.
    pub fn new() -> Self {
        Self {
            calls: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    /// Operations stay pending for `polls` status queries before settling.
    pub fn with_confirmation_polls(polls: u32) -> Self {
        Self {
            confirmation_polls: polls,
            ..Self::new()
        }
    }

    /// Stops recording calls. Long-running processes use this so the call
    /// log does not grow without bound.
    pub fn without_call_log(mut self) -> Self {
        self.calls = None;
        self
    }

    /// Builds a ledger seeded from the `[demo]` config section. The demo
    /// ledger keeps no call log.
    pub fn from_demo(demo: &DemoConfig) -> Self {
        let ledger = Self::with_confirmation_polls(demo.confirmation_polls).without_call_log();
        for seed in &demo.balances {
            ledger.set_balance(
                &FundingIdentity::new(seed.identity.as_str()),
                &seed.asset_id,
                seed.amount,
            );
        }
        ledger
    }

    pub fn set_balance(&self, identity: &FundingIdentity, asset: &AssetId, amount: Decimal) {
        self.wallets
            .entry(identity.address.to_ascii_lowercase())
            .or_insert_with(Wallet::new)
            .inner
            .lock()
            .balances
            .insert(asset.clone(), amount);
    }

    /// Balance of any address, funding identity or recipient.
    pub fn balance_of(&self, address: &str, asset: &AssetId) -> Decimal {
        self.wallets
            .get(&address.to_ascii_lowercase())
            .map(|wallet| wallet.inner.lock().balance(asset))
            .unwrap_or(Decimal::ZERO)
    }

    /// Replaces the pending fault plan.
    pub fn set_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }

    pub fn reject_next_transfer(&self, asset: &AssetId) {
        self.faults.lock().reject_transfer.push_back(asset.clone());
    }

    pub fn fail_next_confirmation(&self, asset: &AssetId) {
        self.faults.lock().fail_confirmation.push_back(asset.clone());
    }

    pub fn fatal_next_transfer(&self) {
        self.faults.lock().fatal_transfers += 1;
    }

    pub fn set_balances_unavailable(&self, unavailable: bool) {
        self.faults.lock().balances_unavailable = unavailable;
    }

    /// Every call made so far, oldest first. Empty when recording is off.
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls
            .as_ref()
            .map(|calls| calls.lock().clone())
            .unwrap_or_default()
    }

    /// Transfer calls only, oldest first.
    pub fn transfers(&self) -> Vec<LedgerCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, LedgerCall::Transfer { .. }))
            .collect()
    }

    fn record(&self, call: LedgerCall) {
        if let Some(calls) = &self.calls {
            calls.lock().push(call);
        }
    }

    fn next_operation_ref(&self) -> OperationRef {
        let n = self.next_operation.fetch_add(1, Ordering::Relaxed) + 1;
        OperationRef(format!("0x{n:064x}"))
    }

    /// Moves funds between wallets. Never holds both wallet locks at once.
    fn settle_transfer(
        &self,
        from: &str,
        to: &Recipient,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        {
            let wallet = self
                .wallets
                .get(from)
                .ok_or_else(|| LedgerError::Rejected("insufficient funds".to_string()))?;
            wallet.inner.lock().debit(asset, amount)?;
        }
        self.wallets
            .entry(to.as_str().to_string())
            .or_insert_with(Wallet::new)
            .inner
            .lock()
            .credit(asset, amount);
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn transfer(
        &self,
        from: &FundingIdentity,
        to: &Recipient,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<OperationRef, LedgerError> {
        let from = from.address.to_ascii_lowercase();
        self.record(LedgerCall::Transfer {
            from: from.clone(),
            to: to.clone(),
            asset: asset.clone(),
        });
        tokio::task::yield_now().await;

        let fail_confirmation = {
            let mut faults = self.faults.lock();
            if faults.fatal_transfers > 0 {
                faults.fatal_transfers -= 1;
                return Err(LedgerError::Fatal("nonce out of sync".to_string()));
            }
            if FaultPlan::take_asset(&mut faults.reject_transfer, asset) {
                return Err(LedgerError::Rejected("transfer rejected".to_string()));
            }
            FaultPlan::take_asset(&mut faults.fail_confirmation, asset)
        };

        let outcome = if fail_confirmation {
            OperationStatus::Failed("execution reverted".to_string())
        } else {
            self.settle_transfer(&from, to, asset, amount)?;
            OperationStatus::Success
        };

        let operation = self.next_operation_ref();
        self.operations.insert(
            operation.clone(),
            OperationRecord {
                outcome,
                polls_remaining: self.confirmation_polls,
            },
        );
        Ok(operation)
    }

    async fn status(&self, operation: &OperationRef) -> Result<OperationStatus, LedgerError> {
        self.record(LedgerCall::Status {
            operation: operation.clone(),
        });
        tokio::task::yield_now().await;

        {
            let mut faults = self.faults.lock();
            if faults.unavailable_status > 0 {
                faults.unavailable_status -= 1;
                return Err(LedgerError::Unavailable("status endpoint timed out".to_string()));
            }
        }

        let mut record = self
            .operations
            .get_mut(operation)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown operation {operation}")))?;
        if record.polls_remaining > 0 {
            record.polls_remaining -= 1;
            return Ok(OperationStatus::Pending);
        }
        Ok(record.outcome.clone())
    }

    async fn balance(
        &self,
        identity: &FundingIdentity,
        asset: &AssetId,
    ) -> Result<Decimal, LedgerError> {
        self.record(LedgerCall::Balance {
            identity: identity.address.to_ascii_lowercase(),
            asset: asset.clone(),
        });
        tokio::task::yield_now().await;

        if self.faults.lock().balances_unavailable {
            return Err(LedgerError::Unavailable("balance query failed".to_string()));
        }
        Ok(self.balance_of(&identity.address, asset))
    }
}
