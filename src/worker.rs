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

//! Per-identity disbursement worker.
//!
//! One worker drains one queue strictly in order, so a funding identity
//! never has more than one transfer sequence in flight. For each request it
//! submits every configured asset transfer, then waits for each to confirm.
//!
//! | Ledger result | Effect |
//! |---------------|--------|
//! | transfer `Rejected` / `Unavailable` | request fails, guard released |
//! | status `Pending` / `Unavailable` | poll again after capped backoff |
//! | status `Failed` / `Rejected` | request fails, guard released |
//! | any `Fatal` | worker crashes, request dropped unsettled |
//!
//! Transfers already submitted before a failure are not retried.

use crate::base::{AssetId, OperationRef, QueueIndex, Recipient};
use crate::config::{AssetRequirement, FundingIdentity};
use crate::error::{DispatchError, LedgerError, WorkerCrash};
use crate::guard::IdempotencyGuard;
use crate::ledger::{LedgerClient, OperationStatus};
use crate::queue::{DisbursementQueue, Disbursement, InFlight, TransferReceipt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Capped exponential delay between confirmation polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmBackoff {
    pub base: Duration,
    pub cap: Duration,
}

impl ConfirmBackoff {
    pub fn next(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.cap)
    }
}

/// Why a disbursement stopped early.
enum Abort {
    /// Expected failure; settle the request as failed.
    Failed(DispatchError),
    /// Unexpected failure; crash the worker.
    Crash(WorkerCrash),
}

/// Drains one [`DisbursementQueue`] on behalf of one funding identity.
#[derive(Clone)]
pub struct Worker {
    index: QueueIndex,
    identity: FundingIdentity,
    queue: Arc<DisbursementQueue>,
    guard: Arc<IdempotencyGuard>,
    ledger: Arc<dyn LedgerClient>,
    assets: Arc<[AssetRequirement]>,
    poll_interval: Duration,
    confirm: ConfirmBackoff,
}

impl Worker {
    pub fn new(
        identity: FundingIdentity,
        queue: Arc<DisbursementQueue>,
        guard: Arc<IdempotencyGuard>,
        ledger: Arc<dyn LedgerClient>,
        assets: Arc<[AssetRequirement]>,
        poll_interval: Duration,
        confirm: ConfirmBackoff,
    ) -> Self {
        Self {
            index: queue.index(),
            identity,
            queue,
            guard,
            ledger,
            assets,
            poll_interval,
            confirm,
        }
    }

    /// Runs until shutdown is signalled or an unexpected error escapes.
    ///
    /// Shutdown is only observed between requests; an in-flight request
    /// always runs to settlement first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerCrash> {
        info!(queue = %self.index, identity = %self.identity.address, "worker started");
        loop {
            if *shutdown.borrow() {
                info!(queue = %self.index, "worker stopped");
                return Ok(());
            }

            let Some(request) = self.queue.begin() else {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
                continue;
            };

            self.process(request).await?;
        }
    }

    /// Disburses one request and settles it.
    async fn process(&self, request: InFlight<'_>) -> Result<(), WorkerCrash> {
        let recipient = request.recipient().clone();
        match self.disburse(&recipient).await {
            Ok(transfers) => {
                self.guard.complete(&recipient);
                info!(queue = %self.index, %recipient, "disbursement complete");
                request.settle(Ok(Disbursement {
                    recipient,
                    queue: self.index,
                    transfers,
                }));
                Ok(())
            }
            Err(Abort::Failed(failure)) => {
                warn!(queue = %self.index, %recipient, error = %failure, "disbursement failed");
                self.guard.release(&recipient);
                request.settle(Err(failure));
                Ok(())
            }
            Err(Abort::Crash(crash)) => {
                error!(queue = %self.index, %recipient, error = %crash, "dropping in-flight request");
                drop(request);
                Err(crash)
            }
        }
    }

    async fn disburse(&self, recipient: &Recipient) -> Result<Vec<TransferReceipt>, Abort> {
        let mut submitted = Vec::with_capacity(self.assets.len());

        for requirement in self.assets.iter() {
            let operation = self
                .ledger
                .transfer(&self.identity, recipient, &requirement.asset_id, requirement.amount)
                .await
                .map_err(|e| self.abort(&requirement.asset_id, e))?;
            debug!(
                queue = %self.index,
                %recipient,
                asset = %requirement.asset_id,
                %operation,
                "transfer submitted"
            );
            submitted.push(TransferReceipt {
                asset: requirement.asset_id.clone(),
                amount: requirement.amount,
                operation,
            });
        }

        for receipt in &submitted {
            self.confirm(&receipt.asset, &receipt.operation).await?;
        }
        Ok(submitted)
    }

    /// Polls `operation` until it reaches a terminal status.
    async fn confirm(&self, asset: &AssetId, operation: &OperationRef) -> Result<(), Abort> {
        let mut delay = self.confirm.base;
        loop {
            match self.ledger.status(operation).await {
                Ok(OperationStatus::Success) => return Ok(()),
                Ok(OperationStatus::Failed(reason)) => {
                    return Err(Abort::Failed(DispatchError::TransferFailure {
                        asset: asset.clone(),
                        reason,
                    }));
                }
                Ok(OperationStatus::Pending) => {
                    debug!(queue = %self.index, %operation, delay_ms = delay.as_millis() as u64, "confirmation pending");
                }
                Err(LedgerError::Unavailable(reason)) => {
                    debug!(queue = %self.index, %operation, %reason, "status unavailable, retrying");
                }
                Err(other) => return Err(self.abort(asset, other)),
            }
            tokio::time::sleep(delay).await;
            delay = self.confirm.next(delay);
        }
    }

    fn abort(&self, asset: &AssetId, error: LedgerError) -> Abort {
        match error {
            LedgerError::Fatal(reason) => Abort::Crash(WorkerCrash {
                queue: self.index,
                reason,
            }),
            LedgerError::Rejected(reason) | LedgerError::Unavailable(reason) => {
                Abort::Failed(DispatchError::TransferFailure {
                    asset: asset.clone(),
                    reason,
                })
            }
        }
    }
}
