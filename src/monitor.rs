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

//! Balance-driven availability control loop.
//!
//! On a fixed cadence the monitor reads every funding identity's balance of
//! every required asset. An identity is available iff each balance covers
//! the per-disbursement amount. The resulting index list replaces the
//! router's available set in one step. A failed probe leaves the previous set
//! in place until the next cycle.

use crate::base::QueueIndex;
use crate::config::{AssetRequirement, FundingIdentity};
use crate::error::ProbeError;
use crate::ledger::LedgerClient;
use crate::router::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct AvailabilityMonitor {
    identities: Arc<[FundingIdentity]>,
    assets: Arc<[AssetRequirement]>,
    ledger: Arc<dyn LedgerClient>,
    router: Arc<Router>,
    interval: Duration,
}

impl AvailabilityMonitor {
    pub fn new(
        identities: Arc<[FundingIdentity]>,
        assets: Arc<[AssetRequirement]>,
        ledger: Arc<dyn LedgerClient>,
        router: Arc<Router>,
        interval: Duration,
    ) -> Self {
        Self {
            identities,
            assets,
            ledger,
            router,
            interval,
        }
    }

    /// Computes the set of identities able to fund a full disbursement.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProbeError`]; no partial result is produced.
    pub async fn probe(&self) -> Result<Vec<QueueIndex>, ProbeError> {
        let mut eligible = Vec::with_capacity(self.identities.len());

        for (index, identity) in self.identities.iter().enumerate() {
            let queue = QueueIndex(index);
            let mut funded = true;
            for requirement in self.assets.iter() {
                let balance = self
                    .ledger
                    .balance(identity, &requirement.asset_id)
                    .await
                    .map_err(|source| ProbeError {
                        queue,
                        asset: requirement.asset_id.clone(),
                        source,
                    })?;
                if balance < requirement.amount {
                    debug!(%queue, asset = %requirement.asset_id, %balance, "identity underfunded");
                    funded = false;
                }
            }
            if funded {
                eligible.push(queue);
            }
        }
        Ok(eligible)
    }

    /// Probes once and, on success, swaps the router's available set.
    /// Returns the new number of available queues.
    pub async fn refresh(&self) -> Result<usize, ProbeError> {
        let eligible = self.probe().await?;
        let count = eligible.len();
        let previous = self.router.replace(eligible.clone());

        if *previous == *eligible {
            debug!(available = count, "availability unchanged");
        } else {
            info!(
                available = count,
                queues = ?eligible,
                previous = ?previous,
                "availability changed"
            );
        }
        Ok(count)
    }

    /// Probes immediately, then every interval, until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(error) = self.refresh().await {
                warn!(%error, "availability probe failed, keeping previous set");
            }
        }
        info!("availability monitor stopped");
    }
}
