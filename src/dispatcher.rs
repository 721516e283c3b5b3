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

//! Request dispatcher.
//!
//! The [`Dispatcher`] owns every piece of shared state: the idempotency
//! guard, the router, and one queue per funding identity. Intake flows
//! through it as
//!
//! ```text
//! submit ─► guard.try_claim ─► router.route ─► queue[i].push ─► worker i ─► settle
//! ```
//!
//! while the availability monitor swaps the router's available set on its
//! own cadence.

use crate::base::{QueueIndex, Recipient};
use crate::clock::{Clock, TokioClock};
use crate::config::{AssetRequirement, DispatchConfig, FaucetConfig, FundingIdentity};
use crate::error::{ConfigError, DispatchError};
use crate::guard::IdempotencyGuard;
use crate::ledger::LedgerClient;
use crate::monitor::AvailabilityMonitor;
use crate::queue::{DisbursementQueue, Outcome, Request, Ticket};
use crate::router::Router;
use crate::supervisor::{RestartPolicy, Supervisor, SupervisorState, SupervisorStatus};
use crate::worker::{ConfirmBackoff, Worker};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Fans disbursement requests out over per-identity workers.
///
/// # Example
///
/// ```
/// use faucet_dispatch::{AssetId, Dispatcher, FaucetConfig, MemoryLedger};
/// use rust_decimal_macros::dec;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = FaucetConfig::from_toml_str(r#"
///     [[assets]]
///     asset_id = "ETH"
///     amount = "1"
///
///     [[identities]]
///     address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"
/// "#).unwrap();
///
/// let ledger = Arc::new(MemoryLedger::new());
/// ledger.set_balance(&config.identities[0], &AssetId::new("ETH"), dec!(5));
///
/// let dispatcher = Dispatcher::new(&config, ledger).unwrap();
/// dispatcher.start();
///
/// let recipient = "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147".parse().unwrap();
/// let receipt = dispatcher.submit(recipient).await.unwrap();
/// assert_eq!(receipt.transfers.len(), 1);
///
/// dispatcher.shutdown().await;
/// # }
/// ```
pub struct Dispatcher {
    identities: Arc<[FundingIdentity]>,
    assets: Arc<[AssetRequirement]>,
    timing: DispatchConfig,
    guard: Arc<IdempotencyGuard>,
    router: Arc<Router>,
    queues: Vec<Arc<DisbursementQueue>>,
    statuses: Mutex<Vec<Arc<Mutex<SupervisorStatus>>>>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    /// Cleared by `shutdown`. Intake holds the read lock from the check
    /// until the request is pushed.
    accepting: RwLock<bool>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(config: &FaucetConfig, ledger: Arc<dyn LedgerClient>) -> Result<Self, ConfigError> {
        Self::with_clock(config, ledger, Arc::new(TokioClock))
    }

    /// Builds a dispatcher whose supervisors use `clock`.
    ///
    /// Every identity starts out available; the monitor corrects the set on
    /// its first probe.
    pub fn with_clock(
        config: &FaucetConfig,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let queues: Vec<_> = (0..config.identities.len())
            .map(|i| Arc::new(DisbursementQueue::new(QueueIndex(i))))
            .collect();
        let router = Router::new(queues.iter().map(|q| q.index()));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            identities: config.identities.clone().into(),
            assets: config.assets.clone().into(),
            timing: config.dispatch.clone(),
            guard: Arc::new(IdempotencyGuard::new()),
            router: Arc::new(router),
            queues,
            statuses: Mutex::new(Vec::new()),
            ledger,
            clock,
            shutdown,
            accepting: RwLock::new(true),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns one supervised worker per identity and the availability
    /// monitor. Calling it again has no effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = Vec::with_capacity(self.queues.len() + 1);
        let mut statuses = Vec::with_capacity(self.queues.len());
        let policy = RestartPolicy {
            base: self.timing.restart_base(),
            cap: self.timing.restart_cap(),
            healthy_run: self.timing.healthy_run(),
        };
        let confirm = ConfirmBackoff {
            base: self.timing.confirm_base(),
            cap: self.timing.confirm_cap(),
        };

        for (queue, identity) in self.queues.iter().zip(self.identities.iter()) {
            let worker = Worker::new(
                identity.clone(),
                Arc::clone(queue),
                Arc::clone(&self.guard),
                Arc::clone(&self.ledger),
                Arc::clone(&self.assets),
                self.timing.poll_interval(),
                confirm,
            );
            let supervisor = Supervisor::new(queue.index(), policy, Arc::clone(&self.clock));
            statuses.push(supervisor.status());

            let shutdown = self.shutdown.subscribe();
            let attempt_shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(supervisor.run(shutdown, move || {
                let worker = worker.clone();
                let shutdown = attempt_shutdown.clone();
                async move { worker.run(shutdown).await }
            })));
        }

        let monitor = AvailabilityMonitor::new(
            Arc::clone(&self.identities),
            Arc::clone(&self.assets),
            Arc::clone(&self.ledger),
            Arc::clone(&self.router),
            self.timing.monitor_interval(),
        );
        tasks.push(tokio::spawn(monitor.run(self.shutdown.subscribe())));

        *self.statuses.lock() = statuses;
        *self.tasks.lock() = tasks;
        info!(
            identities = self.identities.len(),
            assets = self.assets.len(),
            "dispatcher started"
        );
    }

    /// Claims, routes, and enqueues a request without waiting for it.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    /// - [`DispatchError::DuplicateRequest`] if the recipient is pending or paid.
    /// - [`DispatchError::QueueExhausted`] if no identity is available; the
    ///   claim is released before returning.
    pub fn enqueue(&self, recipient: Recipient) -> Result<Ticket, DispatchError> {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(DispatchError::ShuttingDown);
        }
        if !self.guard.try_claim(&recipient) {
            debug!(%recipient, "duplicate request refused");
            return Err(DispatchError::DuplicateRequest);
        }

        let queue = match self.router.route() {
            Ok(queue) => queue,
            Err(error) => {
                self.guard.release(&recipient);
                return Err(error);
            }
        };

        info!(%recipient, %queue, "request accepted");
        let (request, receiver) = Request::new(recipient);
        self.queues[queue.0].push(request);
        Ok(Ticket::new(queue, receiver))
    }

    /// Enqueues a request and waits for it to settle.
    pub async fn submit(&self, recipient: Recipient) -> Outcome {
        self.enqueue(recipient)?.wait().await
    }

    /// Stops accepting requests, signals every task, and waits for them.
    ///
    /// Workers finish their in-flight request before stopping. Requests still
    /// queued afterwards are rejected with [`DispatchError::ShuttingDown`] and
    /// their claims released. Once the flag is cleared no intake can push,
    /// so the final drain sees every accepted request.
    pub async fn shutdown(&self) {
        *self.accepting.write() = false;
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        let mut rejected = 0usize;
        for queue in &self.queues {
            while let Some(request) = queue.begin() {
                self.guard.release(request.recipient());
                request.settle(Err(DispatchError::ShuttingDown));
                rejected += 1;
            }
        }
        info!(rejected, "dispatcher stopped");
    }

    pub fn available_count(&self) -> usize {
        self.router.available_count()
    }

    pub fn available_queues(&self) -> Vec<QueueIndex> {
        self.router.snapshot().to_vec()
    }

    pub fn assets(&self) -> &[AssetRequirement] {
        &self.assets
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Pending plus in-flight requests on `queue`.
    pub fn queue_depth(&self, queue: QueueIndex) -> Option<usize> {
        self.queues.get(queue.0).map(|q| q.depth())
    }

    /// Supervisor state of the worker for `queue`, once started.
    pub fn worker_state(&self, queue: QueueIndex) -> Option<SupervisorState> {
        self.statuses.lock().get(queue.0).map(|s| s.lock().state)
    }

    /// Number of times the worker for `queue` has been restarted.
    pub fn worker_restarts(&self, queue: QueueIndex) -> Option<u64> {
        self.statuses.lock().get(queue.0).map(|s| s.lock().restarts)
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}
