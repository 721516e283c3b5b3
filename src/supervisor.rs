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

//! Crash supervision for workers.
//!
//! Each worker runs under its own supervisor. Every attempt is spawned as a
//! separate task, so both a returned [`WorkerCrash`] and a panic count as a
//! crash. After a crash the supervisor sleeps and restarts the worker:
//!
//! ```text
//!  Running ──crash──► BackingOff(delay) ──sleep──► Restarting ──► Running
//!     │                      │
//!     └──clean exit──► Stopped ◄──shutdown──┘
//! ```
//!
//! The delay doubles (up to a cap) when the crashed run was shorter than the
//! healthy-run threshold, and resets to the base otherwise.

use crate::base::QueueIndex;
use crate::clock::Clock;
use crate::error::WorkerCrash;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Restart delay parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// A run at least this long resets the delay to `base`.
    pub healthy_run: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(600),
            healthy_run: Duration::from_secs(60),
        }
    }
}

/// Restart delay state carried across crashes.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RestartPolicy,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            delay: policy.base,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Updates the delay for a run that lasted `ran_for` and returns it.
    pub fn on_crash(&mut self, ran_for: Duration) -> Duration {
        self.delay = if ran_for < self.policy.healthy_run {
            self.delay.saturating_mul(2).min(self.policy.cap)
        } else {
            self.policy.base
        };
        self.delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    BackingOff(Duration),
    Restarting,
    Stopped,
}

/// Observable supervisor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub restarts: u64,
}

/// Restarts one worker after crashes, indefinitely, until shutdown.
#[derive(Debug)]
pub struct Supervisor {
    queue: QueueIndex,
    policy: RestartPolicy,
    clock: Arc<dyn Clock>,
    status: Arc<Mutex<SupervisorStatus>>,
}

impl Supervisor {
    pub fn new(queue: QueueIndex, policy: RestartPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            policy,
            clock,
            status: Arc::new(Mutex::new(SupervisorStatus {
                state: SupervisorState::Restarting,
                restarts: 0,
            })),
        }
    }

    /// Shared handle to this supervisor's status.
    pub fn status(&self) -> Arc<Mutex<SupervisorStatus>> {
        Arc::clone(&self.status)
    }

    /// Runs attempts produced by `attempt` until one exits cleanly or
    /// shutdown is signalled.
    pub async fn run<F, Fut>(self, mut shutdown: watch::Receiver<bool>, mut attempt: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), WorkerCrash>> + Send + 'static,
    {
        let mut backoff = Backoff::new(self.policy);

        loop {
            let started = self.clock.now();
            self.set_state(SupervisorState::Running);

            let reason = match tokio::spawn(attempt()).await {
                Ok(Ok(())) => break,
                Ok(Err(crash)) => crash.reason,
                Err(join) if join.is_panic() => panic_message(join.into_panic()),
                Err(join) => join.to_string(),
            };

            if *shutdown.borrow() {
                break;
            }

            let ran_for = self.clock.now().saturating_duration_since(started);
            let delay = backoff.on_crash(ran_for);
            self.set_state(SupervisorState::BackingOff(delay));
            warn!(
                queue = %self.queue,
                %reason,
                ran_for_ms = ran_for.as_millis() as u64,
                delay_ms = delay.as_millis() as u64,
                "worker crashed, restarting after backoff"
            );

            tokio::select! {
                _ = self.clock.sleep(delay) => {}
                _ = shutdown.changed() => break,
            }

            self.set_state(SupervisorState::Restarting);
            let restarts = {
                let mut status = self.status.lock();
                status.restarts += 1;
                status.restarts
            };
            info!(queue = %self.queue, restarts, "restarting worker");
        }

        self.set_state(SupervisorState::Stopped);
    }

    fn set_state(&self, state: SupervisorState) {
        self.status.lock().state = state;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic".to_string()
    }
}
