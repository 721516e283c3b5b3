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

//! Round-robin queue selection over the currently available identities.

use crate::DispatchError;
use crate::base::QueueIndex;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Assigns requests to available queues in round-robin order.
///
/// The available set is replaced wholesale by the availability monitor and
/// read as a single `Arc` snapshot, so a route never observes a half-written
/// set. Selection and counter increment happen under one mutex, which keeps
/// concurrent intake from handing out the same slot twice.
///
/// Fairness is only exact while the set is stable: when the monitor swaps
/// the set between two routes, the counter keeps counting and the next pick
/// is taken modulo the new length.
#[derive(Debug)]
pub struct Router {
    available: RwLock<Arc<[QueueIndex]>>,
    counter: Mutex<u64>,
}

impl Router {
    /// Creates a router with the given initial available set.
    pub fn new(available: impl IntoIterator<Item = QueueIndex>) -> Self {
        Self {
            available: RwLock::new(available.into_iter().collect()),
            counter: Mutex::new(0),
        }
    }

    /// Picks the next queue.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueExhausted`] when no queue is available.
    pub fn route(&self) -> Result<QueueIndex, DispatchError> {
        let mut counter = self.counter.lock();
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Err(DispatchError::QueueExhausted);
        }
        let index = snapshot[(*counter % snapshot.len() as u64) as usize];
        *counter = counter.wrapping_add(1);
        Ok(index)
    }

    /// Atomically replaces the available set. Returns the previous set.
    pub fn replace(&self, available: Vec<QueueIndex>) -> Arc<[QueueIndex]> {
        let next: Arc<[QueueIndex]> = available.into();
        std::mem::replace(&mut *self.available.write(), next)
    }

    /// Current available set.
    pub fn snapshot(&self) -> Arc<[QueueIndex]> {
        self.available.read().clone()
    }

    pub fn available_count(&self) -> usize {
        self.available.read().len()
    }
}
