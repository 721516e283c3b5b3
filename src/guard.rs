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

//! Recipient idempotency guard.
//!
//! A recipient is claimed from the moment its request is accepted until the
//! request settles. A successful disbursement keeps the claim forever; a
//! failed one releases it so the recipient may ask again.

use crate::base::Recipient;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Claim state of a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// A request for the recipient is queued or in flight.
    Pending,
    /// The recipient has been paid; the claim is permanent.
    Completed,
}

/// Thread-safe claim registry keyed by recipient.
///
/// Uses the [`DashMap`] entry API so test-and-set is one atomic step
/// relative to every other claim on the same key.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    claims: DashMap<Recipient, ClaimState>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self {
            claims: DashMap::new(),
        }
    }

    /// Claims `recipient` if nobody holds it. Returns `false` when the
    /// recipient is already pending or completed.
    pub fn try_claim(&self, recipient: &Recipient) -> bool {
        match self.claims.entry(recipient.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(ClaimState::Pending);
                true
            }
        }
    }

    /// Clears a pending claim after a failed disbursement.
    ///
    /// Completed claims are never released.
    pub fn release(&self, recipient: &Recipient) {
        self.claims
            .remove_if(recipient, |_, state| *state == ClaimState::Pending);
    }

    /// Marks a claim as permanently completed.
    pub fn complete(&self, recipient: &Recipient) {
        if let Some(mut state) = self.claims.get_mut(recipient) {
            *state = ClaimState::Completed;
        }
    }

    pub fn state(&self, recipient: &Recipient) -> Option<ClaimState> {
        self.claims.get(recipient).map(|state| *state)
    }

    pub fn is_claimed(&self, recipient: &Recipient) -> bool {
        self.claims.contains_key(recipient)
    }

    /// Number of recipients currently claimed (pending or completed).
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
