// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential refresh.
//!
//! [`RefreshCoordinator`] is an `Idle`/`Refreshing` state machine guarding a
//! FIFO queue of continuations. The first caller to subscribe while `Idle`
//! owns the cycle and must run the exchange; everyone else queues behind it.
//! [`RefreshCoordinator::resolve`] hands one outcome to every subscriber in
//! arrival order and returns the machine to `Idle`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::credential::CredentialSet;
use crate::envelope::{unwrap_data, RefreshRequest, TokenPayload};
use crate::error::ApiError;

/// New access token, or the failure every blocked caller receives.
pub type RefreshOutcome = Result<String, ApiError>;

/// A queued caller waiting for the current refresh cycle.
pub type Subscriber = Box<dyn FnOnce(RefreshOutcome) + Send>;

/// Result of subscribing to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Caller started a new cycle and must drive the exchange.
    Owner,
    /// A cycle was already in flight; the subscriber is queued.
    Queued,
    /// Credentials changed since the caller's failed attempt; no refresh needed.
    Fresh(String),
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: VecDeque<Subscriber>,
        /// Callers of [`RefreshCoordinator::settled`]; not refresh subscribers.
        settlers: Vec<oneshot::Sender<()>>,
    },
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    cycles: AtomicU64,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self { state: Mutex::new(RefreshState::Idle), cycles: AtomicU64::new(0) }
    }

    /// Queue `subscriber`, starting a cycle if none is in flight.
    pub fn subscribe(&self, subscriber: Subscriber) -> Admission {
        self.subscribe_unless(|| None, subscriber)
    }

    /// Like [`subscribe`](Self::subscribe), but when `Idle` first asks `fresh`
    /// whether a newer token is already available. If so the subscriber is
    /// dropped and no cycle starts.
    ///
    /// `fresh` runs inside the state lock and must not block.
    pub fn subscribe_unless(
        &self,
        fresh: impl FnOnce() -> Option<String>,
        subscriber: Subscriber,
    ) -> Admission {
        let mut state = self.state.lock();
        match &mut *state {
            RefreshState::Refreshing { waiters, .. } => {
                waiters.push_back(subscriber);
                tracing::debug!(waiters = waiters.len(), "queued behind in-flight refresh");
                Admission::Queued
            }
            RefreshState::Idle => {
                if let Some(token) = fresh() {
                    return Admission::Fresh(token);
                }
                let mut waiters = VecDeque::new();
                waiters.push_back(subscriber);
                *state = RefreshState::Refreshing { waiters, settlers: Vec::new() };
                self.cycles.fetch_add(1, Ordering::Relaxed);
                Admission::Owner
            }
        }
    }

    /// Subscribe with a oneshot channel as the continuation.
    pub fn join(
        &self,
        fresh: impl FnOnce() -> Option<String>,
    ) -> (Admission, oneshot::Receiver<RefreshOutcome>) {
        let (tx, rx) = oneshot::channel();
        let admission = self.subscribe_unless(
            fresh,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        (admission, rx)
    }

    /// End the current cycle: back to `Idle`, then resume every subscriber
    /// in FIFO order with a clone of `outcome`. Returns how many were resumed.
    pub fn resolve(&self, outcome: RefreshOutcome) -> usize {
        let (waiters, settlers) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters, settlers } => (waiters, settlers),
                RefreshState::Idle => (VecDeque::new(), Vec::new()),
            }
        };
        let count = waiters.len();
        tracing::debug!(waiters = count, ok = outcome.is_ok(), "refresh cycle resolved");
        for resume in waiters {
            resume(outcome.clone());
        }
        for tx in settlers {
            let _ = tx.send(());
        }
        count
    }

    /// Wait for an in-flight cycle to finish. Returns immediately when `Idle`.
    ///
    /// Settle waiters are not refresh subscribers and do not count towards
    /// [`pending`](Self::pending).
    pub async fn settled(&self) {
        let (tx, rx) = oneshot::channel::<()>();
        let queued = {
            let mut state = self.state.lock();
            match &mut *state {
                RefreshState::Refreshing { settlers, .. } => {
                    settlers.push(tx);
                    true
                }
                RefreshState::Idle => false,
            }
        };
        if queued {
            let _ = rx.await;
        }
    }

    /// Run `f` under the state lock if no cycle is in flight.
    ///
    /// Returns `None` while `Refreshing`. No cycle can start while `f` runs,
    /// so writes made by `f` never interleave with a refresh.
    pub fn while_idle<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.lock();
        match *state {
            RefreshState::Idle => Some(f()),
            RefreshState::Refreshing { .. } => None,
        }
    }

    /// Wait out any in-flight cycle, then run `f` with no cycle able to start.
    pub async fn when_idle<R>(&self, mut f: impl FnMut() -> R) -> R {
        loop {
            self.settled().await;
            if let Some(result) = self.while_idle(&mut f) {
                return result;
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of subscribers queued on the current cycle (including the owner).
    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Total number of cycles started.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

/// Exchange a refresh token for a new credential set (`PUT <refresh-endpoint>`).
pub async fn exchange(
    http: &reqwest::Client,
    url: &str,
    refresh_token: &str,
    csrf_token: Option<&str>,
) -> Result<CredentialSet, ApiError> {
    let mut req =
        http.put(url).json(&RefreshRequest { refresh_token: refresh_token.to_owned() });
    if let Some(token) = csrf_token {
        req = req.header(crate::csrf::CSRF_HEADER, token);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::from_response(status.as_u16(), &body));
    }

    let data = unwrap_data(&body)
        .map_err(|e| ApiError::transport(format!("invalid refresh response: {e}")))?;
    let payload: TokenPayload = serde_json::from_value(data)
        .map_err(|e| ApiError::transport(format!("invalid refresh payload: {e}")))?;
    Ok(payload.into())
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
