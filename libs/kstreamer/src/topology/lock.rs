// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Global topology lock.
//!
//! One writer at a time may change the graph structure. A requester either
//! holds the lock explicitly (LOCK/TRYLOCK until UNLOCK, bounded by the
//! watchdog) or implicitly for the duration of a single write request.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::error::{KsError, Result};
use crate::transport::PortId;

/// Current holder of the topology lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHolder {
    /// Explicit LOCK/TRYLOCK by this requester.
    Owner(PortId),
    /// Implicit hold for a single request from this requester.
    Implicit(PortId),
}

impl LockHolder {
    pub fn port(&self) -> PortId {
        match self {
            Self::Owner(port) | Self::Implicit(port) => *port,
        }
    }
}

type ReleaseListener = Box<dyn Fn() + Send + Sync>;

struct LockState {
    holder: Option<LockHolder>,
    /// Watchdog deadline of an explicit hold.
    deadline: Option<Instant>,
    shutdown: bool,
}

struct LockShared {
    state: Mutex<LockState>,
    cond: Condvar,
    window: Duration,
    listeners: RwLock<Vec<ReleaseListener>>,
}

impl LockShared {
    fn run_listeners(&self) {
        for listener in self.listeners.read().iter() {
            listener();
        }
    }
}

/// The global single-writer lock with its watchdog thread.
pub struct TopologyLock {
    shared: Arc<LockShared>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl TopologyLock {
    /// Create the lock; an explicit hold is force-released after `window`.
    pub fn new(window: Duration) -> Result<Self> {
        let shared = Arc::new(LockShared {
            state: Mutex::new(LockState {
                holder: None,
                deadline: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
            window,
            listeners: RwLock::new(Vec::new()),
        });

        let watchdog_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("ks-lock-watchdog".to_string())
            .spawn(move || watchdog_loop(watchdog_shared))?;

        Ok(Self {
            shared,
            watchdog: Mutex::new(Some(handle)),
        })
    }

    pub fn watchdog_window(&self) -> Duration {
        self.shared.window
    }

    /// Run `listener` every time the lock becomes free.
    pub fn on_release(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared.listeners.write().push(Box::new(listener));
    }

    pub fn holder(&self) -> Option<LockHolder> {
        self.shared.state.lock().holder
    }

    /// Explicit owner, if any.
    pub fn owner(&self) -> Option<PortId> {
        match self.holder() {
            Some(LockHolder::Owner(port)) => Some(port),
            _ => None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Block until `owner` holds the lock explicitly.
    ///
    /// Re-locking by the current owner re-arms the watchdog.
    pub fn lock(&self, owner: PortId) -> Result<()> {
        let mut state = self.shared.state.lock();
        while !acquirable(&state, owner) {
            if state.shutdown {
                return Err(KsError::Unavailable("topology lock shut down".into()));
            }
            self.shared.cond.wait(&mut state);
        }
        self.grant(&mut state, owner);
        Ok(())
    }

    /// Like [`lock`](Self::lock) but gives up with TIMED_OUT after `timeout`.
    pub fn lock_timeout(&self, owner: PortId, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !acquirable(&state, owner) {
            if state.shutdown {
                return Err(KsError::Unavailable("topology lock shut down".into()));
            }
            if self.shared.cond.wait_until(&mut state, deadline).timed_out()
                && !acquirable(&state, owner)
            {
                return Err(KsError::TimedOut(format!(
                    "topology lock not acquired by {} within {:?}",
                    owner, timeout
                )));
            }
        }
        self.grant(&mut state, owner);
        Ok(())
    }

    /// Take the lock for `owner` or fail with BUSY.
    pub fn try_lock(&self, owner: PortId) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !acquirable(&state, owner) {
            return Err(KsError::Busy(describe_holder(state.holder)));
        }
        self.grant(&mut state, owner);
        Ok(())
    }

    /// Release an explicit hold by `owner`.
    pub fn unlock(&self, owner: PortId) -> Result<()> {
        let state = self.shared.state.lock();
        let holder = state.holder;
        match holder {
            None => Err(KsError::NotFound("topology lock is not held".into())),
            Some(LockHolder::Owner(port)) if port == owner => {
                tracing::info!("[Topology] Lock released by {}", owner);
                self.release(state);
                Ok(())
            }
            Some(holder) => Err(KsError::Invalid(format!(
                "{} cannot unlock, {}",
                owner,
                describe_holder(Some(holder))
            ))),
        }
    }

    /// Take the lock for one request of `requester` without blocking.
    ///
    /// Fails with AGAIN while someone else holds it. When `requester` is the
    /// explicit owner the hold is nested and releases nothing.
    pub fn acquire_implicit(&self, requester: PortId) -> Result<ImplicitHold<'_>> {
        let mut state = self.shared.state.lock();
        let holder = state.holder;
        match holder {
            Some(LockHolder::Owner(port)) if port == requester => Ok(ImplicitHold {
                lock: self,
                nested: true,
            }),
            Some(holder) => Err(KsError::Again(describe_holder(Some(holder)))),
            None => {
                state.holder = Some(LockHolder::Implicit(requester));
                Ok(ImplicitHold {
                    lock: self,
                    nested: false,
                })
            }
        }
    }

    /// Like [`acquire_implicit`](Self::acquire_implicit) but waits up to
    /// `timeout` for the lock to become free.
    pub fn acquire_implicit_timeout(
        &self,
        requester: PortId,
        timeout: Duration,
    ) -> Result<ImplicitHold<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.acquire_implicit(requester) {
                Err(KsError::Again(reason)) => {
                    let mut state = self.shared.state.lock();
                    if state.holder.is_none() {
                        continue;
                    }
                    if state.shutdown {
                        return Err(KsError::Unavailable("topology lock shut down".into()));
                    }
                    if self.shared.cond.wait_until(&mut state, deadline).timed_out()
                        && state.holder.is_some()
                    {
                        return Err(KsError::Again(reason));
                    }
                }
                other => return other,
            }
        }
    }

    fn grant(&self, state: &mut LockState, owner: PortId) {
        if state.holder != Some(LockHolder::Owner(owner)) {
            tracing::info!("[Topology] Lock acquired by {}", owner);
        }
        state.holder = Some(LockHolder::Owner(owner));
        state.deadline = Some(Instant::now() + self.shared.window);
        // Wake the watchdog so it picks up the new deadline.
        self.shared.cond.notify_all();
    }

    fn release(&self, mut state: MutexGuard<'_, LockState>) {
        state.holder = None;
        state.deadline = None;
        self.shared.cond.notify_all();
        drop(state);
        self.shared.run_listeners();
    }

    fn release_implicit(&self) {
        let state = self.shared.state.lock();
        if matches!(state.holder, Some(LockHolder::Implicit(_))) {
            self.release(state);
        }
    }
}

impl Drop for TopologyLock {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.watchdog.lock().take() {
            // A release listener may drop the last reference on the watchdog thread.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Implicit hold of the topology lock; released on drop.
#[must_use = "the implicit hold is released when dropped"]
pub struct ImplicitHold<'a> {
    lock: &'a TopologyLock,
    nested: bool,
}

impl ImplicitHold<'_> {
    /// The requester already held the lock explicitly.
    pub fn is_nested(&self) -> bool {
        self.nested
    }
}

impl Drop for ImplicitHold<'_> {
    fn drop(&mut self) {
        if !self.nested {
            self.lock.release_implicit();
        }
    }
}

fn acquirable(state: &LockState, requester: PortId) -> bool {
    match state.holder {
        None => true,
        Some(LockHolder::Owner(port)) => port == requester,
        Some(LockHolder::Implicit(_)) => false,
    }
}

fn describe_holder(holder: Option<LockHolder>) -> String {
    match holder {
        None => "topology lock is free".to_string(),
        Some(LockHolder::Owner(port)) => format!("topology lock held by {}", port),
        Some(LockHolder::Implicit(port)) => {
            format!("topology lock held for a request from {}", port)
        }
    }
}

fn watchdog_loop(shared: Arc<LockShared>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                let holder = state.holder.take();
                state.deadline = None;
                tracing::warn!(
                    "[Topology] Lock watchdog expired, force-releasing {}",
                    holder
                        .map(|h| h.port().to_string())
                        .unwrap_or_else(|| "(none)".to_string())
                );
                shared.cond.notify_all();
                MutexGuard::unlocked(&mut state, || shared.run_listeners());
            }
            Some(deadline) => {
                shared.cond.wait_until(&mut state, deadline);
            }
            None => shared.cond.wait(&mut state),
        }
    }
}
