//! Host-side timeline semaphore emulation.
//!
//! Each semaphore the application created as `TIMELINE` is backed by a plain
//! driver binary semaphore for the handle's sake; the 64-bit payload lives
//! entirely here as an [`Arc<TimelineState>`] guarded by a mutex/condvar
//! pair. Signals advance the payload monotonically and wake every waiter;
//! waiters either block on the condvar or poll through [`WaitPoint`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use vkshim_types::sync::{SemaphoreSignalInfo, SemaphoreWaitInfo};

use crate::error::{ShimError, ShimResult};

struct TimelineInner {
    current: u64,
    /// Targets of waits currently parked on this timeline, for diagnostics
    /// and teardown checks.
    pending_waits: Vec<u64>,
}

/// One emulated timeline. Shared by the registry, in-flight wait points, and
/// the completion watcher.
pub struct TimelineState {
    inner: Mutex<TimelineInner>,
    cond: Condvar,
}

impl TimelineState {
    fn new(initial_value: u64) -> Self {
        Self {
            inner: Mutex::new(TimelineInner {
                current: initial_value,
                pending_waits: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    pub fn value(&self) -> u64 {
        self.inner.lock().current
    }

    pub fn pending_wait_count(&self) -> usize {
        self.inner.lock().pending_waits.len()
    }

    /// Advances the payload. The value must strictly increase; an equal or
    /// smaller value is rejected without waking anyone.
    pub fn signal(&self, value: u64) -> ShimResult<()> {
        {
            let mut inner = self.inner.lock();
            if value <= inner.current {
                return Err(ShimError::Validation(
                    "timeline signal value must be strictly increasing",
                ));
            }
            inner.current = value;
        }
        self.cond.notify_all();
        Ok(())
    }
}

/// A registered wait for one timeline to reach a target value. Pollable via
/// [`WaitPoint::is_satisfied`], blockable via [`WaitPoint::wait_until`];
/// dropping it cancels the registration either way.
pub struct WaitPoint {
    state: Arc<TimelineState>,
    target: u64,
}

impl WaitPoint {
    pub fn new(state: Arc<TimelineState>, target: u64) -> Self {
        state.inner.lock().pending_waits.push(target);
        Self { state, target }
    }

    pub fn is_satisfied(&self) -> bool {
        self.state.value() >= self.target
    }

    /// Blocks until the target is reached or `deadline` passes. `None`
    /// waits forever.
    pub fn wait_until(&self, deadline: Option<Instant>) -> ShimResult<()> {
        let mut inner = self.state.inner.lock();
        while inner.current < self.target {
            match deadline {
                None => self.state.cond.wait(&mut inner),
                Some(deadline) => {
                    if self.state.cond.wait_until(&mut inner, deadline).timed_out() {
                        if inner.current >= self.target {
                            break;
                        }
                        return Err(ShimError::Timeout);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for WaitPoint {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        if let Some(pos) = inner.pending_waits.iter().position(|t| *t == self.target) {
            inner.pending_waits.swap_remove(pos);
        }
    }
}

/// Registry of emulated timelines, keyed by the driver semaphore handle the
/// application holds.
#[derive(Default)]
pub struct TimelineSemaphores {
    states: DashMap<vk::Semaphore, Arc<TimelineState>>,
}

impl TimelineSemaphores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, semaphore: vk::Semaphore, initial_value: u64) {
        debug!(?semaphore, initial_value, "registered timeline semaphore");
        self.states
            .insert(semaphore, Arc::new(TimelineState::new(initial_value)));
    }

    pub fn unregister(&self, semaphore: vk::Semaphore) -> Option<Arc<TimelineState>> {
        self.states.remove(&semaphore).map(|(_, state)| {
            let pending = state.pending_wait_count();
            if pending > 0 {
                warn!(?semaphore, pending, "destroying timeline semaphore with parked waits");
            }
            state
        })
    }

    pub fn state(&self, semaphore: vk::Semaphore) -> Option<Arc<TimelineState>> {
        self.states.get(&semaphore).map(|s| s.clone())
    }

    pub fn query(&self, semaphore: vk::Semaphore) -> ShimResult<u64> {
        self.state(semaphore)
            .map(|s| s.value())
            .ok_or(ShimError::Initialization(
                "counter query on a semaphore with no emulated timeline",
            ))
    }

    pub fn signal(&self, info: &SemaphoreSignalInfo) -> ShimResult<()> {
        let state = self
            .state(info.semaphore)
            .ok_or(ShimError::Initialization(
                "signal on a semaphore with no emulated timeline",
            ))?;
        state.signal(info.value)
    }

    /// Waits for every (semaphore, value) pair, sequentially, against one
    /// shared deadline. A pair already at or past its target never blocks.
    pub fn wait(&self, info: &SemaphoreWaitInfo, timeout: Option<Duration>) -> ShimResult<()> {
        if info.semaphores.is_empty() {
            return Ok(());
        }
        if info.semaphores.len() != info.values.len() {
            return Err(ShimError::Validation(
                "semaphore wait needs one value per semaphore",
            ));
        }
        if info.flags.contains(vk::SemaphoreWaitFlags::ANY) {
            warn!("wait-any is not supported, waiting for all semaphores");
        }

        // A deadline past what Instant can represent means wait forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        for (semaphore, target) in info.semaphores.iter().zip(&info.values) {
            let state = self.state(*semaphore).ok_or(ShimError::Initialization(
                "wait on a semaphore with no emulated timeline",
            ))?;
            if state.value() >= *target {
                continue;
            }
            let point = WaitPoint::new(state, *target);
            point.wait_until(deadline)?;
        }
        Ok(())
    }
}
