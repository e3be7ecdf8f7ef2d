//! Shared scaling state
//!
//! One `ScalingState` lives for the whole process and is handed to the
//! sampler, the engine, the actuators and the router. Capacity values are
//! atomics that are only stored while the scaling lock is held; readers load
//! them without the lock and always observe a whole committed value, which
//! may lag an operation that is still provisioning.

use crate::models::ScalingStrategy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Fields that must only be touched under the scaling lock
#[derive(Debug, Default)]
struct Control {
    in_progress: bool,
    last_action_taken: bool,
    last_window: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    strategy: ScalingStrategy,
    replicas: AtomicU32,
    cpu_quota_bits: AtomicU64,
    control: Mutex<Control>,
}

/// Serialisable view of the scaling state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingSnapshot {
    pub strategy: ScalingStrategy,
    pub replicas: u32,
    pub cpu_quota: f64,
    pub scaling_in_progress: bool,
    pub last_action_taken: bool,
    pub last_window: Option<u64>,
}

/// Cloneable handle to the process-wide scaling state
#[derive(Debug, Clone)]
pub struct ScalingState {
    inner: Arc<Inner>,
}

impl ScalingState {
    /// Initial state: one replica, one CPU, nothing in flight
    pub fn new(strategy: ScalingStrategy) -> Self {
        Self::with_capacity(strategy, 1, 1.0)
    }

    pub fn with_capacity(strategy: ScalingStrategy, replicas: u32, cpu_quota: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                strategy,
                replicas: AtomicU32::new(replicas.max(1)),
                cpu_quota_bits: AtomicU64::new(cpu_quota.max(1.0).to_bits()),
                control: Mutex::new(Control::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        // The guarded section never panics midway, so a poisoned lock still
        // holds consistent data.
        self.inner
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn strategy(&self) -> ScalingStrategy {
        self.inner.strategy
    }

    pub fn replicas(&self) -> u32 {
        self.inner.replicas.load(Ordering::Acquire)
    }

    pub fn cpu_quota(&self) -> f64 {
        f64::from_bits(self.inner.cpu_quota_bits.load(Ordering::Acquire))
    }

    pub fn is_scaling(&self) -> bool {
        self.lock().in_progress
    }

    pub fn last_action_taken(&self) -> bool {
        self.lock().last_action_taken
    }

    pub fn snapshot(&self) -> ScalingSnapshot {
        let control = self.lock();
        ScalingSnapshot {
            strategy: self.strategy(),
            replicas: self.replicas(),
            cpu_quota: self.cpu_quota(),
            scaling_in_progress: control.in_progress,
            last_action_taken: control.last_action_taken,
            last_window: control.last_window,
        }
    }

    /// Claim the single scaling slot, `None` if an operation is already running
    pub fn try_begin(&self) -> Option<InFlight<'_>> {
        let mut control = self.lock();
        if control.in_progress {
            return None;
        }
        control.in_progress = true;
        Some(InFlight {
            state: self,
            finished: false,
        })
    }

    /// Mark `window` as evaluated, `false` if it already was
    pub(crate) fn begin_window(&self, window: u64) -> bool {
        let mut control = self.lock();
        if control.last_window.is_some_and(|last| window <= last) {
            return false;
        }
        control.last_window = Some(window);
        true
    }

    pub(crate) fn record_action(&self, acted: bool) {
        self.lock().last_action_taken = acted;
    }
}

/// Ownership of the single scaling slot
///
/// Committing stores the new capacity and releases the slot under one lock
/// acquisition. Dropping without committing releases the slot and leaves the
/// capacity untouched, which covers failed and cancelled operations.
#[derive(Debug)]
pub struct InFlight<'a> {
    state: &'a ScalingState,
    finished: bool,
}

impl InFlight<'_> {
    pub fn commit_replicas(mut self, replicas: u32) {
        let state = self.state;
        let mut control = state.lock();
        state
            .inner
            .replicas
            .store(replicas.max(1), Ordering::Release);
        control.in_progress = false;
        self.finished = true;
    }

    pub fn commit_cpu_quota(mut self, cpu_quota: f64) {
        let state = self.state;
        let mut control = state.lock();
        state
            .inner
            .cpu_quota_bits
            .store(cpu_quota.max(1.0).to_bits(), Ordering::Release);
        control.in_progress = false;
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.lock().in_progress = false;
        }
    }
}
