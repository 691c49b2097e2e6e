//! The process registry: which service is backed by which child process.
//!
//! The registry owns the supervision lock. Every accessor lives on
//! [`RegistryGuard`], so the only way to read or change an entry is to hold the
//! lock, and callers keep the guard for the whole logical operation.

use std::{
    collections::HashMap,
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use nix::{errno::Errno, sys::signal, unistd::Pid};
use tracing::warn;

use crate::definition::ServiceDefinition;

/// How a managed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with the given code.
    Code(i32),
    /// Killed by the given signal number.
    Signal(i32),
    /// Collected by someone else (the reaper won the race); status unknown.
    Unknown,
}

impl ExitOutcome {
    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Code(code) => Some(*code),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }
}

/// One-shot notification of a child's exit, shared between its watcher thread
/// and whoever is waiting for it to go away.
#[derive(Debug, Clone, Default)]
pub struct ExitWatch {
    inner: Arc<(Mutex<Option<ExitOutcome>>, Condvar)>,
}

impl ExitWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome and wakes every waiter. Later calls are ignored.
    pub fn record(&self, outcome: ExitOutcome) {
        let (slot, condvar) = &*self.inner;
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(outcome);
        }
        condvar.notify_all();
    }

    /// Outcome if the exit has already been observed.
    pub fn observed(&self) -> Option<ExitOutcome> {
        let (slot, _) = &*self.inner;
        *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until the exit is observed or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitOutcome> {
        let (slot, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        while guard.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = match condvar.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        *guard
    }
}

/// A child process launched for a service.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub service: String,
    pub pid: u32,
    /// Distinguishes successive launches of the same service.
    pub generation: u64,
    /// Definition snapshot the process was launched from.
    pub definition: ServiceDefinition,
    /// Restarts still allowed if this process exits.
    pub remaining_attempts: u32,
    pub exit: ExitWatch,
}

impl ManagedProcess {
    /// Two-step liveness check: the exit must not have been observed and the
    /// PID must still answer a signal-0 probe.
    pub fn is_alive(&self) -> bool {
        if self.exit.observed().is_some() {
            return false;
        }

        match signal::kill(Pid::from_raw(self.pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Shared table of managed processes keyed by service name.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    entries: Arc<Mutex<HashMap<String, ManagedProcess>>>,
    generations: Arc<AtomicU64>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the supervision lock.
    ///
    /// A poisoned lock is recovered: every mutation is a single map operation,
    /// so the table is consistent even if a previous holder panicked.
    pub fn lock(&self) -> RegistryGuard<'_> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Process registry lock was poisoned; recovering");
            poisoned.into_inner()
        });
        RegistryGuard { entries }
    }

    /// Allocates a generation number for a new launch.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Exclusive access to the registry for the duration of one operation.
pub struct RegistryGuard<'a> {
    entries: MutexGuard<'a, HashMap<String, ManagedProcess>>,
}

impl RegistryGuard<'_> {
    pub fn get(&self, service: &str) -> Option<&ManagedProcess> {
        self.entries.get(service)
    }

    /// Registers `process` under `service`, returning the entry it replaced.
    pub fn set(&mut self, service: &str, process: ManagedProcess) -> Option<ManagedProcess> {
        self.entries.insert(service.to_string(), process)
    }

    pub fn remove(&mut self, service: &str) -> Option<ManagedProcess> {
        self.entries.remove(service)
    }

    /// Whether `service` is still backed by the launch identified by `generation`.
    pub fn is_current(&self, service: &str, generation: u64) -> bool {
        self.entries
            .get(service)
            .is_some_and(|process| process.generation == generation)
    }

    /// Names of every registered service, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
