//! Zombie reaper.
//!
//! Services may leave orphaned grandchildren behind, and in a container the
//! supervisor is frequently PID 1, so those orphans end up as our children.
//! Nobody else waits for them; this loop does.
use std::{
    sync::{
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::wait::{WaitPidFlag, WaitStatus, waitpid},
    unistd::Pid,
};
use tracing::{debug, info, warn};

/// Serializes process spawning against reaper passes.
///
/// `Command::spawn` waits for a child whose exec failed and panics if that
/// child was already collected. Spawners hold the gate shared; a reaper pass
/// holds it exclusively, so a half-spawned child is never waited for twice.
#[derive(Debug, Clone, Default)]
pub struct SpawnGate {
    lock: Arc<RwLock<()>>,
}

impl SpawnGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held for the duration of a `Command::spawn` call.
    pub fn spawning(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Held for the duration of a reaper pass.
    pub fn reaping(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Collects every terminated child that is ready, without blocking.
///
/// Returns the number of children reaped. A tracked service's watcher may lose
/// its exit status to this call; the watcher then reports an unknown outcome.
/// While other threads may be spawning, call this under [`SpawnGate::reaping`].
pub fn reap_available() -> usize {
    let mut reaped = 0;

    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    info!("Reaped zombie process PID: {pid} ({status:?})");
                }
                reaped += 1;
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(err) => {
                warn!("Reaper wait failed: {err}");
                break;
            }
        }
    }

    reaped
}

/// Background thread running [`reap_available`] on a fixed interval.
pub struct Reaper {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Reaper {
    /// Starts the reaper thread. Passes are excluded from spawns through `gate`.
    pub fn spawn(interval: Duration, gate: SpawnGate) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::spawn(move || {
            debug!("Zombie reaper started (interval {:?})", interval);
            while flag.load(Ordering::SeqCst) {
                {
                    let _reaping = gate.reaping();
                    reap_available();
                }
                thread::sleep(interval);
            }
            debug!("Zombie reaper terminating.");
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Stops the reaper and waits for its thread to finish.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
