//! Supervision engine: launches services, watches them and applies restart policies.
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::{
    io,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, Timings},
    definition::{RestartPolicy, ServiceDefinition, UnitResolver},
    enablement::EnablementStore,
    error::UnitError,
    reaper::SpawnGate,
    registry::{ExitOutcome, ExitWatch, ManagedProcess, ProcessRegistry, RegistryGuard},
};

/// Answer to a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Running,
    Exited,
}

/// What the engine does after a managed process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch after the settle delay with the given remaining budget.
    Restart { remaining: u32 },
    /// The restart policy says the exit was expected.
    Suppressed,
    /// The policy wanted a restart but the budget is spent.
    Exhausted,
}

/// Applies a restart policy to an observed exit.
///
/// Only `on-failure` combined with exit code 0 suppresses a restart. Every other
/// combination, including services without a policy, spends one unit of budget.
pub fn restart_decision(
    policy: RestartPolicy,
    outcome: ExitOutcome,
    remaining_attempts: u32,
) -> RestartDecision {
    if policy == RestartPolicy::OnFailure && outcome.success() {
        return RestartDecision::Suppressed;
    }

    if remaining_attempts == 0 {
        return RestartDecision::Exhausted;
    }

    RestartDecision::Restart {
        remaining: remaining_attempts - 1,
    }
}

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    AlreadyExited,
    Graceful(ExitOutcome),
    Forced,
}

/// Messages processed by the monitor thread.
#[derive(Debug)]
enum SupervisorEvent {
    /// A watcher observed its child exit.
    Exited {
        service: String,
        generation: u64,
        outcome: ExitOutcome,
    },
    /// The settle delay of a pending restart elapsed.
    RestartDue { service: String, generation: u64 },
    Shutdown,
}

/// Manages services, ensuring they start, stop, and restart as needed.
#[derive(Clone)]
pub struct Daemon {
    /// Running processes; also the supervision lock.
    registry: ProcessRegistry,
    units: UnitResolver,
    enablement: EnablementStore,
    timings: Timings,
    boot_skip: Arc<Vec<String>>,
    events: Sender<SupervisorEvent>,
    spawn_gate: SpawnGate,
    /// Handle to the background monitor thread.
    monitor_handle: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
}

impl Daemon {
    /// Builds the engine from configuration and starts its monitor thread.
    pub fn new(config: &Config) -> Result<Self, UnitError> {
        let timings = config.timings()?;
        Ok(Self::with_parts(
            ProcessRegistry::new(),
            UnitResolver::new(
                &config.user_unit_dir,
                &config.system_unit_dir,
                &config.default_working_directory,
            ),
            EnablementStore::new(&config.enablement_dir),
            timings,
            config.boot_skip.clone(),
        ))
    }

    /// Assembles the engine from explicit parts and starts its monitor thread.
    pub fn with_parts(
        registry: ProcessRegistry,
        units: UnitResolver,
        enablement: EnablementStore,
        timings: Timings,
        boot_skip: Vec<String>,
    ) -> Self {
        debug!("Initializing daemon...");
        let (events, receiver) = mpsc::channel();
        let daemon = Self {
            registry,
            units,
            enablement,
            timings,
            boot_skip: Arc::new(boot_skip),
            events,
            spawn_gate: SpawnGate::new(),
            monitor_handle: Arc::new(Mutex::new(None)),
        };
        daemon.spawn_monitor_thread(receiver);
        daemon
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Gate a zombie reaper must share with this engine.
    pub fn spawn_gate(&self) -> &SpawnGate {
        &self.spawn_gate
    }

    pub fn units(&self) -> &UnitResolver {
        &self.units
    }

    pub fn enablement(&self) -> &EnablementStore {
        &self.enablement
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Starts (or restarts) a service with the given restart budget.
    ///
    /// A process already registered under the name is terminated first. Returns
    /// the PID of the new process once it has been spawned; it does not wait for
    /// the service to become ready.
    pub fn start(&self, service: &str, attempts: u32) -> Result<u32, UnitError> {
        let mut registry = self.registry.lock();
        self.start_locked(&mut registry, service, attempts)
    }

    /// Restarts a service with a fresh restart budget.
    pub fn restart(&self, service: &str) -> Result<u32, UnitError> {
        self.start(service, self.timings.restart_attempts)
    }

    fn start_locked(
        &self,
        registry: &mut RegistryGuard<'_>,
        service: &str,
        attempts: u32,
    ) -> Result<u32, UnitError> {
        info!("Starting service: {service} (attempts: {attempts})");

        let (path, definition) = self.units.load(service).inspect_err(|err| {
            error!("Failed to load service '{service}': {err}");
        })?;
        debug!("Resolved '{service}' to {:?}", path);

        if let Some(existing) = registry.remove(service) {
            info!(
                "Terminating existing service process: {service} (PID: {})",
                existing.pid
            );
            self.terminate(&existing);
        }

        let process = self.launch(service, definition, attempts)?;
        let pid = process.pid;
        registry.set(service, process);
        Ok(pid)
    }

    /// Spawns the service in its own session and attaches an exit watcher.
    fn launch(
        &self,
        service: &str,
        definition: ServiceDefinition,
        attempts: u32,
    ) -> Result<ManagedProcess, UnitError> {
        debug!(
            "Launching service: '{service}' with command: `{}` in {:?}",
            definition.command_line(),
            definition.working_directory
        );

        let mut cmd = Command::new(&definition.executable);
        cmd.args(&definition.arguments)
            .current_dir(&definition.working_directory)
            .stdin(Stdio::null());

        unsafe {
            cmd.pre_exec(|| {
                // A new session makes the child a process group leader, so the
                // whole service tree can be signalled at once.
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let spawned = {
            let _spawning = self.spawn_gate.spawning();
            cmd.spawn()
        };
        let child = spawned.map_err(|source| {
            error!("Failed to start service '{service}': {source}");
            UnitError::LaunchFailure {
                service: service.to_string(),
                source,
            }
        })?;

        let pid = child.id();
        let generation = self.registry.next_generation();
        let exit = ExitWatch::new();
        info!("Service started successfully: {service} (PID: {pid})");

        self.spawn_watcher(service, generation, child, exit.clone());

        Ok(ManagedProcess {
            service: service.to_string(),
            pid,
            generation,
            definition,
            remaining_attempts: attempts,
            exit,
        })
    }

    /// Waits for `child` on a dedicated thread and reports its exit to the monitor.
    fn spawn_watcher(&self, service: &str, generation: u64, mut child: Child, exit: ExitWatch) {
        let service = service.to_string();
        let events = self.events.clone();

        thread::spawn(move || {
            let outcome = match child.wait() {
                Ok(status) => match (status.code(), status.signal()) {
                    (Some(code), _) => ExitOutcome::Code(code),
                    (None, Some(signal)) => ExitOutcome::Signal(signal),
                    (None, None) => ExitOutcome::Unknown,
                },
                Err(err) => {
                    debug!("Exit status of '{service}' was collected elsewhere: {err}");
                    ExitOutcome::Unknown
                }
            };

            exit.record(outcome);
            if events
                .send(SupervisorEvent::Exited {
                    service: service.clone(),
                    generation,
                    outcome,
                })
                .is_err()
            {
                debug!("Monitor gone; dropping exit of '{service}'");
            }
        });
    }

    /// Stops a running service: SIGTERM, wait for the grace period, then SIGKILL.
    ///
    /// The registry entry is removed whichever way the process went away.
    pub fn stop(&self, service: &str) -> Result<(), UnitError> {
        let mut registry = self.registry.lock();
        let process = registry
            .remove(service)
            .ok_or_else(|| UnitError::NotRunning(service.to_string()))?;

        match self.terminate(&process) {
            Termination::AlreadyExited => {
                debug!("Service '{service}' had already exited");
            }
            Termination::Graceful(outcome) => {
                debug!("Service '{service}' stopped ({outcome:?})");
            }
            Termination::Forced => {
                warn!("Service '{service}' required a forced kill");
            }
        }

        Ok(())
    }

    fn terminate(&self, process: &ManagedProcess) -> Termination {
        if process.exit.observed().is_some() {
            return Termination::AlreadyExited;
        }

        if let Err(err) = signal_process(process, Signal::SIGTERM) {
            warn!("{err}");
        }

        if let Some(outcome) = process.exit.wait_timeout(self.timings.stop_timeout) {
            return Termination::Graceful(outcome);
        }

        warn!(
            "Service '{}' did not exit within {:?}; forcing termination...",
            process.service, self.timings.stop_timeout
        );
        if let Err(err) = signal_process(process, Signal::SIGKILL) {
            error!("{err}");
        }

        Termination::Forced
    }

    /// Reports whether a service's process is alive.
    ///
    /// Unknown units are an error. A registry entry only counts as running if
    /// its PID still answers a liveness probe.
    pub fn status(&self, service: &str) -> Result<ServiceState, UnitError> {
        let registry = self.registry.lock();
        if self.units.resolve(service).is_none() {
            return Err(UnitError::UnitNotFound(service.to_string()));
        }

        let state = match registry.get(service) {
            Some(process) if process.is_alive() => ServiceState::Running,
            _ => ServiceState::Exited,
        };
        Ok(state)
    }

    /// Marks a service to start at boot.
    pub fn enable(&self, service: &str) -> Result<PathBuf, UnitError> {
        let _registry = self.registry.lock();
        let unit_path = self
            .units
            .resolve(service)
            .ok_or_else(|| UnitError::UnitNotFound(service.to_string()))?;
        self.enablement.enable(service, &unit_path)
    }

    /// Removes a service from the boot set.
    pub fn disable(&self, service: &str) -> Result<(), UnitError> {
        let _registry = self.registry.lock();
        self.enablement.disable(service)
    }

    /// Starts every enabled service. Failures are logged, not propagated.
    ///
    /// Returns the number of services that were launched.
    pub fn start_enabled(&self) -> usize {
        let services = match self.enablement.enabled_services(&self.boot_skip) {
            Ok(services) => services,
            Err(err) => {
                error!("Failed to read enabled services: {err}");
                return 0;
            }
        };

        let mut started = 0;
        for service in services {
            match self.start(&service, self.timings.restart_attempts) {
                Ok(_) => started += 1,
                Err(err) => warn!("Failed to auto-start service {service}: {err}"),
            }
        }
        started
    }

    /// Names of every service currently tracked.
    pub fn services(&self) -> Vec<String> {
        self.registry.lock().services()
    }

    fn spawn_monitor_thread(&self, receiver: Receiver<SupervisorEvent>) {
        debug!("Starting service monitoring thread...");
        let daemon = self.clone();
        let handle = thread::spawn(move || daemon.monitor_loop(receiver));

        match self.monitor_handle.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(err) => error!("Failed to record monitor handle: {err}"),
        }
    }

    /// Stops the monitor thread and waits for it. Managed processes keep running
    /// and pending restarts are dropped.
    pub fn shutdown_monitor(&self) {
        let _ = self.events.send(SupervisorEvent::Shutdown);
        let handle = match self.monitor_handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn monitor_loop(&self, receiver: Receiver<SupervisorEvent>) {
        for event in receiver {
            match event {
                SupervisorEvent::Exited {
                    service,
                    generation,
                    outcome,
                } => self.handle_exit(&service, generation, outcome),
                SupervisorEvent::RestartDue {
                    service,
                    generation,
                } => self.handle_restart_due(&service, generation),
                SupervisorEvent::Shutdown => break,
            }
        }

        debug!("Monitor loop terminating.");
    }

    fn handle_exit(&self, service: &str, generation: u64, outcome: ExitOutcome) {
        let mut registry = self.registry.lock();

        let Some(process) = registry.get(service).filter(|p| p.generation == generation) else {
            debug!("Exit of untracked instance of '{service}' ignored ({outcome:?})");
            return;
        };

        info!("Service exited: {service} ({outcome:?})");
        let policy = process.definition.restart_policy;

        match restart_decision(policy, outcome, process.remaining_attempts) {
            RestartDecision::Suppressed => {
                info!("Service {service} exited normally, no restart needed");
                registry.remove(service);
            }
            RestartDecision::Exhausted => {
                warn!("Service {service} has no restart attempts left; giving up");
                registry.remove(service);
            }
            RestartDecision::Restart { remaining } => {
                info!(
                    "Restarting '{service}' in {:?} (remaining attempts: {remaining})",
                    self.timings.restart_delay
                );
                self.schedule_restart(service, generation);
            }
        }
    }

    fn schedule_restart(&self, service: &str, generation: u64) {
        let events = self.events.clone();
        let delay = self.timings.restart_delay;
        let service = service.to_string();

        thread::spawn(move || {
            thread::sleep(delay);
            let _ = events.send(SupervisorEvent::RestartDue {
                service,
                generation,
            });
        });
    }

    fn handle_restart_due(&self, service: &str, generation: u64) {
        let mut registry = self.registry.lock();

        // A stop or an explicit start during the settle delay cancels the restart.
        if !registry.is_current(service, generation) {
            debug!("Pending restart of '{service}' cancelled");
            return;
        }

        let Some(exited) = registry.remove(service) else {
            return;
        };
        let remaining = exited.remaining_attempts.saturating_sub(1);
        info!("Attempting to restart service: {service} (remaining attempts: {remaining})");

        if let Err(err) = self.start_locked(&mut registry, service, remaining) {
            error!("Failed to restart service {service}: {err}");
        }
    }
}

/// Sends `signal` to the service's process group, falling back to the process itself.
fn signal_process(process: &ManagedProcess, signal: Signal) -> Result<(), UnitError> {
    let pid = Pid::from_raw(process.pid as i32);

    match signal::killpg(pid, signal) {
        Ok(()) => {
            debug!(
                "Sent {signal} to process group {pid} for service '{}'",
                process.service
            );
            return Ok(());
        }
        Err(Errno::ESRCH) | Err(Errno::EPERM) => {
            debug!(
                "Process group {pid} of '{}' unavailable; falling back to direct signal",
                process.service
            );
        }
        Err(err) => {
            warn!(
                "Failed to signal process group {pid} of '{}': {err}",
                process.service
            );
        }
    }

    match signal::kill(pid, signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(
                "Service '{}' exited before {signal} could be delivered",
                process.service
            );
            Ok(())
        }
        Err(source) => Err(UnitError::SignalFailure {
            service: process.service.clone(),
            source,
        }),
    }
}
