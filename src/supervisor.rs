//! Resident daemon: control socket server and boot sequence.
use std::{
    fs, io,
    os::unix::{fs::PermissionsExt, net::UnixListener, net::UnixStream},
    path::{Path, PathBuf},
    thread,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, Timings},
    constants::SOCKET_MODE,
    daemon::Daemon,
    error::UnitError,
    ipc::{self, ControlError, ControlRequest, ControlResponse, Operation},
    reaper::Reaper,
};

/// Errors emitted by the resident supervisor runtime.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("failed to set up control socket {path:?}: {source}")]
    Listener {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// What a connection handler does after dispatching a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Write this response and close the connection.
    Reply(ControlResponse),
    /// Terminate the daemon process.
    Exit,
}

/// Long-lived daemon that answers control commands on the unix socket.
#[derive(Clone)]
pub struct Supervisor {
    daemon: Daemon,
    socket_path: PathBuf,
    timings: Timings,
}

impl Supervisor {
    /// Creates a supervisor and its engine from configuration.
    pub fn new(config: &Config) -> Result<Self, SupervisorError> {
        let daemon = Daemon::new(config)?;
        Ok(Self::with_daemon(daemon, config.socket_path.clone()))
    }

    /// Wraps an existing engine.
    pub fn with_daemon(daemon: Daemon, socket_path: PathBuf) -> Self {
        let timings = daemon.timings();
        Self {
            daemon,
            socket_path,
            timings,
        }
    }

    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the daemon: bind the socket, start enabled services, serve forever.
    ///
    /// Returns only if the listener fails.
    pub fn run(&self) -> Result<(), SupervisorError> {
        let listener = self.bind()?;
        self.install_shutdown_handler()?;
        let _reaper = Reaper::spawn(
            self.timings.reaper_interval,
            self.daemon.spawn_gate().clone(),
        );

        let started = self.daemon.start_enabled();
        info!("Started {started} enabled service(s)");

        info!("unitd listening on {:?}", self.socket_path);
        self.serve(listener)
    }

    /// Replaces any stale socket file and binds a world-accessible listener.
    pub fn bind(&self) -> Result<UnixListener, SupervisorError> {
        let listener_error = |source| SupervisorError::Listener {
            path: self.socket_path.clone(),
            source,
        };

        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent).map_err(listener_error)?;
        }

        match fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("Removed stale socket {:?}", self.socket_path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(listener_error(err)),
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(listener_error)?;

        if let Err(err) = fs::set_permissions(
            &self.socket_path,
            fs::Permissions::from_mode(SOCKET_MODE),
        ) {
            warn!("Failed to set socket permissions: {err}");
        }

        Ok(listener)
    }

    /// Removes the socket and exits on SIGINT/SIGTERM.
    ///
    /// Managed services are deliberately left running.
    fn install_shutdown_handler(&self) -> Result<(), SupervisorError> {
        let socket_path = self.socket_path.clone();
        ctrlc::set_handler(move || {
            info!("Termination signal received; shutting down (services keep running)");
            remove_socket(&socket_path);
            std::process::exit(0);
        })?;
        Ok(())
    }

    /// Accepts connections, handling each on its own thread.
    pub fn serve(&self, listener: UnixListener) -> Result<(), SupervisorError> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let supervisor = self.clone();
                    thread::spawn(move || supervisor.handle_connection(stream));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Supervisor listener error: {err}");
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Serves one request. Malformed or unknown requests get no reply.
    pub fn handle_connection(&self, mut stream: UnixStream) {
        let raw = match ipc::read_request(&mut stream) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("Failed to read control command: {err}");
                return;
            }
        };

        let request = match ControlRequest::parse(&raw) {
            Ok(request) => request,
            Err(err) => {
                debug!("Ignoring control command: {err}");
                return;
            }
        };

        match self.dispatch(&request) {
            Dispatch::Reply(response) => {
                if let Err(err) = ipc::write_response(&mut stream, &response) {
                    warn!("Failed to answer {} request: {err}", request.operation);
                }
            }
            Dispatch::Exit => {
                info!("reboot");
                remove_socket(&self.socket_path);
                std::process::exit(0);
            }
        }
    }

    /// Runs the operation named by `request` against the engine.
    pub fn dispatch(&self, request: &ControlRequest) -> Dispatch {
        let service = request.service.as_str();
        info!("{}: {service}", request.operation);

        let result = match request.operation {
            Operation::Enable => self.daemon.enable(service).map(|_| ControlResponse::Ok),
            Operation::Disable => self.daemon.disable(service).map(|_| ControlResponse::Ok),
            Operation::Start => self
                .daemon
                .start(service, self.timings.restart_attempts)
                .map(|_| ControlResponse::Ok),
            Operation::Restart => self.daemon.restart(service).map(|_| ControlResponse::Ok),
            Operation::Stop => self.daemon.stop(service).map(|_| ControlResponse::Ok),
            Operation::Status => self
                .daemon
                .status(service)
                .map(|state| ControlResponse::Message(state.to_string())),
            Operation::Reboot => return Dispatch::Exit,
        };

        Dispatch::Reply(result.unwrap_or_else(|err| {
            warn!("{} of '{service}' failed: {err}", request.operation);
            ControlResponse::Error(err.to_string())
        }))
    }
}

fn remove_socket(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove socket {:?}: {err}", path);
    }
}
