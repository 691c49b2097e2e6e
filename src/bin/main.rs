use std::{error::Error, path::Path, process::ExitCode};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use unitd::{
    cli::{Cli, parse_args},
    config::load_config,
    constants::{USAGE, VERSION_BANNER},
    ipc::{self, ControlError, ControlRequest, Operation},
    supervisor::Supervisor,
};

fn main() -> Result<ExitCode, Box<dyn Error>> {
    if invoked_as_reboot() {
        init_logging(None);
        return reboot();
    }

    let args = parse_args();
    init_logging(args.log_level.map(|level| level.as_str()));

    if args.version {
        println!("{VERSION_BANNER}");
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = args.command else {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    };

    let config = load_config(args.config.as_deref())?;

    let Some(request) = command.request() else {
        info!("Starting daemon process");
        let supervisor = Supervisor::new(&config)?;
        if let Err(err) = supervisor.run() {
            error!("Supervisor exited with error: {err}");
            return Err(err.into());
        }
        return Ok(ExitCode::SUCCESS);
    };

    debug!("Sending '{}' to {:?}", request.to_wire(), config.socket_path);
    match ipc::send_command(&config.socket_path, &request) {
        Ok(reply) => {
            println!("{reply}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// `reboot` is a symlink to this binary; invoked that way it asks the daemon to exit.
fn invoked_as_reboot() -> bool {
    std::env::args_os()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().contains("reboot"))
        })
        .unwrap_or(false)
}

fn reboot() -> Result<ExitCode, Box<dyn Error>> {
    let config = load_config(None)?;
    let request = ControlRequest::new(Operation::Reboot, "reboot");

    match ipc::send_command(&config.socket_path, &request) {
        // The daemon exits without answering.
        Ok(_) | Err(ControlError::NoReply) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            println!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
