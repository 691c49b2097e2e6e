//! Constants and default values for the unitd supervisor.
//!
//! These are the conventional systemd locations and the fixed timings the
//! supervisor falls back to when no configuration file overrides them.

use std::time::Duration;

// ============================================================================
// File System Layout
// ============================================================================

/// System-wide unit directory, searched after the user directory.
pub const SYSTEM_UNIT_DIR: &str = "/usr/lib/systemd/system";

/// Locally administered unit directory, searched first.
pub const USER_UNIT_DIR: &str = "/etc/systemd/system";

/// Directory holding one symlink per enabled service.
pub const ENABLEMENT_DIR: &str = "/etc/systemd/system/multi-user.target.wants";

/// Unix socket the daemon listens on for control commands.
pub const SOCKET_PATH: &str = "/etc/systemd/systemctl.sock";

/// Permission bits applied to the control socket (world read/write).
pub const SOCKET_MODE: u32 = 0o666;

/// Configuration file consulted when neither `--config` nor `UNITD_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/unitd/unitd.yaml";

/// Environment variable naming an alternate configuration file.
pub const CONFIG_ENV_VAR: &str = "UNITD_CONFIG";

/// Conventional unit file suffix.
pub const UNIT_SUFFIX: &str = ".service";

// ============================================================================
// Unit File Options
// ============================================================================

/// Section every consumed option lives in.
pub const SERVICE_SECTION: &str = "Service";

/// Command line of the service. Required.
pub const EXEC_START_KEY: &str = "ExecStart";

/// Working directory of the service. Optional.
pub const WORKING_DIRECTORY_KEY: &str = "WorkingDirectory";

/// Restart policy of the service. Optional.
pub const RESTART_KEY: &str = "Restart";

/// Working directory used when a unit does not set one.
pub const DEFAULT_WORKING_DIRECTORY: &str = "/root";

/// Prefix marking an `ExecStart` token as an environment variable reference.
pub const ENV_REFERENCE_SIGIL: char = '$';

// ============================================================================
// Process Management Timing
// ============================================================================

/// Grace period between the termination signal and the forced kill.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Settle delay before each restart attempt.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Restart budget handed to every externally requested start.
pub const RESTART_ATTEMPTS: u32 = 5;

/// Polling interval of the zombie reaper when nothing is waiting to be reaped.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Control Protocol
// ============================================================================

/// Maximum size of a request or response on the control socket.
pub const CONTROL_BUFFER_SIZE: usize = 1024;

/// Separator between operation and service name in a request.
pub const REQUEST_DELIMITER: char = ':';

/// Reply sent for every operation that completed without a payload.
pub const SUCCESS_REPLY: &str = "success";

/// Banner printed by `--version`. Tools probing for systemd expect this exact text.
pub const VERSION_BANNER: &str = "systemd 226";

/// Usage line printed when the command line cannot be understood.
pub const USAGE: &str =
    "Usage: systemctl [enable|disable|start|stop|restart|status|domain] [service]";

// ============================================================================
// Boot
// ============================================================================

/// Enabled units never started at boot. `e2scrub_reap` is shipped enabled by
/// e2fsprogs and only makes sense on a real host.
pub const BOOT_SKIP_UNITS: &[&str] = &["e2scrub_reap"];
