//! unitd is a small service supervisor that stands in for systemd inside
//! containers. It reads `.service` unit files, launches and restarts services
//! according to their `Restart=` policy, reaps orphaned children, and answers
//! `systemctl`-style commands over a unix socket.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Fixed paths, timings and protocol constants.
pub mod constants;

/// Supervision engine.
pub mod daemon;

/// Service definitions and unit resolution.
pub mod definition;

/// Boot-time enablement symlinks.
pub mod enablement;

/// Error handling.
pub mod error;

/// Control socket wire format and client helpers.
pub mod ipc;

/// Zombie reaper.
pub mod reaper;

/// Process registry shared by the engine's threads.
pub mod registry;

/// Resident daemon serving the control socket.
pub mod supervisor;

/// Unit file deserializer.
pub mod unit;
