#[path = "common/mod.rs"]
mod common;

use std::{fs, thread, time::Duration};

use common::{Sandbox, is_process_alive, wait_for_lines};
use unitd::{daemon::ServiceState, error::UnitError};

#[test]
fn enable_links_resolved_unit() {
    let sandbox = Sandbox::new();
    let unit = sandbox.write_unit("web", "[Service]\nExecStart=/bin/sleep 100\n");
    let daemon = sandbox.daemon();

    let link = daemon.enable("web").unwrap();
    assert_eq!(link, sandbox.config.enablement_dir.join("web.service"));
    assert_eq!(fs::read_link(&link).unwrap(), unit);
    assert!(daemon.enablement().is_enabled("web"));

    assert!(matches!(
        daemon.enable("web"),
        Err(UnitError::AlreadyEnabled(_))
    ));

    daemon.disable("web").unwrap();
    assert!(!link.exists());
    assert!(matches!(
        daemon.disable("web"),
        Err(UnitError::NotEnabled(_))
    ));

    daemon.shutdown_monitor();
}

#[test]
fn enable_requires_a_unit_file() {
    let sandbox = Sandbox::new();
    let daemon = sandbox.daemon();

    let err = daemon.enable("ghost").unwrap_err();
    assert!(matches!(err, UnitError::UnitNotFound(_)));
    assert_eq!(err.to_string(), "no service found");
    assert!(!sandbox.config.enablement_dir.join("ghost.service").exists());

    daemon.shutdown_monitor();
}

#[test]
fn enablement_does_not_start_or_stop_services() {
    let sandbox = Sandbox::new();
    sandbox.write_unit("idle", "[Service]\nExecStart=/bin/sleep 100\n");
    let daemon = sandbox.daemon();

    daemon.enable("idle").unwrap();
    assert_eq!(daemon.status("idle").unwrap(), ServiceState::Exited);

    let pid = daemon.start("idle", 0).unwrap();
    daemon.disable("idle").unwrap();
    assert!(is_process_alive(pid));
    assert_eq!(daemon.status("idle").unwrap(), ServiceState::Running);

    daemon.stop("idle").unwrap();
    daemon.shutdown_monitor();
}

#[test]
fn boot_walk_starts_enabled_services_except_reserved_ones() {
    let sandbox = Sandbox::new();
    let alpha_marker = sandbox.path("alpha.txt");
    let reserved_marker = sandbox.path("reserved.txt");
    let alpha = sandbox.write_script(
        "alpha.sh",
        &format!("echo alpha > {}\nexec sleep 100", alpha_marker.display()),
    );
    let reserved = sandbox.write_script(
        "reserved.sh",
        &format!("echo reserved > {}", reserved_marker.display()),
    );
    sandbox.write_unit(
        "alpha",
        &format!("[Service]\nExecStart=/bin/sh {}\n", alpha.display()),
    );
    sandbox.write_unit(
        "e2scrub_reap",
        &format!("[Service]\nExecStart=/bin/sh {}\n", reserved.display()),
    );
    sandbox.write_unit("broken", "[Service]\nWorkingDirectory=/tmp\n");

    let daemon = sandbox.daemon();
    daemon.enable("alpha").unwrap();
    daemon.enable("e2scrub_reap").unwrap();
    daemon.enable("broken").unwrap();

    // A failing unit does not stop the walk.
    assert_eq!(daemon.start_enabled(), 1);
    assert_eq!(wait_for_lines(&alpha_marker, 1), vec!["alpha".to_string()]);
    assert_eq!(daemon.status("alpha").unwrap(), ServiceState::Running);

    thread::sleep(Duration::from_millis(300));
    assert!(!reserved_marker.exists());
    assert_eq!(daemon.services(), vec!["alpha".to_string()]);

    daemon.stop("alpha").unwrap();
    daemon.shutdown_monitor();
}

#[test]
fn boot_walk_without_enablement_directory_starts_nothing() {
    let sandbox = Sandbox::new();
    let daemon = sandbox.daemon();

    assert!(!sandbox.config.enablement_dir.exists());
    assert_eq!(daemon.start_enabled(), 0);
    assert!(daemon.services().is_empty());

    daemon.shutdown_monitor();
}
