#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use common::{Sandbox, wait_for_lines, wait_until};
use unitd::daemon::ServiceState;

/// Writes a unit whose every run appends a line to `<name>.runs` and exits.
fn counting_unit(sandbox: &Sandbox, name: &str, exit_code: i32, policy: Option<&str>) -> PathBuf {
    let runs = sandbox.path(&format!("{name}.runs"));
    let script = sandbox.write_script(
        &format!("{name}.sh"),
        &format!("echo run >> {}\nexit {exit_code}", runs.display()),
    );
    let restart = policy
        .map(|policy| format!("Restart={policy}\n"))
        .unwrap_or_default();
    sandbox.write_unit(
        name,
        &format!("[Service]\nExecStart=/bin/sh {}\n{restart}", script.display()),
    );
    runs
}

fn run_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|runs| runs.lines().count())
        .unwrap_or(0)
}

#[test]
fn failing_service_is_restarted_until_budget_is_spent() {
    let sandbox = Sandbox::new();
    let runs = counting_unit(&sandbox, "crasher", 1, Some("on-failure"));
    let daemon = sandbox.daemon();

    daemon.start("crasher", 2).unwrap();

    // The first run plus one restart per unit of budget.
    wait_for_lines(&runs, 3);
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.services().is_empty()
    }));
    thread::sleep(Duration::from_millis(500));
    assert_eq!(run_count(&runs), 3);
    assert_eq!(daemon.status("crasher").unwrap(), ServiceState::Exited);

    daemon.shutdown_monitor();
}

#[test]
fn zero_budget_runs_exactly_once() {
    let sandbox = Sandbox::new();
    let runs = counting_unit(&sandbox, "once", 1, Some("always"));
    let daemon = sandbox.daemon();

    daemon.start("once", 0).unwrap();
    wait_for_lines(&runs, 1);
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.services().is_empty()
    }));
    thread::sleep(Duration::from_millis(500));
    assert_eq!(run_count(&runs), 1);

    daemon.shutdown_monitor();
}

#[test]
fn always_restarts_clean_exits() {
    let sandbox = Sandbox::new();
    let runs = counting_unit(&sandbox, "looper", 0, Some("always"));
    let daemon = sandbox.daemon();

    daemon.start("looper", 2).unwrap();
    wait_for_lines(&runs, 3);
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.services().is_empty()
    }));
    assert_eq!(run_count(&runs), 3);

    daemon.shutdown_monitor();
}

#[test]
fn on_failure_ignores_clean_exit() {
    let sandbox = Sandbox::new();
    let runs = counting_unit(&sandbox, "oneshot", 0, Some("on-failure"));
    let daemon = sandbox.daemon();

    daemon.start("oneshot", 5).unwrap();
    wait_for_lines(&runs, 1);
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.services().is_empty()
    }));
    thread::sleep(Duration::from_millis(500));
    assert_eq!(run_count(&runs), 1);

    daemon.shutdown_monitor();
}

#[test]
fn unset_policy_still_consumes_budget() {
    let sandbox = Sandbox::new();
    let runs = counting_unit(&sandbox, "plain", 0, None);
    let daemon = sandbox.daemon();

    daemon.start("plain", 1).unwrap();
    wait_for_lines(&runs, 2);
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.services().is_empty()
    }));
    thread::sleep(Duration::from_millis(500));
    assert_eq!(run_count(&runs), 2);

    daemon.shutdown_monitor();
}

#[test]
fn stop_during_settle_delay_cancels_restart() {
    let mut sandbox = Sandbox::new();
    sandbox.config.restart_delay = "1s".into();
    let runs = counting_unit(&sandbox, "flapper", 1, Some("always"));
    let daemon = sandbox.daemon();

    daemon.start("flapper", 5).unwrap();
    wait_for_lines(&runs, 1);

    // Exited but still tracked while the restart is pending.
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.status("flapper").unwrap() == ServiceState::Exited
    }));
    daemon.stop("flapper").unwrap();

    thread::sleep(Duration::from_millis(1500));
    assert_eq!(run_count(&runs), 1);
    assert!(daemon.services().is_empty());

    daemon.shutdown_monitor();
}

#[test]
fn explicit_start_during_settle_delay_supersedes_pending_restart() {
    let mut sandbox = Sandbox::new();
    sandbox.config.restart_delay = "1s".into();
    let runs = counting_unit(&sandbox, "bouncer", 1, Some("on-failure"));
    let daemon = sandbox.daemon();

    daemon.start("bouncer", 1).unwrap();
    wait_for_lines(&runs, 1);
    assert!(wait_until(Duration::from_secs(5), || {
        daemon.status("bouncer").unwrap() == ServiceState::Exited
    }));

    // Fresh start with no budget: exactly one more run, and the stale restart
    // scheduled for the first instance must not fire.
    daemon.start("bouncer", 0).unwrap();
    wait_for_lines(&runs, 2);
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(run_count(&runs), 2);
    assert!(daemon.services().is_empty());

    daemon.shutdown_monitor();
}
