#[path = "common/mod.rs"]
mod common;

use std::{os::unix::fs::symlink, time::Duration};

use assert_cmd::Command;
use common::{Sandbox, is_process_alive, kill_pid, read_pid, wait_until};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use predicates::prelude::*;

fn systemctl() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("systemctl"))
}

#[test]
fn version_prints_systemd_banner() {
    systemctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::diff("systemd 226\n"));
}

#[test]
fn no_arguments_prints_usage() {
    systemctl()
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Usage: systemctl"));
}

#[test]
fn service_commands_require_a_name() {
    systemctl()
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn unreachable_daemon_is_reported() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_config_file();

    systemctl()
        .args(["--config", config.to_str().unwrap(), "status", "web"])
        .assert()
        .failure()
        .stdout(predicate::str::starts_with("Error connecting to daemon: "));
}

#[test]
fn client_commands_round_trip_through_domain() {
    let sandbox = Sandbox::new();
    sandbox.write_unit("sleeper", "[Service]\nExecStart=/bin/sleep 100\n");
    let domain = sandbox.spawn_domain();
    let config = domain.config_path.to_str().unwrap().to_string();

    let run = |args: &[&str], reply: &str| {
        systemctl()
            .args(["--config", config.as_str()])
            .args(args)
            .assert()
            .success()
            .stdout(predicate::str::diff(format!("{reply}\n")));
    };

    run(&["status", "sleeper"], "exited");
    run(&["enable", "sleeper.service"], "success");
    run(&["start", "sleeper"], "success");
    run(&["status", "sleeper"], "running");
    run(&["restart", "sleeper"], "success");
    run(&["stop", "sleeper"], "success");
    run(&["stop", "sleeper"], "service is not run");
    run(&["disable", "sleeper"], "success");
    run(&["status", "ghost"], "no service found");
}

#[test]
fn domain_starts_enabled_services_at_boot() {
    let sandbox = Sandbox::new();
    let marker = sandbox.path("booted.txt");
    let script = sandbox.write_script(
        "boot.sh",
        &format!("echo $$ > {}\nexec sleep 100", marker.display()),
    );
    let unit = sandbox.write_unit(
        "boot",
        &format!("[Service]\nExecStart=/bin/sh {}\n", script.display()),
    );
    std::fs::create_dir_all(&sandbox.config.enablement_dir).unwrap();
    symlink(&unit, sandbox.config.enablement_dir.join("boot.service")).unwrap();

    let _domain = sandbox.spawn_domain();
    let pid = read_pid(&marker);
    assert!(is_process_alive(pid));

    kill_pid(pid);
}

#[test]
fn termination_signal_removes_socket_but_leaves_services_running() {
    let sandbox = Sandbox::new();
    let pid_file = sandbox.path("survivor.pid");
    let script = sandbox.write_script(
        "survivor.sh",
        &format!("echo $$ > {}\nexec sleep 100", pid_file.display()),
    );
    sandbox.write_unit(
        "survivor",
        &format!("[Service]\nExecStart=/bin/sh {}\n", script.display()),
    );
    let mut domain = sandbox.spawn_domain();

    systemctl()
        .args(["--config", domain.config_path.to_str().unwrap()])
        .args(["start", "survivor"])
        .assert()
        .success()
        .stdout(predicate::str::diff("success\n"));
    let service_pid = read_pid(&pid_file);

    signal::kill(Pid::from_raw(domain.pid() as i32), Signal::SIGTERM).unwrap();
    let status = domain.wait_exit(Duration::from_secs(10)).expect("daemon did not exit");
    assert!(status.success());

    assert!(!sandbox.config.socket_path.exists());
    assert!(is_process_alive(service_pid));

    kill_pid(service_pid);
}

#[test]
fn reboot_alias_shuts_down_daemon() {
    let sandbox = Sandbox::new();
    let mut domain = sandbox.spawn_domain();
    let reboot = sandbox.path("reboot");
    symlink(assert_cmd::cargo::cargo_bin!("systemctl"), &reboot).unwrap();

    Command::new(&reboot)
        .env("UNITD_CONFIG", &domain.config_path)
        .assert()
        .success();

    let status = domain.wait_exit(Duration::from_secs(10)).expect("daemon did not exit");
    assert!(status.success());
    assert!(wait_until(Duration::from_secs(5), || {
        !sandbox.config.socket_path.exists()
    }));
}

#[test]
fn logs_go_to_stderr_only() {
    let sandbox = Sandbox::new();
    sandbox.write_unit("quiet", "[Service]\nExecStart=/bin/sleep 100\n");
    let domain = sandbox.spawn_domain();

    systemctl()
        .args(["--config", domain.config_path.to_str().unwrap()])
        .args(["--log-level", "debug", "status", "quiet"])
        .assert()
        .success()
        .stdout(predicate::str::diff("exited\n"))
        .stderr(predicate::str::contains("Sending 'status:quiet'"));
}
