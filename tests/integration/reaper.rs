//! The reaper collects every child of the process, so these tests live in their
//! own binary where no other test owns children.
#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    process::{Command, Stdio},
    time::Duration,
};

use common::{Sandbox, has_process_entry, read_pid, wait_until};
use tempfile::tempdir;
use unitd::{
    daemon::ServiceState,
    error::UnitError,
    reaper::{Reaper, SpawnGate, reap_available},
};

fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let state = stat.rfind(')').map(|end| stat[end + 1..].trim_start().to_string())?;
            state.chars().next()
        })
        .is_some_and(|state| state == 'Z')
}

fn reaps_unwaited_children() {
    let child = Command::new("/bin/true")
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id();
    drop(child);

    assert!(wait_until(Duration::from_secs(5), || is_zombie(pid)));
    assert!(reap_available() >= 1);
    assert!(!has_process_entry(pid));
}

fn background_reaper_collects_orphaned_grandchildren() {
    // Become the reaper for orphans, as the daemon is when running as PID 1.
    let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    assert_eq!(rc, 0);

    let reaper = Reaper::spawn(Duration::from_millis(50), SpawnGate::new());

    let temp = tempdir().unwrap();
    let pid_file = temp.path().join("orphan.pid");
    let parent = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!(
            "sleep 0.3 & echo $! > {}; exit 0",
            pid_file.display()
        ))
        .spawn()
        .unwrap();
    let parent_pid = parent.id();
    drop(parent);

    let orphan = read_pid(&pid_file);
    assert!(wait_until(Duration::from_secs(10), || {
        !has_process_entry(parent_pid) && !has_process_entry(orphan)
    }));

    reaper.shutdown();
}

fn failed_launches_under_busy_reaper_leave_daemon_usable() {
    let sandbox = Sandbox::new();
    sandbox.write_unit("broken", "[Service]\nExecStart=/definitely/not/a/binary\n");
    sandbox.write_unit("ok", "[Service]\nExecStart=/bin/sleep 100\n");
    let daemon = sandbox.daemon();
    let reaper = Reaper::spawn(Duration::from_micros(1), daemon.spawn_gate().clone());

    for _ in 0..50 {
        assert!(matches!(
            daemon.start("broken", 0),
            Err(UnitError::LaunchFailure { .. })
        ));
    }

    daemon.start("ok", 0).unwrap();
    assert_eq!(daemon.status("ok").unwrap(), ServiceState::Running);
    daemon.stop("ok").unwrap();
    assert_eq!(daemon.status("ok").unwrap(), ServiceState::Exited);

    reaper.shutdown();
    daemon.shutdown_monitor();
}

// Run sequentially: the background reaper would race the synchronous check.
#[test]
fn reaper_collects_zombies() {
    reaps_unwaited_children();
    background_reaper_collects_orphaned_grandchildren();
    failed_launches_under_busy_reaper_leave_daemon_usable();
}
