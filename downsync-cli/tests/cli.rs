use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn downsync() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("downsync"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn help_lists_subcommands() {
    downsync()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("agent"))
        .stdout(contains("connect"))
        .stdout(contains("controller"));
}

#[test]
fn agent_requires_a_command() {
    downsync()
        .args(["agent", "--targets", "/app"])
        .assert()
        .failure()
        .stderr(contains("--command"));
}

#[test]
fn agent_exits_with_application_code() {
    let dir = TempDir::new().expect("tempdir");
    let target = dir.path().join("src");
    std::fs::create_dir_all(&target).expect("mkdir");
    let socket = dir.path().join("agent.sock");

    downsync()
        .arg("agent")
        .arg("--command")
        .arg("sh,-c,exit 3")
        .arg("--targets")
        .arg(&target)
        .arg("--socket")
        .arg(&socket)
        .assert()
        .code(3);
    assert!(!socket.exists(), "socket removed on shutdown");
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        sleep(Duration::from_millis(50));
    }
}

fn wait_for_socket(socket: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !socket.exists() {
        assert!(Instant::now() < deadline, "agent never bound {}", socket.display());
        sleep(Duration::from_millis(20));
    }
}

#[test]
fn connect_exits_when_agent_goes_away_with_stdin_open() {
    let dir = TempDir::new().expect("tempdir");
    let target = dir.path().join("src");
    std::fs::create_dir_all(&target).expect("mkdir");
    let socket = dir.path().join("agent.sock");

    let mut agent = downsync()
        .arg("agent")
        .arg("--command")
        .arg("sh,-c,sleep 2")
        .arg("--targets")
        .arg(&target)
        .arg("--socket")
        .arg(&socket)
        .stdin(Stdio::null())
        .spawn()
        .expect("spawn agent");
    wait_for_socket(&socket);

    let mut connect = downsync()
        .arg("connect")
        .arg("--socket")
        .arg(&socket)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .expect("spawn connect");
    // Held open for the whole test, as `kubectl exec -i` does.
    let _stdin = connect.stdin.take().expect("connect stdin");

    let agent_status = wait_with_deadline(&mut agent, Duration::from_secs(15));
    assert_eq!(agent_status.and_then(|s| s.code()), Some(0));

    let connect_status = wait_with_deadline(&mut connect, Duration::from_secs(10));
    assert!(
        connect_status.is_some(),
        "connect still running after the agent exited"
    );
}

#[test]
fn connect_without_agent_fails() {
    let dir = TempDir::new().expect("tempdir");
    downsync()
        .arg("connect")
        .arg("--socket")
        .arg(dir.path().join("missing.sock"))
        .assert()
        .failure()
        .stderr(contains("cannot reach agent"));
}

#[test]
fn controller_reports_missing_config() {
    let dir = TempDir::new().expect("tempdir");
    downsync()
        .arg("controller")
        .arg("--config")
        .arg(dir.path().join("downsync.yaml"))
        .assert()
        .failure()
        .stderr(contains("failed to load"));
}

#[test]
fn controller_rejects_malformed_build() {
    let dir = TempDir::new().expect("tempdir");
    downsync()
        .arg("controller")
        .arg("--config")
        .arg(dir.path().join("downsync.yaml"))
        .args(["--build", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(contains("no-equals-sign"));
}
