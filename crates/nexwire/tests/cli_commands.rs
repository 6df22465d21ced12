#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/nwcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn nexwire() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_nexwire"));
    command
        .env_remove("NEXWIRE_AUTH_TOKEN")
        .env_remove("NEXWIRE_LOG")
        .arg("--log-level")
        .arg("error");
    command
}

fn spawn_server(sock_path: &Path, extra: &[&str]) -> Child {
    let child = nexwire()
        .arg("serve")
        .arg(sock_path)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("server socket did not appear");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn json_stdout(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("command should emit json")
}

fn stop(mut child: Child, dir: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn call_echo_and_sum() {
    let dir = unique_temp_dir("call");
    let sock_path = dir.join("serve.sock");
    let child = spawn_server(&sock_path, &[]);

    let output = nexwire()
        .args(["--format", "json", "call"])
        .arg(&sock_path)
        .args(["--method", "1", "--data", "hello"])
        .output()
        .expect("call should run");
    assert!(output.status.success(), "{output:?}");
    let result = json_stdout(&output);
    assert_eq!(result["payload"], "hello");
    assert_eq!(result["method"], 1);

    let output = nexwire()
        .args(["--format", "json", "call"])
        .arg(&sock_path)
        .args(["-m", "2", "--json", "[1,2,39]"])
        .output()
        .expect("call should run");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(json_stdout(&output)["payload"], "42");

    let output = nexwire()
        .args(["--format", "raw", "call"])
        .arg(&sock_path)
        .args(["-m", "1", "--data", "raw bytes"])
        .output()
        .expect("call should run");
    assert_eq!(output.stdout, b"raw bytes");

    stop(child, &dir);
}

#[test]
fn remote_failures_exit_nonzero() {
    let dir = unique_temp_dir("fail");
    let sock_path = dir.join("serve.sock");
    let child = spawn_server(&sock_path, &[]);

    let output = nexwire()
        .arg("call")
        .arg(&sock_path)
        .args(["-m", "99", "--data", "x"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown method"));

    let output = nexwire()
        .arg("call")
        .arg(&sock_path)
        .args(["-m", "2", "--json", "{\"not\":\"a list\"}"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(1));

    stop(child, &dir);
}

#[test]
fn sleep_past_timeout_returns_124() {
    let dir = unique_temp_dir("sleep");
    let sock_path = dir.join("serve.sock");
    let child = spawn_server(&sock_path, &[]);

    let output = nexwire()
        .arg("call")
        .arg(&sock_path)
        .args(["-m", "4", "--json", "60000", "--timeout", "300ms"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(124));

    let output = nexwire()
        .args(["--format", "json", "call"])
        .arg(&sock_path)
        .args(["-m", "4", "--json", "10"])
        .output()
        .expect("call should run");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(json_stdout(&output)["payload"], "\"slept 10ms\"");

    stop(child, &dir);
}

#[test]
fn stream_file_through_pipe_echo() {
    let dir = unique_temp_dir("stream");
    let sock_path = dir.join("serve.sock");
    let data_path = dir.join("data.bin");
    let data: Vec<u8> = (0..300 * 1024).map(|i| (i % 253) as u8).collect();
    std::fs::write(&data_path, &data).expect("data file should be writable");
    let child = spawn_server(&sock_path, &[]);

    let output = nexwire()
        .args(["--format", "json", "stream"])
        .arg(&sock_path)
        .arg("--file")
        .arg(&data_path)
        .output()
        .expect("stream should run");
    assert!(output.status.success(), "{output:?}");
    let report = json_stdout(&output);
    assert_eq!(report["matched"], true);
    assert_eq!(report["bytes_sent"], data.len());
    assert_eq!(report["bytes_echoed"], data.len());

    stop(child, &dir);
}

#[test]
fn info_reports_session_metadata() {
    let dir = unique_temp_dir("info");
    let sock_path = dir.join("serve.sock");
    let child = spawn_server(&sock_path, &[]);

    let output = nexwire()
        .args(["--format", "json", "info"])
        .arg(&sock_path)
        .output()
        .expect("info should run");
    assert!(output.status.success(), "{output:?}");
    let info = json_stdout(&output);
    assert_eq!(info["connected"], true);
    assert_eq!(info["session_id"], "session-1");
    assert_eq!(info["protocol_version"], "1.0");
    assert_eq!(info["transport"], "unix-domain-socket");
    assert!(info["ping_latency_ms"].is_number());

    stop(child, &dir);
}

#[test]
fn auth_token_is_enforced() {
    let dir = unique_temp_dir("auth");
    let sock_path = dir.join("serve.sock");
    let child = spawn_server(&sock_path, &["--auth-token", "s3cret"]);

    let output = nexwire()
        .arg("call")
        .arg(&sock_path)
        .args(["-m", "1", "--data", "x"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(50));

    let output = nexwire()
        .arg("call")
        .arg(&sock_path)
        .args(["-m", "1", "--data", "x", "--auth-token", "wrong"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(50));

    let output = nexwire()
        .args(["--format", "raw", "call"])
        .arg(&sock_path)
        .args(["-m", "1", "--data", "ok"])
        .env("NEXWIRE_AUTH_TOKEN", "s3cret")
        .output()
        .expect("call should run");
    assert!(output.status.success(), "{output:?}");
    assert_eq!(output.stdout, b"ok");

    stop(child, &dir);
}

#[test]
fn serve_exits_after_max_sessions() {
    let dir = unique_temp_dir("max");
    let sock_path = dir.join("serve.sock");
    let mut child = spawn_server(&sock_path, &["--max-sessions", "1"]);

    let output = nexwire()
        .arg("call")
        .arg(&sock_path)
        .args(["-m", "1", "--data", "once"])
        .output()
        .expect("call should run");
    assert!(output.status.success(), "{output:?}");

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().expect("child status") {
            break status;
        }
        if start.elapsed() >= Duration::from_secs(5) {
            let _ = child.kill();
            panic!("serve did not exit after its last session");
        }
        thread::sleep(Duration::from_millis(25));
    };
    assert!(status.success());
    assert!(!sock_path.exists(), "socket should be removed on exit");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn info_timeout_returns_124() {
    let missing = PathBuf::from(format!(
        "/tmp/nwcli-missing-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));

    let output = nexwire()
        .arg("info")
        .arg(&missing)
        .arg("--timeout")
        .arg("1s")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn version_prints_package_version() {
    let output = nexwire().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("nexwire {}", env!("CARGO_PKG_VERSION")));
}
