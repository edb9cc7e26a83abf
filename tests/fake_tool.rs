#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use rbtctl::config::{Settings, load_config};
use rbtctl::error::ManagerError;
use rbtctl::session::{AttemptOutcome, BluetoothManager};

// Stand-in for bluetoothctl: reads commands until `exit`, records each one
// next to the script, and answers like the real tool would.
const FAKE_TOOL: &str = r#"#!/bin/sh
calls="$(dirname "$0")/calls.log"
while IFS= read -r line; do
  echo "$line" >> "$calls"
  case "$line" in
    "scan on") echo "Discovery started" ;;
    "scan off") echo "Discovery stopped" ;;
    "devices")
      echo "Device AA:BB:CC:DD:EE:01 Speaker"
      echo "Device AA:BB:CC:DD:EE:02 Headphones"
      echo "Device AA:BB:CC:DD:EE:03 Keyboard"
      ;;
    "devices Connected") echo "Device AA:BB:CC:DD:EE:02 Headphones" ;;
    "connect AA:BB:CC:DD:EE:03") exec sleep 30 ;;
    "connect "*)
      echo "Attempting to connect to ${line#connect }"
      echo "Connection successful"
      ;;
    "disconnect") echo "Successful disconnected" ;;
    exit) exit 0 ;;
    *) echo "Invalid command: $line" >&2 ;;
  esac
done
"#;

fn install_fake_tool(dir: &Path) -> String {
    let path = dir.join("bluetoothctl");
    std::fs::write(&path, FAKE_TOOL).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make fake tool executable");
    path.to_string_lossy().into_owned()
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// Every scenario that spawns the fake tool lives in this one test so the
// script is never executed while another test thread holds it open for writing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_cycle_against_fake_tool() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut settings = Settings::default();
    settings.bluetoothctl_path = install_fake_tool(dir.path());
    settings.scan.duration = 0.05;
    settings.connection.response_timeout = 1.5;
    settings.max_connections = 2;
    let manager = BluetoothManager::new(settings).expect("manager");

    let devices = manager.discover_devices().await.expect("discover");
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Speaker", "Headphones", "Keyboard"]);

    let connected = manager.list_connected_devices().await.expect("list");
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].address, "AA:BB:CC:DD:EE:02");

    assert!(
        manager
            .connect_device("AA:BB:CC:DD:EE:01")
            .await
            .expect("connect")
    );
    manager.disconnect_all().await.expect("disconnect");

    let err = manager
        .run_command("pair AA:BB:CC:DD:EE:01", None)
        .await
        .expect_err("unknown command writes to stderr");
    assert!(matches!(err, ManagerError::Execution { .. }));

    std::fs::remove_file(dir.path().join("calls.log")).expect("reset call log");

    let started = Instant::now();
    let report = manager.manage_connections().await.expect("round");
    assert!(started.elapsed() < Duration::from_secs(10));

    let addresses: Vec<&str> = report.attempts.iter().map(|a| a.address.as_str()).collect();
    assert_eq!(addresses, vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:03"]);
    assert!(report.attempts[0].outcome.is_connected());
    assert!(matches!(
        report.attempts[1].outcome,
        AttemptOutcome::Errored(ManagerError::Timeout { .. })
    ));

    let log = calls(dir.path());
    assert!(!log.iter().any(|line| line == "connect AA:BB:CC:DD:EE:02"));
    assert_eq!(
        &log[..3],
        &["scan on", "exit", "devices"].map(str::to_string)[..]
    );
}

#[test]
fn manager_builds_from_channel_config() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(
        br#"
bluetooth_manager:
  default:
    bluetoothctl_path: /usr/bin/bluetoothctl
    max_connections: 3
    scan: { duration: 5, timeout_seconds: 10, device_regex: 'Device (\S+) (.+)' }
    connection: { response_timeout: 10, expected_response: "Connection successful" }
    list: { device_regex: 'Device (\S+) (.+)' }
  kiosk:
    max_connections: 1
    connection:
      response_timeout: 3
      expected_response: successful
      expected_pattern: '(?i)connection successful'
"#,
    )
    .expect("write config");

    let settings = load_config(Some(file.path()), "kiosk").expect("load");
    let manager = BluetoothManager::new(settings).expect("manager");
    assert_eq!(manager.scheduler().capacity(), 1);
    assert_eq!(manager.settings().connection.response_timeout, 3.0);
}

#[test]
fn unknown_channel_fails_construction() {
    let err = BluetoothManager::from_config(None, "does-not-exist")
        .err()
        .expect("channel is missing from every candidate config");
    assert!(matches!(err, ManagerError::MissingChannel(_)));
}
