//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `bagsync` binary against a small stub
//! ERDDAP server bound to a local port. The stub serves a dataset available
//! from 2022-05-03 to 2022-07-20 with no rows in June 2022.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const RANGE_BODY: &str = "2022-05-03T00:00:00Z\n2022-07-20T12:00:00Z\n";

const INFO_BODY: &str = r#"{
  "table": {
    "columnNames": ["Row Type", "Variable Name", "Attribute Name", "Data Type", "Value"],
    "rows": [
      ["attribute", "NC_GLOBAL", "institution", "String", "USF"],
      ["attribute", "NC_GLOBAL", "title", "String", "Buoy 42 Test Station"]
    ]
  }
}"#;

const NO_ROWS_BODY: &str = "Error {\n    code=404;\n    message=\"Not Found: Your query produced no matching results. (nRows = 0)\";\n}\n";

// ──────────────────────────────────────────────
// Stub server
// ──────────────────────────────────────────────

struct StubErddap {
    url: String,
    window_requests: Arc<AtomicUsize>,
}

impl StubErddap {
    fn start(failing_month: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let window_requests = Arc::new(AtomicUsize::new(0));
        let counter = window_requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if let Ok(stream) = stream {
                    serve(stream, &counter, failing_month);
                }
            }
        });
        StubErddap {
            url: format!("http://127.0.0.1:{}/erddap/tabledap/buoy42", port),
            window_requests,
        }
    }

    fn window_requests(&self) -> usize {
        self.window_requests.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, counter: &AtomicUsize, failing_month: Option<&str>) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&chunk[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("");

    let (status, body) = route(path, counter, failing_month);
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Bad Request",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body.as_bytes());
}

fn route(path: &str, counter: &AtomicUsize, failing_month: Option<&str>) -> (u16, String) {
    if path.contains(".csv0?") {
        return (200, RANGE_BODY.to_string());
    }
    if path.starts_with("/erddap/info/buoy42/index.json") {
        return (200, INFO_BODY.to_string());
    }
    if let Some(at) = path.find(".ncCFMA?&time%3E=") {
        counter.fetch_add(1, Ordering::SeqCst);
        let start = at + ".ncCFMA?&time%3E=".len();
        let month = path.get(start..start + 7).unwrap_or("");
        if Some(month) == failing_month {
            return (400, "Error".to_string());
        }
        if month == "2022-06" {
            return (404, NO_ROWS_BODY.to_string());
        }
        return (200, format!("CDF:{}", month));
    }
    (404, String::new())
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn bagsync(cwd: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("bagsync");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("BAGIT_") {
            cmd.env_remove(key);
        }
    }
    cmd.current_dir(cwd)
        .env_remove("RUST_LOG")
        .env("BAGIT_CONTACT_NAME", "Dana")
        .env("BAGIT_CONTACT_PHONE", "555-0001")
        .env("BAGIT_CONTACT_PHONE_2", "555-0002");
    cmd
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("BagIt"));
}

#[test]
fn version_exits_0() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bagsync"));
}

// ──────────────────────────────────────────────
// 2. Sync
// ──────────────────────────────────────────────

#[test]
fn sync_builds_bag_then_skips_current_months() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "-d"])
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "windows: 3 (fetched 2, skipped 0, no data 1, failed 0)",
        ));
    assert_eq!(stub.window_requests(), 3);

    assert_eq!(read(&bag.join("data/buoy42_2022-05.nc")), "CDF:2022-05");
    assert_eq!(read(&bag.join("data/buoy42_2022-07.nc")), "CDF:2022-07");
    assert!(!bag.join("data/buoy42_2022-06.nc").exists());

    let info = read(&bag.join("bag-info.txt"));
    assert!(
        info.starts_with(
            "Bag-Group-Identifier: \nContact-Email: \nContact-Name: Dana\n\
             Contact-Phone: 555-0001\nContact-Phone: 555-0002\n\
             Organization-Address: \nSource-Organization: \n"
        ),
        "{}",
        info
    );
    assert!(info.contains("External-Description: Sensor data from station buoy42\n"));
    assert!(info.contains("External-Identifier: Buoy 42 Test Station\n"));
    assert!(info.contains("Payload-Oxum: 22.2\n"));
    let manifest = read(&bag.join("manifest-sha256.txt"));

    // May and July were captured after their months ended; June has no file.
    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "-d"])
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "windows: 3 (fetched 0, skipped 2, no data 1, failed 0)",
        ));
    assert_eq!(stub.window_requests(), 4);
    assert_eq!(read(&bag.join("manifest-sha256.txt")), manifest);

    bagsync(dir.path())
        .args(["verify"])
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid (4 entries checked)"));
}

#[test]
fn force_refetches_every_month() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "-d"])
        .arg(&bag)
        .assert()
        .success();
    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "--force", "-d"])
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains("fetched 2, skipped 0"));
    assert_eq!(stub.window_requests(), 6);
}

#[test]
fn requested_range_limits_the_months_fetched() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "-s", "2022-07-01", "-d"])
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains("windows: 1 (fetched 1,"));
    assert_eq!(stub.window_requests(), 1);
}

#[test]
fn default_bag_directory_is_named_after_dataset_and_range() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();

    bagsync(dir.path())
        .args(["sync", stub.url.as_str()])
        .assert()
        .success();

    let bag = dir
        .path()
        .join("bagit_archives/buoy42_2022-05-01_2022-08-01");
    assert!(bag.join("bagit.txt").is_file());
    assert!(bag.join("tagmanifest-sha256.txt").is_file());
}

#[test]
fn failed_month_exits_2_but_seals_the_rest() {
    let stub = StubErddap::start(Some("2022-07"));
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "--retries", "0", "-d"])
        .arg(&bag)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed 1"))
        .stderr(predicate::str::contains("2022-07"));

    assert!(bag.join("data/buoy42_2022-05.nc").is_file());
    assert!(!bag.join("data/buoy42_2022-07.nc").exists());
    let manifest = read(&bag.join("manifest-sha256.txt"));
    assert!(manifest.contains("data/buoy42_2022-05.nc"));
    assert!(!manifest.contains("2022-07"));
}

#[test]
fn json_output_lists_every_window() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    let out = bagsync(dir.path())
        .args(["--output", "json", "sync", stub.url.as_str(), "-d"])
        .arg(&bag)
        .output()
        .unwrap();
    assert!(out.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["fetched"], 2);
    assert_eq!(summary["no_data"], 1);
    let windows = summary["windows"].as_array().unwrap();
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[1]["window"], "2022-06");
    assert_eq!(windows[1]["result"], "no_data");
    assert_eq!(windows[0]["bytes"], 11);
}

#[test]
fn verbose_text_output_reports_each_window() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "-v", "-d"])
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains("2022-05  fetch    fetched 11 bytes"))
        .stdout(predicate::str::contains("2022-06  fetch    no data"));
}

#[test]
fn config_file_supplies_metadata_and_bag_root() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bagsync.toml");
    fs::write(
        &config,
        "[sync]\nbag_root = \"archives\"\n\n[metadata.values]\nSource-Organization = [\"USF College of Marine Science\"]\n",
    )
    .unwrap();

    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "--config"])
        .arg(&config)
        .assert()
        .success();

    let info = read(
        &dir.path()
            .join("archives/buoy42_2022-05-01_2022-08-01/bag-info.txt"),
    );
    assert!(info.contains("Source-Organization: USF College of Marine Science\n"));
}

#[cfg(unix)]
#[test]
fn non_utf8_environment_variables_are_skipped() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");

    bagsync(dir.path())
        .env("UNRELATED_VAR", OsStr::from_bytes(b"caf\xe9"))
        .env("BAGIT_CONTACT_EMAIL", OsStr::from_bytes(b"dana@caf\xe9.org"))
        .args(["sync", stub.url.as_str(), "-d"])
        .arg(&bag)
        .assert()
        .success()
        .stderr(predicate::str::contains("BAGIT_CONTACT_EMAIL"));

    let info = read(&bag.join("bag-info.txt"));
    assert!(info.contains("Contact-Name: Dana\n"), "{}", info);
    assert!(info.contains("Contact-Email: \n"), "{}", info);
}

// ──────────────────────────────────────────────
// 3. Errors before any fetch
// ──────────────────────────────────────────────

#[test]
fn inverted_range_exits_1_without_network() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .args([
            "sync",
            "http://127.0.0.1:9/erddap/tabledap/buoy42",
            "-s",
            "2022-08-01",
            "-e",
            "2022-05-01",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid range"));
}

#[test]
fn malformed_date_exits_1() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .args([
            "sync",
            "http://127.0.0.1:9/erddap/tabledap/buoy42",
            "-s",
            "2022/05/01",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid date '2022/05/01'"));
}

#[test]
fn non_tabledap_url_exits_1() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .args(["sync", "https://example.org/erddap/griddap/sst"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("tabledap"));
}

#[test]
fn unreadable_config_exits_1() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .args([
            "sync",
            "http://127.0.0.1:9/erddap/tabledap/buoy42",
            "--config",
            "missing.toml",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing.toml"));
}

// ──────────────────────────────────────────────
// 4. Verify
// ──────────────────────────────────────────────

#[test]
fn verify_rejects_a_plain_directory() {
    let dir = TempDir::new().unwrap();
    bagsync(dir.path())
        .args(["verify", "."])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is not a bag"));
}

#[test]
fn verify_detects_a_modified_payload() {
    let stub = StubErddap::start(None);
    let dir = TempDir::new().unwrap();
    let bag = dir.path().join("bag");
    bagsync(dir.path())
        .args(["sync", stub.url.as_str(), "-d"])
        .arg(&bag)
        .assert()
        .success();

    fs::write(bag.join("data/buoy42_2022-05.nc"), "tampered").unwrap();

    bagsync(dir.path())
        .args(["--output", "json", "verify"])
        .arg(&bag)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"valid\": false"))
        .stdout(predicate::str::contains("data/buoy42_2022-05.nc"));
}
