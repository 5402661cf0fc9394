use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::tempdir;

fn loopmap() -> Command {
    Command::new(env!("CARGO_BIN_EXE_loopmap"))
}

#[test]
fn parse_reads_kpartx_output_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kpartx.out");
    fs::write(
        &path,
        "add map loop7p1 (253:0): 0 1048576 linear 7:7 2048\n\
         add map loop7p2 (253:1): 0 7337984 linear 7:7 1050624\n",
    )
    .unwrap();

    let output = loopmap()
        .arg("parse")
        .arg(&path)
        .output()
        .expect("failed to run loopmap binary");

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["loop_index"], 7);
    assert_eq!(value["partitions"], serde_json::json!([1, 2]));
}

#[test]
fn parse_reads_stdin() {
    let mut child = loopmap()
        .arg("parse")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to run loopmap binary");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"/dev/loop4\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["device"], "/dev/loop4");
}

#[test]
fn parse_fails_without_loop_token() {
    let output = loopmap()
        .arg("parse")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run loopmap binary");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no loop device token"));
}

#[test]
fn map_rejects_missing_image_before_running_anything() {
    let dir = tempdir().unwrap();
    let output = loopmap()
        .args(["map", "--image"])
        .arg(dir.path().join("absent.img"))
        .output()
        .expect("failed to run loopmap binary");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.img"));
}

#[test]
fn bad_config_file_is_reported() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("loopmap.toml");
    fs::write(&config, "strategy = 3").unwrap();

    let output = loopmap()
        .arg("--config")
        .arg(&config)
        .args(["map", "--image", "x.img"])
        .output()
        .expect("failed to run loopmap binary");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("loopmap.toml"));
}
