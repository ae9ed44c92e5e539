use std::process::Command;

#[test]
fn missing_device_exits_with_failure_and_reports_once() {
    let output = Command::new(env!("CARGO_BIN_EXE_framecast"))
        .args([
            "--source",
            "v4l2",
            "--device",
            "/dev/framecast-does-not-exist",
            "--transport",
            "memory",
        ])
        .env_clear()
        .env("RUST_LOG", "info")
        .output()
        .expect("run framecast");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let reports = stderr
        .matches("could not open video device /dev/framecast-does-not-exist")
        .count();
    assert_eq!(reports, 1, "stderr:\n{}", stderr);
    assert!(!stderr.contains("Publishing data on topic"), "stderr:\n{}", stderr);
}

#[test]
fn invalid_frequency_is_rejected_before_startup() {
    let output = Command::new(env!("CARGO_BIN_EXE_framecast"))
        .args(["--source", "synthetic", "--transport", "memory", "--freq", "1e-20"])
        .env_clear()
        .output()
        .expect("run framecast");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("frequency must be between"), "stderr:\n{}", stderr);
}
