use std::process::Command;

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_oomdump"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("OOMDump"));
    assert!(stdout.contains("trigger"));
}

#[test]
fn test_cli_install_acknowledges() {
    let output = Command::new(env!("CARGO_BIN_EXE_oomdump"))
        .arg("install")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.lines().any(|l| l == "done"));
}

#[test]
fn test_cli_missing_config_file() {
    let output = Command::new(env!("CARGO_BIN_EXE_oomdump"))
        .args(["trigger", "--config", "non_existent_hook.yaml"])
        .output()
        .expect("Failed to execute command");

    // Fails before the hook is armed
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("FATAL ERROR"));
}

#[test]
fn test_cli_unknown_policy() {
    let output = Command::new(env!("CARGO_BIN_EXE_oomdump"))
        .args(["trigger", "--policy", "utc"])
        .output()
        .expect("Failed to execute command");

    assert_eq!(output.status.code(), Some(2));
}
