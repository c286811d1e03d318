use std::process::{Command, Output};

fn rtdiag(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rtdiag"))
        .args(args)
        // Keep a user config out of the run.
        .args(["--config", "/nonexistent/rtdiag-test.toml"])
        .output()
        .expect("failed to run rtdiag")
}

#[test]
fn prints_all_four_sections() {
    let output = rtdiag(&[]);
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for section in [
        "=== Runtime Diagnostics ===",
        "1. Runtime Information:",
        "2. Process Information:",
        "3. Thread Information:",
        "4. Memory Information:",
        "   - Top Memory Usage:",
    ] {
        assert!(stdout.contains(section), "missing {section:?} in\n{stdout}");
    }
}

#[test]
fn json_output_parses() {
    let output = rtdiag(&["--json", "--top", "2", "--threads", "1", "--processes", "1"]);
    assert!(output.status.success(), "{output:?}");

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["memory"]["top_sites"].as_array().unwrap().len() <= 2);
    assert!(value["process"]["threads"].as_u64().unwrap() >= 2);
    assert_eq!(
        value["threads"]["active_threads"].as_u64().unwrap() as usize,
        value["threads"]["thread_list"].as_array().unwrap().len()
    );
}

#[test]
fn workload_child_exits_once_stdin_closes() {
    let output = Command::new(env!("CARGO_BIN_EXE_rtdiag"))
        .args(["__workload-child", "1000"])
        .stdin(std::process::Stdio::null())
        .output()
        .expect("failed to run rtdiag");
    assert!(output.status.success(), "{output:?}");
    assert!(output.stdout.is_empty());
}
