use std::fs;
use std::path::{Path, PathBuf};

fn rs_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn rel(path: &Path) -> String {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    rel.replace('\\', "/")
}

#[test]
fn snapshot_module_is_pure() {
    let file = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/system/snapshot.rs");
    let content = fs::read_to_string(&file).unwrap_or_default();
    let mut violations = Vec::new();

    for forbidden in ["sysinfo", "crate::system::platform", "crate::system::tracker", "std::fs"] {
        if content.contains(forbidden) {
            violations.push(format!(
                "{} imports forbidden dependency `{}`",
                rel(&file),
                forbidden
            ));
        }
    }

    assert!(
        violations.is_empty(),
        "Snapshot layering violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn report_does_not_touch_probes_directly() {
    let file = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/report.rs");
    let content = fs::read_to_string(&file).unwrap_or_default();
    let mut violations = Vec::new();

    for forbidden in [
        "crate::system::platform",
        "crate::system::process",
        "crate::system::tracker",
        "sysinfo",
    ] {
        if content.contains(forbidden) {
            violations.push(format!("{} imports `{}` directly", rel(&file), forbidden));
        }
    }

    assert!(
        violations.is_empty(),
        "Report/probe boundary violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn target_os_cfg_is_scoped_to_system_platform() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut violations = Vec::new();

    for file in rs_files(&root) {
        let content = fs::read_to_string(&file).unwrap_or_default();
        if !content.contains("target_os") {
            continue;
        }

        let rel_path = rel(&file);
        if !rel_path.starts_with("src/system/platform/") {
            violations.push(format!(
                "{} contains `target_os` cfg but is outside allowed boundary",
                rel_path
            ));
        }
    }

    assert!(
        violations.is_empty(),
        "Unexpected target_os cfg usage:\n{}",
        violations.join("\n")
    );
}

#[test]
fn only_the_binary_installs_a_global_allocator() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut violations = Vec::new();

    for file in rs_files(&root) {
        let content = fs::read_to_string(&file).unwrap_or_default();
        let rel_path = rel(&file);
        // lib.rs installs one for its own unit tests only.
        let installs = content
            .lines()
            .any(|line| line.trim_start().starts_with("#[global_allocator]"));
        if installs
            && rel_path != "src/main.rs"
            && rel_path != "src/lib.rs"
        {
            violations.push(format!("{} installs a global allocator", rel_path));
        }
    }

    assert!(
        violations.is_empty(),
        "Unexpected allocator installation:\n{}",
        violations.join("\n")
    );
}
