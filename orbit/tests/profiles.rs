//! Tests for profile load/save through CLI invocations (non-interactive paths only)
use std::fs;
use std::path::Path;
use std::process::Command;

fn run_orbit(args: &[&str], config_home: &Path) -> (bool, String) {
    let exe = env!("CARGO_BIN_EXE_orbit");
    let output = Command::new(exe)
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .output()
        .expect("run orbit");
    let ok = output.status.success();
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    (ok, text)
}

fn profiles_path(config_home: &Path) -> std::path::PathBuf {
    config_home.join("orbit").join("profiles.json")
}

#[test]
fn profile_created_on_first_use() {
    let td = tempfile::tempdir().unwrap();
    // Provide profile + url => should create profiles.json and exit (dry-run).
    let (_ok, _out) = run_orbit(
        &["--profile", "unittest", "ws://example:1/ws", "--dry-run"],
        td.path(),
    );
    let data = fs::read_to_string(profiles_path(td.path())).expect("profiles.json created");
    assert!(
        data.contains("unittest"),
        "profiles.json missing profile entry: {data}"
    );
}

#[test]
fn profile_overwrite_only_when_changed() {
    let td = tempfile::tempdir().unwrap();
    // Initial create
    let (_ok, _out) = run_orbit(&["--profile", "prod", "ws://one/ws", "--dry-run"], td.path());
    let first = fs::read_to_string(profiles_path(td.path())).unwrap();
    // Re-run identical (should not duplicate or corrupt)
    let (_ok2, _out2) = run_orbit(&["--profile", "prod", "ws://one/ws", "--dry-run"], td.path());
    let second = fs::read_to_string(profiles_path(td.path())).unwrap();
    assert_eq!(first, second, "Profile file changed despite identical input");
    // Overwrite with different URL using --save (no prompt path)
    let (_ok3, _out3) = run_orbit(
        &["--profile", "prod", "--save", "ws://two/ws", "--dry-run"],
        td.path(),
    );
    let third = fs::read_to_string(profiles_path(td.path())).unwrap();
    assert!(third.contains("two"), "Updated URL not written: {third}");
}

#[test]
fn profile_token_persisted() {
    let td = tempfile::tempdir().unwrap();
    let (_ok, _out) = run_orbit(
        &[
            "--profile",
            "secureX",
            "--token",
            "abc123",
            "ws://host/ws",
            "--dry-run",
        ],
        td.path(),
    );
    let data = fs::read_to_string(profiles_path(td.path())).unwrap();
    assert!(data.contains("secureX"));
    assert!(data.contains("abc123"));
}

#[test]
fn saved_profile_loads_by_name() {
    let td = tempfile::tempdir().unwrap();
    let (_ok, _out) = run_orbit(
        &["--profile", "lab", "ws://lab:9700/ws", "--dry-run"],
        td.path(),
    );
    // Loading by name alone resolves without prompting.
    let (ok, text) = run_orbit(&["--profile", "lab", "--dry-run"], td.path());
    assert!(ok, "loading saved profile failed: {text}");
    assert!(
        text.contains("ws://lab:9700/ws"),
        "resolved endpoint not reported: {text}"
    );
}
