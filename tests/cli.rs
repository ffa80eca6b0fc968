use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

use devvm::config::{self, GitIdentity, Overrides, Settings};
use devvm::paths::{HOME_ENV, Layout};
use devvm::record::{self, GuestRecord};

/// `devvm` with every directory redirected into `home`.
fn devvm(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("devvm").into();
    cmd.env(HOME_ENV, home.path())
        .env_remove("VM_CPU")
        .env_remove("VM_ACCEL")
        .env_remove("VM_CORES");
    cmd
}

fn seed_record(home: &tempfile::TempDir, name: &str, port: u16) -> GuestRecord {
    let layout = Layout::under(home.path());
    let params = config::resolve_params(
        name.into(),
        "ghp_cli_token".into(),
        GitIdentity {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
        },
        &Overrides::default(),
        &Settings::default(),
        None,
    )
    .unwrap();
    let record = GuestRecord::new(&params, &layout.guest(name), port);
    record::save(&layout.record_path(name), &record).unwrap();
    record::set_current(&layout, name).unwrap();
    record
}

#[test]
fn help_works() {
    let home = tempfile::tempdir().unwrap();
    devvm(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Provision a local development VM"));
}

#[test]
fn provision_without_name_or_record_fails() {
    let home = tempfile::tempdir().unwrap();
    devvm(&home)
        .arg("provision")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing guest name"));
}

#[test]
fn provision_without_token_fails() {
    let home = tempfile::tempdir().unwrap();
    devvm(&home)
        .args(["provision", "dev"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing git token"));
    // failed before creating anything
    assert!(!home.path().join("data").exists());
}

#[test]
fn provision_rejects_bad_guest_name() {
    let home = tempfile::tempdir().unwrap();
    devvm(&home)
        .args(["provision", "bad name", "tok"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("guest name must match"));
}

#[test]
fn bad_settings_file_is_reported() {
    let home = tempfile::tempdir().unwrap();
    let settings = home.path().join("settings.toml");
    std::fs::write(&settings, "cores = \"many\"\n").unwrap();
    devvm(&home)
        .args(["--settings", settings.to_str().unwrap(), "provision", "dev", "tok"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse settings"));
}

#[test]
fn show_prints_ssh_stanza_of_current_guest() {
    let home = tempfile::tempdir().unwrap();
    seed_record(&home, "box", 2230);
    devvm(&home)
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("Host box"))
        .stdout(predicate::str::contains("Port 2230"))
        .stdout(predicate::str::contains("HostName 127.0.0.1"));
}

#[test]
fn show_named_guest() {
    let home = tempfile::tempdir().unwrap();
    seed_record(&home, "first", 2231);
    seed_record(&home, "second", 2232);
    devvm(&home)
        .args(["show", "first"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Port 2231"));
}

#[test]
fn show_unknown_guest_fails() {
    let home = tempfile::tempdir().unwrap();
    devvm(&home)
        .args(["show", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no guest named 'ghost'"));
}

#[test]
fn image_list_empty_cache() {
    let home = tempfile::tempdir().unwrap();
    devvm(&home)
        .args(["image", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached images."));
}

#[test]
fn image_list_and_delete() {
    let home = tempfile::tempdir().unwrap();
    let layout = Layout::under(home.path());
    let cached = layout.cached_image("ubuntu", "24.04", "noble.img");
    std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
    std::fs::write(&cached, b"qcow").unwrap();

    devvm(&home)
        .args(["image", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ubuntu-24.04/noble.img"));

    devvm(&home)
        .args(["image", "delete", "ubuntu-24.04/noble.img"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));
    assert!(!cached.exists());
}
