use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    temp: TempDir,
}

impl Env {
    /// Initialized root whose base directory holds two dotfiles
    fn new() -> Self {
        let env = Self {
            temp: TempDir::new().unwrap(),
        };
        env.write(".zshrc", "export EDITOR=nvim\n");
        env.write(".config/nvim/init.lua", "vim.opt.number = true\n");

        env.cmd().arg("init").assert().success();
        let home = env.home();
        env.cmd()
            .args(["config", "base_dir"])
            .arg(&home)
            .assert()
            .success();
        env.cmd()
            .args(["config", "sources", ".zshrc,.config/nvim"])
            .assert()
            .success();
        env
    }

    fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    fn root(&self) -> PathBuf {
        self.temp.path().join("root")
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.home().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("dot-backup").unwrap();
        cmd.env_remove("RUST_LOG").env("DOT_BACKUP_ROOT", self.root());
        cmd
    }
}

fn archive_of(root: &Path, name: &str) -> PathBuf {
    root.join("backups").join(name).join("data.tar.gz")
}

#[test]
fn test_create_and_list() {
    let env = Env::new();

    env.cmd()
        .args(["create", "full", "base", "first capture"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created full backup 'base'"))
        .stdout(predicate::str::contains("Files:    2"));

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("base"))
        .stdout(predicate::str::contains("Total: 1 backup(s)"));

    env.cmd()
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"base\""))
        .stdout(predicate::str::contains("\"type\": \"full\""));
}

#[test]
fn test_incremental_without_baseline_fails() {
    let env = Env::new();

    env.cmd()
        .args(["create", "incremental"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("No baseline"));
}

#[test]
fn test_unknown_backup_is_not_found() {
    let env = Env::new();

    env.cmd().args(["info", "missing"]).assert().code(3);
}

#[test]
fn test_invalid_type_is_rejected() {
    let env = Env::new();

    env.cmd()
        .args(["create", "weekly"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid backup type"));
}

#[test]
fn test_restore_chain_into_target() {
    let env = Env::new();
    env.cmd().args(["create", "full", "base"]).assert().success();
    env.write(".zshrc", "export EDITOR=hx\n");
    env.cmd()
        .args(["create", "incremental", "inc1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Baseline: base"));

    let target = env.temp.path().join("restore");
    env.cmd()
        .args(["restore", "inc1"])
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored 2 file(s) from 'inc1'"))
        .stdout(predicate::str::contains("Layers: base -> inc1"));

    assert_eq!(
        fs::read_to_string(target.join(".zshrc")).unwrap(),
        "export EDITOR=hx\n"
    );

    env.cmd()
        .args(["restore", "inc1"])
        .arg(&target)
        .assert()
        .code(8);
    env.cmd()
        .args(["restore", "inc1"])
        .arg(&target)
        .arg("--overwrite")
        .assert()
        .success();
}

#[test]
fn test_verify_reports_tampering() {
    let env = Env::new();
    env.cmd().args(["create", "full", "base"]).assert().success();

    env.cmd()
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 passed, 0 failed"));

    fs::write(archive_of(&env.root(), "base"), b"not an archive").unwrap();

    env.cmd()
        .args(["verify", "all"])
        .assert()
        .code(9)
        .stdout(predicate::str::contains("FAIL  base"));
    env.cmd()
        .args(["verify", "base", "--quiet"])
        .assert()
        .code(9)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_delete_with_dependents_requires_force() {
    let env = Env::new();
    env.cmd().args(["create", "full", "base"]).assert().success();
    env.cmd()
        .args(["create", "incremental", "inc1"])
        .assert()
        .success();

    env.cmd().args(["delete", "base"]).assert().code(2);
    env.cmd()
        .args(["delete", "base", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 'inc1'"))
        .stdout(predicate::str::contains("Deleted 'base'"));
    assert!(!env.root().join("backups").join("base").exists());
}

#[test]
fn test_config_roundtrip_and_validation() {
    let env = Env::new();

    env.cmd()
        .args(["config", "retention.daily", "3"])
        .assert()
        .success();
    env.cmd()
        .args(["config", "retention.daily"])
        .assert()
        .success()
        .stdout("3\n");
    env.cmd()
        .args(["config", "retention.hourly", "3"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown setting"));
}

#[test]
fn test_prune_dry_run_changes_nothing() {
    let env = Env::new();
    env.cmd().args(["create", "full", "base"]).assert().success();

    env.cmd()
        .args(["prune", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to prune"));
    env.cmd()
        .arg("list")
        .assert()
        .stdout(predicate::str::contains("base"));
}

#[test]
fn test_history_records_operations() {
    let env = Env::new();
    env.cmd().args(["create", "full", "base"]).assert().success();

    env.cmd()
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATE"))
        .stdout(predicate::str::contains("CONFIG"));
}

#[test]
fn test_export_and_import_into_new_root() {
    let env = Env::new();
    env.cmd().args(["create", "full", "base"]).assert().success();

    let bundle = env.temp.path().join("bundle.tar.gz");
    env.cmd()
        .arg("export")
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 backup(s)"));

    let other = env.temp.path().join("other");
    env.cmd()
        .arg("import")
        .arg(&bundle)
        .arg(&other)
        .assert()
        .success()
        .stdout(predicate::str::contains("Copied 1 backup(s)"));
    env.cmd()
        .arg("import")
        .arg(&bundle)
        .arg(&other)
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped 1 already present"));

    env.cmd()
        .arg("--root")
        .arg(&other)
        .arg("verify")
        .assert()
        .success();
}

#[test]
fn test_doctor_on_healthy_root() {
    let env = Env::new();

    env.cmd()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("No problems found"));
}

#[test]
fn test_uninitialized_root_is_a_config_error() {
    let temp = TempDir::new().unwrap();
    Command::cargo_bin("dot-backup")
        .unwrap()
        .arg("--root")
        .arg(temp.path().join("nowhere"))
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not initialized"));
}
