//! Shared fixture for engine tests: a fake home directory with three
//! dotfiles and an initialized backup root next to it.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::manager::{BackupManager, CreateOptions};
use crate::config::paths::BackupPaths;
use crate::models::{BackupRecord, BackupType, Compression};
use crate::storage::Document;

pub struct Fixture {
    temp: TempDir,
    pub home: PathBuf,
    paths: BackupPaths,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_compression(Compression::Gzip)
    }

    pub fn with_compression(compression: Compression) -> Self {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        let paths = BackupPaths::with_root(temp.path().join("root"));

        let fixture = Self {
            temp,
            home,
            paths,
        };
        fixture.write(".zshrc", "export EDITOR=nvim\n");
        fixture.write(".gitconfig", "[user]\n  name = dev\n");
        fixture.write(".config/nvim/init.lua", "vim.opt.number = true\n");

        let manager = fixture.manager();
        manager.init(false).unwrap();
        let home = fixture.home.clone();
        manager
            .update_config(move |config| {
                config.base_dir = Some(home);
                config.sources = vec![".zshrc".into(), ".gitconfig".into(), ".config/nvim".into()];
                config.config_paths = vec![".zshrc".into(), ".gitconfig".into()];
                config.compression = compression;
                Ok(())
            })
            .unwrap();
        fixture
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    pub fn manager(&self) -> BackupManager {
        BackupManager::new(self.paths.clone())
    }

    pub fn document(&self) -> Document {
        self.manager().store().load().unwrap()
    }

    pub fn store_update(&self, f: impl FnOnce(&mut Document)) {
        self.manager()
            .store()
            .update(|doc| {
                f(doc);
                Ok(())
            })
            .unwrap();
    }

    pub fn create(&self, backup_type: BackupType, name: &str) -> BackupRecord {
        self.manager()
            .create(backup_type, CreateOptions::named(name))
            .unwrap()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        write_file(&self.home, relative, contents);
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.home.join(relative)).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.home.join(relative)).unwrap()
    }

    /// A fresh empty directory under the fixture's temp dir
    pub fn target(&self, name: &str) -> PathBuf {
        let dir = self.temp.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}

pub fn write_file(base: &Path, relative: &str, contents: &str) {
    let path = base.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}
