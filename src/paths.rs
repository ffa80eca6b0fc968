use std::path::{Path, PathBuf};

/// Environment variable that relocates every devvm directory under one root.
pub const HOME_ENV: &str = "DEVVM_HOME";

/// Where devvm keeps its files on this host.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Settings, guest records, `current` pointer: `~/.config/devvm/`
    pub config_root: PathBuf,
    /// Per-guest work directories: `~/.local/share/devvm/`
    pub data_root: PathBuf,
    /// Shared base image cache: `~/.cache/devvm/images/`
    pub cache_root: PathBuf,
    /// The operator's SSH client configuration, scanned for reserved ports.
    pub ssh_config: PathBuf,
}

impl Layout {
    /// Resolve the layout from `DEVVM_HOME` if set, otherwise from the XDG dirs.
    pub fn discover() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Self::under(Path::new(&home));
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            config_root: dirs::config_dir()
                .unwrap_or_else(|| home.join(".config"))
                .join("devvm"),
            data_root: dirs::data_local_dir()
                .unwrap_or_else(|| home.join(".local/share"))
                .join("devvm"),
            cache_root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("devvm")
                .join("images"),
            ssh_config: home.join(".ssh").join("config"),
        }
    }

    /// Everything below a single directory. Used for `DEVVM_HOME` and tests.
    pub fn under(root: &Path) -> Self {
        Self {
            config_root: root.join("config"),
            data_root: root.join("data"),
            cache_root: root.join("cache").join("images"),
            ssh_config: root.join("ssh_config"),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_root.join("settings.toml")
    }

    pub fn guests_dir(&self) -> PathBuf {
        self.config_root.join("guests")
    }

    /// Persisted guest record, also usable as `ssh -F <path>`.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.guests_dir().join(format!("{name}.conf"))
    }

    /// File naming the most recently provisioned guest.
    pub fn current_path(&self) -> PathBuf {
        self.config_root.join("current")
    }

    /// Cached base image, keyed by distro and version.
    pub fn cached_image(&self, distro: &str, version: &str, file_name: &str) -> PathBuf {
        self.cache_root
            .join(format!("{distro}-{version}"))
            .join(file_name)
    }

    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.data_root.join(name)
    }

    pub fn guest(&self, name: &str) -> GuestPaths {
        GuestPaths {
            work: self.work_dir(name),
        }
    }
}

/// Files inside one guest's work directory.
#[derive(Debug, Clone)]
pub struct GuestPaths {
    pub work: PathBuf,
}

impl GuestPaths {
    pub fn disk(&self) -> PathBuf {
        self.work.join("disk.qcow2")
    }

    pub fn seed_iso(&self) -> PathBuf {
        self.work.join("seed.iso")
    }

    /// Staging directory for the cloud-init documents packed into the seed ISO.
    pub fn seed_dir(&self) -> PathBuf {
        self.work.join("cloud-init")
    }

    pub fn ssh_key(&self) -> PathBuf {
        self.work.join("id_ed25519")
    }

    pub fn ssh_pubkey(&self) -> PathBuf {
        self.work.join("id_ed25519.pub")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.work.join("qemu.pid")
    }

    pub fn first_boot_log(&self) -> PathBuf {
        self.work.join("first-boot.log")
    }

    pub fn first_boot_marker(&self) -> PathBuf {
        self.work.join("first-boot.done")
    }

    pub fn log_file(&self) -> PathBuf {
        self.work.join("devvm.log")
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.work.join(name)
    }
}
