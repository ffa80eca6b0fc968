//! Persisted guest record.
//!
//! One file per guest under `guests/<name>.conf`. The file is two things at
//! once: `# key = value` header lines carry the provisioning state, and the
//! `Host` stanza that follows is a valid SSH client configuration, so
//! `ssh -F guests/dev.conf dev` logs straight in.
//!
//! Every artifact the provisioner produces has an explicit [`ArtifactState`]
//! in the record. Saves go through a temp file and a rename, so an interrupted
//! run leaves either the old record or the new one, never a torn file.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{ImageSettings, ProvisionParams};
use crate::error::DevvmError;
use crate::paths::{GuestPaths, Layout};

/// Progress of one provisioning artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Never attempted.
    Missing,
    /// Started but not confirmed finished. Whatever is on disk is untrusted.
    InProgress,
    /// Finished and verified by the step that produced it.
    Complete,
}

impl ArtifactState {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactState::Missing => "missing",
            ArtifactState::InProgress => "in-progress",
            ArtifactState::Complete => "complete",
        }
    }

    pub fn is_complete(self) -> bool {
        self == ArtifactState::Complete
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(ArtifactState::Missing),
            "in-progress" => Ok(ArtifactState::InProgress),
            "complete" => Ok(ArtifactState::Complete),
            other => Err(format!("unknown artifact state '{other}'")),
        }
    }
}

/// Everything known about one provisioned guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRecord {
    pub name: String,
    pub user: String,
    pub image: ImageSettings,
    pub disk: PathBuf,
    pub disk_size: String,
    pub cpu: String,
    pub accel: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub port: u16,
    pub ssh_key: PathBuf,
    pub git_name: String,
    pub git_email: String,
    pub git_token: String,
    pub created: String,
    pub disk_state: ArtifactState,
    pub media_state: ArtifactState,
    pub first_boot_state: ArtifactState,
}

impl GuestRecord {
    /// A fresh record for a guest that has only been assigned a port.
    pub fn new(params: &ProvisionParams, guest: &GuestPaths, port: u16) -> Self {
        Self {
            name: params.name.clone(),
            user: params.user.clone(),
            image: params.image.clone(),
            disk: guest.disk(),
            disk_size: params.disk_size.clone(),
            cpu: params.cpu.clone(),
            accel: params.accel.clone(),
            cores: params.cores,
            memory_mb: params.memory_mb(),
            port,
            ssh_key: guest.ssh_key(),
            git_name: params.git.name.clone(),
            git_email: params.git.email.clone(),
            git_token: params.token.clone(),
            created: crate::logging::utc_timestamp(),
            disk_state: ArtifactState::Missing,
            media_state: ArtifactState::Missing,
            first_boot_state: ArtifactState::Missing,
        }
    }

    /// Take over the operational parameters of this run.
    ///
    /// The disk size only changes while the disk has not been built yet.
    pub fn apply(&mut self, params: &ProvisionParams) {
        self.cpu = params.cpu.clone();
        self.accel = params.accel.clone();
        self.cores = params.cores;
        self.memory_mb = params.memory_mb();
        self.git_name = params.git.name.clone();
        self.git_email = params.git.email.clone();
        self.git_token = params.token.clone();
        if !self.disk_state.is_complete() {
            self.disk_size = params.disk_size.clone();
            self.image = params.image.clone();
        }
    }

    fn header(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("user", self.user.clone()),
            ("image_url", self.image.url.clone()),
            ("image_distro", self.image.distro.clone()),
            ("image_version", self.image.version.clone()),
            ("disk", self.disk.display().to_string()),
            ("disk_size", self.disk_size.clone()),
            ("cpu", self.cpu.clone()),
            ("accel", self.accel.clone()),
            ("cores", self.cores.to_string()),
            ("memory_mb", self.memory_mb.to_string()),
            ("git_name", self.git_name.clone()),
            ("git_email", self.git_email.clone()),
            ("git_token", self.git_token.clone()),
            ("created", self.created.clone()),
            ("disk_state", self.disk_state.to_string()),
            ("media_state", self.media_state.to_string()),
            ("first_boot_state", self.first_boot_state.to_string()),
        ]
    }

    /// Render the record file. Also what `provision` prints on success.
    pub fn render(&self) -> String {
        let mut out = format!(
            "# devvm guest record, usable as `ssh -F <this file> {}`\n",
            self.name
        );
        for (key, value) in self.header() {
            out.push_str(&format!("# {key} = {value}\n"));
        }
        out.push_str(&format!(
            "Host {name}\n\
             \x20   HostName 127.0.0.1\n\
             \x20   Port {port}\n\
             \x20   User {user}\n\
             \x20   IdentityFile {key}\n\
             \x20   IdentitiesOnly yes\n\
             \x20   StrictHostKeyChecking no\n\
             \x20   UserKnownHostsFile /dev/null\n\
             \x20   LogLevel ERROR\n",
            name = self.name,
            port = self.port,
            user = self.user,
            key = self.ssh_key.display(),
        ));
        out
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, DevvmError> {
        let err = |message: String| DevvmError::StateParse {
            path: path.display().to_string(),
            message,
        };

        let mut header = BTreeMap::new();
        let mut stanza = BTreeMap::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(kv) = line.trim_start().strip_prefix("# ") {
                if let Some((k, v)) = kv.split_once(" = ") {
                    header.insert(k.trim().to_string(), v.to_string());
                }
            } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
                let (k, v) = trimmed
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| err(format!("malformed line '{trimmed}'")))?;
                stanza.insert(k.to_ascii_lowercase(), v.trim().to_string());
            }
        }

        let get = |key: &str| -> Result<String, DevvmError> {
            header
                .get(key)
                .cloned()
                .ok_or_else(|| err(format!("missing '{key}'")))
        };
        let state = |key: &str| -> Result<ArtifactState, DevvmError> {
            get(key)?.parse().map_err(err)
        };
        let number = |key: &str, value: String| -> Result<u64, DevvmError> {
            value
                .parse()
                .map_err(|_| err(format!("'{key}' is not a number: '{value}'")))
        };

        let port = stanza
            .get("port")
            .cloned()
            .ok_or_else(|| err("missing 'Port' in Host stanza".into()))?;
        let ssh_key = stanza
            .get("identityfile")
            .cloned()
            .ok_or_else(|| err("missing 'IdentityFile' in Host stanza".into()))?;

        Ok(Self {
            name: get("name")?,
            user: get("user")?,
            image: ImageSettings {
                url: get("image_url")?,
                distro: get("image_distro")?,
                version: get("image_version")?,
            },
            disk: PathBuf::from(get("disk")?),
            disk_size: get("disk_size")?,
            cpu: get("cpu")?,
            accel: get("accel")?,
            cores: u32::try_from(number("cores", get("cores")?)?)
                .map_err(|_| err("'cores' out of range".into()))?,
            memory_mb: number("memory_mb", get("memory_mb")?)?,
            port: u16::try_from(number("Port", port)?)
                .map_err(|_| err("'Port' out of range".into()))?,
            ssh_key: PathBuf::from(ssh_key),
            git_name: get("git_name")?,
            git_email: get("git_email")?,
            git_token: get("git_token")?,
            created: get("created")?,
            disk_state: state("disk_state")?,
            media_state: state("media_state")?,
            first_boot_state: state("first_boot_state")?,
        })
    }
}

/// Load a guest record. `Ok(None)` when the guest was never provisioned.
pub fn load(path: &Path) -> Result<Option<GuestRecord>, DevvmError> {
    match std::fs::read_to_string(path) {
        Ok(text) => GuestRecord::parse(&text, path).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DevvmError::Io {
            context: format!("reading guest record {}", path.display()),
            source: e,
        }),
    }
}

/// Persist a record atomically: write a sibling temp file, then rename over.
pub fn save(path: &Path, record: &GuestRecord) -> Result<(), DevvmError> {
    if let Some((key, _)) = record.header().iter().find(|(_, v)| v.contains('\n')) {
        return Err(DevvmError::Validation {
            message: format!("record field '{key}' must not contain a newline"),
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(DevvmError::io(format!("creating directory {}", parent.display())))?;
    }
    let tmp = path.with_extension("conf.tmp");
    // the record carries the git token
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .map_err(DevvmError::io(format!("creating {}", tmp.display())))?;
    file.write_all(record.render().as_bytes())
        .map_err(DevvmError::io(format!("writing {}", tmp.display())))?;
    drop(file);
    std::fs::rename(&tmp, path).map_err(DevvmError::io(format!(
        "renaming {} to {}",
        tmp.display(),
        path.display()
    )))?;
    tracing::debug!(path = %path.display(), "guest record saved");
    Ok(())
}

/// The most recently provisioned guest, if any.
pub fn current(layout: &Layout) -> Result<Option<String>, DevvmError> {
    let path = layout.current_path();
    match std::fs::read_to_string(&path) {
        Ok(name) => {
            let name = name.trim();
            Ok((!name.is_empty()).then(|| name.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DevvmError::Io {
            context: format!("reading {}", path.display()),
            source: e,
        }),
    }
}

pub fn set_current(layout: &Layout, name: &str) -> Result<(), DevvmError> {
    let path = layout.current_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(DevvmError::io(format!("creating directory {}", parent.display())))?;
    }
    std::fs::write(&path, format!("{name}\n"))
        .map_err(DevvmError::io(format!("writing {}", path.display())))
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn sample_record() -> GuestRecord {
        GuestRecord {
            name: "dev".into(),
            user: "dev".into(),
            image: ImageSettings::default(),
            disk: PathBuf::from("/data/dev/disk.qcow2"),
            disk_size: "40G".into(),
            cpu: "host".into(),
            accel: "kvm".into(),
            cores: 4,
            memory_mb: 8192,
            port: 2223,
            ssh_key: PathBuf::from("/data/dev/id_ed25519"),
            git_name: "Ada Lovelace".into(),
            git_email: "ada@example.com".into(),
            git_token: "ghp_abc".into(),
            created: "2026-10-19T08-00-00".into(),
            disk_state: ArtifactState::Complete,
            media_state: ArtifactState::InProgress,
            first_boot_state: ArtifactState::Missing,
        }
    }

    #[test]
    fn render_then_parse_preserves_record() {
        let record = sample_record();
        let text = record.render();
        let parsed = GuestRecord::parse(&text, Path::new("dev.conf")).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn rendered_record_is_an_ssh_config_stanza() {
        let text = sample_record().render();
        let stanza = &text[text.find("Host dev\n").unwrap()..];
        assert!(stanza.contains("    HostName 127.0.0.1\n"));
        assert!(stanza.contains("    Port 2223\n"));
        assert!(stanza.contains("    IdentityFile /data/dev/id_ed25519\n"));
        assert!(stanza.contains("    StrictHostKeyChecking no\n"));
        // everything before the stanza is an ssh comment
        assert!(text[..text.find("Host dev\n").unwrap()]
            .lines()
            .all(|l| l.starts_with('#')));
    }

    #[test]
    fn parse_reports_missing_fields() {
        let err = GuestRecord::parse(
            "# name = dev\nHost dev\n    Port 2222\n    IdentityFile /k\n",
            Path::new("x"),
        )
        .unwrap_err();
        assert!(matches!(err, DevvmError::StateParse { message, .. } if message.contains("user")));
    }

    #[test]
    fn parse_rejects_unknown_state() {
        let text = sample_record()
            .render()
            .replace("disk_state = complete", "disk_state = done");
        assert!(GuestRecord::parse(&text, Path::new("x")).is_err());
    }

    #[test]
    fn save_is_atomic_and_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guests").join("dev.conf");
        assert_eq!(load(&path).unwrap(), None);

        let record = sample_record();
        save(&path, &record).unwrap();
        assert!(!path.with_extension("conf.tmp").exists());
        assert_eq!(load(&path).unwrap(), Some(record));

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn save_rejects_multiline_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = sample_record();
        record.git_name = "Ada\nHost evil".into();
        assert!(save(&dir.path().join("dev.conf"), &record).is_err());
    }

    #[test]
    fn apply_keeps_disk_size_once_disk_is_built() {
        let mut record = sample_record();
        let mut params = crate::config::tests::test_params("dev");
        params.disk_size = "80G".into();
        params.cores = 6;
        record.apply(&params);
        assert_eq!(record.disk_size, "40G");
        assert_eq!(record.cores, 6);
        assert_eq!(record.memory_mb, 6 * params.memory_per_core_mb);

        record.disk_state = ArtifactState::InProgress;
        record.apply(&params);
        assert_eq!(record.disk_size, "80G");
    }
}
