use std::ops::RangeInclusive;
use std::path::Path;

use facet::Facet;

use crate::error::DevvmError;
use crate::paths::Layout;
use crate::record::GuestRecord;
use crate::util;

pub const DEFAULT_IMAGE_URL: &str =
    "https://cloud-images.ubuntu.com/releases/24.04/release/ubuntu-24.04-server-cloudimg-amd64.img";
pub const DEFAULT_DISTRO: &str = "ubuntu";
pub const DEFAULT_VERSION: &str = "24.04";
pub const DEFAULT_DISK_SIZE: &str = "40G";
pub const DEFAULT_MEMORY_PER_CORE_MB: u64 = 2048;
pub const DEFAULT_CORES: u32 = 2;
pub const DEFAULT_CPU: &str = "host";
pub const DEFAULT_ACCEL: &str = "kvm";
pub const DEFAULT_PORT_START: u16 = 2222;
pub const DEFAULT_PORT_END: u16 = 2299;
pub const DEFAULT_USER: &str = "dev";
pub const DEFAULT_GO_VERSION: &str = "1.23.2";
pub const DEFAULT_GIT_HOST: &str = "github.com";

pub const DEFAULT_PACKAGES: &[&str] = &[
    "build-essential",
    "curl",
    "git",
    "jq",
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "qemu-guest-agent",
];

// ── settings.toml ─────────────────────────────────────────

/// Optional host-wide defaults, read from `settings.toml`.
///
/// Every field is optional; anything left out falls back to the built-in
/// defaults above.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Settings {
    pub image: Option<ImageSettings>,
    pub disk_size: Option<String>,
    pub memory_per_core_mb: Option<u64>,
    pub cpu: Option<String>,
    pub accel: Option<String>,
    pub cores: Option<u32>,
    pub port_start: Option<u16>,
    pub port_end: Option<u16>,
    pub user: Option<String>,
    pub packages: Option<Vec<String>>,
    pub go_version: Option<String>,
    pub git_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ImageSettings {
    pub url: String,
    pub distro: String,
    pub version: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_IMAGE_URL.into(),
            distro: DEFAULT_DISTRO.into(),
            version: DEFAULT_VERSION.into(),
        }
    }
}

/// Load `settings.toml`. A missing file means "all defaults".
pub fn load_settings(path: &Path) -> Result<Settings, DevvmError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| DevvmError::SettingsLoad {
        path: path.display().to_string(),
        source,
    })?;
    let settings: Settings =
        facet_toml::from_str(&contents).map_err(|e| DevvmError::SettingsParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), DevvmError> {
    if let Some(size) = &settings.disk_size {
        util::parse_size(size)?;
    }
    if settings.memory_per_core_mb == Some(0) {
        return Err(DevvmError::Validation {
            message: "memory_per_core_mb must be greater than 0".into(),
        });
    }
    if settings.cores == Some(0) {
        return Err(DevvmError::Validation {
            message: "cores must be greater than 0".into(),
        });
    }
    let start = settings.port_start.unwrap_or(DEFAULT_PORT_START);
    let end = settings.port_end.unwrap_or(DEFAULT_PORT_END);
    if start == 0 || start > end {
        return Err(DevvmError::Validation {
            message: format!("invalid port range {start}..={end}"),
        });
    }
    if let Some(image) = &settings.image
        && (image.url.is_empty() || image.distro.is_empty() || image.version.is_empty())
    {
        return Err(DevvmError::Validation {
            message: "[image] needs non-empty url, distro and version".into(),
        });
    }
    Ok(())
}

// ── resolved parameters ───────────────────────────────────

/// Explicit per-invocation overrides from the command line / environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cpu: Option<String>,
    pub accel: Option<String>,
    pub cores: Option<u32>,
    pub disk_size: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Everything one `provision` run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ProvisionParams {
    pub name: String,
    pub token: String,
    pub git: GitIdentity,
    pub image: ImageSettings,
    pub disk_size: String,
    pub cpu: String,
    pub accel: String,
    pub cores: u32,
    pub memory_per_core_mb: u64,
    pub ports: RangeInclusive<u16>,
    pub user: String,
    pub packages: Vec<String>,
    pub go_version: String,
    pub git_host: String,
}

impl ProvisionParams {
    /// Guest memory grows linearly with the core count.
    pub fn memory_mb(&self) -> u64 {
        u64::from(self.cores) * self.memory_per_core_mb
    }
}

/// Pick the guest name: explicit argument first, then the current guest on record.
pub fn resolve_name(arg: Option<String>, layout: &Layout) -> Result<String, DevvmError> {
    let name = match arg {
        Some(n) => n,
        None => crate::record::current(layout)?.ok_or_else(|| DevvmError::MissingArgument {
            what: "guest name".into(),
        })?,
    };
    util::validate_name(&name)?;
    Ok(name)
}

pub fn resolve_token(
    arg: Option<String>,
    record: Option<&GuestRecord>,
) -> Result<String, DevvmError> {
    arg.filter(|t| !t.is_empty())
        .or_else(|| record.map(|r| r.git_token.clone()).filter(|t| !t.is_empty()))
        .ok_or_else(|| DevvmError::MissingArgument {
            what: "git token".into(),
        })
}

/// Merge overrides, the persisted record, settings and defaults, in that order.
pub fn resolve_params(
    name: String,
    token: String,
    git: GitIdentity,
    overrides: &Overrides,
    settings: &Settings,
    record: Option<&GuestRecord>,
) -> Result<ProvisionParams, DevvmError> {
    if git.name.is_empty() {
        return Err(DevvmError::MissingIdentity {
            field: "user.name".into(),
        });
    }
    if git.email.is_empty() {
        return Err(DevvmError::MissingIdentity {
            field: "user.email".into(),
        });
    }

    let cpu = overrides
        .cpu
        .clone()
        .or_else(|| record.map(|r| r.cpu.clone()))
        .or_else(|| settings.cpu.clone())
        .unwrap_or_else(|| DEFAULT_CPU.into());
    let accel = overrides
        .accel
        .clone()
        .or_else(|| record.map(|r| r.accel.clone()))
        .or_else(|| settings.accel.clone())
        .unwrap_or_else(|| DEFAULT_ACCEL.into());
    let cores = overrides
        .cores
        .or_else(|| record.map(|r| r.cores))
        .or(settings.cores)
        .unwrap_or(DEFAULT_CORES);
    if cores == 0 {
        return Err(DevvmError::Validation {
            message: "core count must be greater than 0".into(),
        });
    }
    let disk_size = overrides
        .disk_size
        .clone()
        .or_else(|| record.map(|r| r.disk_size.clone()))
        .or_else(|| settings.disk_size.clone())
        .unwrap_or_else(|| DEFAULT_DISK_SIZE.into());
    util::parse_size(&disk_size)?;

    let user = record
        .map(|r| r.user.clone())
        .or_else(|| settings.user.clone())
        .unwrap_or_else(|| DEFAULT_USER.into());
    util::validate_name(&user)?;

    let image = match record {
        Some(r) => r.image.clone(),
        None => settings.image.clone().unwrap_or_default(),
    };

    Ok(ProvisionParams {
        name,
        token,
        git,
        image,
        disk_size,
        cpu,
        accel,
        cores,
        memory_per_core_mb: settings
            .memory_per_core_mb
            .unwrap_or(DEFAULT_MEMORY_PER_CORE_MB),
        ports: settings.port_start.unwrap_or(DEFAULT_PORT_START)
            ..=settings.port_end.unwrap_or(DEFAULT_PORT_END),
        user,
        packages: settings
            .packages
            .clone()
            .unwrap_or_else(|| DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect()),
        go_version: settings
            .go_version
            .clone()
            .unwrap_or_else(|| DEFAULT_GO_VERSION.into()),
        git_host: settings
            .git_host
            .clone()
            .unwrap_or_else(|| DEFAULT_GIT_HOST.into()),
    })
}
