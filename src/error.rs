use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DevvmError {
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("required tool '{tool}' was not found on PATH")]
    #[diagnostic(help("install {package} and re-run"))]
    MissingDependency { tool: String, package: String },

    #[error("git {field} is not configured")]
    #[diagnostic(help("run `git config --global {field} <value>`"))]
    MissingIdentity { field: String },

    #[error("missing {what}: none given and none on record")]
    #[diagnostic(help("usage: devvm provision <guest-name> <git-token>"))]
    MissingArgument { what: String },

    #[error("no guest named '{name}' has been provisioned")]
    #[diagnostic(help("run `devvm provision {name} <git-token>` first"))]
    UnknownGuest { name: String },

    #[error("{what} for guest '{name}' is gone, but its disk has already been booted")]
    #[diagnostic(help(
        "cloud-init will not apply new media to a booted disk; remove {work} and {record} to reprovision from scratch"
    ))]
    BootedDiskMediaLost {
        name: String,
        what: String,
        work: String,
        record: String,
    },

    #[error("no free SSH port in {start}..={end}")]
    #[diagnostic(help("free a port in the range or widen `port_start`..`port_end` in settings.toml"))]
    NoFreePort { start: u16, end: u16 },

    #[error("image download failed: {message}")]
    ImageDownload {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{command} failed: {message}")]
    ExternalCommand { command: String, message: String },

    #[error("failed to parse guest record {path}: {message}")]
    StateParse { path: String, message: String },

    #[error("failed to load settings from {path}")]
    SettingsLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings from {path}: {message}")]
    SettingsParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("SSH key generation failed: {message}")]
    KeyGen { message: String },

    #[error("failed to render {what}: {message}")]
    Render { what: String, message: String },
}

impl DevvmError {
    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| DevvmError::Io { context, source }
    }
}
