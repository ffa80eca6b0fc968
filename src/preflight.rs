use tokio::process::Command;

use crate::config::GitIdentity;
use crate::error::DevvmError;
use crate::qemu_cmd::QEMU_BINARY;

/// Host tools devvm shells out to, with the package that provides each.
const REQUIRED: &[(&str, &str)] = &[
    ("qemu-img", "qemu-utils"),
    (QEMU_BINARY, "qemu-system-x86"),
    ("git", "git"),
    ("ssh", "openssh-client"),
];

/// Any one of these can build the cloud-init seed ISO.
const ISO_TOOLS: &[&str] = &["mkisofs", "genisoimage", "xorrisofs"];

/// What the preflight check found on this host.
#[derive(Debug, Clone)]
pub struct Tools {
    pub iso_tool: String,
}

async fn check_command(cmd: &str) -> bool {
    match Command::new(cmd).arg("--version").output().await {
        Ok(output) => {
            let version = String::from_utf8_lossy(&output.stdout);
            let first = version.lines().next().unwrap_or("installed");
            tracing::debug!(cmd, version = first.trim(), "found tool");
            true
        }
        // some tools exit non-zero on --version; spawning at all is enough
        Err(e) => {
            tracing::debug!(cmd, error = %e, "tool not found");
            false
        }
    }
}

/// Verify every external tool is present before anything touches disk.
pub async fn check_dependencies() -> Result<Tools, DevvmError> {
    for (tool, package) in REQUIRED {
        if !check_command(tool).await {
            return Err(DevvmError::MissingDependency {
                tool: tool.to_string(),
                package: package.to_string(),
            });
        }
    }

    for tool in ISO_TOOLS {
        if check_command(tool).await {
            return Ok(Tools {
                iso_tool: tool.to_string(),
            });
        }
    }
    Err(DevvmError::MissingDependency {
        tool: ISO_TOOLS.join(" / "),
        package: "genisoimage or xorriso".into(),
    })
}

async fn git_config(key: &str) -> Result<String, DevvmError> {
    let output = Command::new("git")
        .args(["config", "--get", key])
        .output()
        .await
        .map_err(DevvmError::io("running git config"))?;
    // exit status 1 just means the key is unset
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The operator's git identity. Empty fields are rejected later, when params resolve.
pub async fn git_identity() -> Result<GitIdentity, DevvmError> {
    Ok(GitIdentity {
        name: git_config("user.name").await?,
        email: git_config("user.email").await?,
    })
}
