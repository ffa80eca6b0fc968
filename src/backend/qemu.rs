use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

use crate::error::DevvmError;
use crate::qemu_cmd::QEMU_BINARY;

/// Backend that shells out to qemu tooling and downloads with reqwest.
pub struct QemuBackend {
    iso_tool: String,
}

impl QemuBackend {
    /// `iso_tool` is whichever of mkisofs/genisoimage/xorrisofs preflight found.
    pub fn new(iso_tool: impl Into<String>) -> Self {
        Self {
            iso_tool: iso_tool.into(),
        }
    }
}

impl super::Backend for QemuBackend {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DevvmError> {
        tracing::info!(url, "downloading base image");

        let response = reqwest::get(url)
            .await
            .map_err(|e| DevvmError::ImageDownload {
                message: format!("request to {url} failed"),
                source: Box::new(e),
            })?;

        if !response.status().is_success() {
            return Err(DevvmError::ImageDownload {
                message: format!("HTTP {} from {url}", response.status()),
                source: format!("HTTP {}", response.status()).into(),
            });
        }

        let pb = ProgressBar::new(response.content_length().unwrap_or(0));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let result = download_to_file(dest, response, &pb).await;
        pb.finish_and_clear();
        result
    }

    async fn resize_disk(&self, disk: &Path, size: &str) -> Result<(), DevvmError> {
        run_tool(
            "qemu-img",
            [OsStr::new("resize"), disk.as_os_str(), OsStr::new(size)],
        )
        .await?;
        tracing::info!(path = %disk.display(), size, "resized disk");
        Ok(())
    }

    async fn pack_seed(&self, src_dir: &Path, iso: &Path) -> Result<(), DevvmError> {
        run_tool(
            &self.iso_tool,
            [
                OsStr::new("-output"),
                iso.as_os_str(),
                OsStr::new("-volid"),
                OsStr::new("cidata"),
                OsStr::new("-joliet"),
                OsStr::new("-rock"),
                src_dir.as_os_str(),
            ],
        )
        .await?;
        tracing::info!(path = %iso.display(), "packed cloud-init seed ISO");
        Ok(())
    }

    async fn boot(&self, args: &[String]) -> Result<(), DevvmError> {
        tracing::info!(?args, "starting first boot");
        run_tool(QEMU_BINARY, args).await?;
        tracing::info!("guest powered off");
        Ok(())
    }
}

/// Stream a response body to a file, updating the progress bar as chunks arrive.
async fn download_to_file(
    path: &Path,
    response: reqwest::Response,
    pb: &ProgressBar,
) -> Result<(), DevvmError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(DevvmError::io(format!("creating {}", path.display())))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DevvmError::ImageDownload {
            message: "error reading response body".into(),
            source: Box::new(e),
        })?;
        file.write_all(&chunk)
            .await
            .map_err(DevvmError::io("writing image data"))?;
        pb.inc(chunk.len() as u64);
    }

    file.flush()
        .await
        .map_err(DevvmError::io("flushing image file"))?;
    Ok(())
}

/// Run an external tool to completion; a non-zero exit becomes `ExternalCommand`.
async fn run_tool<I, S>(program: &str, args: I) -> Result<Output, DevvmError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(DevvmError::io(format!("running {program}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DevvmError::ExternalCommand {
            command: program.into(),
            message: if stderr.trim().is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            },
        });
    }
    Ok(output)
}
