use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backend::Backend;
use crate::config::ImageSettings;
use crate::error::DevvmError;
use crate::paths::Layout;

/// File name a downloaded image is cached under.
pub fn cache_file_name(url: &str) -> &str {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image.img")
}

/// Where the base image for `image` lives in the shared cache.
pub fn cached_path(layout: &Layout, image: &ImageSettings) -> PathBuf {
    layout.cached_image(&image.distro, &image.version, cache_file_name(&image.url))
}

/// Whether the base image is already available locally (no download needed).
pub fn is_cached(layout: &Layout, image: &ImageSettings) -> bool {
    cached_path(layout, image).exists()
}

/// Ensure the base image is in the shared cache, downloading it if needed.
///
/// A cached file is trusted as-is. Downloads land in a `.part` file that is
/// only renamed into place once complete.
pub async fn ensure_base_image<B: Backend>(
    backend: &B,
    layout: &Layout,
    image: &ImageSettings,
) -> Result<PathBuf, DevvmError> {
    let dest = cached_path(layout, image);
    if dest.exists() {
        tracing::info!(path = %dest.display(), "using cached base image");
        return Ok(dest);
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(DevvmError::io(format!("creating cache dir {}", parent.display())))?;
    }

    let tmp_path = dest.with_extension("part");
    // stale .part from an earlier failed download
    let _ = tokio::fs::remove_file(&tmp_path).await;

    if let Err(e) = backend.fetch(&image.url, &tmp_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&tmp_path, &dest)
        .await
        .map_err(DevvmError::io(format!(
            "renaming {} to {}",
            tmp_path.display(),
            dest.display()
        )))?;

    tracing::info!(path = %dest.display(), "base image cached");
    Ok(dest)
}

/// Copy the base image into the guest's work dir and grow it to `size`.
pub async fn prepare_disk<B: Backend>(
    backend: &B,
    base: &Path,
    disk: &Path,
    size: &str,
) -> Result<(), DevvmError> {
    if let Some(parent) = disk.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(DevvmError::io(format!("creating directory {}", parent.display())))?;
    }
    tokio::fs::copy(base, disk).await.map_err(DevvmError::io(format!(
        "copying {} to {}",
        base.display(),
        disk.display()
    )))?;
    backend.resize_disk(disk, size).await
}

// ── cache management ─────────────────────────────────────

/// One cached base image.
#[derive(Debug)]
pub struct CachedImage {
    /// `<distro>-<version>/<file>`, relative to the cache root.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<u64>,
}

/// Every completed file in the cache (in-flight `.part` downloads excluded).
pub fn cached_images(cache_root: &Path) -> Result<Vec<CachedImage>, DevvmError> {
    if !cache_root.exists() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    let dirs = std::fs::read_dir(cache_root)
        .map_err(DevvmError::io(format!("reading cache directory {}", cache_root.display())))?;
    for dir in dirs.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
        let files = std::fs::read_dir(dir.path())
            .map_err(DevvmError::io(format!("reading {}", dir.path().display())))?;
        for file in files.filter_map(|e| e.ok()) {
            let path = file.path();
            if !path.is_file() || path.extension().is_some_and(|ext| ext == "part") {
                continue;
            }
            let meta = file
                .metadata()
                .map_err(DevvmError::io(format!("reading metadata for {}", path.display())))?;
            images.push(CachedImage {
                name: format!(
                    "{}/{}",
                    dir.file_name().to_string_lossy(),
                    file.file_name().to_string_lossy()
                ),
                size: meta.len(),
                modified: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
                path,
            });
        }
    }
    images.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(images)
}

/// Print cached images with size and modification time.
pub fn list_cached(cache_root: &Path) -> Result<(), DevvmError> {
    let images = cached_images(cache_root)?;
    if images.is_empty() {
        println!("No cached images.");
        return Ok(());
    }
    let mut total = 0;
    for image in &images {
        total += image.size;
        let modified = image
            .modified
            .map(crate::logging::format_utc)
            .unwrap_or_else(|| "unknown".into());
        println!("  {}  {}  {}", image.name, format_size(image.size), modified);
    }
    println!("\n{} image(s), {} total", images.len(), format_size(total));
    Ok(())
}

/// Delete one cached image, named as `list` prints it.
pub fn delete_cached(cache_root: &Path, name: &str) -> Result<(), DevvmError> {
    let image = cached_images(cache_root)?
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| DevvmError::Io {
            context: format!("cached image '{name}' not found in {}", cache_root.display()),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        })?;
    std::fs::remove_file(&image.path)
        .map_err(DevvmError::io(format!("deleting {}", image.path.display())))?;
    println!("Deleted '{}' ({})", image.name, format_size(image.size));
    Ok(())
}

/// Delete all cached images.
pub fn clear_cache(cache_root: &Path) -> Result<(), DevvmError> {
    let images = cached_images(cache_root)?;
    if images.is_empty() {
        println!("No cached images.");
        return Ok(());
    }
    let total: u64 = images.iter().map(|i| i.size).sum();
    for image in &images {
        std::fs::remove_file(&image.path)
            .map_err(DevvmError::io(format!("deleting {}", image.path.display())))?;
    }
    println!("Deleted {} image(s) ({})", images.len(), format_size(total));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_file_name_from_url() {
        assert_eq!(
            cache_file_name("https://example.com/a/noble-server-cloudimg-amd64.img"),
            "noble-server-cloudimg-amd64.img"
        );
        assert_eq!(cache_file_name("https://example.com/"), "image.img");
    }

    #[test]
    fn cache_is_keyed_by_distro_and_version() {
        let layout = Layout::under(Path::new("/c"));
        let image = ImageSettings {
            url: "https://example.com/debian-12.qcow2".into(),
            distro: "debian".into(),
            version: "12".into(),
        };
        assert_eq!(
            cached_path(&layout, &image),
            PathBuf::from("/c/cache/images/debian-12/debian-12.qcow2")
        );
    }

    #[test]
    fn cached_images_skips_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("ubuntu-24.04");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("noble.img"), b"12345").unwrap();
        std::fs::write(sub.join("jammy.part"), b"1").unwrap();

        let images = cached_images(dir.path()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "ubuntu-24.04/noble.img");
        assert_eq!(images[0].size, 5);
    }

    #[test]
    fn delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("ubuntu-24.04");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("a.img"), b"a").unwrap();
        std::fs::write(sub.join("b.img"), b"b").unwrap();

        assert!(delete_cached(dir.path(), "ubuntu-24.04/missing.img").is_err());
        delete_cached(dir.path(), "ubuntu-24.04/a.img").unwrap();
        assert!(!sub.join("a.img").exists());

        clear_cache(dir.path()).unwrap();
        assert!(cached_images(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
