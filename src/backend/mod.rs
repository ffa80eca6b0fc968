pub mod qemu;

use std::path::Path;

use crate::error::DevvmError;

/// Host-side operations that reach outside the process: network, disk
/// tooling, ISO packaging, and running the guest.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Backend {
    /// Download `url` into `dest`, overwriting it.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DevvmError>;

    /// Grow a disk image to `size` (e.g. `"40G"`).
    async fn resize_disk(&self, disk: &Path, size: &str) -> Result<(), DevvmError>;

    /// Pack every file in `src_dir` into a `cidata` ISO at `iso`.
    async fn pack_seed(&self, src_dir: &Path, iso: &Path) -> Result<(), DevvmError>;

    /// Run the guest in the foreground until it powers off.
    async fn boot(&self, args: &[String]) -> Result<(), DevvmError>;
}

pub fn create_backend(iso_tool: impl Into<String>) -> qemu::QemuBackend {
    qemu::QemuBackend::new(iso_tool)
}
