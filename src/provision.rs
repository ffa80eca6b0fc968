//! The provisioning pipeline.
//!
//! Each artifact (disk, first-boot media, first boot) carries its own state in
//! the guest record. A step runs only when its artifact is not `Complete`, and
//! the record is saved after every transition, so a rerun picks up exactly
//! where an interrupted one stopped.

use crate::backend::Backend;
use crate::cloudinit::{self, SeedConfig};
use crate::config::ProvisionParams;
use crate::error::DevvmError;
use crate::image;
use crate::logging::{self, DeferredFileHandle};
use crate::paths::{GuestPaths, Layout};
use crate::ports;
use crate::progress::{OutputMode, StepProgress};
use crate::qemu_cmd;
use crate::record::{self, ArtifactState, GuestRecord};
use crate::scripts;
use crate::sshkey;
use crate::util;

const TOTAL_STEPS: usize = 5;

/// Bring guest `params.name` to the fully provisioned state and return its record.
///
/// The guest's `devvm.log` is attached to `log` once a port is secured.
pub async fn provision<B: Backend>(
    backend: &B,
    layout: &Layout,
    params: &ProvisionParams,
    mode: OutputMode,
    log: &DeferredFileHandle,
) -> Result<GuestRecord, DevvmError> {
    let guest = layout.guest(&params.name);
    let record_path = layout.record_path(&params.name);
    let mut progress = StepProgress::new(TOTAL_STEPS, mode);

    // 1. port + record. Runs before any image work.
    let mut record = match record::load(&record_path)? {
        Some(mut existing) => {
            existing.apply(params);
            progress.skip(&format!("SSH port {} on record", existing.port));
            existing
        }
        None => {
            let reserved = ports::reserved_ports(layout)?;
            let port = progress
                .run("Selecting SSH port", async {
                    ports::select_port(params.ports.clone(), &reserved, ports::is_bound)
                })
                .await?;
            GuestRecord::new(params, &guest, port)
        }
    };
    verify_artifacts(&mut record, &guest, &record_path)?;

    std::fs::create_dir_all(&guest.work)
        .map_err(DevvmError::io(format!("creating directory {}", guest.work.display())))?;
    if let Err(e) = log.set_file(&guest.log_file()) {
        tracing::warn!("file logging disabled: {e}");
    }
    record::save(&record_path, &record)?;
    record::set_current(layout, &record.name)?;
    progress.info(&format!("ssh port 127.0.0.1:{}", record.port));

    if let Some(host_mb) = util::host_memory_mb()
        && record.memory_mb > host_mb
    {
        tracing::warn!(
            guest_mb = record.memory_mb,
            host_mb,
            "guest memory exceeds host memory"
        );
    }

    // 2. disk
    if record.disk_state.is_complete() {
        progress.skip("Disk ready");
    } else {
        if record.disk_state == ArtifactState::InProgress {
            tracing::info!(disk = %record.disk.display(), "discarding partial disk");
            remove_if_exists(&record.disk)?;
        }
        transition(&record_path, &mut record, |r| {
            r.disk_state = ArtifactState::InProgress;
            // a new disk has never been booted
            r.first_boot_state = ArtifactState::Missing;
        })?;

        let label = if image::is_cached(layout, &record.image) {
            "Preparing disk"
        } else {
            "Downloading image and preparing disk"
        };
        progress
            .run(label, async {
                let base = image::ensure_base_image(backend, layout, &record.image).await?;
                image::prepare_disk(backend, &base, &record.disk, &record.disk_size).await
            })
            .await?;

        transition(&record_path, &mut record, |r| {
            r.disk_state = ArtifactState::Complete
        })?;
    }

    // 3. first-boot media
    if record.media_state.is_complete() {
        progress.skip("First-boot media ready");
    } else {
        if record.media_state == ArtifactState::InProgress {
            tracing::info!("discarding partial first-boot media");
            remove_if_exists(&guest.seed_iso())?;
            remove_dir_if_exists(&guest.seed_dir())?;
        }
        transition(&record_path, &mut record, |r| {
            r.media_state = ArtifactState::InProgress;
            r.first_boot_state = ArtifactState::Missing;
        })?;

        progress
            .run("Generating SSH key and cloud-init media", async {
                let comment = format!("devvm@{}", record.name);
                let public_key =
                    sshkey::generate_keypair(&guest.ssh_key(), &guest.ssh_pubkey(), &comment)?;
                let seed = SeedConfig {
                    hostname: &record.name,
                    user: &record.user,
                    ssh_public_key: &public_key,
                    git: &params.git,
                    token: &params.token,
                    git_host: &params.git_host,
                    packages: &params.packages,
                    go_version: &params.go_version,
                    distro: &record.image.distro,
                };
                cloudinit::generate_seed(backend, &guest, &seed).await
            })
            .await?;

        transition(&record_path, &mut record, |r| {
            r.media_state = ArtifactState::Complete
        })?;
    }

    // 4. control scripts, always rewritten from the current record
    progress
        .run("Writing control scripts", async {
            scripts::write_scripts(&record, &guest, &record_path)
        })
        .await?;

    // 5. first boot
    if record.first_boot_state.is_complete() {
        progress.skip("First boot done");
    } else {
        transition(&record_path, &mut record, |r| {
            r.first_boot_state = ArtifactState::InProgress
        })?;
        progress.info(&format!(
            "console log: {}",
            guest.first_boot_log().display()
        ));

        let args = qemu_cmd::first_boot_args(&record, &guest);
        progress
            .run("First boot (waiting for guest to power off)", backend.boot(&args))
            .await?;

        let marker = guest.first_boot_marker();
        std::fs::write(&marker, format!("{}\n", logging::utc_timestamp()))
            .map_err(DevvmError::io(format!("writing {}", marker.display())))?;
        transition(&record_path, &mut record, |r| {
            r.first_boot_state = ArtifactState::Complete
        })?;
    }

    tracing::info!(name = %record.name, port = record.port, "guest provisioned");
    Ok(record)
}

/// Mutate the record and persist it before moving on.
fn transition(
    path: &std::path::Path,
    record: &mut GuestRecord,
    change: impl FnOnce(&mut GuestRecord),
) -> Result<(), DevvmError> {
    change(record);
    tracing::debug!(
        disk = %record.disk_state,
        media = %record.media_state,
        first_boot = %record.first_boot_state,
        "artifact states"
    );
    record::save(path, record)
}

/// Reconcile `Complete` artifacts with what is actually on disk.
///
/// A lost disk is rebuilt and goes through first boot again. Lost media can
/// only be regenerated while the disk has never been booted: cloud-init keys
/// on the instance-id and ignores new media on a disk it already initialized.
fn verify_artifacts(
    record: &mut GuestRecord,
    guest: &GuestPaths,
    record_path: &std::path::Path,
) -> Result<(), DevvmError> {
    if record.disk_state.is_complete() && !record.disk.exists() {
        tracing::warn!(disk = %record.disk.display(), "disk on record is missing, rebuilding");
        record.disk_state = ArtifactState::Missing;
        record.first_boot_state = ArtifactState::Missing;
    }

    let disk_booted =
        record.disk_state.is_complete() && record.first_boot_state != ArtifactState::Missing;

    if record.media_state.is_complete() {
        let lost = [guest.seed_iso(), guest.ssh_key()]
            .into_iter()
            .find(|p| !p.exists());
        if let Some(lost) = lost {
            if disk_booted {
                return Err(DevvmError::BootedDiskMediaLost {
                    name: record.name.clone(),
                    what: lost.display().to_string(),
                    work: guest.work.display().to_string(),
                    record: record_path.display().to_string(),
                });
            }
            tracing::warn!(path = %lost.display(), "first-boot media is missing, regenerating");
            record.media_state = ArtifactState::Missing;
        }
    }

    let marker = guest.first_boot_marker();
    if record.first_boot_state.is_complete() && !marker.exists() {
        // the record is authoritative; booting an initialized disk again would never return
        tracing::warn!(path = %marker.display(), "first-boot marker is missing, restoring it");
        std::fs::write(&marker, format!("{}\n", record.created))
            .map_err(DevvmError::io(format!("writing {}", marker.display())))?;
    }
    Ok(())
}

fn remove_if_exists(path: &std::path::Path) -> Result<(), DevvmError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(DevvmError::Io {
            context: format!("removing {}", path.display()),
            source: e,
        }),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &std::path::Path) -> Result<(), DevvmError> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(DevvmError::Io {
            context: format!("removing {}", path.display()),
            source: e,
        }),
        _ => Ok(()),
    }
}
