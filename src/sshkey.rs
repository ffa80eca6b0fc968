use std::path::Path;

use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};

use crate::error::DevvmError;

/// Generate a fresh Ed25519 key pair at `private_path` (+ `.pub`).
///
/// Any existing pair at that path is replaced. Returns the public key in
/// OpenSSH `authorized_keys` form.
pub fn generate_keypair(
    private_path: &Path,
    public_path: &Path,
    comment: &str,
) -> Result<String, DevvmError> {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|e| {
        DevvmError::KeyGen {
            message: e.to_string(),
        }
    })?;
    key.set_comment(comment);

    for path in [private_path, public_path] {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(DevvmError::Io {
                    context: format!("removing stale key {}", path.display()),
                    source: e,
                });
            }
            _ => {}
        }
    }

    // write_openssh_file creates the private key with mode 0600
    key.write_openssh_file(private_path, LineEnding::LF)
        .map_err(|e| DevvmError::KeyGen {
            message: format!("writing {}: {e}", private_path.display()),
        })?;

    let public = key
        .public_key()
        .to_openssh()
        .map_err(|e| DevvmError::KeyGen {
            message: e.to_string(),
        })?;
    std::fs::write(public_path, format!("{public}\n"))
        .map_err(DevvmError::io(format!("writing {}", public_path.display())))?;

    tracing::info!(path = %private_path.display(), "generated SSH key pair");
    Ok(public)
}
