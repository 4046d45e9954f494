use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::core::UpdateError;

/// SHA-256 verification of downloaded packages.
///
/// Release packages may be published with a digest. When the caller supplies
/// one, the download is checked before anything else happens; a mismatch is an
/// integrity failure, so the update stops before the backup or any file copy.
/// The digest of every package is also written to the session log for later
/// diagnosis.
///
/// Digests are lowercase hex. Expected values may carry a `sha256:` prefix and
/// any letter case.
///
/// # Examples
///
/// ```rust,no_run
/// use overlay_updater::upgrade::verification::ChecksumVerifier;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let package = Path::new("temp/update_1.6.0.zip");
/// let digest = ChecksumVerifier::compute_sha256(package).await?;
/// println!("sha256 {digest}");
///
/// ChecksumVerifier::verify_checksum(package, "sha256:9f86d0...").await?;
/// # Ok(())
/// # }
/// ```
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Hex SHA-256 of a file, read in chunks.
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let mut file = File::open(file_path)
            .await
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Fail with [`UpdateError::ChecksumMismatch`] unless the file hashes to `expected`.
    ///
    /// Returns the actual digest on success.
    pub async fn verify_checksum(file_path: &Path, expected_checksum: &str) -> Result<String> {
        info!("Verifying checksum for: {}", file_path.display());

        let actual = Self::compute_sha256(file_path).await?;
        let expected = normalize_digest(expected_checksum);

        if actual != expected {
            return Err(UpdateError::ChecksumMismatch {
                expected,
                actual,
            }
            .into());
        }

        info!("Checksum verification successful");
        Ok(actual)
    }
}

fn normalize_digest(digest: &str) -> String {
    let digest = digest.trim();
    let digest = digest
        .strip_prefix("sha256:")
        .or_else(|| digest.strip_prefix("SHA256:"))
        .unwrap_or(digest);
    digest.to_ascii_lowercase()
}
