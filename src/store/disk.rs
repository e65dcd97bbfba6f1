use std::path::Path;
use sysinfo::Disks;
use tracing::debug;

use crate::error::CourierError;

/// Available bytes on the volume holding `path`, by longest mount-point
/// prefix match. None when no mounted disk covers the path (container
/// filesystems, some tmpfs mounts).
pub fn probe_available(path: &Path) -> Option<u64> {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// The decision itself, separated from the probe so it stays testable.
pub fn require_free(available_bytes: u64, min_free_bytes: u64) -> Result<(), CourierError> {
    if available_bytes < min_free_bytes {
        return Err(CourierError::InsufficientDiskSpace {
            available_bytes,
            required_bytes: min_free_bytes,
        });
    }
    Ok(())
}

/// Verify the volume holding `path` has at least `min_free_bytes` available.
/// A floor of 0 disables the check; an unresolvable volume passes with a log
/// line rather than blocking capture.
pub fn ensure_free_space(path: &Path, min_free_bytes: u64) -> Result<(), CourierError> {
    if min_free_bytes == 0 {
        return Ok(());
    }

    match probe_available(path) {
        Some(available) => require_free(available, min_free_bytes),
        None => {
            debug!("No disk stats for {:?}, skipping free-space check", path);
            Ok(())
        }
    }
}
