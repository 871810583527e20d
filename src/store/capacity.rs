use std::path::Path;
use sysinfo::Disks;

/// Free space on the disk holding `path`.
///
/// Picks the mount point that is the longest prefix of the path. Returns
/// `None` when the path cannot be resolved or no disk matches.
pub fn available_space(path: &Path) -> Option<u64> {
    let target = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();

    disks
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
