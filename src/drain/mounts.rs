//! Mount table inspection for storage-plugin pods
//!
//! Parses `/proc/mounts` output read from inside the plugin container and
//! picks out the raw-block volume mounts kubelet publishes for CSI block
//! devices.

/// Path fragment identifying raw-block publish/staging mounts
pub const RAW_BLOCK_MARKER: &str = "/volumeDevices/";

/// One line of a mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
}

/// Parse `/proc/mounts` formatted text. Malformed lines are ignored.
pub fn parse_mount_table(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: unescape(source),
                target: unescape(target),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Distinct raw-block mount targets, in first-seen order.
pub fn raw_block_targets(table: &str, marker: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for entry in parse_mount_table(table) {
        if entry.target.contains(marker) && !targets.contains(&entry.target) {
            targets.push(entry.target);
        }
    }
    targets
}

/// Decode the octal escapes (`\040` for space etc.) the kernel writes.
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3
        && (b'0'..=b'3').contains(&digits[0])
        && digits[1..].iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
overlay / overlay rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
devtmpfs /var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/publish/pvc-1/pod-a devtmpfs rw 0 0
/dev/rbd0 /var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/staging/pvc-2 ext4 rw 0 0
/dev/sda1 /var/lib/kubelet/pods/abc/volumes/kubernetes.io~csi/pvc-3/mount ext4 rw 0 0
";

    #[test]
    fn test_parse_mount_table() {
        let entries = parse_mount_table(TABLE);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3].source, "/dev/rbd0");
        assert_eq!(entries[3].fstype, "ext4");
    }

    #[test]
    fn test_raw_block_targets() {
        let targets = raw_block_targets(TABLE, RAW_BLOCK_MARKER);
        assert_eq!(
            targets,
            vec![
                "/var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/publish/pvc-1/pod-a",
                "/var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/staging/pvc-2",
            ]
        );
    }

    #[test]
    fn test_duplicate_targets_collapse() {
        let table = "\
devtmpfs /x/volumeDevices/publish/pvc-1/a devtmpfs rw 0 0
devtmpfs /x/volumeDevices/publish/pvc-1/a devtmpfs rw 0 0
";
        assert_eq!(raw_block_targets(table, RAW_BLOCK_MARKER).len(), 1);
    }

    #[test]
    fn test_octal_escapes() {
        let table = "devtmpfs /x/volumeDevices/my\\040vol devtmpfs rw 0 0\n";
        assert_eq!(
            raw_block_targets(table, RAW_BLOCK_MARKER),
            vec!["/x/volumeDevices/my vol"]
        );
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(raw_block_targets("", RAW_BLOCK_MARKER).is_empty());
        assert!(parse_mount_table("lonely\n\n").is_empty());
    }
}
