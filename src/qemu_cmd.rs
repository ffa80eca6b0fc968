use std::path::Path;

use crate::paths::GuestPaths;
use crate::record::GuestRecord;

pub const QEMU_BINARY: &str = "qemu-system-x86_64";

/// Escape a path for a qemu `-drive file=` style option (commas double up).
fn opt_path(path: &Path) -> String {
    path.display().to_string().replace(',', ",,")
}

/// Arguments shared by the first boot and the `start` script.
pub fn common_args(record: &GuestRecord) -> Vec<String> {
    vec![
        "-name".into(),
        record.name.clone(),
        "-machine".into(),
        format!("q35,accel={}", record.accel),
        "-cpu".into(),
        record.cpu.clone(),
        "-smp".into(),
        record.cores.to_string(),
        "-m".into(),
        record.memory_mb.to_string(),
        "-drive".into(),
        format!("file={},if=virtio,format=qcow2", opt_path(&record.disk)),
        "-netdev".into(),
        format!("user,id=net0,hostfwd=tcp:127.0.0.1:{}-:22", record.port),
        "-device".into(),
        "virtio-net-pci,netdev=net0".into(),
        "-device".into(),
        "virtio-rng-pci".into(),
        "-display".into(),
        "none".into(),
    ]
}

/// One-shot boot with the seed ISO attached. The guest powers itself off
/// once cloud-init finishes, and `-no-reboot` turns any reboot into an exit.
pub fn first_boot_args(record: &GuestRecord, guest: &GuestPaths) -> Vec<String> {
    let mut args = common_args(record);
    args.extend([
        "-drive".into(),
        format!("file={},media=cdrom,readonly=on", opt_path(&guest.seed_iso())),
        "-serial".into(),
        format!("file:{}", guest.first_boot_log().display()),
        "-no-reboot".into(),
    ]);
    args
}

/// Background boot used by the `start` script.
pub fn daemon_args(record: &GuestRecord, guest: &GuestPaths) -> Vec<String> {
    let mut args = common_args(record);
    args.extend([
        "-serial".into(),
        "none".into(),
        "-pidfile".into(),
        guest.pid_file().display().to_string(),
        "-daemonize".into(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;
    use std::path::PathBuf;

    fn guest() -> GuestPaths {
        GuestPaths {
            work: PathBuf::from("/data/dev"),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn common_args_carry_record_sizing() {
        let args = common_args(&sample_record());
        assert_eq!(value_after(&args, "-smp"), vec!["4"]);
        assert_eq!(value_after(&args, "-m"), vec!["8192"]);
        assert_eq!(value_after(&args, "-machine"), vec!["q35,accel=kvm"]);
        assert!(value_after(&args, "-netdev")[0].contains("hostfwd=tcp:127.0.0.1:2223-:22"));
    }

    #[test]
    fn first_boot_attaches_seed_and_never_reboots() {
        let args = first_boot_args(&sample_record(), &guest());
        let drives = value_after(&args, "-drive");
        assert_eq!(drives.len(), 2);
        assert!(drives[1].starts_with("file=/data/dev/seed.iso,media=cdrom"));
        assert!(args.contains(&"-no-reboot".to_string()));
        assert!(!args.contains(&"-daemonize".to_string()));
    }

    #[test]
    fn daemon_args_write_pidfile() {
        let args = daemon_args(&sample_record(), &guest());
        assert_eq!(value_after(&args, "-pidfile"), vec!["/data/dev/qemu.pid"]);
        assert_eq!(value_after(&args, "-drive").len(), 1);
    }

    #[test]
    fn commas_in_paths_are_escaped() {
        let mut record = sample_record();
        record.disk = PathBuf::from("/data/a,b/disk.qcow2");
        let args = common_args(&record);
        assert!(value_after(&args, "-drive")[0].starts_with("file=/data/a,,b/disk.qcow2,"));
    }
}
