use std::collections::BTreeSet;
use std::net::TcpListener;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::error::DevvmError;
use crate::paths::Layout;

/// Ports named by `Port` directives in an SSH client configuration.
///
/// Accepts both `Port 2222` and `Port=2222`, keywords are case-insensitive.
pub fn ssh_config_ports(text: &str) -> BTreeSet<u16> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once(|c: char| c.is_whitespace() || c == '=')?;
            if !key.eq_ignore_ascii_case("port") {
                return None;
            }
            value.trim_start_matches(['=', ' ', '\t']).trim().parse().ok()
        })
        .collect()
}

fn ports_in_file(path: &Path) -> Result<BTreeSet<u16>, DevvmError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(ssh_config_ports(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(DevvmError::Io {
            context: format!("reading {}", path.display()),
            source: e,
        }),
    }
}

/// Every port already claimed by the operator's SSH config or another guest record.
pub fn reserved_ports(layout: &Layout) -> Result<BTreeSet<u16>, DevvmError> {
    let mut reserved = ports_in_file(&layout.ssh_config)?;

    let guests = layout.guests_dir();
    let entries = match std::fs::read_dir(&guests) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(reserved),
        Err(e) => {
            return Err(DevvmError::Io {
                context: format!("reading {}", guests.display()),
                source: e,
            });
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "conf") {
            reserved.extend(ports_in_file(&path)?);
        }
    }
    Ok(reserved)
}

/// Whether something on this host is already listening on `port`.
pub fn is_bound(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}

/// First port in `range` that is neither reserved nor bound.
pub fn select_port(
    range: RangeInclusive<u16>,
    reserved: &BTreeSet<u16>,
    is_bound: impl Fn(u16) -> bool,
) -> Result<u16, DevvmError> {
    let (start, end) = (*range.start(), *range.end());
    let port = range
        .filter(|p| !reserved.contains(p))
        .find(|&p| !is_bound(p))
        .ok_or(DevvmError::NoFreePort { start, end })?;
    tracing::debug!(port, reserved = reserved.len(), "selected SSH port");
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_directives() {
        let text = "\
Host a
    HostName a.example
    Port 2222
Host b
  port=2300
# Port 2400
Host c
    Port = 2500
    ProxyJump bastion
";
        let ports = ssh_config_ports(text);
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![2222, 2300, 2500]);
    }

    #[test]
    fn skips_bound_ports() {
        let bound: BTreeSet<u16> = [2222, 2223, 2224].into();
        let port = select_port(2222..=2299, &BTreeSet::new(), |p| bound.contains(&p)).unwrap();
        assert_eq!(port, 2225);
    }

    #[test]
    fn never_returns_a_configured_port() {
        let bound: BTreeSet<u16> = [2222, 2223, 2224].into();
        let reserved: BTreeSet<u16> = [2225, 2226].into();
        let port = select_port(2222..=2299, &reserved, |p| bound.contains(&p)).unwrap();
        assert_eq!(port, 2227);
    }

    #[test]
    fn exhausted_range_is_an_error() {
        let err = select_port(2222..=2224, &BTreeSet::new(), |_| true).unwrap_err();
        assert!(matches!(err, DevvmError::NoFreePort { start: 2222, end: 2224 }));
    }

    #[test]
    fn real_listener_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_bound(port));
        assert!(select_port(port..=port, &BTreeSet::new(), is_bound).is_err());
    }

    #[test]
    fn reserved_ports_include_ssh_config_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::under(dir.path());
        std::fs::write(&layout.ssh_config, "Host work\n    Port 2230\n").unwrap();
        std::fs::create_dir_all(layout.guests_dir()).unwrap();
        std::fs::write(
            layout.record_path("other"),
            crate::record::tests::sample_record().render(),
        )
        .unwrap();
        std::fs::write(layout.guests_dir().join("notes.txt"), "Port 2999\n").unwrap();

        let reserved = reserved_ports(&layout).unwrap();
        assert!(reserved.contains(&2230));
        assert!(reserved.contains(&2223));
        assert!(!reserved.contains(&2999));
    }
}
