use crate::error::DevvmError;

/// Parse a human-readable size string into bytes.
///
/// Accepts formats like `"20G"`, `"512M"`, `"100K"`, `"1073741824"`.
/// Uses binary units (1G = 1024³ bytes), matching `qemu-img`.
pub fn parse_size(s: &str) -> Result<u64, DevvmError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DevvmError::Validation {
            message: "size cannot be empty".into(),
        });
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str.parse().map_err(|_| DevvmError::Validation {
        message: format!("invalid size number: '{num_str}'"),
    })?;

    let multiplier: u64 = match suffix.as_str() {
        "" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(DevvmError::Validation {
                message: format!("unknown size suffix: '{suffix}' (use G, M, K, or T)"),
            });
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| DevvmError::Validation {
            message: format!("size overflows: '{s}'"),
        })
}

/// Guest names double as file names and SSH host aliases.
pub fn validate_name(name: &str) -> Result<(), DevvmError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(DevvmError::Validation {
            message: format!("guest name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"),
        });
    }
    Ok(())
}

/// Host memory in MiB, read from `/proc/meminfo`. `None` when unavailable.
pub fn host_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&meminfo)
}

fn parse_mem_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Quote a string for safe interpolation into a POSIX shell script.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_gibibytes() {
        assert_eq!(parse_size("20G").unwrap(), 20 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_mebibytes() {
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
    }

    #[test]
    fn parse_size_bytes() {
        assert_eq!(parse_size("1073741824").unwrap(), 1073741824);
    }

    #[test]
    fn parse_size_rejects_empty() {
        assert!(parse_size("").is_err());
    }

    #[test]
    fn parse_size_rejects_bad_suffix() {
        assert!(parse_size("10X").is_err());
    }

    #[test]
    fn valid_names() {
        for name in ["dev", "dev-1", "a.b_c", "9lives"] {
            assert!(validate_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn invalid_names() {
        for name in ["", "-dev", "dev box", "a/b", ".hidden"] {
            assert!(validate_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn mem_total_from_meminfo() {
        let meminfo = "MemTotal:       16303428 kB\nMemFree:         1000000 kB\n";
        assert_eq!(parse_mem_total(meminfo), Some(15921));
        assert_eq!(parse_mem_total("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn shell_quote_plain_and_special() {
        assert_eq!(shell_quote("/var/lib/disk.qcow2"), "/var/lib/disk.qcow2");
        assert_eq!(shell_quote("my disk"), "'my disk'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
