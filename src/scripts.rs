//! `start`, `login` and `stop` wrapper scripts written into the guest's
//! work directory. They are regenerated on every provisioning run so they
//! always reflect the record's current sizing and port.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::DevvmError;
use crate::paths::GuestPaths;
use crate::qemu_cmd::{self, QEMU_BINARY};
use crate::record::GuestRecord;
use crate::util::shell_quote;

pub const START: &str = "start";
pub const LOGIN: &str = "login";
pub const STOP: &str = "stop";

fn header(record: &GuestRecord, what: &str) -> String {
    format!(
        "#!/bin/sh\n\
         # {what} guest '{name}'. Generated by devvm; rewritten on every provision.\n\
         set -eu\n",
        name = record.name
    )
}

pub fn render_start(record: &GuestRecord, guest: &GuestPaths) -> String {
    let mut script = header(record, "Start");
    script.push_str(&format!(
        "PIDFILE={pid}\n\
         if [ -f \"$PIDFILE\" ] && kill -0 \"$(cat \"$PIDFILE\")\" 2>/dev/null; then\n\
         \x20   echo \"{name} is already running (pid $(cat \"$PIDFILE\"))\" >&2\n\
         \x20   exit 1\n\
         fi\n\
         exec {QEMU_BINARY}",
        pid = shell_quote(&guest.pid_file().display().to_string()),
        name = record.name,
    ));
    // pair each flag with its value on one continuation line
    for pair in qemu_cmd::daemon_args(record, guest).chunks(2) {
        script.push_str(" \\\n    ");
        let quoted: Vec<String> = pair.iter().map(|a| shell_quote(a)).collect();
        script.push_str(&quoted.join(" "));
    }
    script.push('\n');
    script
}

pub fn render_login(record: &GuestRecord, record_path: &Path) -> String {
    let mut script = header(record, "Log in to");
    script.push_str(&format!(
        "exec ssh -F {} {} \"$@\"\n",
        shell_quote(&record_path.display().to_string()),
        shell_quote(&record.name),
    ));
    script
}

pub fn render_stop(record: &GuestRecord, guest: &GuestPaths) -> String {
    let mut script = header(record, "Stop");
    script.push_str(&format!(
        "PIDFILE={pid}\n\
         if [ ! -f \"$PIDFILE\" ]; then\n\
         \x20   echo \"{name} is not running (no pid file)\" >&2\n\
         \x20   exit 1\n\
         fi\n\
         PID=$(cat \"$PIDFILE\")\n\
         case \"$(cat \"/proc/$PID/comm\" 2>/dev/null || true)\" in\n\
         \x20   qemu-system*) ;;\n\
         \x20   *)\n\
         \x20       echo \"pid $PID is not a running {name} guest\" >&2\n\
         \x20       exit 1\n\
         \x20       ;;\n\
         esac\n\
         kill \"$PID\"\n\
         rm -f \"$PIDFILE\"\n",
        pid = shell_quote(&guest.pid_file().display().to_string()),
        name = record.name,
    ));
    script
}

fn write_executable(path: &Path, contents: &str) -> Result<(), DevvmError> {
    std::fs::write(path, contents).map_err(DevvmError::io(format!("writing {}", path.display())))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(DevvmError::io(format!("chmod {}", path.display())))
}

/// (Re)write all three control scripts.
pub fn write_scripts(
    record: &GuestRecord,
    guest: &GuestPaths,
    record_path: &Path,
) -> Result<(), DevvmError> {
    std::fs::create_dir_all(&guest.work)
        .map_err(DevvmError::io(format!("creating directory {}", guest.work.display())))?;
    write_executable(&guest.script(START), &render_start(record, guest))?;
    write_executable(&guest.script(LOGIN), &render_login(record, record_path))?;
    write_executable(&guest.script(STOP), &render_stop(record, guest))?;
    tracing::debug!(dir = %guest.work.display(), "control scripts written");
    Ok(())
}
