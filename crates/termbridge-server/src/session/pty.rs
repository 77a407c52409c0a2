//! PTY spawning using portable-pty.
//!
//! Opens a pseudo-terminal, launches the shell on its slave side, and splits
//! the result into single-owner parts: the output reader, the input writer,
//! the master (for resize) and the child process.

use crate::config::TerminalConfig;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use termbridge_core::{BridgeError, BridgeResult};
use tracing::{debug, info, warn};

/// Shell used when nothing else is configured and `bash` is not on PATH.
const FALLBACK_SHELL: &str = "sh";
/// Preferred interactive shell.
const PREFERRED_SHELL: &str = "bash";

/// Window-size access to the PTY master. Dropping it releases the master.
pub trait PtyControl: Send {
    fn set_size(&self, rows: u16, cols: u16) -> BridgeResult<()>;
}

/// The shell child process.
pub trait ShellProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Forcibly terminate the process. Consumes the handle.
    fn terminate(self: Box<Self>) -> BridgeResult<()>;
}

/// A freshly spawned shell split into its owned parts.
pub struct PtyParts {
    /// PTY output (the shell's stdout/stderr).
    pub output: Box<dyn Read + Send>,
    /// PTY input (the shell's stdin).
    pub input: Box<dyn Write + Send>,
    pub control: Box<dyn PtyControl>,
    pub process: Box<dyn ShellProcess>,
    /// Resolved shell command line.
    pub shell: String,
}

struct NativeControl {
    master: Box<dyn MasterPty + Send>,
}

impl PtyControl for NativeControl {
    fn set_size(&self, rows: u16, cols: u16) -> BridgeResult<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| BridgeError::Pty(format!("PTY resize failed: {e}")))?;
        debug!(rows, cols, "PTY resized");
        Ok(())
    }
}

struct NativeProcess {
    child: Box<dyn Child + Send + Sync>,
}

impl ShellProcess for NativeProcess {
    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn terminate(mut self: Box<Self>) -> BridgeResult<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(code = status.exit_code(), "shell already exited");
            return Ok(());
        }
        let result = self
            .child
            .kill()
            .map_err(|e| BridgeError::Other(format!("kill failed: {e}")));

        // Reap off the caller's thread so teardown never waits on the child.
        let mut child = self.child;
        std::thread::spawn(move || match child.wait() {
            Ok(status) => debug!(code = status.exit_code(), "shell reaped"),
            Err(e) => warn!(error = %e, "failed to reap shell"),
        });
        result
    }
}

/// Spawn the configured shell on a new PTY.
pub fn spawn_shell(config: &TerminalConfig) -> BridgeResult<PtyParts> {
    let shell = resolve_shell(config.shell.as_deref());
    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| BridgeError::Pty(format!("failed to open PTY: {e}")))?;

    let parts: Vec<&str> = shell.split_whitespace().collect();
    let (program, args) = parts
        .split_first()
        .ok_or_else(|| BridgeError::Spawn("empty shell command".into()))?;
    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }
    cmd.env("TERM", &config.term);

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| BridgeError::Spawn(format!("failed to spawn {shell}: {e}")))?;
    // The master only sees end-of-file once no slave handle is left in this process.
    drop(pair.slave);

    let output = pair
        .master
        .try_clone_reader()
        .map_err(|e| BridgeError::Pty(format!("failed to clone PTY reader: {e}")))?;
    let input = pair
        .master
        .take_writer()
        .map_err(|e| BridgeError::Pty(format!("failed to take PTY writer: {e}")))?;

    info!(
        shell = %shell,
        pid = child.process_id(),
        rows = config.rows,
        cols = config.cols,
        "PTY spawned"
    );

    Ok(PtyParts {
        output,
        input,
        control: Box::new(NativeControl {
            master: pair.master,
        }),
        process: Box::new(NativeProcess { child }),
        shell,
    })
}

/// Pick the shell: configured value, then `bash` on PATH, then `sh`.
pub fn resolve_shell(configured: Option<&str>) -> String {
    resolve_shell_in(configured, std::env::var_os("PATH").as_deref())
}

fn resolve_shell_in(configured: Option<&str>, path: Option<&OsStr>) -> String {
    if let Some(shell) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return shell.to_string();
    }
    if find_in_path(PREFERRED_SHELL, path).is_some() {
        PREFERRED_SHELL.to_string()
    } else {
        FALLBACK_SHELL.to_string()
    }
}

/// Locate an executable by name in a PATH-style list.
pub fn find_in_path(name: &str, path: Option<&OsStr>) -> Option<PathBuf> {
    let path = path?;
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Poll until `pid` has been killed and reaped, or `limit` passes.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn process_exited_within(pid: u32, limit: std::time::Duration) -> bool {
    let proc_entry = PathBuf::from(format!("/proc/{pid}"));
    let deadline = std::time::Instant::now() + limit;
    while std::time::Instant::now() < deadline {
        if !proc_entry.exists() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    !proc_entry.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[cfg(unix)]
    fn make_executable(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn configured_shell_wins() {
        let shell = resolve_shell_in(Some("/usr/bin/zsh"), None);
        assert_eq!(shell, "/usr/bin/zsh");
    }

    #[test]
    fn blank_configured_shell_ignored() {
        let empty = tempfile::tempdir().unwrap();
        let path = OsString::from(empty.path());
        assert_eq!(resolve_shell_in(Some("   "), Some(&path)), "sh");
    }

    #[cfg(unix)]
    #[test]
    fn bash_preferred_when_on_path() {
        let dir = tempfile::tempdir().unwrap();
        make_executable(dir.path(), "bash");
        let path = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(resolve_shell_in(None, Some(&path)), "bash");
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_bash_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bash"), "not a program").unwrap();
        let path = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(resolve_shell_in(None, Some(&path)), "sh");
        assert!(find_in_path("bash", Some(&path)).is_none());
    }

    #[test]
    fn no_path_falls_back_to_sh() {
        assert_eq!(resolve_shell_in(None, None), "sh");
    }

    #[cfg(unix)]
    #[test]
    fn find_in_path_searches_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        make_executable(second.path(), "tool");
        let path = std::env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(
            find_in_path("tool", Some(&path)),
            Some(second.path().join("tool"))
        );
    }

    #[test]
    fn missing_shell_is_spawn_error() {
        let config = TerminalConfig {
            shell: Some("/nonexistent/termbridge-no-such-shell".into()),
            ..TerminalConfig::default()
        };
        assert!(spawn_shell(&config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn real_shell_round_trip() {
        let config = TerminalConfig {
            shell: Some("/bin/sh".into()),
            ..TerminalConfig::default()
        };
        let mut parts = spawn_shell(&config).unwrap();
        assert!(parts.process.pid().is_some());
        parts.control.set_size(40, 120).unwrap();

        parts
            .input
            .write_all(b"printf '%s-%s\\n' term bridge; exit\n")
            .unwrap();
        parts.input.flush().unwrap();

        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match parts.output.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => collected.extend_from_slice(&buf[..n]),
            }
        }
        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("term-bridge"), "output was {text:?}");
        parts.process.terminate().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_kills_running_shell() {
        let config = TerminalConfig {
            shell: Some("/bin/sh".into()),
            ..TerminalConfig::default()
        };
        let parts = spawn_shell(&config).unwrap();
        let pid = parts.process.pid().unwrap();
        assert!(PathBuf::from(format!("/proc/{pid}")).exists());

        parts.process.terminate().unwrap();
        assert!(
            process_exited_within(pid, std::time::Duration::from_secs(5)),
            "shell {pid} survived terminate"
        );
    }
}
