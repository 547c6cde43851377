//! Locating and running the external programs the archive delegates to
//! (Chrome, Ghostscript, pdftotext).

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::ArchiverError;

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

/// First of `names` found on `PATH`.
pub fn find_any(names: &[&str]) -> Option<PathBuf> {
    names.iter().find_map(|name| find_in_path(name))
}

pub fn run_cmd(program: &Path, args: &[String], cwd: Option<&Path>) -> Result<(), ArchiverError> {
    debug!(program = %program.display(), ?args, "running external tool");
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|err| ArchiverError::ToolFailed(format!("{}: {err}", program.display())))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {}", program.display())
    } else {
        stderr
    };
    Err(ArchiverError::ToolFailed(message))
}

/// Runs `program` and returns its stdout.
pub fn capture_cmd(program: &Path, args: &[String]) -> Result<String, ArchiverError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| ArchiverError::ToolFailed(format!("{}: {err}", program.display())))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ArchiverError::ToolFailed(if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        }));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}

pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
