use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, UpdateError};

/// Platform name of the external updater executable, expected next to the
/// application binary.
#[cfg(windows)]
pub const UPDATER_EXE_NAME: &str = "update.exe";
#[cfg(not(windows))]
pub const UPDATER_EXE_NAME: &str = "update";

/// Everything needed to invoke the external updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub updater_path: PathBuf,
    pub target_dir: PathBuf,
    pub package_path: PathBuf,
    pub app_exe: String,
}

/// Locate the running application: its directory and executable name.
///
/// Prefers `current_exe`, but some packaging schemes report a path that
/// does not exist on disk at runtime, so the original invocation path is
/// consulted as a fallback; a plain development checkout falls back to
/// `default_exe` in the working directory.
pub fn resolve_app_location(default_exe: &str) -> (PathBuf, String) {
    if let Ok(exe) = env::current_exe() {
        if exe.is_file() {
            if let Some(location) = split_executable_path(&exe) {
                return location;
            }
        } else {
            tracing::warn!(
                path = %exe.display(),
                "reported executable path does not exist, trying invocation path"
            );
        }
    }

    if let Some(argv0) = env::args_os().next() {
        let path = PathBuf::from(&argv0);
        if path.is_file() {
            if let Some(location) = split_executable_path(&path) {
                return location;
            }
        }
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    tracing::debug!(dir = %cwd.display(), "development context, using working directory");
    (cwd, default_exe.to_string())
}

fn split_executable_path(path: &Path) -> Option<(PathBuf, String)> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, name))
}

/// Expected location of the updater binary next to the application.
pub fn updater_path(app_dir: &Path) -> PathBuf {
    app_dir.join(UPDATER_EXE_NAME)
}

/// Make a freshly downloaded updater spawnable. Downloads land on disk as
/// plain files without the execute bit, so a fetched binary cannot be
/// launched on unix until it is marked.
pub fn mark_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Build the updater invocation: exactly the three flags of the external
/// contract, stdio detached.
pub fn build_command(plan: &InstallPlan) -> Command {
    let mut command = Command::new(&plan.updater_path);
    command
        .arg("--target-dir")
        .arg(&plan.target_dir)
        .arg("--update-package")
        .arg(&plan.package_path)
        .arg("--app-exe")
        .arg(&plan.app_exe)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

/// Spawn the updater as a detached process whose lifetime is independent of
/// ours. One-way handoff: the child is not waited on and returns nothing;
/// the caller is expected to terminate the host application next.
pub fn launch_detached(plan: &InstallPlan) -> Result<()> {
    if !plan.updater_path.is_file() {
        return Err(UpdateError::InstallerMissing(plan.updater_path.clone()));
    }

    let mut command = build_command(plan);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        // DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP
        command.creation_flags(0x0000_0008 | 0x0000_0200);
    }

    let child = command.spawn()?;
    tracing::info!(
        pid = child.id(),
        updater = %plan.updater_path.display(),
        package = %plan.package_path.display(),
        "updater process launched"
    );
    drop(child);
    Ok(())
}
