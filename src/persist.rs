//! The persistence surface: per-plugin resource directories, the
//! atomic-save discipline, and the log-file naming scheme.

use std::io;
use std::path::{Path, PathBuf};

/// Windows device names that cannot be used as file names.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM0", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
    "COM8", "COM9", "LPT0", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8",
    "LPT9",
];

/// Escape one path component (a channel or server name) so it is a safe
/// directory name everywhere the bot runs.  The function is idempotent.
pub fn escape_component(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|ch| match ch {
            '/' => '_',
            '\\' => '~',
            '|' => ')',
            ch => ch,
        })
        .collect();
    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(&out))
    {
        out.push('~');
    }
    out
}

/// Write `contents` to `path` atomically: the data lands in a temporary
/// file in the same directory and is renamed into place, so readers see
/// either the old file or the new one, never a torn write.
pub fn atomic_save(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp = PathBuf::from(dir);
    tmp.push(format!(".{}.tmp", file_name.to_string_lossy()));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Ensure a plugin's resource directory exists and return it.
pub fn plugin_resource_dir(root: &Path, plugin: &str) -> io::Result<PathBuf> {
    let dir = root.join(escape_component(plugin));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// `<logdir>/<escaped-channel>/YYYY-MM.log`
pub fn channel_log_path(logdir: &Path, channel: &str, year: i16, month: i8) -> PathBuf {
    logdir
        .join(escape_component(channel))
        .join(format!("{year:04}-{month:02}.log"))
}

/// `<logdir>/<server-address>/server.log`
pub fn server_log_path(logdir: &Path, server: &str) -> PathBuf {
    logdir.join(escape_component(server)).join("server.log")
}
