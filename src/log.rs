use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "MAILDECK_LOG";

/// `$XDG_STATE_HOME/maildeck/maildeck.log`, falling back to
/// `~/.local/state` and then the temp dir.
pub fn log_path() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("state")
    } else {
        std::env::temp_dir()
    };
    base.join("maildeck").join("maildeck.log")
}

fn open_log() -> io::Result<File> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn filter(level: &str) -> EnvFilter {
    build_filter(std::env::var(LOG_ENV).ok().as_deref(), level)
}

/// `MAILDECK_LOG` wins over the level flag; anything unparsable means `info`.
fn build_filter(env: Option<&str>, level: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber writing to the log file. Only the first
/// call has any effect.
pub fn init(level: &str) -> io::Result<()> {
    static INIT: OnceLock<()> = OnceLock::new();
    if INIT.get().is_some() {
        return Ok(());
    }
    let file = open_log()?;
    let _ = fmt()
        .with_env_filter(filter(level))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
    Ok(())
}

/// Truncate the log file if it exists.
pub fn clear() -> io::Result<()> {
    let path = log_path();
    if path.exists() {
        File::create(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to clear log {}: {}", path.display(), e),
            )
        })?;
    }
    Ok(())
}
