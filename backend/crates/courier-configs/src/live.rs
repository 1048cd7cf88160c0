//! Live-polled configuration.
//!
//! Scheduled jobs ask [`JobSwitches::is_enabled`] at the start of every run.
//! [`LiveConfig`] answers from the config file, re-reading it whenever its
//! modification time changes, so flipping `enabled` takes effect within one
//! period without a restart. A file that fails to parse keeps the last good
//! configuration in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::config::ServerConfig;

/// Per-run enable flags for scheduled jobs.
pub trait JobSwitches: Send + Sync {
    fn is_enabled(&self, job_id: &str) -> bool;
}

impl JobSwitches for ServerConfig {
    fn is_enabled(&self, job_id: &str) -> bool {
        self.job_enabled(job_id)
    }
}

struct Snapshot {
    config: Arc<ServerConfig>,
    modified: Option<SystemTime>,
}

pub struct LiveConfig {
    path: Option<PathBuf>,
    snapshot: RwLock<Snapshot>,
}

impl LiveConfig {
    /// Load `path` and keep watching it.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let modified = modified_time(&path);
        let config = ServerConfig::from_file(&path)?;
        Ok(Self {
            path: Some(path),
            snapshot: RwLock::new(Snapshot {
                config: Arc::new(config),
                modified,
            }),
        })
    }

    /// A fixed configuration that never reloads.
    pub fn fixed(config: ServerConfig) -> Self {
        Self {
            path: None,
            snapshot: RwLock::new(Snapshot {
                config: Arc::new(config),
                modified: None,
            }),
        }
    }

    /// Current configuration, reloading first if the file changed.
    pub fn current(&self) -> Arc<ServerConfig> {
        if let Err(e) = self.refresh() {
            log::warn!("Config reload failed, keeping previous configuration: {}", e);
        }
        self.cached()
    }

    /// Re-read the file if its modification time moved. Returns `true` when a
    /// new configuration was installed.
    pub fn refresh(&self) -> anyhow::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let modified = modified_time(path);
        let unchanged = {
            let snapshot = self
                .snapshot
                .read()
                .map_err(|e| anyhow::anyhow!("config snapshot poisoned: {}", e))?;
            snapshot.modified == modified
        };
        if unchanged {
            return Ok(false);
        }

        let result = ServerConfig::from_file(path);
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|e| anyhow::anyhow!("config snapshot poisoned: {}", e))?;
        // Remember the mtime even on failure so a broken file is reported once.
        snapshot.modified = modified;
        let config = result?;
        snapshot.config = Arc::new(config);
        log::info!("Reloaded configuration from {}", path.display());
        Ok(true)
    }

    fn cached(&self) -> Arc<ServerConfig> {
        match self.snapshot.read() {
            Ok(snapshot) => Arc::clone(&snapshot.config),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().config),
        }
    }
}

impl JobSwitches for LiveConfig {
    fn is_enabled(&self, job_id: &str) -> bool {
        self.current().job_enabled(job_id)
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::COMPENSATION_JOB_ID;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(path: &Path, enabled: bool, mtime_offset_secs: u64) {
        let mut file = std::fs::File::create(path).unwrap();
        writeln!(file, "[compensation]\nenabled = {}", enabled).unwrap();
        // Force a distinct mtime; some filesystems only keep whole seconds.
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + mtime_offset_secs);
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn test_toggle_is_seen_without_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        write_config(&path, true, 0);

        let live = LiveConfig::load(&path).unwrap();
        assert!(live.is_enabled(COMPENSATION_JOB_ID));

        write_config(&path, false, 10);
        assert!(!live.is_enabled(COMPENSATION_JOB_ID));
    }

    #[test]
    fn test_broken_file_keeps_last_good_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        write_config(&path, false, 0);
        let live = LiveConfig::load(&path).unwrap();

        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "[compensation\nenabled = ").unwrap();
            file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_100))
                .unwrap();
        }
        assert!(live.refresh().is_err());
        assert!(!live.is_enabled(COMPENSATION_JOB_ID));
    }

    #[test]
    fn test_fixed_config_never_reloads() {
        let live = LiveConfig::fixed(ServerConfig::default());
        assert!(!live.refresh().unwrap());
        assert!(live.is_enabled(COMPENSATION_JOB_ID));
    }
}
