use super::types::ServerConfig;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const VALID_FORMATS: [&str; 3] = ["compact", "pretty", "json"];

/// Upper bound for every lock TTL; a crashed holder must release within a day.
pub const MAX_LOCK_TTL_SECS: u64 = 24 * 60 * 60;

fn check_lock_ttl(name: &str, secs: u64) -> anyhow::Result<()> {
    if secs == 0 || secs > MAX_LOCK_TTL_SECS {
        return Err(anyhow::anyhow!(
            "{} must be between 1 and {} seconds (got {})",
            name,
            MAX_LOCK_TTL_SECS,
            secs
        ));
    }
    Ok(())
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: ServerConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        config.finalize()?;

        Ok(config)
    }

    /// Normalize values and validate configuration.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        self.logging.level = self.logging.level.trim().to_ascii_lowercase();
        self.logging.format = self.logging.format.trim().to_ascii_lowercase();
        self.store.sandbox_base_url = self.store.sandbox_base_url.trim_end_matches('/').to_string();

        self.validate()?;

        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.instance_id.trim().is_empty() {
            return Err(anyhow::anyhow!("server.instance_id cannot be empty"));
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            ));
        }

        if !VALID_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            ));
        }

        for (target, level) in &self.logging.targets {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}' for target '{}'. Must be one of: {}",
                    level,
                    target,
                    VALID_LEVELS.join(", ")
                ));
            }
        }

        if self.locks.spin_interval_ms == 0 {
            return Err(anyhow::anyhow!("locks.spin_interval_ms cannot be 0"));
        }

        let comp = &self.compensation;
        check_lock_ttl("compensation.global_lock_ttl_secs", comp.global_lock_ttl_secs)?;
        check_lock_ttl("compensation.unit_lock_ttl_secs", comp.unit_lock_ttl_secs)?;
        if comp.batch_limit == 0 || comp.chunk_size == 0 {
            return Err(anyhow::anyhow!(
                "compensation.batch_limit and compensation.chunk_size must be positive"
            ));
        }

        let recon = &self.reconciliation;
        check_lock_ttl("reconciliation.global_lock_ttl_secs", recon.global_lock_ttl_secs)?;
        if recon.batch_limit == 0 {
            return Err(anyhow::anyhow!("reconciliation.batch_limit must be positive"));
        }

        let mut seen = HashSet::new();
        for entry in &self.schedule {
            if entry.interval_secs == 0 {
                return Err(anyhow::anyhow!(
                    "schedule entry '{}' has interval_secs = 0",
                    entry.job_id
                ));
            }
            if !seen.insert(entry.job_id.as_str()) {
                return Err(anyhow::anyhow!("duplicate schedule entry '{}'", entry.job_id));
            }
        }

        Ok(())
    }
}
