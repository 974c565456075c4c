use crate::error::VaultError;
use crate::vault::paths::VaultPaths;
use crate::vault::retention::DEFAULT_RETENTION_DAYS;
use crate::vault::s3tar::DEFAULT_STORAGE_CLASS;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,
    #[serde(default)]
    pub aws_bin: Option<String>,
    #[serde(default)]
    pub listing_timeout_secs: Option<u64>,
}

fn default_root_prefix() -> String {
    "raw".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            profile: None,
            root_prefix: default_root_prefix(),
            aws_bin: None,
            listing_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_min_objects")]
    pub min_objects: u64,
    #[serde(default = "default_empty_counts_as_progress")]
    pub empty_counts_as_progress: bool,
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_min_objects() -> u64 {
    2
}

fn default_empty_counts_as_progress() -> bool {
    true
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            min_objects: default_min_objects(),
            empty_counts_as_progress: default_empty_counts_as_progress(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub s3tar_bin: Option<String>,
}

fn default_archive_prefix() -> String {
    "archive".to_string()
}

fn default_storage_class() -> String {
    DEFAULT_STORAGE_CLASS.to_string()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_prefix: default_archive_prefix(),
            storage_class: default_storage_class(),
            timeout_secs: None,
            s3tar_bin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefaults {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub delete_after_archive: bool,
    #[serde(default)]
    pub fail_on_leaf_error: bool,
    /// Stop starting new leaf archives after this many per company run.
    #[serde(default)]
    pub max_leaves: Option<usize>,
}

fn default_max_workers() -> usize {
    1
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            delete_after_archive: false,
            fail_on_leaf_error: false,
            max_leaves: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub archive: ArchiveConfig,
    pub run: RunDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialVaultConfig {
    storage: Option<StorageConfig>,
    retention: Option<RetentionConfig>,
    archive: Option<ArchiveConfig>,
    run: Option<RunDefaults>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_opt_u64(var: &str, fallback: Option<u64>) -> Option<u64> {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_opt_string(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn validate(cfg: &VaultConfig) -> Result<()> {
    if cfg.retention.retention_days == 0 {
        return Err(anyhow!(VaultError::InvalidConfig(
            "retention_days must be >= 1".to_string()
        )));
    }
    if cfg.retention.min_objects == 0 {
        return Err(anyhow!(VaultError::InvalidConfig(
            "min_objects must be >= 1".to_string()
        )));
    }
    if cfg.run.max_workers == 0 {
        return Err(anyhow!(VaultError::InvalidConfig(
            "max_workers must be >= 1".to_string()
        )));
    }
    if cfg.run.max_leaves == Some(0) {
        return Err(anyhow!(VaultError::InvalidConfig(
            "max_leaves must be >= 1 when set".to_string()
        )));
    }
    if cfg.storage.root_prefix.trim_matches('/').is_empty() {
        return Err(anyhow!(VaultError::InvalidConfig(
            "root_prefix cannot be empty".to_string()
        )));
    }
    if cfg.archive.archive_prefix.trim_matches('/').is_empty() {
        return Err(anyhow!(VaultError::InvalidConfig(
            "archive_prefix cannot be empty".to_string()
        )));
    }
    if cfg.archive.storage_class.trim().is_empty() {
        return Err(anyhow!(VaultError::InvalidConfig(
            "storage_class cannot be empty".to_string()
        )));
    }
    Ok(())
}

impl VaultConfig {
    pub fn require_bucket(&self) -> Result<&str> {
        let bucket = self.storage.bucket.trim();
        if bucket.is_empty() {
            return Err(anyhow!(VaultError::InvalidConfig(
                "bucket is required (--bucket, COLDVAULT_BUCKET, or [storage].bucket)".to_string()
            )));
        }
        Ok(bucket)
    }

    /// Root prefix normalized to `raw/` form.
    pub fn root_prefix(&self) -> String {
        format!("{}/", self.storage.root_prefix.trim_matches('/'))
    }

    pub fn archive_prefix(&self) -> String {
        self.archive.archive_prefix.trim_matches('/').to_string()
    }
}

fn merge_file_config(base: &mut VaultConfig, paths: &VaultPaths) -> Result<()> {
    let path = &paths.config_file;
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialVaultConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse coldvault config {}: {err}", path.display()))?;
    if let Some(storage) = parsed.storage {
        base.storage = storage;
    }
    if let Some(retention) = parsed.retention {
        base.retention = retention;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(run) = parsed.run {
        base.run = run;
    }
    Ok(())
}

pub fn load_config(paths: &VaultPaths) -> Result<VaultConfig> {
    let mut cfg = VaultConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.storage.bucket = env_or_string("COLDVAULT_BUCKET", &cfg.storage.bucket);
    cfg.storage.region = env_or_opt_string("COLDVAULT_REGION", cfg.storage.region.take());
    cfg.storage.profile = env_or_opt_string("COLDVAULT_PROFILE", cfg.storage.profile.take());
    cfg.storage.root_prefix = env_or_string("COLDVAULT_ROOT_PREFIX", &cfg.storage.root_prefix);
    cfg.storage.listing_timeout_secs = env_or_opt_u64(
        "COLDVAULT_LISTING_TIMEOUT_SECS",
        cfg.storage.listing_timeout_secs,
    );
    cfg.retention.retention_days = env_or_u64(
        "COLDVAULT_RETENTION_DAYS",
        u64::from(cfg.retention.retention_days),
    )
    .try_into()
    .unwrap_or(cfg.retention.retention_days);
    cfg.retention.min_objects = env_or_u64("COLDVAULT_MIN_OBJECTS", cfg.retention.min_objects);
    cfg.retention.empty_counts_as_progress = env_or_bool(
        "COLDVAULT_EMPTY_COUNTS_AS_PROGRESS",
        cfg.retention.empty_counts_as_progress,
    );
    cfg.archive.archive_prefix =
        env_or_string("COLDVAULT_ARCHIVE_PREFIX", &cfg.archive.archive_prefix);
    cfg.archive.storage_class = env_or_string("COLDVAULT_STORAGE_CLASS", &cfg.archive.storage_class);
    cfg.archive.timeout_secs =
        env_or_opt_u64("COLDVAULT_ARCHIVE_TIMEOUT_SECS", cfg.archive.timeout_secs);
    cfg.run.max_workers = env_or_u64("COLDVAULT_MAX_WORKERS", cfg.run.max_workers as u64)
        .try_into()
        .unwrap_or(cfg.run.max_workers);
    cfg.run.delete_after_archive = env_or_bool(
        "COLDVAULT_DELETE_AFTER_ARCHIVE",
        cfg.run.delete_after_archive,
    );
    cfg.run.fail_on_leaf_error =
        env_or_bool("COLDVAULT_FAIL_ON_LEAF_ERROR", cfg.run.fail_on_leaf_error);
    cfg.run.max_leaves = env_or_opt_u64(
        "COLDVAULT_MAX_LEAVES",
        cfg.run.max_leaves.map(|n| n as u64),
    )
    .and_then(|n| usize::try_from(n).ok());

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = VaultConfig::default();
        assert_eq!(cfg.retention.retention_days, 90);
        assert_eq!(cfg.retention.min_objects, 2);
        assert!(cfg.retention.empty_counts_as_progress);
        assert_eq!(cfg.archive.storage_class, "DEEP_ARCHIVE");
        assert_eq!(cfg.root_prefix(), "raw/");
        assert_eq!(cfg.archive_prefix(), "archive");
        assert!(validate(&cfg).is_ok());
        assert!(cfg.require_bucket().is_err());
    }

    #[test]
    fn partial_file_replaces_only_present_sections() {
        let raw = r#"
            [storage]
            bucket = "lake"
            root_prefix = "/landing/"

            [retention]
            retention_days = 30
        "#;
        let parsed: PartialVaultConfig = toml::from_str(raw).expect("parse");
        let mut cfg = VaultConfig::default();
        if let Some(storage) = parsed.storage {
            cfg.storage = storage;
        }
        if let Some(retention) = parsed.retention {
            cfg.retention = retention;
        }
        assert!(parsed.archive.is_none());
        assert_eq!(cfg.require_bucket().expect("bucket"), "lake");
        assert_eq!(cfg.root_prefix(), "landing/");
        assert_eq!(cfg.retention.retention_days, 30);
        assert_eq!(cfg.retention.min_objects, 2);
        assert_eq!(cfg.archive.archive_prefix, "archive");
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut cfg = VaultConfig::default();
        cfg.retention.retention_days = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = VaultConfig::default();
        cfg.run.max_workers = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = VaultConfig::default();
        cfg.retention.min_objects = 0;
        assert!(validate(&cfg).is_err());
    }
}
