use crate::vault::config::VaultConfig;
use crate::vault::paths::ledger_path;
use crate::vault::storage::child_prefix;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Settings for one company's run. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub company: String,
    pub bucket: String,
    pub root_prefix: String,
    pub archive_prefix: String,
    pub storage_class: String,
    pub delete_after_archive: bool,
    pub dry_run: bool,
    pub credentials_profile: Option<String>,
    pub retention_days: u32,
    pub min_objects: u64,
    pub empty_counts_as_progress: bool,
    pub max_workers: usize,
    /// Upper bound on leaves probed or archived in this run; `None` is unbounded.
    pub max_leaves: Option<usize>,
    pub now: DateTime<Utc>,
    pub ledger_path: PathBuf,
    /// Restrict the walk to these object types; empty means all.
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub dry_run: bool,
    pub delete: bool,
    pub retention_days: Option<u32>,
    pub max_workers: Option<usize>,
    pub max_leaves: Option<usize>,
    pub as_of: Option<DateTime<Utc>>,
    pub objects: Vec<String>,
}

impl RunConfig {
    pub fn build(
        cfg: &VaultConfig,
        flags: &RunFlags,
        company: &str,
        ledgers_dir: &Path,
    ) -> Result<Self> {
        let bucket = cfg.require_bucket()?.to_string();
        let max_workers = flags.max_workers.unwrap_or(cfg.run.max_workers);
        if max_workers == 0 {
            anyhow::bail!("--max-workers must be >= 1");
        }
        let retention_days = flags
            .retention_days
            .unwrap_or(cfg.retention.retention_days);
        if retention_days == 0 {
            anyhow::bail!("--retention-days must be >= 1");
        }
        let max_leaves = flags.max_leaves.or(cfg.run.max_leaves);
        if max_leaves == Some(0) {
            anyhow::bail!("--max-leaves must be >= 1");
        }

        Ok(Self {
            company: company.to_string(),
            bucket,
            root_prefix: cfg.root_prefix(),
            archive_prefix: cfg.archive_prefix(),
            storage_class: cfg.archive.storage_class.clone(),
            delete_after_archive: flags.delete || cfg.run.delete_after_archive,
            dry_run: flags.dry_run,
            credentials_profile: cfg.storage.profile.clone(),
            retention_days,
            min_objects: cfg.retention.min_objects,
            empty_counts_as_progress: cfg.retention.empty_counts_as_progress,
            max_workers,
            max_leaves,
            now: flags.as_of.unwrap_or_else(Utc::now),
            ledger_path: ledger_path(ledgers_dir, company, flags.dry_run),
            objects: flags.objects.clone(),
        })
    }

    pub fn company_prefix(&self) -> String {
        child_prefix(&self.root_prefix, &self.company)
    }

    pub fn wants_object(&self, name: &str, value: &str) -> bool {
        self.objects.is_empty() || self.objects.iter().any(|o| o == name || o == value)
    }
}

#[cfg(test)]
pub fn test_config(company: &str, ledger_path: PathBuf, now: DateTime<Utc>) -> RunConfig {
    RunConfig {
        company: company.to_string(),
        bucket: "lake".to_string(),
        root_prefix: "raw/".to_string(),
        archive_prefix: "archive".to_string(),
        storage_class: "DEEP_ARCHIVE".to_string(),
        delete_after_archive: false,
        dry_run: false,
        credentials_profile: None,
        retention_days: 90,
        min_objects: 2,
        empty_counts_as_progress: true,
        max_workers: 1,
        max_leaves: None,
        now,
        ledger_path,
        objects: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_layered_config() {
        let mut cfg = VaultConfig::default();
        cfg.storage.bucket = "lake".to_string();
        cfg.storage.profile = Some("ops".to_string());
        cfg.run.max_leaves = Some(50);
        let flags = RunFlags {
            dry_run: true,
            delete: true,
            retention_days: Some(30),
            max_leaves: Some(5),
            ..RunFlags::default()
        };
        let run = RunConfig::build(&cfg, &flags, "acme", Path::new("/l")).expect("build");
        assert!(run.dry_run);
        assert!(run.delete_after_archive);
        assert_eq!(run.credentials_profile.as_deref(), Some("ops"));
        assert_eq!(run.retention_days, 30);
        assert_eq!(run.max_leaves, Some(5));
        assert_eq!(run.ledger_path, PathBuf::from("/l/acme.dry-run.ledger"));
        assert_eq!(run.company_prefix(), "raw/acme/");
    }

    #[test]
    fn zero_leaf_limit_is_rejected() {
        let mut cfg = VaultConfig::default();
        cfg.storage.bucket = "lake".to_string();
        let flags = RunFlags {
            max_leaves: Some(0),
            ..RunFlags::default()
        };
        assert!(RunConfig::build(&cfg, &flags, "acme", Path::new("/l")).is_err());
    }

    #[test]
    fn missing_bucket_is_rejected() {
        let cfg = VaultConfig::default();
        assert!(RunConfig::build(&cfg, &RunFlags::default(), "acme", Path::new("/l")).is_err());
    }

    #[test]
    fn object_filter_matches_name_or_value() {
        let mut cfg = VaultConfig::default();
        cfg.storage.bucket = "lake".to_string();
        let flags = RunFlags {
            objects: vec!["Invoice".to_string()],
            ..RunFlags::default()
        };
        let run = RunConfig::build(&cfg, &flags, "acme", Path::new("/l")).expect("build");
        assert!(run.wants_object("Invoice", "Invoice"));
        assert!(run.wants_object("object=Invoice", "Invoice"));
        assert!(!run.wants_object("Order", "Order"));
    }
}
