use crate::error::{VaultError, WarnCode};
use crate::vault::path_key::PathKey;
use crate::vault::run_config::RunConfig;
use crate::vault::s3tar::ArchiveTool;
use crate::vault::storage::{ObjectStorage, s3_uri};
use crate::vault::warn::{self, WarnEvent};

/// One leaf's archive operation. Created per eligible day, dropped after recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub key: PathKey,
    pub source_prefix: String,
    pub source_uri: String,
    pub destination_uri: String,
    pub object_count: u64,
    pub simulate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Success,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archive: StepResult,
    pub delete: StepResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Fewer real objects than the configured minimum.
    Empty(u64),
    Ready(ArchiveJob),
}

/// `raw/acme/Invoice/year=2024/month=05/day=02/` -> `archive/raw/acme/Invoice/year=2024/month=05/day=02.tar`
pub fn destination_key(archive_prefix: &str, source_prefix: &str) -> String {
    format!(
        "{}/{}.tar",
        archive_prefix.trim_matches('/'),
        source_prefix.trim_matches('/')
    )
}

pub struct Archiver<'a> {
    storage: &'a dyn ObjectStorage,
    tool: &'a dyn ArchiveTool,
    config: &'a RunConfig,
}

impl<'a> Archiver<'a> {
    pub fn new(storage: &'a dyn ObjectStorage, tool: &'a dyn ArchiveTool, config: &'a RunConfig) -> Self {
        Self {
            storage,
            tool,
            config,
        }
    }

    /// Counts real objects; the directory listing alone is not trusted since
    /// empty partitions still materialize marker keys.
    pub fn probe(&self, key: &PathKey, source_prefix: &str) -> Result<Probe, VaultError> {
        let count = self
            .storage
            .count_objects(source_prefix)
            .map_err(|err| VaultError::Listing {
                prefix: source_prefix.to_string(),
                reason: format!("{err:#}"),
            })?;
        if count < self.config.min_objects {
            return Ok(Probe::Empty(count));
        }
        Ok(Probe::Ready(ArchiveJob {
            key: key.clone(),
            source_prefix: source_prefix.to_string(),
            source_uri: s3_uri(&self.config.bucket, source_prefix),
            destination_uri: s3_uri(
                &self.config.bucket,
                &destination_key(&self.config.archive_prefix, source_prefix),
            ),
            object_count: count,
            simulate: self.config.dry_run,
        }))
    }

    pub fn archive(&self, job: &ArchiveJob) -> ArchiveReport {
        if job.simulate {
            tracing::info!(
                key = %job.key,
                objects = job.object_count,
                "dry-run: would archive {} -> {} (storage class {})",
                job.source_uri,
                job.destination_uri,
                self.config.storage_class
            );
            let delete = if self.config.delete_after_archive {
                tracing::info!(key = %job.key, "dry-run: would delete {}", job.source_uri);
                StepResult::Skipped("dry-run".to_string())
            } else {
                StepResult::Skipped("deletion not requested".to_string())
            };
            return ArchiveReport {
                archive: StepResult::Success,
                delete,
            };
        }

        tracing::info!(
            key = %job.key,
            objects = job.object_count,
            "archiving {} -> {}",
            job.source_uri,
            job.destination_uri
        );
        if let Err(err) =
            self.tool
                .create_archive(&job.source_uri, &job.destination_uri, &self.config.storage_class)
        {
            let failure = VaultError::ArchiveFailed {
                prefix: job.source_uri.clone(),
                reason: format!("{err:#}"),
            };
            warn::emit(WarnEvent {
                code: WarnCode::ArchiveFailed,
                stage: "archive",
                action: "create-archive",
                key: &job.key.encode(),
                retry: "next-run",
                reason: "archive-tool-failed",
                err: &failure.to_string(),
            });
            return ArchiveReport {
                archive: StepResult::Failed(failure.to_string()),
                delete: StepResult::Skipped("archive failed".to_string()),
            };
        }
        tracing::info!(key = %job.key, "archived {}", job.destination_uri);

        if !self.config.delete_after_archive {
            return ArchiveReport {
                archive: StepResult::Success,
                delete: StepResult::Skipped("deletion not requested".to_string()),
            };
        }

        let delete = match self.storage.delete_recursive(&job.source_prefix) {
            Ok(()) => {
                tracing::info!(key = %job.key, "deleted source objects under {}", job.source_uri);
                StepResult::Success
            }
            Err(err) => {
                let failure = VaultError::DeleteFailed {
                    prefix: job.source_uri.clone(),
                    reason: format!("{err:#}"),
                };
                warn::emit(WarnEvent {
                    code: WarnCode::DeleteFailed,
                    stage: "archive",
                    action: "delete-source",
                    key: &job.key.encode(),
                    retry: "manual",
                    reason: "delete-after-archive-failed",
                    err: &failure.to_string(),
                });
                StepResult::Failed(failure.to_string())
            }
        };

        ArchiveReport {
            archive: StepResult::Success,
            delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::run_config::test_config;
    use crate::vault::s3tar::recording::RecordingArchiveTool;
    use crate::vault::storage::memory::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    const DAY: &str = "raw/acme/Invoice/year=2024/month=05/day=02/";

    fn config() -> RunConfig {
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).single().expect("now");
        test_config("acme", PathBuf::from("/unused"), now)
    }

    fn key() -> PathKey {
        PathKey::from_segments(&["acme", "Invoice", "2024", "05", "02"]).expect("key")
    }

    #[test]
    fn destination_mirrors_source_under_archive_prefix() {
        assert_eq!(
            destination_key("archive/", DAY),
            "archive/raw/acme/Invoice/year=2024/month=05/day=02.tar"
        );
    }

    #[test]
    fn probe_reports_empty_below_minimum() {
        let storage = MemoryStorage::default();
        storage.add_partition(DAY, 1);
        let tool = RecordingArchiveTool::default();
        let cfg = config();
        let archiver = Archiver::new(&storage, &tool, &cfg);
        assert_eq!(archiver.probe(&key(), DAY).expect("probe"), Probe::Empty(1));
    }

    #[test]
    fn real_archive_then_delete_when_requested() {
        let storage = MemoryStorage::default();
        storage.add_partition(DAY, 5);
        let tool = RecordingArchiveTool::default();
        let mut cfg = config();
        cfg.delete_after_archive = true;
        let archiver = Archiver::new(&storage, &tool, &cfg);

        let Probe::Ready(job) = archiver.probe(&key(), DAY).expect("probe") else {
            panic!("expected ready job");
        };
        assert_eq!(job.object_count, 5);
        assert!(!job.simulate);

        let report = archiver.archive(&job);
        assert_eq!(report.archive, StepResult::Success);
        assert_eq!(report.delete, StepResult::Success);
        let calls = tool.create_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].source_uri, format!("s3://lake/{DAY}"));
        assert_eq!(
            calls[0].dest_uri,
            "s3://lake/archive/raw/acme/Invoice/year=2024/month=05/day=02.tar"
        );
        assert_eq!(calls[0].storage_class, "DEEP_ARCHIVE");
        assert_eq!(storage.keys_under(DAY), 0);
    }

    #[test]
    fn archive_failure_skips_delete() {
        let storage = MemoryStorage::default();
        storage.add_partition(DAY, 5);
        let tool = RecordingArchiveTool::default();
        tool.fail_for(&format!("s3://lake/{DAY}"));
        let mut cfg = config();
        cfg.delete_after_archive = true;
        let archiver = Archiver::new(&storage, &tool, &cfg);

        let Probe::Ready(job) = archiver.probe(&key(), DAY).expect("probe") else {
            panic!("expected ready job");
        };
        let report = archiver.archive(&job);
        assert!(matches!(report.archive, StepResult::Failed(_)));
        assert!(matches!(report.delete, StepResult::Skipped(_)));
        assert!(storage.delete_calls().is_empty());
    }

    #[test]
    fn delete_failure_keeps_archive_success() {
        let storage = MemoryStorage::default();
        storage.add_partition(DAY, 3);
        *storage.fail_delete.lock().expect("lock") = true;
        let tool = RecordingArchiveTool::default();
        let mut cfg = config();
        cfg.delete_after_archive = true;
        let archiver = Archiver::new(&storage, &tool, &cfg);

        let Probe::Ready(job) = archiver.probe(&key(), DAY).expect("probe") else {
            panic!("expected ready job");
        };
        let report = archiver.archive(&job);
        assert_eq!(report.archive, StepResult::Success);
        assert!(matches!(report.delete, StepResult::Failed(_)));
    }

    #[test]
    fn dry_run_never_touches_the_tool_or_storage() {
        let storage = MemoryStorage::default();
        storage.add_partition(DAY, 4);
        let tool = RecordingArchiveTool::default();
        let mut cfg = config();
        cfg.dry_run = true;
        cfg.delete_after_archive = true;
        let archiver = Archiver::new(&storage, &tool, &cfg);

        let Probe::Ready(job) = archiver.probe(&key(), DAY).expect("probe") else {
            panic!("expected ready job");
        };
        assert!(job.simulate);
        let report = archiver.archive(&job);
        assert_eq!(report.archive, StepResult::Success);
        assert!(tool.create_calls().is_empty());
        assert!(storage.delete_calls().is_empty());
        assert_eq!(storage.keys_under(DAY), 5);
    }
}
