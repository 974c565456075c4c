use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::commands::run::apply_overrides;
use crate::vault::config::load_config;
use crate::vault::paths::{VaultPaths, resolve_paths};
use crate::vault::s3tar::{ArchiveTool, S3Tar};
use crate::vault::storage::s3_uri;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Archive key inside the bucket, or a full `s3://` URI.
    pub archive: String,
    /// Destination prefix inside the bucket, or a full `s3://` URI.
    pub dest: String,
    pub bucket: Option<String>,
    pub toc: Option<PathBuf>,
    pub profile: Option<String>,
    pub dry_run: bool,
}

fn to_uri(bucket: &str, value: &str) -> String {
    if value.starts_with("s3://") {
        value.to_string()
    } else {
        s3_uri(bucket, value)
    }
}

/// Default TOC location: `<home>/toc/<archive file name>.toc.csv`.
pub fn default_toc_path(paths: &VaultPaths, archive_uri: &str) -> PathBuf {
    let name = archive_uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("archive");
    paths.home.join("toc").join(format!("{name}.toc.csv"))
}

pub fn run(opts: &RestoreOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths)?;
    apply_overrides(&mut cfg, opts.bucket.as_deref(), None, opts.profile.as_deref());
    let tool = S3Tar::new(
        cfg.archive.s3tar_bin.as_deref().map(std::path::Path::new),
        cfg.storage.region.as_deref(),
        cfg.storage.profile.as_deref(),
        cfg.archive.timeout_secs,
    );
    if !opts.dry_run {
        tool.resolve()?;
    }
    let bucket = cfg.storage.bucket.trim().to_string();
    run_with(&paths, &bucket, opts, &tool)
}

pub fn run_with(
    paths: &VaultPaths,
    bucket: &str,
    opts: &RestoreOptions,
    tool: &dyn ArchiveTool,
) -> Result<CommandReport> {
    let needs_bucket = !opts.archive.starts_with("s3://") || !opts.dest.starts_with("s3://");
    if needs_bucket && bucket.is_empty() {
        anyhow::bail!("bucket is required for bucket-relative keys (--bucket or COLDVAULT_BUCKET)");
    }
    let archive_uri = to_uri(bucket, &opts.archive);
    let dest_uri = to_uri(bucket, &opts.dest);
    let toc = opts
        .toc
        .clone()
        .unwrap_or_else(|| default_toc_path(paths, &archive_uri));

    let mut report = CommandReport::new("restore");
    report.detail(format!("archive={archive_uri}"));
    report.detail(format!("dest={dest_uri}"));
    report.detail(format!("toc={}", toc.display()));

    if opts.dry_run {
        tracing::info!("dry-run: would generate table of contents for {archive_uri} at {}", toc.display());
        tracing::info!("dry-run: would extract {archive_uri} into {dest_uri}");
        report.detail("dry_run=true");
        return Ok(report);
    }

    if let Some(parent) = toc.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if let Err(err) = tool.generate_toc(&archive_uri, &toc) {
        report.issue(format!("toc generation failed: {err:#}"));
        return Ok(report);
    }
    report.detail("toc_generated=true");

    match tool.extract(&archive_uri, &toc, &dest_uri) {
        Ok(()) => {
            tracing::info!("restored {archive_uri} into {dest_uri}");
            report.detail("extracted=true");
        }
        Err(err) => report.issue(format!("extract failed: {err:#}")),
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::s3tar::recording::RecordingArchiveTool;
    use tempfile::tempdir;

    fn paths(root: &std::path::Path) -> VaultPaths {
        VaultPaths {
            home: root.to_path_buf(),
            ledgers_dir: root.join("ledgers"),
            logs_dir: root.join("logs"),
            config_file: root.join("coldvault.toml"),
        }
    }

    fn opts(dry_run: bool) -> RestoreOptions {
        RestoreOptions {
            archive: "archive/raw/acme/Invoice/year=2024/month=05/day=02.tar".to_string(),
            dest: "restore/acme/".to_string(),
            dry_run,
            ..RestoreOptions::default()
        }
    }

    #[test]
    fn default_toc_is_named_after_archive() {
        let p = paths(std::path::Path::new("/h"));
        assert_eq!(
            default_toc_path(&p, "s3://lake/archive/raw/acme/day=02.tar"),
            PathBuf::from("/h/toc/day=02.tar.toc.csv")
        );
    }

    #[test]
    fn restore_generates_toc_then_extracts() {
        let tmp = tempdir().expect("tempdir");
        let tool = RecordingArchiveTool::default();

        let report = run_with(&paths(tmp.path()), "lake", &opts(false), &tool).expect("restore");

        assert!(report.ok);
        let extracts = tool.extracts.lock().expect("lock").clone();
        assert_eq!(
            extracts,
            vec![
                "s3://lake/archive/raw/acme/Invoice/year=2024/month=05/day=02.tar -> s3://lake/restore/acme/"
                    .to_string()
            ]
        );
        let toc = tmp.path().join("toc/day=02.tar.toc.csv");
        assert!(toc.exists());
    }

    #[test]
    fn dry_run_restore_calls_nothing() {
        let tmp = tempdir().expect("tempdir");
        let tool = RecordingArchiveTool::default();

        let report = run_with(&paths(tmp.path()), "lake", &opts(true), &tool).expect("restore");

        assert!(report.details.contains(&"dry_run=true".to_string()));
        assert!(tool.extracts.lock().expect("lock").is_empty());
    }

    #[test]
    fn relative_keys_need_a_bucket() {
        let tmp = tempdir().expect("tempdir");
        let tool = RecordingArchiveTool::default();
        assert!(run_with(&paths(tmp.path()), "", &opts(false), &tool).is_err());
    }
}
