use anyhow::{Context, Result};
use std::sync::{Mutex, PoisonError};

use crate::commands::CommandReport;
use crate::vault::audit;
use crate::vault::config::{VaultConfig, load_config};
use crate::vault::lease::LedgerLease;
use crate::vault::ledger::Ledger;
use crate::vault::paths::{VaultPaths, resolve_paths};
use crate::vault::run_config::{RunConfig, RunFlags};
use crate::vault::s3tar::{ArchiveTool, S3Tar};
use crate::vault::storage::{AwsCliStorage, ObjectStorage, partition_value};
use crate::vault::walker::{RunSummary, Walker};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub companies: Vec<String>,
    pub all_companies: bool,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub flags: RunFlags,
    pub fail_on_error: bool,
}

/// Folds collaborator flags into the layered config; everything downstream
/// reads them from `cfg.storage`.
pub fn apply_overrides(
    cfg: &mut VaultConfig,
    bucket: Option<&str>,
    region: Option<&str>,
    profile: Option<&str>,
) {
    if let Some(bucket) = bucket {
        cfg.storage.bucket = bucket.to_string();
    }
    if let Some(region) = region {
        cfg.storage.region = Some(region.to_string());
    }
    if let Some(profile) = profile {
        cfg.storage.profile = Some(profile.to_string());
    }
}

pub fn run(opts: &RunOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths)?;
    apply_overrides(
        &mut cfg,
        opts.bucket.as_deref(),
        opts.region.as_deref(),
        opts.profile.as_deref(),
    );
    let bucket = cfg.require_bucket()?.to_string();
    let profile = cfg.storage.profile.as_deref();

    let storage = AwsCliStorage::new(
        cfg.storage.aws_bin.as_deref().map(std::path::Path::new),
        &bucket,
        cfg.storage.region.as_deref(),
        profile,
        cfg.storage.listing_timeout_secs,
    )?;
    let tool = S3Tar::new(
        cfg.archive.s3tar_bin.as_deref().map(std::path::Path::new),
        cfg.storage.region.as_deref(),
        profile,
        cfg.archive.timeout_secs,
    );
    if !opts.flags.dry_run {
        tool.resolve()?;
    }

    run_with(&paths, &cfg, opts, &storage, &tool)
}

pub fn resolve_companies(
    cfg: &VaultConfig,
    opts: &RunOptions,
    storage: &dyn ObjectStorage,
) -> Result<Vec<String>> {
    if !opts.all_companies {
        if opts.companies.is_empty() {
            anyhow::bail!("no company selected; pass --company <name> or --all-companies");
        }
        return Ok(opts.companies.clone());
    }
    let root = cfg.root_prefix();
    let mut names = storage
        .list_common_prefixes(&root)
        .with_context(|| format!("failed to list companies under {root}"))?
        .iter()
        .map(|name| partition_value(name).to_string())
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    Ok(names)
}

fn run_company(
    paths: &VaultPaths,
    run: &RunConfig,
    storage: &dyn ObjectStorage,
    tool: &dyn ArchiveTool,
) -> Result<RunSummary> {
    let lease = LedgerLease::acquire(&run.ledger_path)?;
    tracing::debug!(lease = %lease.path().display(), "lease acquired");
    let ledger = Ledger::open(&run.ledger_path)?;
    let stats = ledger.stats();
    tracing::info!(
        company = %run.company,
        ledger = %run.ledger_path.display(),
        entries = ledger.len(),
        duplicates = stats.duplicates,
        malformed = stats.malformed,
        dry_run = run.dry_run,
        profile = run.credentials_profile.as_deref().unwrap_or("<default>"),
        "ledger loaded"
    );
    if let Err(err) = audit::append_event(
        paths,
        "run",
        &run.company,
        "started",
        &format!("dry_run={} as_of={}", run.dry_run, run.now.format("%Y-%m-%d")),
    ) {
        tracing::warn!(error = %format!("{err:#}"), "audit append failed");
    }

    let ledger = Mutex::new(ledger);
    let summary = Walker::new(&ledger, storage, tool, run).run();
    ledger
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .close()?;

    let status = if summary.has_failures() { "degraded" } else { "ok" };
    if let Err(err) = audit::append_event(
        paths,
        "run",
        &run.company,
        status,
        &format!(
            "archived={} skipped={} empty={} failed={}",
            summary.archived,
            summary.skipped(),
            summary.empty,
            summary.failed
        ),
    ) {
        tracing::warn!(error = %format!("{err:#}"), "audit append failed");
    }
    Ok(summary)
}

fn describe(summary: &RunSummary) -> String {
    format!(
        "company={} dry_run={} archived={} ignored_rule_1={} ignored_retention={} empty={} failed={} already_resolved={} aggregates_written={} deleted={} delete_failures={} ledger_write_errors={} listing_errors={} deferred={}",
        summary.company,
        summary.dry_run,
        summary.archived,
        summary.ignored_rule_1,
        summary.ignored_retention,
        summary.empty,
        summary.failed,
        summary.already_resolved,
        summary.aggregates_written,
        summary.deleted,
        summary.delete_failures,
        summary.ledger_write_errors,
        summary.listing_errors,
        summary.deferred,
    )
}

pub fn run_with(
    paths: &VaultPaths,
    cfg: &VaultConfig,
    opts: &RunOptions,
    storage: &dyn ObjectStorage,
    tool: &dyn ArchiveTool,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("run");
    let fail_on_error = opts.fail_on_error || cfg.run.fail_on_leaf_error;
    let companies = resolve_companies(cfg, opts, storage)?;
    if companies.is_empty() {
        report.detail(format!("no companies found under {}", cfg.root_prefix()));
    }

    let mut summaries = Vec::with_capacity(companies.len());
    for company in &companies {
        let mut section = CommandReport::new("run");
        match RunConfig::build(cfg, &opts.flags, company, &paths.ledgers_dir) {
            Ok(run) => {
                section.detail(format!("ledger={}", run.ledger_path.display()));
                match run_company(paths, &run, storage, tool) {
                    Ok(summary) => {
                        section.detail(describe(&summary));
                        for failure in &summary.failures {
                            section.detail(format!("failure: {failure}"));
                        }
                        if fail_on_error && summary.has_failures() {
                            section.issue(format!(
                                "company={company}: {} leaf/branch failures",
                                summary.failures.len()
                            ));
                        }
                        summaries.push(summary);
                    }
                    Err(err) => section.issue(format!("company={company}: {err:#}")),
                }
            }
            Err(err) => section.issue(format!("company={company}: {err:#}")),
        }
        report.merge(section);
    }

    report.data = Some(serde_json::to_value(&summaries)?);
    Ok(report)
}
