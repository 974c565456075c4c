use anyhow::Result;

use crate::commands::CommandReport;
use crate::vault::lease::LedgerLease;
use crate::vault::ledger::{self, Ledger};
use crate::vault::paths::{VaultPaths, ledger_path, resolve_paths};

#[derive(Debug, Clone, Default)]
pub struct LedgerOptions {
    pub company: String,
    pub dry_run: bool,
    pub clear: bool,
    pub entries: bool,
}

pub fn run(opts: &LedgerOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    run_with(&paths, opts)
}

pub fn run_with(paths: &VaultPaths, opts: &LedgerOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("ledger");
    let path = ledger_path(&paths.ledgers_dir, &opts.company, opts.dry_run);
    report.detail(format!("company={}", opts.company));
    report.detail(format!("ledger={}", path.display()));

    if opts.clear {
        // refuse while a run holds the ledger
        let lease = LedgerLease::acquire(&path)?;
        let removed = ledger::clear(&path)?;
        drop(lease);
        report.detail(format!("cleared={removed}"));
        tracing::info!(ledger = %path.display(), removed, "ledger cleared");
        return Ok(report);
    }

    if !path.exists() {
        report.detail("exists=false");
        return Ok(report);
    }

    let ledger = Ledger::open(&path)?;
    let stats = ledger.stats();
    report.detail(format!("entries={}", ledger.len()));
    report.detail(format!("lines={}", stats.lines));
    report.detail(format!("duplicates={}", stats.duplicates));
    report.detail(format!("malformed={}", stats.malformed));
    let counts = ledger.count_by_outcome();
    for (label, count) in &counts {
        report.detail(format!("outcome.{label}={count}"));
    }
    if opts.entries {
        for entry in ledger.entries() {
            report.detail(entry.encode());
        }
    }
    report.data = Some(serde_json::json!({
        "path": path.display().to_string(),
        "entries": ledger.len(),
        "stats": stats,
        "outcomes": counts,
    }));
    Ok(report)
}
