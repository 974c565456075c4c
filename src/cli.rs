use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;
use crate::vault::run_config::RunFlags;

/// Idempotent, resumable cold-storage archival of partitioned S3 prefixes
#[derive(Debug, Parser)]
#[command(name = "coldvault", version, about)]
pub struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging for coldvault (COLDVAULT_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk the partition tree and archive eligible days
    Run(RunArgs),
    /// Show resolved paths, settings and unknown COLDVAULT env keys
    Status,
    /// Summarize or clear a company's ledger
    Ledger(LedgerArgs),
    /// Extract a sealed archive back into a prefix
    Restore(RestoreArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Company to process (repeatable)
    #[arg(long = "company", value_name = "NAME")]
    companies: Vec<String>,
    /// Process every company found under the root prefix
    #[arg(long, conflicts_with = "companies")]
    all_companies: bool,
    #[arg(long)]
    bucket: Option<String>,
    #[arg(long)]
    region: Option<String>,
    /// Credentials profile passed to aws and s3tar
    #[arg(long)]
    profile: Option<String>,
    /// Simulate; writes only the dry-run ledger
    #[arg(long)]
    dry_run: bool,
    /// Delete source objects after a successful archive
    #[arg(long)]
    delete: bool,
    #[arg(long)]
    retention_days: Option<u32>,
    #[arg(long)]
    max_workers: Option<usize>,
    /// Stop starting new leaf archives after N per company; the rest waits for the next run
    #[arg(long, value_name = "N")]
    max_leaves: Option<usize>,
    /// Evaluate retention as of this UTC date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_as_of)]
    as_of: Option<DateTime<Utc>>,
    /// Restrict to these object types (repeatable)
    #[arg(long = "object", value_name = "NAME")]
    objects: Vec<String>,
    /// Exit non-zero when any leaf or listing failed
    #[arg(long)]
    fail_on_error: bool,
}

#[derive(Debug, Args)]
struct LedgerArgs {
    #[arg(long)]
    company: String,
    /// Select the dry-run ledger
    #[arg(long)]
    dry_run: bool,
    /// Remove the ledger file
    #[arg(long)]
    clear: bool,
    /// List every entry
    #[arg(long)]
    entries: bool,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Archive key (bucket-relative) or s3:// URI
    #[arg(long)]
    archive: String,
    /// Destination prefix (bucket-relative) or s3:// URI
    #[arg(long)]
    dest: String,
    #[arg(long)]
    bucket: Option<String>,
    /// Where to write the table of contents
    #[arg(long)]
    toc: Option<PathBuf>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

fn parse_as_of(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| anyhow!("expected YYYY-MM-DD, got {raw:?}: {err}"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("no midnight for {raw}"))
}

fn render_text(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for detail in &report.details {
        out.push_str(&format!("  {detail}\n"));
    }
    if !report.issues.is_empty() {
        out.push_str("issues:\n");
        for issue in &report.issues {
            out.push_str(&format!("  - {issue}\n"));
        }
    }
    out
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", render_text(report));
    }
    Ok(())
}

/// Returns whether the command's report was ok.
pub fn run() -> Result<bool> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let report = match cli.command {
        Command::Run(args) => commands::run::run(&commands::run::RunOptions {
            companies: args.companies,
            all_companies: args.all_companies,
            bucket: args.bucket,
            region: args.region,
            profile: args.profile,
            flags: RunFlags {
                dry_run: args.dry_run,
                delete: args.delete,
                retention_days: args.retention_days,
                max_workers: args.max_workers,
                max_leaves: args.max_leaves,
                as_of: args.as_of,
                objects: args.objects,
            },
            fail_on_error: args.fail_on_error,
        })?,
        Command::Status => commands::status::run()?,
        Command::Ledger(args) => commands::ledger::run(&commands::ledger::LedgerOptions {
            company: args.company,
            dry_run: args.dry_run,
            clear: args.clear,
            entries: args.entries,
        })?,
        Command::Restore(args) => commands::restore::run(&commands::restore::RestoreOptions {
            archive: args.archive,
            dest: args.dest,
            bucket: args.bucket,
            toc: args.toc,
            profile: args.profile,
            dry_run: args.dry_run,
        })?,
    };

    print_report(&report, cli.json)?;
    Ok(report.ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn as_of_parses_to_utc_midnight() {
        let got = parse_as_of("2024-09-01").expect("date");
        assert_eq!(got.to_rfc3339(), "2024-09-01T00:00:00+00:00");
        assert!(parse_as_of("2024-13-01").is_err());
        assert!(parse_as_of("yesterday").is_err());
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "coldvault",
            "run",
            "--company",
            "acme",
            "--company",
            "globex",
            "--dry-run",
            "--profile=ops",
            "--object",
            "Invoice",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.companies, vec!["acme", "globex"]);
        assert!(args.dry_run);
        assert_eq!(args.profile.as_deref(), Some("ops"));
        assert_eq!(args.objects, vec!["Invoice"]);
    }

    #[test]
    fn all_companies_conflicts_with_company() {
        let parsed = Cli::try_parse_from(["coldvault", "run", "--company", "acme", "--all-companies"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn text_report_lists_issues_last() {
        let mut report = CommandReport::new("run");
        report.detail("company=acme");
        report.issue("lease held");
        assert_eq!(
            render_text(&report),
            "run: failed\n  company=acme\nissues:\n  - lease held\n"
        );
    }
}
