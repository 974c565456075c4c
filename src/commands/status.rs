use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::vault::config::{VaultConfig, load_config};
use crate::vault::paths::{VaultPaths, resolve_paths};
use crate::vault::util::resolve_bin;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/coldvault_env_allowlist.rs"));
}

/// Set `COLDVAULT_*` variables that nothing in the binary reads.
pub fn unknown_env_keys<I>(vars: I, allowlist: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = vars
        .into_iter()
        .filter(|key| key.starts_with("COLDVAULT_") && !allowlist.contains(&key.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

fn describe_config(report: &mut CommandReport, cfg: &VaultConfig) {
    let bucket = match cfg.storage.bucket.trim() {
        "" => "<unset>",
        bucket => bucket,
    };
    report.detail(format!("bucket={bucket}"));
    report.detail(format!(
        "region={}",
        cfg.storage.region.as_deref().unwrap_or("<default>")
    ));
    report.detail(format!(
        "profile={}",
        cfg.storage.profile.as_deref().unwrap_or("<default>")
    ));
    report.detail(format!("root_prefix={}", cfg.root_prefix()));
    report.detail(format!("archive_prefix={}", cfg.archive_prefix()));
    report.detail(format!("storage_class={}", cfg.archive.storage_class));
    report.detail(format!("retention_days={}", cfg.retention.retention_days));
    report.detail(format!("min_objects={}", cfg.retention.min_objects));
    report.detail(format!(
        "empty_counts_as_progress={}",
        cfg.retention.empty_counts_as_progress
    ));
    report.detail(format!("max_workers={}", cfg.run.max_workers));
    report.detail(format!(
        "delete_after_archive={}",
        cfg.run.delete_after_archive
    ));
    report.detail(format!("fail_on_leaf_error={}", cfg.run.fail_on_leaf_error));
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = status_with(&paths, env::vars().map(|(k, _)| k));
    match load_config(&paths) {
        Ok(cfg) => {
            describe_config(&mut report, &cfg);
            check_binary(
                &mut report,
                cfg.storage.aws_bin.as_deref(),
                "COLDVAULT_AWS_BIN",
                "aws",
            );
            check_binary(
                &mut report,
                cfg.archive.s3tar_bin.as_deref(),
                "COLDVAULT_S3TAR_BIN",
                "s3tar",
            );
        }
        Err(err) => report.issue(format!("config invalid: {err:#}")),
    }
    Ok(report)
}

fn check_binary(report: &mut CommandReport, explicit: Option<&str>, env_var: &str, name: &str) {
    match resolve_bin(explicit.map(std::path::Path::new), env_var, name) {
        Ok(path) => report.detail(format!("{name}_bin={}", path.display())),
        Err(err) => report.issue(format!("{name} unavailable: {err:#}")),
    }
}

pub fn status_with<I>(paths: &VaultPaths, vars: I) -> CommandReport
where
    I: IntoIterator<Item = String>,
{
    let mut report = CommandReport::new("status");
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("ledgers_dir={}", paths.ledgers_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!(
        "config_file={} exists={}",
        paths.config_file.display(),
        paths.config_file.exists()
    ));

    let unknown = unknown_env_keys(vars, generated::GENERATED_ENV_ALLOWLIST);
    for key in unknown {
        report.issue(format!("unknown environment variable {key}"));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unknown_keys_are_filtered_and_sorted() {
        let key = |suffix: &str| format!("COLDVAULT{suffix}");
        let vars = vec![
            "PATH".to_string(),
            key("_BUKET"),
            key("_BUCKET"),
            key("_ABC"),
        ];
        let got = unknown_env_keys(vars, &["COLDVAULT_BUCKET"]);
        assert_eq!(got, vec![key("_ABC"), key("_BUKET")]);
    }

    #[test]
    fn generated_allowlist_knows_core_settings() {
        let allow = generated::GENERATED_ENV_ALLOWLIST;
        for key in ["COLDVAULT_BUCKET", "COLDVAULT_HOME", "COLDVAULT_AWS_BIN", "COLDVAULT_LOG"] {
            assert!(allow.contains(&key), "{key} missing from allowlist");
        }
        assert!(!allow.contains(&"COLDVAULT_WARN"));
    }

    #[test]
    fn typo_env_key_is_reported_as_issue() {
        let root = PathBuf::from("/nonexistent/coldvault");
        let paths = VaultPaths {
            home: root.clone(),
            ledgers_dir: root.join("ledgers"),
            logs_dir: root.join("logs"),
            config_file: root.join("coldvault.toml"),
        };
        // built at runtime so the allowlist scan never sees it
        let typo = format!("COLDVAULT{}", "_RETENTON_DAYS");
        let report = status_with(&paths, vec![typo.clone()]);
        assert!(!report.ok);
        assert!(report.issues[0].contains(&typo));
        assert!(report.details.iter().any(|d| d.ends_with("exists=false")));
    }
}
