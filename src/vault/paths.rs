use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub home: PathBuf,
    pub ledgers_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<VaultPaths> {
    let home = match env::var("COLDVAULT_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".coldvault"),
    };

    let ledgers_dir = env_or_default_path("COLDVAULT_LEDGER_DIR", home.join("ledgers"));
    let logs_dir = env_or_default_path("COLDVAULT_LOGS_DIR", home.join("logs"));
    let config_file = env_or_default_path("COLDVAULT_CONFIG_PATH", home.join("coldvault.toml"));

    Ok(VaultPaths {
        home,
        ledgers_dir,
        logs_dir,
        config_file,
    })
}

/// One ledger per company; dry runs never share a file with real runs.
pub fn ledger_path(ledgers_dir: &Path, company: &str, dry_run: bool) -> PathBuf {
    if dry_run {
        ledgers_dir.join(format!("{company}.dry-run.ledger"))
    } else {
        ledgers_dir.join(format!("{company}.ledger"))
    }
}
