use crate::error::VaultError;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock guarding one ledger file for the life of a run.
///
/// The lock is released when the lease is dropped.
#[derive(Debug)]
pub struct LedgerLease {
    path: PathBuf,
    file: File,
}

pub fn lease_path(ledger_path: &Path) -> PathBuf {
    let mut name = ledger_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    ledger_path.with_file_name(name)
}

impl LedgerLease {
    pub fn acquire(ledger_path: &Path) -> Result<Self> {
        let path = lease_path(ledger_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            let holder = fs::read_to_string(&path).unwrap_or_default();
            let holder = match holder.trim() {
                "" => "unknown",
                pid => pid,
            };
            return Err(VaultError::LeaseHeld(format!(
                "{} (holder pid {holder})",
                path.display()
            ))
            .into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_data()?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLease {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
