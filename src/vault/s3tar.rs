use crate::vault::util::{describe_failure, resolve_bin, run_command_with_optional_timeout};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_STORAGE_CLASS: &str = "DEEP_ARCHIVE";

/// Turns every object under a prefix into one sealed archive, and back.
pub trait ArchiveTool: Send + Sync {
    fn create_archive(&self, source_uri: &str, dest_uri: &str, storage_class: &str) -> Result<()>;
    /// Writes the archive's table of contents (member keys and offsets) to `toc_path`.
    fn generate_toc(&self, archive_uri: &str, toc_path: &Path) -> Result<()>;
    fn extract(&self, archive_uri: &str, toc_path: &Path, dest_uri: &str) -> Result<()>;
}

/// `ArchiveTool` backed by the `s3tar` binary.
///
/// The binary is looked up on first use, so dry runs work without it.
#[derive(Debug, Clone)]
pub struct S3Tar {
    bin_override: Option<PathBuf>,
    region: Option<String>,
    profile: Option<String>,
    timeout_secs: Option<u64>,
}

impl S3Tar {
    pub fn new(
        bin_override: Option<&Path>,
        region: Option<&str>,
        profile: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Self {
        Self {
            bin_override: bin_override.map(Path::to_path_buf),
            region: region.map(ToOwned::to_owned),
            profile: profile.map(ToOwned::to_owned),
            timeout_secs,
        }
    }

    pub fn resolve(&self) -> Result<PathBuf> {
        resolve_bin(self.bin_override.as_deref(), "COLDVAULT_S3TAR_BIN", "s3tar")
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    fn run(&self, mut args: Vec<String>) -> Result<()> {
        let mut full = self.base_args();
        full.append(&mut args);
        let bin = self.resolve()?;
        tracing::debug!(bin = %bin.display(), args = %full.join(" "), "running s3tar");
        let mut cmd = Command::new(&bin);
        cmd.args(&full);
        let out = run_command_with_optional_timeout(&mut cmd, self.timeout_secs)
            .with_context(|| format!("failed to run `{}`", bin.display()))?;
        if !out.status.success() {
            anyhow::bail!(describe_failure(&bin, &full, &out));
        }
        Ok(())
    }
}

pub fn create_args(source_uri: &str, dest_uri: &str, storage_class: &str) -> Vec<String> {
    vec![
        "-vv".to_string(),
        "-c".to_string(),
        "-f".to_string(),
        dest_uri.to_string(),
        "--concat-in-memory".to_string(),
        "--storage-class".to_string(),
        storage_class.to_string(),
        source_uri.to_string(),
    ]
}

impl ArchiveTool for S3Tar {
    fn create_archive(&self, source_uri: &str, dest_uri: &str, storage_class: &str) -> Result<()> {
        self.run(create_args(source_uri, dest_uri, storage_class))
    }

    fn generate_toc(&self, archive_uri: &str, toc_path: &Path) -> Result<()> {
        self.run(vec![
            "--generate-toc".to_string(),
            "-f".to_string(),
            archive_uri.to_string(),
            "-C".to_string(),
            toc_path.display().to_string(),
        ])
    }

    fn extract(&self, archive_uri: &str, toc_path: &Path, dest_uri: &str) -> Result<()> {
        self.run(vec![
            "-x".to_string(),
            "-f".to_string(),
            archive_uri.to_string(),
            "--external-toc".to_string(),
            toc_path.display().to_string(),
            "-C".to_string(),
            dest_uri.to_string(),
        ])
    }
}

#[cfg(test)]
pub mod recording {
    use super::ArchiveTool;
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CreateCall {
        pub source_uri: String,
        pub dest_uri: String,
        pub storage_class: String,
    }

    /// Archive tool double: records calls, fails for configured sources.
    #[derive(Debug, Default)]
    pub struct RecordingArchiveTool {
        pub creates: Mutex<Vec<CreateCall>>,
        pub fail_sources: Mutex<BTreeSet<String>>,
        pub extracts: Mutex<Vec<String>>,
    }

    impl RecordingArchiveTool {
        pub fn create_calls(&self) -> Vec<CreateCall> {
            self.creates.lock().expect("lock").clone()
        }

        pub fn fail_for(&self, source_uri: &str) {
            self.fail_sources
                .lock()
                .expect("lock")
                .insert(source_uri.to_string());
        }
    }

    impl ArchiveTool for RecordingArchiveTool {
        fn create_archive(
            &self,
            source_uri: &str,
            dest_uri: &str,
            storage_class: &str,
        ) -> anyhow::Result<()> {
            self.creates.lock().expect("lock").push(CreateCall {
                source_uri: source_uri.to_string(),
                dest_uri: dest_uri.to_string(),
                storage_class: storage_class.to_string(),
            });
            if self.fail_sources.lock().expect("lock").contains(source_uri) {
                anyhow::bail!("s3tar exited with status 1");
            }
            Ok(())
        }

        fn generate_toc(&self, archive_uri: &str, toc_path: &Path) -> anyhow::Result<()> {
            std::fs::write(toc_path, format!("{archive_uri}\n"))?;
            Ok(())
        }

        fn extract(&self, archive_uri: &str, _toc_path: &Path, dest_uri: &str) -> anyhow::Result<()> {
            self.extracts
                .lock()
                .expect("lock")
                .push(format!("{archive_uri} -> {dest_uri}"));
            Ok(())
        }
    }
}
