use crate::vault::util::{describe_failure, resolve_bin, run_command_with_optional_timeout};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Object-storage operations the walker and archiver rely on.
///
/// Prefixes are bucket-relative and end with `/`.
pub trait ObjectStorage: Send + Sync {
    /// Immediate child "directory" names under `prefix`, without slashes.
    fn list_common_prefixes(&self, prefix: &str) -> Result<Vec<String>>;
    /// Real objects under `prefix`; directory markers (keys ending in `/`) do not count.
    fn count_objects(&self, prefix: &str) -> Result<u64>;
    fn delete_recursive(&self, prefix: &str) -> Result<()>;
}

pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{}", key.trim_start_matches('/'))
}

pub fn child_prefix(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        format!("{name}/")
    } else if parent.ends_with('/') {
        format!("{parent}{name}/")
    } else {
        format!("{parent}/{name}/")
    }
}

/// `year=2024` -> `2024`; bare names are their own value.
pub fn partition_value(name: &str) -> &str {
    match name.split_once('=') {
        Some((_, value)) => value,
        None => name,
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListObjectsPage {
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Option<Vec<CommonPrefix>>,
    #[serde(rename = "Contents", default)]
    contents: Option<Vec<ObjectEntry>>,
}

#[derive(Debug, Deserialize)]
struct CommonPrefix {
    #[serde(rename = "Prefix")]
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    #[serde(rename = "Key")]
    key: String,
}

fn parse_page(stdout: &[u8]) -> Result<ListObjectsPage> {
    let raw = String::from_utf8_lossy(stdout);
    if raw.trim().is_empty() {
        return Ok(ListObjectsPage::default());
    }
    serde_json::from_str(raw.trim()).context("invalid JSON from aws s3api list-objects-v2")
}

fn child_names(parent: &str, page: ListObjectsPage) -> Vec<String> {
    let mut out = page
        .common_prefixes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|cp| {
            let rest = cp.prefix.strip_prefix(parent)?;
            let name = rest.trim_end_matches('/');
            if name.is_empty() || name.contains('/') {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect::<Vec<_>>();
    out.sort();
    out.dedup();
    out
}

fn real_object_count(page: &ListObjectsPage) -> u64 {
    page.contents
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|entry| !entry.key.ends_with('/'))
        .count() as u64
}

/// `ObjectStorage` backed by the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliStorage {
    bin: PathBuf,
    bucket: String,
    region: Option<String>,
    profile: Option<String>,
    timeout_secs: Option<u64>,
}

impl AwsCliStorage {
    pub fn new(
        bin_override: Option<&Path>,
        bucket: &str,
        region: Option<&str>,
        profile: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<Self> {
        let bin = resolve_bin(bin_override, "COLDVAULT_AWS_BIN", "aws")?;
        Ok(Self {
            bin,
            bucket: bucket.to_string(),
            region: region.map(ToOwned::to_owned),
            profile: profile.map(ToOwned::to_owned),
            timeout_secs,
        })
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args
    }

    fn run(&self, mut args: Vec<String>) -> Result<Vec<u8>> {
        let mut full = self.global_args();
        full.append(&mut args);
        let mut cmd = Command::new(&self.bin);
        cmd.args(&full);
        let out = run_command_with_optional_timeout(&mut cmd, self.timeout_secs)
            .with_context(|| format!("failed to run `{}`", self.bin.display()))?;
        if !out.status.success() {
            anyhow::bail!(describe_failure(&self.bin, &full, &out));
        }
        Ok(out.stdout)
    }

    fn list_objects(&self, prefix: &str, delimiter: bool) -> Result<ListObjectsPage> {
        let mut args = vec![
            "s3api".to_string(),
            "list-objects-v2".to_string(),
            "--bucket".to_string(),
            self.bucket.clone(),
            "--prefix".to_string(),
            prefix.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if delimiter {
            args.push("--delimiter".to_string());
            args.push("/".to_string());
        }
        parse_page(&self.run(args)?)
    }
}

impl ObjectStorage for AwsCliStorage {
    fn list_common_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let page = self.list_objects(prefix, true)?;
        Ok(child_names(prefix, page))
    }

    fn count_objects(&self, prefix: &str) -> Result<u64> {
        let page = self.list_objects(prefix, false)?;
        Ok(real_object_count(&page))
    }

    fn delete_recursive(&self, prefix: &str) -> Result<()> {
        self.run(vec![
            "s3".to_string(),
            "rm".to_string(),
            s3_uri(&self.bucket, prefix),
            "--recursive".to_string(),
        ])?;
        Ok(())
    }
}
