#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Directory-backed stand-in for `aws`: directories are prefixes, files are objects.
const FAKE_AWS: &str = r#"#!/usr/bin/env bash
set -euo pipefail

root="${FAKE_S3_ROOT:?}"
prefix=""
delimiter=0
mode=""
target=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --prefix) prefix="$2"; shift 2 ;;
    --delimiter) delimiter=1; shift 2 ;;
    --bucket|--output|--profile|--region) shift 2 ;;
    list-objects-v2) mode="list"; shift ;;
    rm) mode="rm"; shift ;;
    s3://*) target="${1#s3://*/}"; shift ;;
    *) shift ;;
  esac
done

if [[ "$mode" == "rm" ]]; then
  if [[ -n "${FAKE_S3_RM_LOG:-}" ]]; then
    printf "%s\n" "$target" >> "$FAKE_S3_RM_LOG"
  fi
  rm -rf "${root:?}/${target}"
  exit 0
fi

dir="$root/$prefix"
if [[ "$delimiter" -eq 1 ]]; then
  printf '{"CommonPrefixes":['
  first=1
  if [[ -d "$dir" ]]; then
    for d in "$dir"*/; do
      [[ -d "$d" ]] || continue
      name="$(basename "$d")"
      [[ "$first" -eq 1 ]] || printf ','
      first=0
      printf '{"Prefix":"%s%s/"}' "$prefix" "$name"
    done
  fi
  printf ']}\n'
  exit 0
fi

printf '{"Contents":['
first=1
if [[ -d "$dir" ]]; then
  mapfile -t files < <(find "$dir" -type f | sort)
  for f in "${files[@]}"; do
    [[ "$first" -eq 1 ]] || printf ','
    first=0
    printf '{"Key":"%s"}' "${f#"$root"/}"
  done
fi
printf ']}\n'
"#;

/// Stand-in for `s3tar`: logs every invocation, fails when an argument
/// contains `FAKE_S3TAR_FAIL`.
const FAKE_S3TAR: &str = r#"#!/usr/bin/env bash
set -euo pipefail

if [[ -n "${FAKE_S3TAR_LOG:-}" ]]; then
  printf "%s\n" "$*" >> "$FAKE_S3TAR_LOG"
fi
if [[ -n "${FAKE_S3TAR_FAIL:-}" ]]; then
  for arg in "$@"; do
    if [[ "$arg" == *"$FAKE_S3TAR_FAIL"* ]]; then
      echo "simulated s3tar failure" >&2
      exit 1
    fi
  done
fi
exit 0
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write fake script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }
}

pub struct Fixture {
    pub root: PathBuf,
    pub home: PathBuf,
    pub bucket_dir: PathBuf,
    pub aws: PathBuf,
    pub s3tar: PathBuf,
    pub s3tar_log: PathBuf,
    pub rm_log: PathBuf,
}

impl Fixture {
    pub fn new(root: &Path) -> Self {
        let home = root.join("vault-home");
        let bucket_dir = root.join("bucket");
        fs::create_dir_all(&home).expect("mkdir home");
        fs::create_dir_all(&bucket_dir).expect("mkdir bucket");
        let aws = root.join("aws");
        let s3tar = root.join("s3tar");
        write_script(&aws, FAKE_AWS);
        write_script(&s3tar, FAKE_S3TAR);
        Self {
            root: root.to_path_buf(),
            home,
            bucket_dir,
            aws,
            s3tar,
            s3tar_log: root.join("s3tar.log"),
            rm_log: root.join("rm.log"),
        }
    }

    /// A day partition holding `objects` files (zero leaves only the directory marker).
    pub fn day(&self, company: &str, object: &str, y: &str, m: &str, d: &str, objects: usize) {
        let dir = self
            .bucket_dir
            .join(format!("raw/{company}/{object}/year={y}/month={m}/day={d}"));
        fs::create_dir_all(&dir).expect("mkdir day");
        for idx in 0..objects {
            fs::write(dir.join(format!("part-{idx:05}.parquet")), b"x").expect("write object");
        }
    }

    pub fn day_exists(&self, company: &str, object: &str, y: &str, m: &str, d: &str) -> bool {
        self.bucket_dir
            .join(format!("raw/{company}/{object}/year={y}/month={m}/day={d}"))
            .exists()
    }

    pub fn ledger(&self, name: &str) -> PathBuf {
        self.home.join("ledgers").join(name)
    }

    pub fn ledger_lines(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.ledger(name))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn s3tar_calls(&self) -> Vec<String> {
        fs::read_to_string(&self.s3tar_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("coldvault");
        cmd.current_dir(&self.root)
            .env("COLDVAULT_HOME", &self.home)
            .env("COLDVAULT_AWS_BIN", &self.aws)
            .env("COLDVAULT_S3TAR_BIN", &self.s3tar)
            .env("COLDVAULT_BUCKET", "lake")
            .env("FAKE_S3_ROOT", &self.bucket_dir)
            .env("FAKE_S3TAR_LOG", &self.s3tar_log)
            .env("FAKE_S3_RM_LOG", &self.rm_log);
        cmd
    }

    /// The acme/Invoice May 2024 layout: day 01 marker only, days 02 and 15 with data.
    pub fn seed_scenario(&self) {
        self.day("acme", "Invoice", "2024", "05", "01", 0);
        self.day("acme", "Invoice", "2024", "05", "02", 5);
        self.day("acme", "Invoice", "2024", "05", "15", 5);
    }
}
