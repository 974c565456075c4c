use crate::error::{VaultError, WarnCode};
use crate::vault::path_key::{KEY_SEPARATOR, Level, PathKey};
use crate::vault::retention::SkipReason;
use crate::vault::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Done,
    Ignored(SkipReason),
    Empty,
    All,
}

impl Outcome {
    /// On-disk suffix; `Done` is written as a bare key.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Done => None,
            Self::Ignored(SkipReason::Rule1) => Some("IGNORED_RULE_1"),
            Self::Ignored(SkipReason::Retention) => Some("IGNORED_RULE_90"),
            Self::Empty => Some("EMPTY"),
            Self::All => Some("ALL"),
        }
    }

    pub fn from_suffix(raw: &str) -> Option<Self> {
        match raw {
            "DONE" => Some(Self::Done),
            "IGNORED_RULE_1" => Some(Self::Ignored(SkipReason::Rule1)),
            "IGNORED_RULE_90" | "IGNORED_RULE_RETENTION" => {
                Some(Self::Ignored(SkipReason::Retention))
            }
            "EMPTY" => Some(Self::Empty),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        self.suffix().unwrap_or("DONE")
    }

    fn valid_at(self, level: Level) -> bool {
        match self {
            Self::All => level != Level::Day,
            Self::Done | Self::Ignored(_) | Self::Empty => level == Level::Day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub key: PathKey,
    pub outcome: Outcome,
}

impl LedgerEntry {
    pub fn new(key: PathKey, outcome: Outcome) -> Result<Self, VaultError> {
        if !outcome.valid_at(key.level()) {
            return Err(VaultError::InvalidPathKey(format!(
                "{} is not a valid outcome for {} key {key}",
                outcome.label(),
                key.level().as_str()
            )));
        }
        Ok(Self { key, outcome })
    }

    pub fn encode(&self) -> String {
        match self.outcome.suffix() {
            Some(suffix) => format!("{}{KEY_SEPARATOR}{suffix}", self.key.encode()),
            None => self.key.encode(),
        }
    }

    pub fn parse(line: &str) -> Result<Self, VaultError> {
        let trimmed = line.trim();
        let mut fields = trimmed.split(KEY_SEPARATOR).collect::<Vec<_>>();
        let outcome = match fields.last().copied().and_then(Outcome::from_suffix) {
            Some(outcome) => {
                fields.pop();
                outcome
            }
            None => Outcome::Done,
        };
        let key = PathKey::from_segments(&fields)?;
        Self::new(key, outcome)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LedgerStats {
    pub lines: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

/// Idempotency log consulted before every unit of work.
pub trait IdempotencyLog {
    /// True when `key` has its own entry or an ancestor carries `ALL`.
    fn contains(&self, key: &PathKey) -> bool;
    fn outcome(&self, key: &PathKey) -> Option<Outcome>;
    fn append(&mut self, key: &PathKey, outcome: Outcome) -> Result<(), VaultError>;
}

/// Append-only ledger file, one `LedgerEntry` per line.
///
/// Entries are loaded once at open and every append is mirrored into the
/// in-memory map, so a run always sees its own writes.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    file: File,
    entries: BTreeMap<PathKey, Outcome>,
    stats: LedgerStats,
    /// A failed write may have left a fragment without its newline.
    torn: bool,
}

/// Writes `line`, first terminating any fragment a failed write left behind.
fn write_framed<W: Write>(out: &mut W, torn: &mut bool, line: &str) -> std::io::Result<()> {
    if *torn {
        out.write_all(b"\n")?;
        *torn = false;
    }
    let written = out.write_all(line.as_bytes()).and_then(|()| out.flush());
    if written.is_err() {
        *torn = true;
    }
    written
}

fn ends_without_newline(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let raw = if path.exists() {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
        } else {
            String::new()
        };

        let mut entries = BTreeMap::new();
        let mut stats = LedgerStats::default();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            stats.lines += 1;
            match LedgerEntry::parse(line) {
                Ok(entry) => {
                    if entries.contains_key(&entry.key) {
                        stats.duplicates += 1;
                    } else {
                        entries.insert(entry.key, entry.outcome);
                    }
                }
                Err(err) => {
                    stats.malformed += 1;
                    warn::emit(WarnEvent {
                        code: WarnCode::LedgerLineMalformed,
                        stage: "ledger-load",
                        action: "skip-line",
                        key: &format!("{}:{}", path.display(), idx + 1),
                        retry: "none",
                        reason: "unparseable-line",
                        err: &err.to_string(),
                    });
                }
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if ends_without_newline(&mut file)? {
            // torn tail from an interrupted append
            file.write_all(b"\n")
                .with_context(|| format!("failed to repair {}", path.display()))?;
            file.sync_data()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            stats,
            torn: false,
        })
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = LedgerEntry> + '_ {
        self.entries.iter().map(|(key, outcome)| LedgerEntry {
            key: key.clone(),
            outcome: *outcome,
        })
    }

    pub fn count_by_outcome(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for outcome in self.entries.values() {
            *out.entry(outcome.label()).or_insert(0) += 1;
        }
        out
    }

    pub fn close(self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("failed to sync {}", self.path.display()))
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        write_framed(&mut self.file, &mut self.torn, line)?;
        self.file.sync_data()
    }
}

impl IdempotencyLog for Ledger {
    fn contains(&self, key: &PathKey) -> bool {
        if self.entries.contains_key(key) {
            return true;
        }
        key.ancestors()
            .any(|ancestor| self.entries.get(&ancestor) == Some(&Outcome::All))
    }

    fn outcome(&self, key: &PathKey) -> Option<Outcome> {
        self.entries.get(key).copied()
    }

    fn append(&mut self, key: &PathKey, outcome: Outcome) -> Result<(), VaultError> {
        let entry = LedgerEntry::new(key.clone(), outcome)?;
        let line = format!("{}\n", entry.encode());
        self.write_line(&line).map_err(|err| VaultError::LedgerWrite {
            path: self.path.display().to_string(),
            key: key.encode(),
            reason: err.to_string(),
        })?;
        self.stats.lines += 1;
        if self.entries.contains_key(key) {
            self.stats.duplicates += 1;
        } else {
            self.entries.insert(entry.key, outcome);
        }
        Ok(())
    }
}

pub fn clear(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
