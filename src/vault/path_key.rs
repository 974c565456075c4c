use crate::error::VaultError;
use std::fmt;

pub const KEY_SEPARATOR: char = ':';

/// Ledger suffix tokens. A segment may never collide with one of these,
/// otherwise a `DONE` line could not be told apart from an outcome line.
const RESERVED_SEGMENTS: &[&str] = &[
    "ALL",
    "DONE",
    "EMPTY",
    "IGNORED_RULE_1",
    "IGNORED_RULE_90",
    "IGNORED_RULE_RETENTION",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Company,
    Object,
    Year,
    Month,
    Day,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Object => "object",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
        }
    }

    fn depth(self) -> usize {
        match self {
            Self::Company => 1,
            Self::Object => 2,
            Self::Year => 3,
            Self::Month => 4,
            Self::Day => 5,
        }
    }

    fn from_depth(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(Self::Company),
            2 => Some(Self::Object),
            3 => Some(Self::Year),
            4 => Some(Self::Month),
            5 => Some(Self::Day),
            _ => None,
        }
    }
}

/// Position in the `company -> object -> year -> month -> day` tree.
///
/// Ordering is the lexicographic order of the segment tuple, so a parent
/// sorts directly before its children.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathKey {
    segments: Vec<String>,
}

fn validate_segment(segment: &str) -> Result<(), VaultError> {
    if segment.is_empty() {
        return Err(VaultError::InvalidPathKey("empty segment".to_string()));
    }
    if segment.trim() != segment {
        return Err(VaultError::InvalidPathKey(format!(
            "segment has surrounding whitespace: {segment:?}"
        )));
    }
    if segment.contains(KEY_SEPARATOR) || segment.contains('/') {
        return Err(VaultError::InvalidPathKey(format!(
            "segment contains a separator: {segment:?}"
        )));
    }
    if RESERVED_SEGMENTS.contains(&segment) {
        return Err(VaultError::InvalidPathKey(format!(
            "segment is a reserved ledger token: {segment}"
        )));
    }
    Ok(())
}

impl PathKey {
    pub fn company(company: &str) -> Result<Self, VaultError> {
        validate_segment(company)?;
        Ok(Self {
            segments: vec![company.to_string()],
        })
    }

    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Result<Self, VaultError> {
        if Level::from_depth(segments.len()).is_none() {
            return Err(VaultError::InvalidPathKey(format!(
                "expected 1 to 5 segments, got {}",
                segments.len()
            )));
        }
        let mut out = Vec::with_capacity(segments.len());
        for segment in segments {
            let segment = segment.as_ref();
            validate_segment(segment)?;
            out.push(segment.to_string());
        }
        Ok(Self { segments: out })
    }

    pub fn child(&self, segment: &str) -> Result<Self, VaultError> {
        if self.level() == Level::Day {
            return Err(VaultError::InvalidPathKey(format!(
                "day key {self} has no children"
            )));
        }
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn level(&self) -> Level {
        Level::from_depth(self.segments.len()).unwrap_or(Level::Day)
    }

    fn segment(&self, level: Level) -> Option<&str> {
        self.segments.get(level.depth() - 1).map(String::as_str)
    }

    pub fn object(&self) -> Option<&str> {
        self.segment(Level::Object)
    }

    pub fn year(&self) -> Option<&str> {
        self.segment(Level::Year)
    }

    pub fn month(&self) -> Option<&str> {
        self.segment(Level::Month)
    }

    pub fn day(&self) -> Option<&str> {
        self.segment(Level::Day)
    }

    /// Proper ancestors, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = PathKey> + '_ {
        (1..self.segments.len()).rev().map(|len| PathKey {
            segments: self.segments[..len].to_vec(),
        })
    }

    pub fn encode(&self) -> String {
        self.segments.join(":")
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
