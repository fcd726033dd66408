//! Work-unit selection: which expert uids a node serves.
//!
//! A node is given its experts in one of three mutually exclusive ways:
//! an explicit uid list, a pattern such as `ffn.[0:256].[0:1024]` (with an
//! optional count), or a bare count. Supplying none of them is legal and
//! yields a node that serves nothing.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::Serialize;

use super::ConfigError;

/// Separator between uid blocks
pub const UID_DELIMITER: char = '.';

/// Prefix of uids generated from a bare count
pub const DEFAULT_UID_PREFIX: &str = "expert";

/// Largest number of uids a pattern may expand to when no count is given
pub const MAX_ENUMERATED_UIDS: u64 = 1 << 20;

/// One dot-separated block of an expert pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PatternBlock {
    Literal { text: String },
    /// Half-open integer range `[start:end]`
    Range { start: u64, end: u64 },
}

impl PatternBlock {
    fn size(&self) -> u64 {
        match self {
            PatternBlock::Literal { .. } => 1,
            PatternBlock::Range { start, end } => end - start,
        }
    }
}

/// A parsed expert pattern such as `myexpert.[0:256].[0:1024]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpertPattern {
    pub source: String,
    pub blocks: Vec<PatternBlock>,
}

fn range_regex() -> &'static Regex {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    RANGE.get_or_init(|| Regex::new(r"^\[(\d+):(\d+)\]$").expect("valid range regex"))
}

fn literal_regex() -> &'static Regex {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    LITERAL.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid literal regex"))
}

impl ExpertPattern {
    /// Parse a pattern. Pure function - no I/O.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut blocks = Vec::new();
        for block in pattern.split(UID_DELIMITER) {
            if let Some(caps) = range_regex().captures(block) {
                let start: u64 = caps[1]
                    .parse()
                    .map_err(|_| invalid("range bound does not fit in 64 bits"))?;
                let end: u64 = caps[2]
                    .parse()
                    .map_err(|_| invalid("range bound does not fit in 64 bits"))?;
                if start >= end {
                    return Err(invalid(&format!("empty range [{}:{}]", start, end)));
                }
                blocks.push(PatternBlock::Range { start, end });
            } else if literal_regex().is_match(block) {
                blocks.push(PatternBlock::Literal {
                    text: block.to_string(),
                });
            } else {
                return Err(invalid(&format!("malformed block '{}'", block)));
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            blocks,
        })
    }

    /// Number of distinct uids the pattern admits, `None` on overflow
    pub fn capacity(&self) -> Option<u64> {
        self.blocks
            .iter()
            .try_fold(1u64, |acc, block| acc.checked_mul(block.size()))
    }

    /// The uid at position `index` in lexicographic block order
    fn uid_at(&self, mut index: u64) -> String {
        let mut parts = vec![String::new(); self.blocks.len()];
        for (i, block) in self.blocks.iter().enumerate().rev() {
            parts[i] = match block {
                PatternBlock::Literal { text } => text.clone(),
                PatternBlock::Range { start, end } => {
                    let size = end - start;
                    let value = start + index % size;
                    index /= size;
                    value.to_string()
                }
            };
        }
        parts.join(&UID_DELIMITER.to_string())
    }

    fn sample_uid<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        self.blocks
            .iter()
            .map(|block| match block {
                PatternBlock::Literal { text } => text.clone(),
                PatternBlock::Range { start, end } => rng.gen_range(*start..*end).to_string(),
            })
            .collect::<Vec<_>>()
            .join(&UID_DELIMITER.to_string())
    }

    /// Every uid the pattern admits, in order
    pub fn enumerate(&self) -> Vec<String> {
        let capacity = self.capacity().unwrap_or(0);
        (0..capacity).map(|i| self.uid_at(i)).collect()
    }

    /// Draw `count` distinct uids uniformly at random.
    ///
    /// Callers must ensure `count <= capacity()`.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<String> {
        let capacity = self.capacity().unwrap_or(u64::MAX);
        if (count as u64).saturating_mul(2) >= capacity {
            // dense request: shuffle the full space
            let mut all = self.enumerate();
            all.shuffle(rng);
            all.truncate(count);
            return all;
        }

        let mut seen = HashSet::with_capacity(count);
        let mut uids = Vec::with_capacity(count);
        while uids.len() < count {
            let uid = self.sample_uid(rng);
            if seen.insert(uid.clone()) {
                uids.push(uid);
            }
        }
        uids
    }
}

impl fmt::Display for ExpertPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolved policy for which experts the node serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkUnitSelector {
    ExplicitList { ids: Vec<String> },
    PatternGenerated {
        pattern: ExpertPattern,
        count: Option<usize>,
    },
    CountOnly { count: usize },
    /// Relay / DHT-only node
    Empty,
}

// ============================================================================
// SBIO: Pure selection logic (no I/O)
// ============================================================================

impl WorkUnitSelector {
    /// Build the selector from the raw trio of options.
    ///
    /// An explicit list together with a pattern or a count is rejected rather
    /// than silently preferring one of them.
    pub fn resolve(
        expert_uids: Option<Vec<String>>,
        expert_pattern: Option<&str>,
        num_experts: Option<i64>,
    ) -> Result<Self, ConfigError> {
        let count = num_experts
            .map(|n| {
                let count = usize::try_from(n).map_err(|_| ConfigError::InvalidRange {
                    option: "num_experts",
                    value: n,
                })?;
                if count as u64 > MAX_ENUMERATED_UIDS {
                    return Err(ConfigError::AboveLimit {
                        option: "num_experts",
                        value: n,
                        limit: MAX_ENUMERATED_UIDS,
                    });
                }
                Ok(count)
            })
            .transpose()?;

        match (expert_uids, expert_pattern, count) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                Err(ConfigError::ConflictingWorkUnits)
            }
            (Some(ids), None, None) => {
                let mut seen = HashSet::new();
                for id in &ids {
                    if id.trim().is_empty() {
                        return Err(ConfigError::InvalidExpertUid(id.clone()));
                    }
                    if !seen.insert(id.as_str()) {
                        return Err(ConfigError::DuplicateExpertUid(id.clone()));
                    }
                }
                Ok(WorkUnitSelector::ExplicitList { ids })
            }
            (None, Some(pattern), count) => {
                let pattern = ExpertPattern::parse(pattern)?;
                match (count, pattern.capacity()) {
                    (Some(n), Some(capacity)) if n as u64 > capacity => {
                        Err(ConfigError::PatternTooSmall {
                            pattern: pattern.source.clone(),
                            requested: n,
                            capacity,
                        })
                    }
                    (None, capacity) if capacity.map_or(true, |c| c > MAX_ENUMERATED_UIDS) => {
                        Err(ConfigError::InvalidPattern {
                            pattern: pattern.source.clone(),
                            reason: format!(
                                "admits more than {} uids; pass --num_experts",
                                MAX_ENUMERATED_UIDS
                            ),
                        })
                    }
                    _ => Ok(WorkUnitSelector::PatternGenerated { pattern, count }),
                }
            }
            (None, None, Some(count)) => Ok(WorkUnitSelector::CountOnly { count }),
            (None, None, None) => Ok(WorkUnitSelector::Empty),
        }
    }

    /// Number of experts the selector yields
    pub fn expected_count(&self) -> usize {
        match self {
            WorkUnitSelector::ExplicitList { ids } => ids.len(),
            WorkUnitSelector::PatternGenerated { pattern, count } => count
                .unwrap_or_else(|| pattern.capacity().unwrap_or(0) as usize),
            WorkUnitSelector::CountOnly { count } => *count,
            WorkUnitSelector::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expected_count() == 0
    }

    /// Materialize the uids. Pattern sampling draws from `rng`.
    pub fn expert_uids<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        match self {
            WorkUnitSelector::ExplicitList { ids } => ids.clone(),
            WorkUnitSelector::PatternGenerated {
                pattern,
                count: Some(n),
            } => pattern.sample(*n, rng),
            WorkUnitSelector::PatternGenerated {
                pattern,
                count: None,
            } => pattern.enumerate(),
            WorkUnitSelector::CountOnly { count } => (0..*count)
                .map(|i| format!("{}{}{}", DEFAULT_UID_PREFIX, UID_DELIMITER, i))
                .collect(),
            WorkUnitSelector::Empty => Vec::new(),
        }
    }
}
