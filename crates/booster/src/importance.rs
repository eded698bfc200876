//! Feature importance from model dumps.
//!
//! Scores are keyed by the feature label used in the dump (`f3`, or a name
//! from a feature map). `gain` and `cover` are averages per split;
//! `total_gain` and `total_cover` are plain sums.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{BoosterError, Result};
use crate::native::{NativeError, TreeDumpNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportanceType {
    /// Number of splits on the feature.
    Weight,
    /// Average gain of splits on the feature.
    Gain,
    /// Average cover of splits on the feature.
    Cover,
    TotalGain,
    TotalCover,
}

impl ImportanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::Gain => "gain",
            Self::Cover => "cover",
            Self::TotalGain => "total_gain",
            Self::TotalCover => "total_cover",
        }
    }

    /// Dump statistic summed for this type, `None` for `weight`.
    fn statistic(&self) -> Option<&'static str> {
        match self {
            Self::Weight => None,
            Self::Gain | Self::TotalGain => Some("gain"),
            Self::Cover | Self::TotalCover => Some("cover"),
        }
    }

    fn is_average(&self) -> bool {
        matches!(self, Self::Gain | Self::Cover)
    }
}

impl fmt::Display for ImportanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportanceType {
    type Err = BoosterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weight" => Ok(Self::Weight),
            "gain" => Ok(Self::Gain),
            "cover" => Ok(Self::Cover),
            "total_gain" => Ok(Self::TotalGain),
            "total_cover" => Ok(Self::TotalCover),
            other => Err(BoosterError::contract(format!(
                "unknown importance type '{other}', expected one of \
                 weight, gain, cover, total_gain, total_cover"
            ))),
        }
    }
}

/// Running per-feature count and sum.
#[derive(Debug, Default)]
struct Tally {
    counts: BTreeMap<String, u64>,
    sums: BTreeMap<String, f64>,
}

impl Tally {
    fn add(&mut self, feature: &str, value: f64) {
        *self.counts.entry(feature.to_string()).or_default() += 1;
        *self.sums.entry(feature.to_string()).or_default() += value;
    }

    fn finish(self, kind: ImportanceType) -> BTreeMap<String, f64> {
        if kind == ImportanceType::Weight {
            return self.counts.into_iter().map(|(k, n)| (k, n as f64)).collect();
        }
        let Self { counts, sums } = self;
        sums.into_iter()
            .map(|(feature, sum)| {
                let score = if kind.is_average() {
                    sum / counts[&feature] as f64
                } else {
                    sum
                };
                (feature, score)
            })
            .collect()
    }
}

// =============================================================================
// Text dumps
// =============================================================================

/// Feature label of a split line: the bracket content up to `<`.
fn split_feature(line: &str) -> Option<&str> {
    let start = line.find('[')? + 1;
    let end = start + line[start..].find(']')?;
    let inner = &line[start..end];
    Some(inner.split_once('<').map_or(inner, |(name, _)| name))
}

/// Value following `key=` up to the next comma.
fn statistic(line: &str, key: &str) -> Result<f64> {
    let token = format!("{key}=");
    let start = line
        .find(&token)
        .ok_or_else(|| NativeError::new(format!("dump line has no '{key}' statistic: {line}")))?
        + token.len();
    let rest = &line[start..];
    let value = rest.split(',').next().unwrap_or(rest).trim();
    value
        .parse::<f64>()
        .map_err(|_| NativeError::new(format!("invalid {key} value '{value}' in dump")).into())
}

/// Split counts per feature from `text` dumps.
pub fn weights_from_text_dump(trees: &[String]) -> Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for line in trees.iter().flat_map(|tree| tree.lines()) {
        if let Some(feature) = split_feature(line) {
            *counts.entry(feature.to_string()).or_default() += 1;
        }
    }
    Ok(counts)
}

/// Importance from `text` dumps; gain and cover types need dumps with statistics.
pub fn from_text_dump(trees: &[String], kind: ImportanceType) -> Result<BTreeMap<String, f64>> {
    let mut tally = Tally::default();
    for line in trees.iter().flat_map(|tree| tree.lines()) {
        let Some(feature) = split_feature(line) else {
            continue;
        };
        let value = match kind.statistic() {
            Some(key) => statistic(line, key)?,
            None => 0.0,
        };
        tally.add(feature, value);
    }
    Ok(tally.finish(kind))
}

// =============================================================================
// JSON dumps
// =============================================================================

/// Importance from `json` dumps.
pub fn from_json_dump(trees: &[String], kind: ImportanceType) -> Result<BTreeMap<String, f64>> {
    let mut tally = Tally::default();
    for tree in trees {
        let root: TreeDumpNode = serde_json::from_str(tree)
            .map_err(|e| NativeError::new(format!("malformed json tree dump: {e}")))?;
        visit(&root, kind, &mut tally)?;
    }
    Ok(tally.finish(kind))
}

fn visit(node: &TreeDumpNode, kind: ImportanceType, tally: &mut Tally) -> Result<()> {
    if let Some(feature) = &node.split {
        let value = match kind.statistic() {
            Some("gain") => node.gain,
            Some(_) => node.cover,
            None => Some(0.0),
        }
        .ok_or_else(|| NativeError::new(format!("node {} has no {kind} statistic", node.nodeid)))?;
        tally.add(feature, value);
    }
    for child in &node.children {
        visit(child, kind, tally)?;
    }
    Ok(())
}
