//! Human-readable tree dumps.
//!
//! Text dumps put one node per line, indented by depth with tabs:
//!
//! ```text
//! 0:[f3<0.5] yes=1,no=2,missing=1,gain=10,cover=4
//! 	1:leaf=0.3,cover=2
//! 	2:leaf=-0.1,cover=2
//! ```
//!
//! JSON dumps nest children under their parent as [`TreeDumpNode`]s.

use std::fmt::Write as _;
use std::path::Path;

use super::tree::{NodeId, RegTree};
use crate::native::{NativeError, NativeResult, TreeDumpNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DumpKind {
    Text,
    Json,
}

impl DumpKind {
    pub fn parse(format: &str) -> NativeResult<Self> {
        match format {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(NativeError::new(format!(
                "Unknown dump format '{other}', expected 'text' or 'json'"
            ))),
        }
    }
}

// ============================================================================
// Feature Map
// ============================================================================

/// Feature names and types used to label splits.
///
/// Types follow the feature map convention: `i` indicator, `q` quantitative,
/// `int` integer, `float` float.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FeatureMap {
    names: Vec<String>,
    types: Vec<String>,
}

impl FeatureMap {
    pub fn new(names: Vec<String>, types: Vec<String>) -> Self {
        Self { names, types }
    }

    /// Parse `index<TAB>name<TAB>type` lines.
    pub fn parse(text: &str) -> NativeResult<Self> {
        let mut map = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let [index, name, kind] = fields.as_slice() else {
                return Err(NativeError::new(format!(
                    "Invalid feature map line {}: expected 'index<TAB>name<TAB>type'",
                    lineno + 1
                )));
            };
            let index: usize = index.trim().parse().map_err(|_| {
                NativeError::new(format!("Invalid feature index '{index}' in feature map"))
            })?;
            if index != map.names.len() {
                return Err(NativeError::new(format!(
                    "Feature map indices must be consecutive from 0, got {index} at line {}",
                    lineno + 1
                )));
            }
            if !matches!(kind.trim(), "i" | "q" | "int" | "float") {
                return Err(NativeError::new(format!(
                    "Unknown feature type '{kind}' in feature map"
                )));
            }
            map.names.push(name.to_string());
            map.types.push(kind.trim().to_string());
        }
        Ok(map)
    }

    pub fn load(path: &Path) -> NativeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NativeError::new(format!("Failed to read feature map {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    fn name(&self, feature: u32) -> String {
        self.names
            .get(feature as usize)
            .cloned()
            .unwrap_or_else(|| format!("f{feature}"))
    }

    fn kind(&self, feature: u32) -> &str {
        self.types.get(feature as usize).map_or("q", String::as_str)
    }

    /// Split label as it appears inside the brackets of a text dump.
    fn split_label(&self, feature: u32, condition: f32) -> String {
        let name = self.name(feature);
        match self.kind(feature) {
            "i" => name,
            "int" => format!("{name}<{}", condition.ceil() as i64),
            _ => format!("{name}<{condition}"),
        }
    }
}

// ============================================================================
// Dumps
// ============================================================================

pub(crate) fn dump_tree(tree: &RegTree, fmap: &FeatureMap, with_stats: bool, kind: DumpKind) -> NativeResult<String> {
    match kind {
        DumpKind::Text => Ok(dump_text(tree, fmap, with_stats)),
        DumpKind::Json => serde_json::to_string(&json_node(tree, fmap, with_stats, 0, 0))
            .map_err(|e| NativeError::new(format!("Failed to dump tree as JSON: {e}"))),
    }
}

fn dump_text(tree: &RegTree, fmap: &FeatureMap, with_stats: bool) -> String {
    let depths = tree.depths();
    let mut out = String::new();
    for node in tree.preorder() {
        for _ in 0..depths[node as usize] {
            out.push('\t');
        }
        if tree.is_leaf(node) {
            let _ = write!(out, "{node}:leaf={}", tree.value(node));
            if with_stats {
                let _ = write!(out, ",cover={}", tree.cover(node));
            }
        } else {
            let feature = tree.split_index(node);
            let _ = write!(
                out,
                "{node}:[{}] yes={},no={},missing={}",
                fmap.split_label(feature, tree.split_condition(node)),
                tree.left_child(node),
                tree.right_child(node),
                tree.missing_child(node)
            );
            if with_stats {
                let _ = write!(out, ",gain={},cover={}", tree.gain(node), tree.cover(node));
            }
        }
        out.push('\n');
    }
    out
}

fn json_node(tree: &RegTree, fmap: &FeatureMap, with_stats: bool, node: NodeId, depth: u32) -> TreeDumpNode {
    if tree.is_leaf(node) {
        return TreeDumpNode {
            nodeid: node,
            depth: None,
            split: None,
            split_condition: None,
            yes: None,
            no: None,
            missing: None,
            gain: None,
            cover: with_stats.then(|| f64::from(tree.cover(node))),
            leaf: Some(tree.value(node)),
            children: Vec::new(),
        };
    }
    let (left, right) = (tree.left_child(node), tree.right_child(node));
    TreeDumpNode {
        nodeid: node,
        depth: Some(depth),
        split: Some(fmap.name(tree.split_index(node))),
        split_condition: Some(tree.split_condition(node)),
        yes: Some(left),
        no: Some(right),
        missing: Some(tree.missing_child(node)),
        gain: with_stats.then(|| f64::from(tree.gain(node))),
        cover: with_stats.then(|| f64::from(tree.cover(node))),
        leaf: None,
        children: vec![
            json_node(tree, fmap, with_stats, left, depth + 1),
            json_node(tree, fmap, with_stats, right, depth + 1),
        ],
    }
}
