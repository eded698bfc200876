//! Schema types for model serialization.
//!
//! These types are the stable persisted shape of a model, separate from the
//! engine's runtime types. The same schema is written as JSON and as the
//! compact binary encoding, so fields are never skipped: postcard is not
//! self-describing and needs every field present.
//!
//! Maps use `BTreeMap` for deterministic output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Schema version written by this crate.
pub const SCHEMA_VERSION: [u32; 3] = [1, 0, 0];

/// Child index marking a leaf.
pub const NO_CHILD: i32 = -1;

/// Complete persisted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub version: [u32; 3],
    pub learner: LearnerSchema,
}

/// Learner state: model parameters, metadata and trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSchema {
    /// User attributes (e.g. `best_iteration`).
    pub attributes: BTreeMap<String, String>,
    pub feature_names: Vec<String>,
    pub feature_types: Vec<String>,
    pub model_param: ModelParamSchema,
    /// Objective name, e.g. `reg:squarederror`.
    pub objective: String,
    pub gradient_booster: GbTreeSchema,
}

/// Parameters fixed by the trained model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParamSchema {
    /// Global bias in probability space for logistic objectives.
    pub base_score: f32,
    pub num_class: u32,
    pub num_feature: u64,
}

/// Tree ensemble.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GbTreeSchema {
    pub trees: Vec<TreeSchema>,
    /// Output group of each tree.
    pub tree_info: Vec<u32>,
}

/// One regression tree in SoA layout; node 0 is the root.
///
/// Leaves have `left_children[i] == right_children[i] == -1`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreeSchema {
    pub split_indices: Vec<u32>,
    pub split_conditions: Vec<f32>,
    pub left_children: Vec<i32>,
    pub right_children: Vec<i32>,
    pub default_left: Vec<bool>,
    /// Leaf value for leaves, shrunk node weight for splits.
    pub base_weights: Vec<f32>,
    /// Split gain; zero for leaves.
    pub loss_changes: Vec<f32>,
    /// Hessian sum reaching each node.
    pub sum_hessian: Vec<f32>,
}

impl TreeSchema {
    pub fn num_nodes(&self) -> usize {
        self.left_children.len()
    }
}

impl ModelSchema {
    /// Number of trees across all groups.
    pub fn num_trees(&self) -> usize {
        self.learner.gradient_booster.trees.len()
    }
}
