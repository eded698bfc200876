//! Model persistence formats.
//!
//! | format       | layout                                                   |
//! |--------------|----------------------------------------------------------|
//! | `json`       | [`ModelSchema`] as JSON                                  |
//! | `ubj`        | magic `BSTB`, version byte, postcard-encoded schema      |
//! | `deprecated` | 32-byte `BSTR` header, checksummed legacy payload        |
//!
//! [`decode`] detects the format from the leading bytes, so a buffer saved in
//! any format loads without naming it.

mod legacy;
pub mod schema;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::error::BoosterError;

pub use legacy::{LegacyHeader, HEADER_SIZE as LEGACY_HEADER_SIZE, MAGIC as LEGACY_MAGIC};
pub use schema::{
    GbTreeSchema, LearnerSchema, ModelParamSchema, ModelSchema, TreeSchema, NO_CHILD,
    SCHEMA_VERSION,
};

/// Magic bytes of the `ubj` encoding.
pub const BINARY_MAGIC: &[u8; 4] = b"BSTB";

/// Current `ubj` encoding version.
pub const BINARY_VERSION: u8 = 1;

// ============================================================================
// Format
// ============================================================================

/// Persisted model format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModelFormat {
    Json,
    /// Compact binary encoding; the default.
    #[default]
    Ubj,
    /// Legacy binary format without feature metadata.
    Deprecated,
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Ubj => "ubj",
            Self::Deprecated => "deprecated",
        }
    }

    /// Format implied by a file extension, `None` when unrecognized.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "ubj" => Some(Self::Ubj),
            "deprecated" | "bin" => Some(Self::Deprecated),
            _ => None,
        }
    }

    /// Format of an encoded buffer, `None` when unrecognized.
    pub fn detect(buf: &[u8]) -> Option<Self> {
        if buf.starts_with(BINARY_MAGIC) {
            return Some(Self::Ubj);
        }
        if buf.starts_with(LEGACY_MAGIC) {
            return Some(Self::Deprecated);
        }
        match buf.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = BoosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "ubj" => Ok(Self::Ubj),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(BoosterError::Contract(format!(
                "unknown model format '{other}', expected one of: json, ubj, deprecated"
            ))),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from encoding or decoding a model buffer.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("unknown model format '{0}'")]
    UnknownFormat(String),

    /// The buffer does not start like any known format.
    #[error("buffer is not a serialized model")]
    NotAModel,

    #[error("unsupported model format version {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("model truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("corrupt model: {0}")]
    Corrupt(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] postcard::Error),
}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Encode a model in `format`.
pub fn encode(model: &ModelSchema, format: ModelFormat) -> Result<Vec<u8>, PersistError> {
    match format {
        ModelFormat::Json => Ok(serde_json::to_vec(model)?),
        ModelFormat::Ubj => {
            let payload = postcard::to_allocvec(model)?;
            let mut out = Vec::with_capacity(5 + payload.len());
            out.extend_from_slice(BINARY_MAGIC);
            out.push(BINARY_VERSION);
            out.extend_from_slice(&payload);
            Ok(out)
        }
        ModelFormat::Deprecated => legacy::encode(model),
    }
}

/// Decode a model, detecting its format.
pub fn decode(buf: &[u8]) -> Result<ModelSchema, PersistError> {
    match ModelFormat::detect(buf).ok_or(PersistError::NotAModel)? {
        ModelFormat::Json => Ok(serde_json::from_slice(buf)?),
        ModelFormat::Ubj => {
            let version = *buf.get(4).ok_or(PersistError::Truncated {
                expected: 5,
                actual: buf.len(),
            })?;
            if version != BINARY_VERSION {
                return Err(PersistError::UnsupportedVersion(version));
            }
            let (model, rest): (ModelSchema, &[u8]) = postcard::take_from_bytes(&buf[5..])?;
            if !rest.is_empty() {
                return Err(PersistError::Corrupt(format!(
                    "{} trailing bytes after model",
                    rest.len()
                )));
            }
            Ok(model)
        }
        ModelFormat::Deprecated => legacy::decode(buf),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;

    fn model() -> ModelSchema {
        ModelSchema {
            version: SCHEMA_VERSION,
            learner: LearnerSchema {
                attributes: BTreeMap::from([("best_score".to_string(), "0.1".to_string())]),
                feature_names: vec!["x".into()],
                feature_types: vec!["q".into()],
                model_param: ModelParamSchema {
                    base_score: 0.5,
                    num_class: 0,
                    num_feature: 1,
                },
                objective: "reg:squarederror".into(),
                gradient_booster: GbTreeSchema {
                    trees: vec![TreeSchema {
                        split_indices: vec![0],
                        split_conditions: vec![0.0],
                        left_children: vec![NO_CHILD],
                        right_children: vec![NO_CHILD],
                        default_left: vec![false],
                        base_weights: vec![0.3],
                        loss_changes: vec![0.0],
                        sum_hessian: vec![5.0],
                    }],
                    tree_info: vec![0],
                },
            },
        }
    }

    #[test]
    fn every_format_is_detected() {
        for format in [ModelFormat::Json, ModelFormat::Ubj, ModelFormat::Deprecated] {
            let bytes = encode(&model(), format).unwrap();
            assert_eq!(ModelFormat::detect(&bytes), Some(format), "{format}");
        }
    }

    #[test]
    fn deprecated_drops_feature_metadata() {
        let bytes = encode(&model(), ModelFormat::Deprecated).unwrap();
        let loaded = decode(&bytes).unwrap();
        assert!(loaded.learner.feature_names.is_empty());
        assert!(loaded.learner.feature_types.is_empty());
        assert_eq!(loaded.learner.gradient_booster, model().learner.gradient_booster);
        assert_eq!(loaded.learner.attributes, model().learner.attributes);
    }

    #[test]
    fn deprecated_detects_corruption() {
        let mut bytes = encode(&model(), ModelFormat::Deprecated).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode(&bytes),
            Err(PersistError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn garbage_is_not_a_model() {
        assert!(matches!(decode(b"hello"), Err(PersistError::NotAModel)));
        assert!(matches!(decode(&[]), Err(PersistError::NotAModel)));
    }

    #[test]
    fn truncated_binary_fails() {
        let bytes = encode(&model(), ModelFormat::Ubj).unwrap();
        assert!(decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn format_from_extension() {
        let cases = [
            ("m.json", Some(ModelFormat::Json)),
            ("m.UBJ", Some(ModelFormat::Ubj)),
            ("m.bin", Some(ModelFormat::Deprecated)),
            ("m.model", None),
            ("m", None),
        ];
        for (path, expected) in cases {
            assert_eq!(ModelFormat::from_path(&PathBuf::from(path)), expected, "{path}");
        }
    }

    #[test]
    fn unknown_format_name_is_contract_error() {
        let err = "xml".parse::<ModelFormat>().unwrap_err();
        assert!(matches!(err, BoosterError::Contract(_)));
    }
}
