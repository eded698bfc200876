//! The `deprecated` binary format.
//!
//! A 32-byte header followed by a postcard payload. The payload predates
//! feature metadata, so feature names and types are not stored; loading
//! yields a model without them.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Magic ("BSTR")
//! 4       1     Version major
//! 5       1     Version minor
//! 6       2     Reserved
//! 8       4     Payload size (bytes)
//! 12      4     CRC32 checksum of payload
//! 16      4     Number of features
//! 20      4     Number of groups
//! 24      8     Reserved
//! ```

use serde::{Deserialize, Serialize};

use super::schema::{GbTreeSchema, LearnerSchema, ModelParamSchema, ModelSchema, SCHEMA_VERSION};
use super::PersistError;

// ============================================================================
// Constants
// ============================================================================

/// Magic bytes identifying a legacy model buffer.
pub const MAGIC: &[u8; 4] = b"BSTR";

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = 32;

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub payload_size: u32,
    pub checksum: u32,
    pub num_features: u32,
    pub num_groups: u32,
}

impl LegacyHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        buf[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_features.to_le_bytes());
        buf[20..24].copy_from_slice(&self.num_groups.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PersistError> {
        if buf.len() < HEADER_SIZE {
            return Err(PersistError::Truncated {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }
        if &buf[0..4] != MAGIC {
            return Err(PersistError::NotAModel);
        }
        let version_major = buf[4];
        if version_major > VERSION_MAJOR {
            return Err(PersistError::UnsupportedVersion(version_major));
        }
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        Ok(Self {
            version_major,
            version_minor: buf[5],
            payload_size: word(8),
            checksum: word(12),
            num_features: word(16),
            num_groups: word(20),
        })
    }
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LegacyPayload {
    model_param: ModelParamSchema,
    objective: String,
    /// Attributes as ordered pairs.
    attributes: Vec<(String, String)>,
    gradient_booster: GbTreeSchema,
}

pub(crate) fn encode(model: &ModelSchema) -> Result<Vec<u8>, PersistError> {
    let learner = &model.learner;
    let payload = LegacyPayload {
        model_param: learner.model_param,
        objective: learner.objective.clone(),
        attributes: learner
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        gradient_booster: learner.gradient_booster.clone(),
    };
    let payload_bytes = postcard::to_allocvec(&payload)?;
    let payload_size = u32::try_from(payload_bytes.len())
        .map_err(|_| PersistError::Corrupt("payload exceeds 4 GiB".into()))?;

    let header = LegacyHeader {
        version_major: VERSION_MAJOR,
        version_minor: VERSION_MINOR,
        payload_size,
        checksum: crc32fast::hash(&payload_bytes),
        num_features: learner.model_param.num_feature as u32,
        num_groups: learner.model_param.num_class.max(1),
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload_bytes.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

pub(crate) fn decode(buf: &[u8]) -> Result<ModelSchema, PersistError> {
    let header = LegacyHeader::from_bytes(buf)?;
    let payload = &buf[HEADER_SIZE..];
    let expected = header.payload_size as usize;
    if payload.len() < expected {
        return Err(PersistError::Truncated {
            expected,
            actual: payload.len(),
        });
    }
    let payload = &payload[..expected];

    let actual = crc32fast::hash(payload);
    if actual != header.checksum {
        return Err(PersistError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let payload: LegacyPayload = postcard::from_bytes(payload)?;
    if payload.model_param.num_feature != u64::from(header.num_features) {
        return Err(PersistError::Corrupt(format!(
            "header declares {} features, payload {}",
            header.num_features, payload.model_param.num_feature
        )));
    }

    Ok(ModelSchema {
        version: SCHEMA_VERSION,
        learner: LearnerSchema {
            attributes: payload.attributes.into_iter().collect(),
            feature_names: Vec::new(),
            feature_types: Vec::new(),
            model_param: payload.model_param,
            objective: payload.objective,
            gradient_booster: payload.gradient_booster,
        },
    })
}
