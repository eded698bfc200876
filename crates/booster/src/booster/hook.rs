//! Embedding a booster in a host serialization stream.
//!
//! Stream layout: `i32` LE version tag, `u32` LE model length, then the model
//! in `ubj` format. With serde, a booster serializes as `{ version, model }`.

use std::io::{Read, Write};
use std::sync::Arc;

use serde::de::{self, DeserializeSeed, Deserializer};
use serde::ser::{self, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::Booster;
use crate::error::{BoosterError, Result};
use crate::native::NativeApi;

impl Booster {
    /// Write the framed model to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        self.write_frame(out).inspect_err(|err| {
            error!(%err, "failed to write booster to stream");
        })
    }

    fn write_frame<W: Write>(&self, out: &mut W) -> Result<()> {
        let model = self.to_bytes()?;
        let size = u32::try_from(model.len()).map_err(|_| {
            BoosterError::Serialization(format!("model of {} bytes does not fit a u32 frame", model.len()))
        })?;
        out.write_all(&self.version.to_le_bytes())?;
        out.write_all(&size.to_le_bytes())?;
        out.write_all(&model)?;
        out.flush()?;
        Ok(())
    }

    /// Read a framed model from `input` into a new booster on `api`.
    pub fn read_from<R: Read>(api: Arc<dyn NativeApi>, input: &mut R) -> Result<Self> {
        Self::read_frame(api, input).inspect_err(|err| {
            error!(%err, "failed to read booster from stream");
        })
    }

    fn read_frame<R: Read>(api: Arc<dyn NativeApi>, input: &mut R) -> Result<Self> {
        let mut word = [0u8; 4];
        input.read_exact(&mut word)?;
        let version = i32::from_le_bytes(word);
        input.read_exact(&mut word)?;
        let size = u32::from_le_bytes(word) as usize;

        let mut model = Vec::new();
        input.take(size as u64).read_to_end(&mut model)?;
        if model.len() != size {
            return Err(BoosterError::Serialization(format!(
                "stream ended after {} of {size} model bytes",
                model.len()
            )));
        }
        let mut booster = Self::load_from_buffer(api, &model)?;
        booster.set_version(version);
        Ok(booster)
    }
}

impl Serialize for Booster {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let model = self.to_bytes().map_err(|err| {
            error!(%err, "failed to serialize booster");
            ser::Error::custom(err)
        })?;
        let mut state = serializer.serialize_struct("Booster", 2)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("model", &model)?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename = "Booster")]
struct BoosterRepr {
    version: i32,
    model: Vec<u8>,
}

/// Deserializes a [`Booster`] onto the given engine.
#[derive(Clone)]
pub struct BoosterSeed {
    pub api: Arc<dyn NativeApi>,
}

impl BoosterSeed {
    pub fn new(api: Arc<dyn NativeApi>) -> Self {
        Self { api }
    }
}

impl<'de> DeserializeSeed<'de> for BoosterSeed {
    type Value = Booster;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Booster, D::Error> {
        let repr = BoosterRepr::deserialize(deserializer)?;
        let mut booster = Booster::load_from_buffer(self.api, &repr.model).map_err(|err| {
            error!(%err, "failed to deserialize booster");
            de::Error::custom(err)
        })?;
        booster.set_version(repr.version);
        Ok(booster)
    }
}
