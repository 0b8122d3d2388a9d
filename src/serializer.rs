use std::path::Path;

use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Writes `message` to `path` as pretty-printed JSON.
pub fn write_json_file<M: Serialize>(message: &M, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_vec_pretty(message)
        .map_err(|e| Error::InvalidArgument(format!("cannot encode message to JSON: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads a message written by [`write_json_file`].
pub fn read_json_file<M: DeserializeOwned>(path: impl AsRef<Path>) -> Result<M> {
    let json = std::fs::read(path)?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::InvalidArgument(format!("cannot decode message from JSON: {e}")))
}

/// Writes `message` to `path` in protobuf wire format.
pub fn write_binary_file<M: Message>(message: &M, path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, message.encode_to_vec())?;
    Ok(())
}

/// Reads a message written by [`write_binary_file`].
pub fn read_binary_file<M: Message + Default>(path: impl AsRef<Path>) -> Result<M> {
    let bytes = std::fs::read(path)?;
    M::decode(bytes.as_slice())
        .map_err(|e| Error::InvalidArgument(format!("cannot decode message from binary: {e}")))
}
