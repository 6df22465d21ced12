use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PipeError, Result};

/// Value-level (de)serialization for typed channels.
///
/// `decode` must tell incomplete input apart from malformed input: `Ok(None)`
/// means "wait for more bytes", `Err` means the stream is corrupt.
pub trait ItemCodec<T>: Send + Sync {
    /// Append one encoded item to `dst`.
    fn encode(&self, item: &T, dst: &mut BytesMut) -> Result<()>;

    /// Decode one item from the front of `src`, returning it and the number
    /// of bytes it occupied.
    fn decode(&self, src: &[u8]) -> Result<Option<(T, usize)>>;
}

/// Length-prefixed JSON items: `[u32 LE length][JSON]`.
pub struct JsonCodec<T> {
    max_item_size: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Default largest accepted item: 16 MiB.
    pub const DEFAULT_MAX_ITEM_SIZE: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_item_size(Self::DEFAULT_MAX_ITEM_SIZE)
    }

    /// Limits above `u32::MAX` are clamped; the length prefix is 32 bits.
    pub fn with_max_item_size(max_item_size: usize) -> Self {
        Self {
            max_item_size: max_item_size.min(u32::MAX as usize),
            _marker: PhantomData,
        }
    }

    pub fn max_item_size(&self) -> usize {
        self.max_item_size
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::with_max_item_size(self.max_item_size)
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec")
            .field("max_item_size", &self.max_item_size)
            .finish()
    }
}

impl<T> ItemCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, item: &T, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(item).map_err(|e| PipeError::Encode(e.to_string()))?;
        if json.len() > self.max_item_size {
            return Err(PipeError::Encode(format!(
                "item of {} bytes exceeds limit of {}",
                json.len(),
                self.max_item_size
            )));
        }
        let len = u32::try_from(json.len())
            .map_err(|_| PipeError::Encode(format!("item of {} bytes has no u32 length", json.len())))?;
        dst.reserve(4 + json.len());
        dst.put_u32_le(len);
        dst.put_slice(&json);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<Option<(T, usize)>> {
        let Some(prefix) = src.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len > self.max_item_size {
            return Err(PipeError::Decode(format!(
                "item length {len} exceeds limit of {}",
                self.max_item_size
            )));
        }
        let Some(body) = src.get(4..4 + len) else {
            return Ok(None);
        };
        let item = serde_json::from_slice(body).map_err(|e| PipeError::Decode(e.to_string()))?;
        Ok(Some((item, 4 + len)))
    }
}
