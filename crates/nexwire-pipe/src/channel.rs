use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::codec::{ItemCodec, JsonCodec};
use crate::error::{PipeError, Result};
use crate::pool::BufferPool;
use crate::reader::PipeReader;
use crate::writer::{FlushResult, PipeWriter};

/// Items decoded by one [`ChannelReader::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRead<T> {
    pub items: Vec<T>,
    /// The writing side finished and every item has been delivered.
    pub is_completed: bool,
    pub is_canceled: bool,
}

impl<T> Default for ChannelRead<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            is_completed: false,
            is_canceled: false,
        }
    }
}

/// Writes typed items onto a pipe.
pub struct ChannelWriter<T, C = JsonCodec<T>> {
    writer: PipeWriter,
    codec: C,
    pool: BufferPool,
    _marker: PhantomData<fn(&T)>,
}

impl<T> ChannelWriter<T, JsonCodec<T>>
where
    T: Serialize + DeserializeOwned,
{
    /// JSON channel writer.
    pub fn json(writer: PipeWriter) -> Self {
        Self::new(writer, JsonCodec::new(), BufferPool::new())
    }
}

impl<T, C: ItemCodec<T>> ChannelWriter<T, C> {
    pub fn new(writer: PipeWriter, codec: C, pool: BufferPool) -> Self {
        Self {
            writer,
            codec,
            pool,
            _marker: PhantomData,
        }
    }

    /// Encode `item` and flush it.
    pub async fn write(&self, item: &T, cancel: &CancellationToken) -> Result<FlushResult> {
        let mut buf = self.pool.rent();
        self.codec.encode(item, &mut buf)?;
        self.writer.write_async(&buf, cancel).await
    }

    /// Encode every item, then flush once.
    pub async fn write_all(&self, items: &[T], cancel: &CancellationToken) -> Result<FlushResult> {
        if cancel.is_cancelled() {
            return self.writer.flush_async(cancel).await;
        }
        let mut buf = self.pool.rent();
        for item in items {
            self.codec.encode(item, &mut buf)?;
        }
        let result = self.writer.write(&buf)?;
        if result.is_completed {
            return Ok(result);
        }
        self.writer.flush_async(cancel).await
    }

    /// Complete the underlying writer.
    pub async fn complete(&self) -> Result<FlushResult> {
        self.writer.complete_async().await
    }

    pub fn inner(&self) -> &PipeWriter {
        &self.writer
    }
}

/// Reads typed items from a pipe.
pub struct ChannelReader<T, C = JsonCodec<T>> {
    reader: PipeReader,
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChannelReader<T, JsonCodec<T>>
where
    T: Serialize + DeserializeOwned,
{
    /// JSON channel reader.
    pub fn json(reader: PipeReader) -> Self {
        Self::new(reader, JsonCodec::new())
    }
}

impl<T, C: ItemCodec<T>> ChannelReader<T, C> {
    pub fn new(reader: PipeReader, codec: C) -> Self {
        Self {
            reader,
            codec,
            _marker: PhantomData,
        }
    }

    /// Decode every complete item currently buffered.
    ///
    /// Waits until at least one item is available, the writer completes, or
    /// `cancel` fires. A trailing partial item stays buffered for the next
    /// call. Bytes left over when the writer completes are malformed.
    pub async fn read(&self, cancel: &CancellationToken) -> Result<ChannelRead<T>> {
        loop {
            let result = self.reader.read_async(cancel).await;
            if result.is_canceled {
                return Ok(ChannelRead {
                    is_canceled: true,
                    ..ChannelRead::default()
                });
            }

            let buffer = result.buffer;
            let mut items = Vec::new();
            let mut offset = 0;
            while let Some((item, used)) = self.codec.decode(&buffer[offset..])? {
                items.push(item);
                offset += used;
            }
            self.reader.advance_to(offset, buffer.len());

            if result.is_completed {
                if offset < buffer.len() {
                    return Err(PipeError::Decode(format!(
                        "stream ended inside an item ({} trailing bytes)",
                        buffer.len() - offset
                    )));
                }
                return Ok(ChannelRead {
                    items,
                    is_completed: true,
                    is_canceled: false,
                });
            }
            if !items.is_empty() {
                return Ok(ChannelRead {
                    items,
                    ..ChannelRead::default()
                });
            }
        }
    }

    pub fn inner(&self) -> &PipeReader {
        &self.reader
    }
}
