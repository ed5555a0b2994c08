/// Chunk codec: frames a TCP byte stream into chat chunks.
///
/// There is no delimiter on the wire. Whatever one read delivered is one
/// chunk, and outgoing frames are written verbatim. Two messages that land in
/// the same read are seen as one, and a message split across reads is seen
/// as two. Clients depend on this behaviour, so it is kept as-is.
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the read buffer a client message is expected to fit in.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Codec error. Reads and writes can only fail at the transport.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that yields each read as one chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkCodec {
    max_chunk: usize,
}

impl ChunkCodec {
    /// `max_chunk` caps a single chunk, like a fixed-size read buffer.
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
        }
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new(DEFAULT_READ_BUFFER)
    }
}

impl Decoder for ChunkCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let len = src.len().min(self.max_chunk);
        let chunk = src.split_to(len);

        // Invalid UTF-8 (including a character cut at a read boundary)
        // decodes to U+FFFD rather than failing the connection.
        let text = String::from_utf8_lossy(&chunk);
        Ok(Some(text.trim_end().to_owned()))
    }
}

impl Encoder<String> for ChunkCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}
