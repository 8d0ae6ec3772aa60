//! Streaming decompression interface consumed by the resource loader.

use flate2::{Decompress as Inflate, FlushDecompress, Status};

use crate::error::{Error, Result};

/// Chunk-fed streaming decoder
///
/// The loader reads the compressed payload in bounded chunks and feeds each
/// chunk to the codec logged for the entry's codec slot. The codec writes
/// into the remaining output window it is handed and reports how many bytes
/// the last call produced via [`Decompress::output_size`].
pub trait Decompress {
    /// Reset the decoder to its start-of-stream state
    fn reset(&mut self);

    /// Decode one chunk of compressed bytes into the output window
    ///
    /// Returns [`Error::Corrupt`] if the stream is malformed.
    fn process(&mut self, dst: &mut [u8], src: &[u8]) -> Result<()>;

    /// Number of bytes the last call to [`Decompress::process`] produced
    fn output_size(&self) -> usize;

    /// Whether a complete stream was consumed and its checksum verified
    ///
    /// A payload that fills its output window without reaching end of
    /// stream is corrupt even though every chunk decoded.
    fn finished(&self) -> bool;
}

/// Zlib stream decoder backed by [`flate2`]
pub struct ZlibCodec {
    inflate: Inflate,
    last_out: usize,
    stream_end: bool,
}

impl ZlibCodec {
    /// Create a decoder expecting a zlib-wrapped deflate stream
    pub fn new() -> ZlibCodec {
        ZlibCodec {
            inflate: Inflate::new(true),
            last_out: 0,
            stream_end: false,
        }
    }
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompress for ZlibCodec {
    fn reset(&mut self) {
        self.inflate.reset(true);
        self.last_out = 0;
        self.stream_end = false;
    }

    fn process(&mut self, dst: &mut [u8], src: &[u8]) -> Result<()> {
        let before = self.inflate.total_out();
        let status = self
            .inflate
            .decompress(src, dst, FlushDecompress::None)
            .map_err(|_| Error::Corrupt)?;
        // StreamEnd is the only status that has validated the adler32
        if status == Status::StreamEnd {
            self.stream_end = true;
        }
        self.last_out = (self.inflate.total_out() - before) as usize;
        Ok(())
    }

    fn output_size(&self) -> usize {
        self.last_out
    }

    fn finished(&self) -> bool {
        self.stream_end
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use flate2::{write::ZlibEncoder, Compression};
    use pretty_assertions::assert_eq;

    use super::{Decompress, ZlibCodec};

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decode_single_chunk() {
        let packed = deflate(b"Hello World");

        let mut codec = ZlibCodec::new();
        codec.reset();
        let mut output = vec![0u8; 11];
        codec.process(&mut output, &packed).unwrap();
        assert_eq!(codec.output_size(), 11);
        assert_eq!(&output, b"Hello World");
        assert!(codec.finished());
    }

    #[test]
    fn decode_across_chunks() {
        let plain: Vec<u8> = (0..512u32).flat_map(|v| v.to_le_bytes()).collect();
        let packed = deflate(&plain);

        let mut codec = ZlibCodec::new();
        codec.reset();
        let mut output = vec![0u8; plain.len()];
        let mut produced = 0;
        for chunk in packed.chunks(7) {
            codec.process(&mut output[produced..], chunk).unwrap();
            produced += codec.output_size();
        }
        assert_eq!(produced, plain.len());
        assert_eq!(output, plain);
    }

    #[test]
    fn corrupt_stream_is_an_error() {
        let mut codec = ZlibCodec::new();
        codec.reset();
        let mut output = vec![0u8; 16];
        // not a zlib header
        assert!(codec.process(&mut output, &[0xFF, 0xFF, 0x00, 0x01]).is_err());
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let mut packed = deflate(b"Hello World");
        // flip a bit in the trailing adler32
        let last = packed.len() - 1;
        packed[last] ^= 0x01;

        let mut codec = ZlibCodec::new();
        codec.reset();
        let mut output = vec![0u8; 11];
        let result = codec.process(&mut output, &packed);
        assert!(result.is_err() || !codec.finished());
    }

    #[test]
    fn partial_stream_never_finishes() {
        let packed = deflate(b"Hello World");

        let mut codec = ZlibCodec::new();
        codec.reset();
        let mut output = vec![0u8; 11];
        // hold back the checksum bytes
        codec.process(&mut output, &packed[..packed.len() - 4]).unwrap();
        assert!(!codec.finished());
    }

    #[test]
    fn reset_restarts_the_stream() {
        let packed = deflate(b"again");
        let mut codec = ZlibCodec::new();

        let mut output = vec![0u8; 5];
        codec.reset();
        codec.process(&mut output, &packed).unwrap();
        assert_eq!(&output, b"again");

        codec.reset();
        let mut output2 = vec![0u8; 5];
        codec.process(&mut output2, &packed).unwrap();
        assert_eq!(&output2, b"again");
    }
}
