use std::io::{self, Read};

#[cfg(feature = "flate2")]
use flate2::read::ZlibDecoder;

#[cfg(feature = "lzma-rs")]
use lzma_rs::xz_decompress;

#[cfg(feature = "ruzstd")]
use ruzstd::decoding::StreamingDecoder;

use super::error::{Error, Result};
use super::superblock::Compressor;

impl Compressor {
    /// Whether this build carries a decoder for the algorithm
    pub fn is_supported(&self) -> bool {
        match self {
            Compressor::Gzip => cfg!(feature = "flate2"),
            Compressor::Xz => cfg!(feature = "lzma-rs"),
            Compressor::Zstd => cfg!(feature = "ruzstd"),
            Compressor::Lzo | Compressor::Lzma | Compressor::Lz4 => false,
        }
    }

    /// Decompress one complete block read from `position`. The output may not exceed `limit`
    /// bytes; a block that inflates past it is corrupt.
    pub(crate) fn decompress(&self, input: &[u8], limit: usize, position: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(limit);
        let res: io::Result<()> = match self {
            #[cfg(feature = "flate2")]
            Compressor::Gzip => {
                ZlibDecoder::new(input).take(limit as u64 + 1).read_to_end(&mut out).map(|_| ())
            },
            #[cfg(feature = "lzma-rs")]
            Compressor::Xz => {
                // lzma-rs only decodes whole streams, which is all a block ever is
                xz_decompress(&mut &input[..], &mut out)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
            },
            #[cfg(feature = "ruzstd")]
            Compressor::Zstd => {
                match StreamingDecoder::new(input) {
                    Ok(dec) => dec.take(limit as u64 + 1).read_to_end(&mut out).map(|_| ()),
                    Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
                }
            },
            _ => return Err(Error::UnsupportedCompression(*self)),
        };
        res.map_err(|source| Error::Decompress { position, source })?;
        if out.len() > limit {
            return Err(Error::corrupt(position, format!("decompresses past {limit} bytes")));
        }
        Ok(out)
    }
}
