//! Deflate compression and decompression of entry data

use crate::header::CompressionMethod;
use crate::{Error, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};

/// Decompress entry data according to its method
pub fn decompress(method: CompressionMethod, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflated => inflate(data, expected_size),
    }
}

/// Compress entry data with the given method
pub fn compress(method: CompressionMethod, data: &[u8], level: Compression) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflated => deflate(data, level),
    }
}

/// Decompress a raw deflate stream (ZIP entries carry no zlib header)
fn inflate(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut decompressed = Vec::with_capacity(expected_size);

    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => Ok(decompressed),
        Err(e) => {
            log::debug!("Deflate decompression failed: {e}");
            log::trace!(
                "First 16 bytes of data: {:02X?}",
                &data[..16.min(data.len())]
            );
            Err(Error::compression(format!("deflate: {e}")))
        }
    }
}

/// Compress into a raw deflate stream
fn deflate(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), level);
    encoder
        .write_all(data)
        .map_err(|e| Error::compression(format!("deflate: {e}")))?;

    encoder
        .finish()
        .map_err(|e| Error::compression(format!("deflate: {e}")))
}
