//! Block decompression

use crate::compress::CompressionMethod;
use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Decompress a single block, checking the expected raw length
pub fn decompress_block(
    data: &[u8],
    method: CompressionMethod,
    raw_len: usize,
) -> Result<Vec<u8>> {
    let raw = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Zlib => {
            let mut decoder = ZlibDecoder::new(data);
            let mut raw = Vec::with_capacity(raw_len);
            decoder.read_to_end(&mut raw).map_err(Error::Io)?;
            raw
        }
        CompressionMethod::Lz4 => lz4_flex::decompress(data, raw_len)
            .map_err(|err| Error::DecompressionFailed(err.to_string()))?,
    };

    if raw.len() != raw_len {
        return Err(Error::RawSizeMismatch {
            expected: raw_len as u64,
            actual: raw.len() as u64,
        });
    }
    Ok(raw)
}
