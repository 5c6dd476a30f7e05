//! Size-prefixed zlib wrapper around archive buffers.
//!
//! A wrapped file is a big-endian `u32` holding the uncompressed size,
//! followed by a zlib stream.
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::collections::TryReserveError;
use std::io::Read;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ZlibError {
    #[error("Wrapped data is {0} bytes, too short for a size prefix")]
    Truncated(usize),
    #[error("Expected {expected} decompressed bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("{0} bytes cannot be described by a 32-bit size prefix")]
    TooLarge(usize),
    #[error("Failed to allocate {0} bytes for the decompressed data")]
    Allocation(usize, #[source] TryReserveError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = core::result::Result<T, ZlibError>;

/// Unwraps and inflates a size-prefixed zlib stream
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(ZlibError::Truncated(data.len()));
    }
    let expected = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    debug!(
        "Inflating {} bytes into {} bytes",
        data.len() - 4,
        expected
    );

    let mut decompressed = Vec::new();
    decompressed
        .try_reserve_exact(expected)
        .map_err(|e| ZlibError::Allocation(expected, e))?;
    ZlibDecoder::new(&data[4..])
        .take(expected as u64 + 1)
        .read_to_end(&mut decompressed)?;
    if decompressed.len() != expected {
        return Err(ZlibError::SizeMismatch {
            expected,
            actual: decompressed.len(),
        });
    }
    Ok(decompressed)
}

/// Deflates `data` and prefixes it with its uncompressed size
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > u32::MAX as usize {
        return Err(ZlibError::TooLarge(data.len()));
    }
    let mut wrapped = (data.len() as u32).to_be_bytes().to_vec();
    ZlibEncoder::new(data, Compression::default()).read_to_end(&mut wrapped)?;
    debug!("Deflated {} bytes into {} bytes", data.len(), wrapped.len() - 4);
    Ok(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_unwraps() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let wrapped = compress(&data).unwrap();
        assert_eq!(&wrapped[..4], &5000u32.to_be_bytes());
        assert!(wrapped.len() < data.len());
        assert_eq!(decompress(&wrapped).unwrap(), data);
    }

    #[test]
    fn empty_payload() {
        let wrapped = compress(&[]).unwrap();
        assert_eq!(decompress(&wrapped).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(decompress(&[0, 0]), Err(ZlibError::Truncated(2))));
    }

    #[test]
    fn rejects_wrong_size_prefix() {
        let mut wrapped = compress(b"some archive bytes").unwrap();
        wrapped[..4].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            decompress(&wrapped),
            Err(ZlibError::SizeMismatch {
                expected: 100,
                actual: 18
            })
        ));
    }

    #[test]
    fn oversized_prefix_is_an_error() {
        let mut wrapped = compress(b"tiny").unwrap();
        wrapped[..4].copy_from_slice(&[0xFF; 4]);
        match decompress(&wrapped) {
            Err(ZlibError::Allocation(size, _)) => assert_eq!(size, 0xFFFF_FFFF),
            Err(ZlibError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, 0xFFFF_FFFF);
                assert_eq!(actual, 4);
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_corrupt_stream() {
        let mut wrapped = compress(b"some archive bytes").unwrap();
        for b in wrapped[4..].iter_mut() {
            *b = 0xFF;
        }
        assert!(decompress(&wrapped).is_err());
    }
}
