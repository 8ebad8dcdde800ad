//! Thin wrappers over the zstd bulk APIs.
//!
//! Payloads are compressed without a dictionary at a cheap level when first
//! stored; compression maintenance later re-compresses whole batches with
//! per-batch trained dictionaries. Decompression must therefore handle both
//! shapes, selected by the caller based on whether the record's batch has an
//! installed dictionary.

use std::io;

/// Upper bound for a single decompressed payload. Payloads are single
/// blocks, transactions or call trees; anything larger indicates corruption.
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

pub fn compress(data: &[u8], level: i32) -> io::Result<Vec<u8>> {
    zstd::bulk::compress(data, level)
}

pub fn compress_with_dict(data: &[u8], level: i32, dict: &[u8]) -> io::Result<Vec<u8>> {
    let mut compressor = zstd::bulk::Compressor::with_dictionary(level, dict)?;
    compressor.compress(data)
}

pub fn decompress(data: &[u8], dict: Option<&[u8]>) -> io::Result<Vec<u8>> {
    let mut decompressor = match dict {
        Some(dict) => zstd::bulk::Decompressor::with_dictionary(dict)?,
        None => zstd::bulk::Decompressor::new()?,
    };
    decompressor.decompress(data, MAX_DECOMPRESSED_SIZE)
}

pub fn train_dictionary<S: AsRef<[u8]>>(samples: &[S], max_size: usize) -> io::Result<Vec<u8>> {
    zstd::dict::from_samples(samples, max_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Vec<u8> {
        format!(
            r#"{{"hash":"0x{i:064x}","from":"0x{:040x}","value":"0x0","gas":"0x5208","nonce":"0x{i:x}"}}"#,
            i * 7
        )
        .into_bytes()
    }

    #[test]
    fn round_trip_without_dict() {
        let data = sample(1);
        let compressed = compress(&data, 1).unwrap();
        assert_eq!(decompress(&compressed, None).unwrap(), data);
    }

    #[test]
    fn round_trip_with_trained_dict() {
        let samples: Vec<Vec<u8>> = (0..200).map(sample).collect();
        let dict = train_dictionary(&samples, 4096).unwrap();
        assert!(!dict.is_empty());

        let data = sample(12345);
        let compressed = compress_with_dict(&data, 19, &dict).unwrap();
        assert_eq!(decompress(&compressed, Some(&dict)).unwrap(), data);
    }
}
