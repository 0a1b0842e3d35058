//! Content-defined chunking using FastCDC.

use crate::error::{Error, Result};
use fastcdc::v2020::{
    self, AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN, StreamCDC,
};
use std::io::Read;

/// Configuration for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes.
    pub min_size: u32,
    /// Average (target) chunk size in bytes.
    pub avg_size: u32,
    /// Maximum chunk size in bytes.
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 256 * 1024,  // 256 KB
            avg_size: 512 * 1024,  // 512 KB
            max_size: 1024 * 1024, // 1 MB
        }
    }
}

impl ChunkerConfig {
    /// Check the sizes against the limits FastCDC accepts.
    pub fn validate(&self) -> Result<()> {
        let in_range = |value: u32, lo: u32, hi: u32| (lo..=hi).contains(&value);

        if !in_range(self.min_size, MINIMUM_MIN, MINIMUM_MAX) {
            return Err(Error::invalid_settings(format!(
                "chunker min size {} outside {}..={}",
                self.min_size, MINIMUM_MIN, MINIMUM_MAX
            )));
        }
        if !in_range(self.avg_size, AVERAGE_MIN, AVERAGE_MAX) {
            return Err(Error::invalid_settings(format!(
                "chunker avg size {} outside {}..={}",
                self.avg_size, AVERAGE_MIN, AVERAGE_MAX
            )));
        }
        if !in_range(self.max_size, MAXIMUM_MIN, MAXIMUM_MAX) {
            return Err(Error::invalid_settings(format!(
                "chunker max size {} outside {}..={}",
                self.max_size, MAXIMUM_MIN, MAXIMUM_MAX
            )));
        }
        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(Error::invalid_settings(format!(
                "chunker sizes must satisfy min <= avg <= max, got {}/{}/{}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// One content-defined chunk of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Offset of the chunk within the stream.
    pub offset: u64,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

/// Split a reader into content-defined chunks.
///
/// The config must already be validated; an empty stream yields no chunks.
pub fn chunk_stream<R: Read>(
    reader: R,
    config: ChunkerConfig,
) -> impl Iterator<Item = Result<Chunk>> {
    StreamCDC::new(reader, config.min_size, config.avg_size, config.max_size).map_while(
        |chunk| match chunk {
            Ok(chunk) => Some(Ok(Chunk {
                offset: chunk.offset,
                data: chunk.data,
            })),
            Err(v2020::Error::Empty) => None,
            Err(v2020::Error::IoError(e)) => Some(Err(e.into())),
            Err(e) => Some(Err(Error::chunking(format!("{:?}", e)))),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_all(data: &[u8], config: ChunkerConfig) -> Vec<Chunk> {
        chunk_stream(data, config)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_chunk_stream_basic() {
        // Create a 2MB file
        let data = (0..2 * 1024 * 1024)
            .map(|i: u32| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect::<Vec<_>>();
        let config = ChunkerConfig::default();

        let chunks = chunk_all(&data, config);

        assert!(
            chunks.len() >= 2,
            "Expected at least 2 chunks, got {}",
            chunks.len()
        );

        // Chunks tile the input
        let mut offset = 0u64;
        for chunk in &chunks {
            assert_eq!(chunk.offset, offset);
            assert!(chunk.data.len() <= config.max_size as usize);
            offset += chunk.data.len() as u64;
        }
        assert_eq!(offset, data.len() as u64);
        let rejoined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn test_deterministic() {
        let data = vec![42u8; 2 * 1024 * 1024];
        let config = ChunkerConfig::default();

        assert_eq!(chunk_all(&data, config), chunk_all(&data, config));
    }

    #[test]
    fn test_small_file() {
        // File smaller than min_size should create a single chunk
        let data = vec![0u8; 100 * 1024];
        let chunks = chunk_all(&data, ChunkerConfig::default());

        assert_eq!(chunks.len(), 1, "Small file should create single chunk");
        assert_eq!(chunks[0].data.len(), data.len());
    }

    #[test]
    fn test_empty_stream() {
        assert!(chunk_all(&[], ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(ChunkerConfig::default().validate().is_ok());
        assert!(
            ChunkerConfig {
                min_size: 64,
                avg_size: 256,
                max_size: 1024,
            }
            .validate()
            .is_ok()
        );
        assert!(
            ChunkerConfig {
                min_size: 8,
                avg_size: 256,
                max_size: 1024,
            }
            .validate()
            .is_err()
        );
        assert!(
            ChunkerConfig {
                min_size: 4096,
                avg_size: 1024,
                max_size: 8192,
            }
            .validate()
            .is_err()
        );
    }
}
