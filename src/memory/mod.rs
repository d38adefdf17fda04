//! The memory index: discovery, chunking, persistence, sync, and search.
//!
//! [`manager::IndexManager`] is the entry point; the other modules are the
//! pieces it composes and are public so they can be tested in isolation.

pub mod chunker;
pub mod discover;
pub mod files;
pub mod manager;
pub mod search;
pub mod stats;
pub mod store;
pub mod types;
mod watch;

/// Encode an embedding as little-endian f32 bytes, the layout sqlite-vec reads.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes. Trailing bytes that do not fill an f32 are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_are_little_endian_f32() {
        let bytes = embedding_to_bytes(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(bytes_to_embedding(&bytes), vec![1.0, -2.5]);
    }

    #[test]
    fn partial_trailing_bytes_are_dropped() {
        let mut bytes = embedding_to_bytes(&[0.5]);
        bytes.push(7);
        assert_eq!(bytes_to_embedding(&bytes), vec![0.5]);
    }
}
