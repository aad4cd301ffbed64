//! Vector blob encoding: fixed-length little-endian f32 sequences.

use ndarray::Array1;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Encode a float vector as a little-endian byte blob.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * F32_BYTES);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob produced by [`encode_vector`].
///
/// Returns `None` if the blob length is not a multiple of four bytes.
pub fn decode_vector(bytes: &[u8]) -> Option<Array1<f32>> {
    if bytes.len() % F32_BYTES != 0 {
        return None;
    }
    Some(Array1::from_iter(bytes.chunks_exact(F32_BYTES).map(|c| {
        f32::from_le_bytes([c[0], c[1], c[2], c[3]])
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let original = [0.1f32, -0.5, 3.25, 1e-7, -0.0];
        let decoded = decode_vector(&encode_vector(&original)).unwrap();
        assert_eq!(decoded.len(), original.len());
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-6, "Values differ: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let mut bytes = encode_vector(&[1.0, 2.0]);
        bytes.pop();
        assert!(decode_vector(&bytes).is_none());
    }

    #[test]
    fn test_empty_vector() {
        assert!(encode_vector(&[]).is_empty());
        assert_eq!(decode_vector(&[]).unwrap().len(), 0);
    }
}
