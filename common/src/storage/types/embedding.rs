use serde::{Deserialize, Serialize};

/// A model embedding for one sample. `x`/`y` materialise a 2-D
/// projection; I5: both null or both non-null, never mixed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub sample_id: String,
    pub dataset_id: String,
    pub model_name: String,
    pub vector: Vec<f32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

/// Encodes a vector as little-endian f32 bytes for the DuckDB `BLOB` column.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Decodes a little-endian f32 byte blob back into a vector.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_round_trips_through_blob_encoding() {
        let original = vec![0.5_f32, -1.25, 3.0, 0.0];
        let encoded = encode_vector(&original);
        let decoded = decode_vector(&encoded);
        assert_eq!(original, decoded);
    }
}
