//! Quantized, compressed serialization of vector indices
//!
//! Some store tiers enforce strict per-value size limits, so each float
//! array is scaled into the full `i16` range, byte-packed, deflated, and
//! framed as `"<scale>;<compressed-bytes-as-text>"` before persisting.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retrieval::VectorIndex;

/// One framed array with the shape needed for reconstruction
#[derive(Debug, Serialize, Deserialize)]
struct FramedArray {
    shape: [usize; 2],
    data: String,
}

/// Serialized index payload
#[derive(Debug, Serialize, Deserialize)]
struct IndexPayload {
    chunks: Vec<String>,
    vectors: FramedArray,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<FramedArray>,
}

/// Scale a float slice into the full `i16` range.
///
/// The scale is the max representable value divided by the max absolute
/// value, floored at 1 so all-zero arrays never divide by zero.
pub fn quantize(values: &[f32]) -> (f32, Vec<i16>) {
    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    let scale = if max_abs > 0.0 {
        (i16::MAX as f32 / max_abs).max(1.0)
    } else {
        1.0
    };

    let quantized = values
        .iter()
        .map(|v| {
            (v * scale)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect();
    (scale, quantized)
}

/// Reverse quantization: integer values divided by the stored scale
pub fn dequantize(scale: f32, values: &[i16]) -> Vec<f32> {
    values.iter().map(|v| *v as f32 / scale).collect()
}

/// Frame one array as `"<scale>;<base64(deflate(i16 bytes))>"`
fn frame(values: &[f32]) -> Result<String> {
    let (scale, quantized) = quantize(values);

    let mut bytes = Vec::with_capacity(quantized.len() * 2);
    for value in &quantized {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes)?;
    let compressed = encoder.finish()?;

    Ok(format!("{};{}", scale, BASE64.encode(compressed)))
}

/// Reverse framing: text → bytes → inflate → `i16` → divide by scale
fn unframe(framed: &str, expected_len: usize) -> Result<Vec<f32>> {
    let (scale, encoded) = framed
        .split_once(';')
        .ok_or_else(|| Error::store("malformed framed array: missing scale separator"))?;
    let scale: f32 = scale
        .parse()
        .map_err(|_| Error::store("malformed framed array: bad scale"))?;

    let compressed = BASE64
        .decode(encoded)
        .map_err(|e| Error::store(format!("malformed framed array: {}", e)))?;

    let mut bytes = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut bytes)?;

    if bytes.len() != expected_len * 2 {
        return Err(Error::store(format!(
            "framed array length mismatch: expected {} values, got {} bytes",
            expected_len,
            bytes.len()
        )));
    }

    let quantized: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(dequantize(scale, &quantized))
}

/// Serialize an index to its compact string payload
pub fn serialize_index(index: &VectorIndex) -> Result<String> {
    let vectors = index.vectors();
    let values: Vec<f32> = vectors.iter().copied().collect();

    let payload = IndexPayload {
        chunks: index.chunks().to_vec(),
        vectors: FramedArray {
            shape: [vectors.nrows(), vectors.ncols()],
            data: frame(&values)?,
        },
        transform: match index.transform() {
            Some(t) => Some(FramedArray {
                shape: [t.nrows(), t.ncols()],
                data: frame(&t.iter().copied().collect::<Vec<f32>>())?,
            }),
            None => None,
        },
    };

    Ok(serde_json::to_string(&payload)?)
}

/// Reconstruct an index from its serialized payload
pub fn deserialize_index(payload: &str) -> Result<VectorIndex> {
    let payload: IndexPayload = serde_json::from_str(payload)?;

    let [rows, cols] = payload.vectors.shape;
    let values = unframe(&payload.vectors.data, rows * cols)?;
    let vectors = Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| Error::store(format!("bad vector shape: {}", e)))?;

    let transform = match payload.transform {
        Some(framed) => {
            let [rows, cols] = framed.shape;
            let values = unframe(&framed.data, rows * cols)?;
            Some(
                Array2::from_shape_vec((rows, cols), values)
                    .map_err(|e| Error::store(format!("bad transform shape: {}", e)))?,
            )
        }
        None => None,
    };

    VectorIndex::from_parts(payload.chunks, vectors, transform)
}
