//! Chunk embedding, similarity search, and compact index persistence

pub mod codec;
pub mod vector_index;

pub use codec::{deserialize_index, serialize_index};
pub use vector_index::VectorIndex;
