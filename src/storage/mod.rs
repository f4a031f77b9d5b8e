//! Storage layer: the local engine seam, chunked-value reassembly, and
//! store-version metadata.

pub mod chunking;
pub mod engine;
pub mod meta;
