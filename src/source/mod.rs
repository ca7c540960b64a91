//! Turning a stored object into a readable byte stream.

pub mod compression;

pub use compression::{Compression, maybe_decompress};
