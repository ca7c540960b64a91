//! Decompression chosen from the object name.

use std::io::{self, BufReader, Read};

/// Compression inferred from an object's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Infer compression from the path suffix.
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// Wrap `input` in the matching decoder.
    ///
    /// Gzip headers are only inspected on first read, so a corrupt gzip object
    /// fails while it is being decoded rather than here.
    pub fn wrap<'a, R>(self, input: R) -> io::Result<Box<dyn Read + Send + 'a>>
    where
        R: Read + Send + 'a,
    {
        Ok(match self {
            Compression::None => Box::new(input),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(BufReader::new(input))),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(input)?),
        })
    }
}

/// Decompress `input` when `unpack` is set and the name says it is compressed.
pub fn maybe_decompress<'a, R>(
    path: &str,
    input: R,
    unpack: bool,
) -> io::Result<Box<dyn Read + Send + 'a>>
where
    R: Read + Send + 'a,
{
    let compression = if unpack {
        Compression::from_path(path)
    } else {
        Compression::None
    };
    compression.wrap(input)
}
