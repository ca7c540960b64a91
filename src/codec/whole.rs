//! Whole-file codecs: the entire object becomes a single record.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io::Read;

use crate::error::CodecError;

use super::{ObjectRecord, Payload};

/// How the file contents are represented in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WholeFileEncoding {
    /// Contents as text, invalid UTF-8 replaced.
    Text,
    /// Contents base64 encoded.
    Base64,
}

pub struct WholeFileCodec {
    pending: Option<ObjectRecord>,
    current: Option<ObjectRecord>,
    failure: Option<CodecError>,
}

impl WholeFileCodec {
    /// Reads `input` to the end immediately.
    pub fn new<R: Read>(path: String, mut input: R, encoding: WholeFileEncoding) -> Self {
        let mut bytes = Vec::new();
        if let Err(source) = input.read_to_end(&mut bytes) {
            return Self {
                pending: None,
                current: None,
                failure: Some(CodecError::Read { source }),
            };
        }

        let payload = match encoding {
            WholeFileEncoding::Text => Payload::Text(String::from_utf8_lossy(&bytes).into_owned()),
            WholeFileEncoding::Base64 => Payload::Base64(STANDARD.encode(&bytes)),
        };

        Self {
            pending: Some(ObjectRecord {
                path,
                ordinal: 1,
                payload,
            }),
            current: None,
            failure: None,
        }
    }

    pub fn advance(&mut self) -> bool {
        self.current = self.pending.take();
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&ObjectRecord> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<ObjectRecord> {
        self.current.take()
    }

    pub fn failure(&self) -> Option<&CodecError> {
        self.failure.as_ref()
    }

    pub fn into_failure(self) -> Option<CodecError> {
        self.failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_text_yields_single_record() {
        let mut codec = WholeFileCodec::new(
            "testfile".to_string(),
            "line one\nline two\n".as_bytes(),
            WholeFileEncoding::Text,
        );
        assert!(codec.advance());
        let record = codec.current().unwrap();
        assert_eq!(record.ordinal, 1);
        assert_eq!(record.path, "testfile");
        assert_eq!(
            record.payload,
            Payload::Text("line one\nline two\n".to_string())
        );
        assert!(!codec.advance());
        assert!(!codec.advance());
        assert!(codec.failure().is_none());
    }

    #[test]
    fn test_empty_file_still_yields_one_record() {
        let mut codec =
            WholeFileCodec::new("empty".to_string(), io::empty(), WholeFileEncoding::Base64);
        assert!(codec.advance());
        assert_eq!(
            codec.current().unwrap().payload,
            Payload::Base64(String::new())
        );
        assert!(!codec.advance());
    }

    #[test]
    fn test_base64_uses_standard_alphabet() {
        let bytes: &[u8] = &[0xfb, 0xff, 0x00, 0x10];
        let mut codec = WholeFileCodec::new("bin".to_string(), bytes, WholeFileEncoding::Base64);
        assert!(codec.advance());
        assert_eq!(
            codec.current().unwrap().payload,
            Payload::Base64("+/8AEA==".to_string())
        );
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn test_read_error_yields_no_record() {
        let mut codec =
            WholeFileCodec::new("broken".to_string(), BrokenReader, WholeFileEncoding::Text);
        assert!(!codec.advance());
        assert!(codec.current().is_none());
        assert!(matches!(codec.failure(), Some(CodecError::Read { .. })));
    }
}
