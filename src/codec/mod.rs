//! Stream codecs turning raw object bytes into records.
//!
//! Every codec follows the same cursor contract:
//! - `advance()` moves to the next record and reports whether one is available
//! - `current()` returns that record, valid only right after a `true` advance
//! - `failure()` returns the error that stopped the codec early, if any
//!
//! The set of codecs is closed. A [`CodecKind`] is chosen once from the
//! validated configuration and [`Codec::new`] builds the matching variant.

mod json_array;
mod json_stream;
mod lines;
mod whole;

pub use json_array::JsonArrayCodec;
pub use json_stream::JsonStreamCodec;
pub use lines::LineCodec;
pub use whole::{WholeFileCodec, WholeFileEncoding};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::error::{CodecError, ConfigError};

/// Identifier of a codec as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CodecKind {
    /// One JSON value per element of a top-level array.
    JsonArray,
    /// One JSON value per top-level value in a concatenated stream.
    JsonStream,
    /// One record per line.
    #[default]
    Text,
    /// The whole file as a single text record.
    Clob,
    /// The whole file as a single base64 record.
    Blob,
}

impl CodecKind {
    /// All kinds in canonical order.
    pub const ALL: [CodecKind; 5] = [
        CodecKind::JsonArray,
        CodecKind::JsonStream,
        CodecKind::Text,
        CodecKind::Clob,
        CodecKind::Blob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::JsonArray => "json-array",
            CodecKind::JsonStream => "json-stream",
            CodecKind::Text => "text",
            CodecKind::Clob => "clob",
            CodecKind::Blob => "blob",
        }
    }

    /// Comma separated list of valid identifiers, used in error messages.
    pub fn valid_kinds() -> String {
        Self::ALL
            .iter()
            .map(CodecKind::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownCodec {
                codec: s.to_string(),
                valid: Self::valid_kinds(),
            })
    }
}

impl TryFrom<String> for CodecKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CodecKind> for String {
    fn from(kind: CodecKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Decoded content of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw or decoded text.
    Text(String),
    /// Binary content, base64 encoded with the standard alphabet.
    Base64(String),
    /// A parsed JSON value.
    Json(Value),
}

/// One decoded unit of an object, with its position in the object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Path of the object the record came from.
    pub path: String,
    /// 1-based position of the record in the object.
    pub ordinal: u64,
    pub payload: Payload,
}

impl ObjectRecord {
    /// Field map published downstream.
    ///
    /// Text payloads are published as `{event, file, line}`, JSON payloads
    /// as `{json, path, line}`.
    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self.payload {
            Payload::Text(text) | Payload::Base64(text) => {
                fields.insert("event".to_string(), Value::String(text));
                fields.insert("file".to_string(), Value::String(self.path));
            }
            Payload::Json(value) => {
                fields.insert("json".to_string(), value);
                fields.insert("path".to_string(), Value::String(self.path));
            }
        }
        fields.insert("line".to_string(), Value::from(self.ordinal));
        fields
    }
}

/// A codec over an input of type `R`.
pub enum Codec<R: Read> {
    Lines(LineCodec<R>),
    WholeFile(WholeFileCodec),
    JsonArray(JsonArrayCodec<R>),
    JsonStream(JsonStreamCodec<R>),
}

impl<R: Read> Codec<R> {
    /// Build the codec for `kind` over `input`.
    ///
    /// Whole-file codecs read their input here. The array codec consumes the
    /// opening bracket here, so a bad start is visible through `failure()`
    /// before the first `advance()`.
    pub fn new(kind: CodecKind, path: impl Into<String>, input: R) -> Self {
        let path = path.into();
        match kind {
            CodecKind::Text => Codec::Lines(LineCodec::new(path, input)),
            CodecKind::Clob => {
                Codec::WholeFile(WholeFileCodec::new(path, input, WholeFileEncoding::Text))
            }
            CodecKind::Blob => {
                Codec::WholeFile(WholeFileCodec::new(path, input, WholeFileEncoding::Base64))
            }
            CodecKind::JsonArray => Codec::JsonArray(JsonArrayCodec::new(path, input)),
            CodecKind::JsonStream => Codec::JsonStream(JsonStreamCodec::new(path, input)),
        }
    }

    /// Move to the next record.
    pub fn advance(&mut self) -> bool {
        match self {
            Codec::Lines(c) => c.advance(),
            Codec::WholeFile(c) => c.advance(),
            Codec::JsonArray(c) => c.advance(),
            Codec::JsonStream(c) => c.advance(),
        }
    }

    /// The record produced by the last successful `advance()`.
    pub fn current(&self) -> Option<&ObjectRecord> {
        match self {
            Codec::Lines(c) => c.current(),
            Codec::WholeFile(c) => c.current(),
            Codec::JsonArray(c) => c.current(),
            Codec::JsonStream(c) => c.current(),
        }
    }

    /// Move the current record out, leaving `current()` empty until the
    /// next `advance()`.
    pub fn take_current(&mut self) -> Option<ObjectRecord> {
        match self {
            Codec::Lines(c) => c.take_current(),
            Codec::WholeFile(c) => c.take_current(),
            Codec::JsonArray(c) => c.take_current(),
            Codec::JsonStream(c) => c.take_current(),
        }
    }

    /// The error that stopped the codec, if it stopped early.
    pub fn failure(&self) -> Option<&CodecError> {
        match self {
            Codec::Lines(c) => c.failure(),
            Codec::WholeFile(c) => c.failure(),
            Codec::JsonArray(c) => c.failure(),
            Codec::JsonStream(c) => c.failure(),
        }
    }

    /// Consume the codec and return its terminal error, if any.
    pub fn into_failure(self) -> Option<CodecError> {
        match self {
            Codec::Lines(c) => c.into_failure(),
            Codec::WholeFile(c) => c.into_failure(),
            Codec::JsonArray(c) => c.into_failure(),
            Codec::JsonStream(c) => c.into_failure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(kind: CodecKind, input: &str) -> (Vec<ObjectRecord>, bool) {
        let mut codec = Codec::new(kind, "testfile", input.as_bytes());
        let mut records = Vec::new();
        while codec.advance() {
            records.push(codec.current().cloned().expect("record after advance"));
        }
        (records, codec.failure().is_some())
    }

    #[test]
    fn test_codec_kind_round_trips_identifiers() {
        for kind in CodecKind::ALL {
            assert_eq!(kind.as_str().parse::<CodecKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_codec_lists_valid_kinds() {
        let err = "xml".parse::<CodecKind>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'xml'"));
        assert!(message.contains("json-array, json-stream, text, clob, blob"));
    }

    #[test]
    fn test_codec_kind_deserializes_from_yaml() {
        let kind: CodecKind = serde_yaml::from_str("json-stream").unwrap();
        assert_eq!(kind, CodecKind::JsonStream);

        let err = serde_yaml::from_str::<CodecKind>("csv").unwrap_err();
        assert!(err.to_string().contains("valid codecs are"));
    }

    #[test]
    fn test_dispatch_per_kind() {
        let (records, failed) = drain(CodecKind::Text, "x\ny");
        assert_eq!(records.len(), 2);
        assert!(!failed);

        let (records, failed) = drain(CodecKind::Clob, "x\ny");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, Payload::Text("x\ny".to_string()));
        assert!(!failed);

        let (records, _) = drain(CodecKind::Blob, "hi");
        assert_eq!(records[0].payload, Payload::Base64("aGk=".to_string()));

        let (records, failed) = drain(CodecKind::JsonArray, r#"[{"a":1},{"b":2}]"#);
        assert_eq!(records.len(), 2);
        assert!(!failed);

        let (records, failed) = drain(CodecKind::JsonStream, r#"{"a":1}{"b":2}"#);
        assert_eq!(records.len(), 2);
        assert!(!failed);
    }

    #[test]
    fn test_text_fields_layout() {
        let record = ObjectRecord {
            path: "logs/a.log".to_string(),
            ordinal: 3,
            payload: Payload::Text("hello".to_string()),
        };
        let fields = record.into_fields();
        assert_eq!(fields["event"], "hello");
        assert_eq!(fields["file"], "logs/a.log");
        assert_eq!(fields["line"], 3);
    }

    #[test]
    fn test_json_fields_layout() {
        let record = ObjectRecord {
            path: "a.json".to_string(),
            ordinal: 1,
            payload: Payload::Json(serde_json::json!({"foo": 44})),
        };
        let fields = record.into_fields();
        assert_eq!(fields["json"]["foo"], 44);
        assert_eq!(fields["path"], "a.json");
        assert_eq!(fields["line"], 1);
        assert!(!fields.contains_key("event"));
    }
}
