//! Concatenated JSON values, optionally separated by whitespace.

use serde_json::de::IoRead;
use serde_json::{Deserializer, StreamDeserializer, Value};
use std::io::{BufReader, Read};

use crate::error::CodecError;

use super::{ObjectRecord, Payload};

pub struct JsonStreamCodec<R: Read> {
    path: String,
    stream: StreamDeserializer<'static, IoRead<BufReader<R>>, Value>,
    ordinal: u64,
    current: Option<ObjectRecord>,
    failure: Option<CodecError>,
    done: bool,
}

impl<R: Read> JsonStreamCodec<R> {
    pub fn new(path: String, input: R) -> Self {
        Self {
            path,
            stream: Deserializer::from_reader(BufReader::new(input)).into_iter::<Value>(),
            ordinal: 0,
            current: None,
            failure: None,
            done: false,
        }
    }

    pub fn advance(&mut self) -> bool {
        self.current = None;
        if self.done {
            return false;
        }

        match self.stream.next() {
            None => {
                self.done = true;
                false
            }
            Some(Ok(value)) => {
                self.ordinal += 1;
                self.current = Some(ObjectRecord {
                    path: self.path.clone(),
                    ordinal: self.ordinal,
                    payload: Payload::Json(value),
                });
                true
            }
            Some(Err(source)) => {
                self.done = true;
                self.failure = Some(if source.is_io() {
                    CodecError::Read {
                        source: source.into(),
                    }
                } else if source.is_eof() {
                    CodecError::Truncated
                } else {
                    CodecError::Json { source }
                });
                false
            }
        }
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
