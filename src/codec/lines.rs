//! Line codec: one record per newline terminated line.

use std::io::{BufRead, BufReader, Read};

use crate::error::CodecError;

use super::{ObjectRecord, Payload};

pub struct LineCodec<R: Read> {
    path: String,
    reader: BufReader<R>,
    buf: Vec<u8>,
    ordinal: u64,
    current: Option<ObjectRecord>,
    failure: Option<CodecError>,
    done: bool,
}

impl<R: Read> LineCodec<R> {
    pub fn new(path: String, input: R) -> Self {
        Self {
            path,
            reader: BufReader::new(input),
            buf: Vec::new(),
            ordinal: 0,
            current: None,
            failure: None,
            done: false,
        }
    }

    pub fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }

        // The ordinal tracks read attempts, so a failing read still consumes one.
        self.ordinal += 1;
        self.buf.clear();
        self.current = None;

        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                false
            }
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                self.current = Some(ObjectRecord {
                    path: self.path.clone(),
                    ordinal: self.ordinal,
                    payload: Payload::Text(String::from_utf8_lossy(&self.buf).into_owned()),
                });
                true
            }
            Err(source) => {
                self.done = true;
                self.failure = Some(CodecError::Read { source });
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
