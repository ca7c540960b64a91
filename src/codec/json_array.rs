//! Elements of a single top-level JSON array, decoded one at a time.
//!
//! The array is never loaded as a whole. A small framer walks the input
//! through `BufRead`, cuts out the bytes of the next element and hands them
//! to serde_json, so memory is bounded by the largest element.

use serde_json::Value;
use snafu::prelude::*;
use std::io::{self, BufRead, BufReader, Read};

use crate::error::{CodecError, TruncatedSnafu};

use super::{ObjectRecord, Payload};

pub struct JsonArrayCodec<R: Read> {
    path: String,
    reader: BufReader<R>,
    element: Vec<u8>,
    ordinal: u64,
    expect_separator: bool,
    current: Option<ObjectRecord>,
    failure: Option<CodecError>,
    done: bool,
}

impl<R: Read> JsonArrayCodec<R> {
    /// Consumes the opening `[`. Any other start leaves the codec failed.
    pub fn new(path: String, input: R) -> Self {
        let mut codec = Self {
            path,
            reader: BufReader::new(input),
            element: Vec::new(),
            ordinal: 0,
            expect_separator: false,
            current: None,
            failure: None,
            done: false,
        };

        match codec.peek_token() {
            Ok(Some(b'[')) => codec.reader.consume(1),
            Ok(Some(other)) => codec.fail(CodecError::InvalidArrayStart {
                found: describe(Some(other)),
            }),
            Ok(None) => codec.fail(CodecError::InvalidArrayStart {
                found: describe(None),
            }),
            Err(source) => codec.fail(CodecError::Read { source }),
        }

        codec
    }

    pub fn advance(&mut self) -> bool {
        self.current = None;
        if self.done {
            return false;
        }

        match self.step() {
            Ok(Some(value)) => {
                self.ordinal += 1;
                self.current = Some(ObjectRecord {
                    path: self.path.clone(),
                    ordinal: self.ordinal,
                    payload: Payload::Json(value),
                });
                true
            }
            Ok(None) => {
                self.done = true;
                false
            }
            Err(err) => {
                self.fail(err);
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

    fn fail(&mut self, err: CodecError) {
        self.done = true;
        self.failure = Some(err);
    }

    /// Next element, or `None` once the closing `]` is reached.
    fn step(&mut self) -> Result<Option<Value>, CodecError> {
        let token = self
            .peek_token()
            .map_err(|source| CodecError::Read { source })?;

        match token {
            None => return Err(CodecError::Truncated),
            Some(b']') => {
                self.reader.consume(1);
                return Ok(None);
            }
            Some(b',') if self.expect_separator => {
                self.reader.consume(1);
                let next = self
                    .peek_token()
                    .map_err(|source| CodecError::Read { source })?;
                ensure!(next.is_some(), TruncatedSnafu);
            }
            Some(other) if self.expect_separator => {
                return Err(CodecError::MissingSeparator {
                    found: describe(Some(other)),
                });
            }
            Some(_) => {}
        }

        self.frame_element()?;
        let value = serde_json::from_slice::<Value>(&self.element)
            .map_err(|source| CodecError::Json { source })?;
        self.expect_separator = true;
        Ok(Some(value))
    }

    /// Skip whitespace and return the next byte without consuming it.
    fn peek_token(&mut self) -> io::Result<Option<u8>> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(None);
            }
            match available.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(idx) => {
                    let byte = available[idx];
                    self.reader.consume(idx);
                    return Ok(Some(byte));
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    /// Copy the bytes of the next element into `self.element`.
    fn frame_element(&mut self) -> Result<(), CodecError> {
        self.element.clear();
        let mut framer = Framer::default();

        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(CodecError::Read { source }),
            };

            if available.is_empty() {
                return if framer.at_top_level() && !self.element.is_empty() {
                    // A bare scalar can end at end of input; the missing `]` is
                    // reported on the next advance.
                    Ok(())
                } else {
                    Err(CodecError::Truncated)
                };
            }

            match framer.feed(available, &mut self.element) {
                Some(used) => {
                    self.reader.consume(used);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Tracks nesting while scanning one element.
#[derive(Debug, Default)]
struct Framer {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Framer {
    fn at_top_level(&self) -> bool {
        self.depth == 0 && !self.in_string
    }

    /// Append the element bytes in `chunk` to `out`. Returns how many bytes
    /// of `chunk` belong to the element once it is complete, `None` if the
    /// whole chunk was used and more input is needed.
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Option<usize> {
        for (idx, &b) in chunk.iter().enumerate() {
            if self.in_string {
                out.push(b);
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(idx + 1);
                    }
                }
                continue;
            }

            match b {
                b'"' => {
                    out.push(b);
                    self.in_string = true;
                }
                b'{' | b'[' => {
                    out.push(b);
                    self.depth += 1;
                }
                b'}' | b']' => {
                    if self.depth == 0 {
                        return Some(idx);
                    }
                    out.push(b);
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(idx + 1);
                    }
                }
                b',' if self.depth == 0 => return Some(idx),
                b if b.is_ascii_whitespace() && self.depth == 0 => return Some(idx),
                _ => out.push(b),
            }
        }
        None
    }
}

fn describe(byte: Option<u8>) -> String {
    match byte {
        Some(b) if b.is_ascii_graphic() => format!("'{}'", b as char),
        Some(b) => format!("byte 0x{b:02x}"),
        None => "end of input".to_string(),
    }
}
