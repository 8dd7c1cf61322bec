//! Tagged-tuple payload encoding.
//!
//! A payload is a plain concatenation of self-describing [`Value`]s, each
//! encoded with bincode using fixed-width integers. Decoding is lazy: values
//! are pulled off the front of the buffer one at a time.

use std::io::Cursor;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "map",
        }
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

pub fn encode<'a, I>(values: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut buffer = Vec::new();
    for value in values {
        options().serialize_into(&mut buffer, value)?;
    }

    Ok(buffer)
}

pub fn decode(payload: &[u8]) -> PayloadDecoder<'_> {
    PayloadDecoder {
        cursor: Cursor::new(payload),
        failed: false,
    }
}

/// Iterator over the top-level values of a payload.
///
/// After the first malformed value the iterator is exhausted; decoding can
/// only be restarted by calling [`decode`] again.
pub struct PayloadDecoder<'a> {
    cursor: Cursor<&'a [u8]>,
    failed: bool,
}

impl PayloadDecoder<'_> {
    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len();
        len.saturating_sub(self.cursor.position() as usize)
    }

    /// Pulls the next value, treating end of input as malformed.
    pub fn expect_value(&mut self, what: &str) -> Result<Value> {
        self.next().unwrap_or_else(|| {
            Err(Error::MalformedPayload(format!(
                "payload ended before {what}"
            )))
        })
    }

    /// Fails if any bytes are left after the values consumed so far.
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::MalformedPayload(format!(
                "{n} unexpected trailing bytes"
            ))),
        }
    }
}

impl Iterator for PayloadDecoder<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining();
        if self.failed || remaining == 0 {
            return None;
        }

        let position = self.cursor.position();
        match options()
            .with_limit(remaining as u64)
            .deserialize_from(&mut self.cursor)
        {
            Ok(value) => Some(Ok(value)),
            Err(e) => {
                self.failed = true;
                Some(Err(Error::MalformedPayload(format!(
                    "invalid value at byte {position}: {e}"
                ))))
            }
        }
    }
}
