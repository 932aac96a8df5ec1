//! Order-preserving tuple codec for storage keys
//!
//! A tuple encodes as the plain concatenation of its elements, so the
//! encoding of a tuple is a byte prefix of the encoding of any longer tuple
//! that starts with it. Byte-wise comparison of two encodings matches
//! element-by-element comparison of same-typed values.
//!
//! Layout per element (leading tag byte, then payload):
//!
//! | tag    | type            | payload                                      |
//! |--------|-----------------|----------------------------------------------|
//! | `0x01` | null            | none                                         |
//! | `0x02` | bytes           | escaped bytes, `0x00` terminator             |
//! | `0x03` | string (UTF-8)  | escaped bytes, `0x00` terminator             |
//! | `0x04` | integer `>= 0`  | 8 bytes big-endian                           |
//! | `0x05` | nested tuple    | encoded elements, `0x00` terminator          |
//! | `0x06` | integer `< 0`   | 8 bytes big-endian two's complement          |
//! | `0x07` | float           | 8 bytes big-endian, order-preserving remap   |
//! | `0x08` | false           | none                                         |
//! | `0x09` | true            | none                                         |
//!
//! Escaping turns every literal `0x00` into `0x00 0xFF`. No tag is `0x00` or
//! `0xFF`, which keeps terminators unambiguous.
//!
//! Values of different types order by tag byte. In particular every negative
//! integer sorts *after* every non-negative one, because the negative tag is
//! larger than the positive tag. Keys built by this crate never mix signs.

use std::cmp::Ordering;

const TAG_NULL: u8 = 0x01;
const TAG_BYTES: u8 = 0x02;
const TAG_STRING: u8 = 0x03;
const TAG_INT_POS: u8 = 0x04;
const TAG_NESTED: u8 = 0x05;
const TAG_INT_NEG: u8 = 0x06;
const TAG_FLOAT: u8 = 0x07;
const TAG_FALSE: u8 = 0x08;
const TAG_TRUE: u8 = 0x09;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Tuple decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    #[error("unknown tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("invalid UTF-8 in string element at offset {0}")]
    InvalidUtf8(usize),
}

impl From<TupleError> for crate::error::PoolError {
    fn from(e: TupleError) -> Self {
        crate::error::PoolError::Schema(format!("tuple key: {}", e))
    }
}

/// A single tuple element
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Tuple(Vec<Value>),
}

impl Value {
    /// Leading tag byte used for this value
    pub fn tag(&self) -> u8 {
        match self {
            Value::Null => TAG_NULL,
            Value::Bytes(_) => TAG_BYTES,
            Value::Str(_) => TAG_STRING,
            Value::Int(i) if *i >= 0 => TAG_INT_POS,
            Value::Int(_) => TAG_INT_NEG,
            Value::Tuple(_) => TAG_NESTED,
            Value::Float(_) => TAG_FLOAT,
            Value::Bool(false) => TAG_FALSE,
            Value::Bool(true) => TAG_TRUE,
        }
    }

    /// Borrow the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering of two values as their encodings order them
    ///
    /// Same-typed values compare naturally (floats by IEEE total order);
    /// mixed types compare by tag.
    pub fn key_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Int(a), Value::Int(b)) if self.tag() == other.tag() => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.key_cmp(y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// Encode a tuple into an order-preserving byte string
pub fn encode(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        encode_value(value, &mut out);
    }
    out
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    out.push(value.tag());
    match value {
        Value::Null | Value::Bool(_) => {}
        Value::Bytes(b) => encode_escaped(b, out),
        Value::Str(s) => encode_escaped(s.as_bytes(), out),
        // Two's complement bytes for both signs; the tag separates them.
        Value::Int(i) => out.extend_from_slice(&(*i as u64).to_be_bytes()),
        Value::Float(f) => out.extend_from_slice(&float_to_ordered(*f).to_be_bytes()),
        Value::Tuple(items) => {
            for item in items {
                encode_value(item, out);
            }
            out.push(TERMINATOR);
        }
    }
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn float_to_ordered(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & (1 << 63) != 0 { !bits } else { bits ^ (1 << 63) }
}

fn ordered_to_float(bits: u64) -> f64 {
    let raw = if bits & (1 << 63) != 0 { bits ^ (1 << 63) } else { !bits };
    f64::from_bits(raw)
}

/// Decode a byte string produced by [`encode`]
pub fn decode(data: &[u8]) -> Result<Vec<Value>, TupleError> {
    let mut pos = 0;
    let mut values = Vec::new();
    while pos < data.len() {
        values.push(decode_value(data, &mut pos)?);
    }
    Ok(values)
}

fn decode_value(data: &[u8], pos: &mut usize) -> Result<Value, TupleError> {
    let offset = *pos;
    let tag = *data.get(offset).ok_or(TupleError::UnexpectedEnd(offset))?;
    *pos += 1;

    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_BYTES => Ok(Value::Bytes(decode_escaped(data, pos)?)),
        TAG_STRING => {
            let bytes = decode_escaped(data, pos)?;
            String::from_utf8(bytes)
                .map(Value::Str)
                .map_err(|_| TupleError::InvalidUtf8(offset))
        }
        TAG_INT_POS | TAG_INT_NEG => Ok(Value::Int(read_u64(data, pos)? as i64)),
        TAG_FLOAT => Ok(Value::Float(ordered_to_float(read_u64(data, pos)?))),
        TAG_NESTED => {
            let mut items = Vec::new();
            loop {
                match data.get(*pos) {
                    None => return Err(TupleError::UnexpectedEnd(*pos)),
                    Some(&TERMINATOR) => {
                        *pos += 1;
                        return Ok(Value::Tuple(items));
                    }
                    Some(_) => items.push(decode_value(data, pos)?),
                }
            }
        }
        tag => Err(TupleError::UnknownTag { tag, offset }),
    }
}

fn decode_escaped(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, TupleError> {
    let mut out = Vec::new();
    loop {
        let b = *data.get(*pos).ok_or(TupleError::UnexpectedEnd(*pos))?;
        *pos += 1;
        if b != TERMINATOR {
            out.push(b);
            continue;
        }
        if data.get(*pos) == Some(&ESCAPE) {
            *pos += 1;
            out.push(TERMINATOR);
        } else {
            return Ok(out);
        }
    }
}

fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64, TupleError> {
    let end = *pos + 8;
    let slice = data.get(*pos..end).ok_or(TupleError::UnexpectedEnd(data.len()))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    *pos = end;
    Ok(u64::from_be_bytes(buf))
}
