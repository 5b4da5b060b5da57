//! Decoding of a single message payload into a [`Message`].
//!
//! The decoder is a recursive, bounds-checked walk over a cursor: every
//! read of `N` bytes is preceded by `cursor + N <= end`, matching the
//! wire format's boundary policy. There is no backtracking grammar here
//! (unlike a textual protocol) because the three-byte type tag that
//! precedes every object removes the ambiguity a combinator parser would
//! otherwise have to resolve.

use crate::{
    error::{RelayError, Result},
    events,
    value::{HdataItem, InfolistField, Type, Value},
};

/// A movable read position over a borrowed byte slice, bounds-checked on
/// every read.
struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.input.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.input.len() {
            return Err(RelayError::UnexpectedEndOfMessage {
                wanted: n,
                available: self.remaining(),
            });
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_i32_be(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array::<4>()?))
    }

    fn take_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array::<4>()?))
    }
}

/// The resolved meaning of a message's leading identifier string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// The leading string was the null sentinel (`str` with length -1).
    None,
    /// The leading string matched a known server-push event name.
    Event(&'static str),
    /// The leading string matched no known event; it is a command
    /// correlation id, to be parsed as hex by the dispatcher.
    Correlation(String),
}

/// A fully decoded payload: its identifier plus the ordered objects that
/// followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub identifier: Identifier,
    pub values: Vec<Value>,
}

/// Decode one payload (the bytes of a single frame, after framing and any
/// decompression) into a [`Message`].
pub fn decode_message(payload: &[u8]) -> Result<Message> {
    let mut cursor = Cursor::new(payload);

    let identifier = decode_identifier(&mut cursor)?;

    let mut values = Vec::new();
    while !cursor.is_at_end() {
        values.push(decode_object(&mut cursor)?);
    }

    Ok(Message { identifier, values })
}

fn decode_identifier(cursor: &mut Cursor) -> Result<Identifier> {
    match decode_string_payload(cursor)? {
        None => Ok(Identifier::None),
        Some(bytes) => {
            let text = String::from_utf8(bytes)
                .map_err(|e| RelayError::InvalidData(format!("identifier not utf8: {e}")))?;

            match events::lookup(&text) {
                Some(name) => Ok(Identifier::Event(name)),
                None => Ok(Identifier::Correlation(text)),
            }
        }
    }
}

fn decode_type(cursor: &mut Cursor) -> Result<Type> {
    let tag = cursor.take_array::<3>()?;
    Type::from_tag(&tag).ok_or_else(|| RelayError::InvalidData(format!("unknown type tag {tag:?}")))
}

/// A top-level wire object: three-byte type tag, then the tag's payload.
fn decode_object(cursor: &mut Cursor) -> Result<Value> {
    let ty = decode_type(cursor)?;
    decode_value_of_type(cursor, ty)
}

fn decode_value_of_type(cursor: &mut Cursor, ty: Type) -> Result<Value> {
    Ok(match ty {
        Type::Char => Value::Char(cursor.take_u8()?),
        Type::Int => Value::Int(cursor.take_i32_be()?),
        Type::Long => Value::Long(decode_long(cursor)?),
        Type::String => Value::String(decode_string_payload(cursor)?),
        Type::Buffer => Value::Buffer(decode_string_payload(cursor)?),
        Type::Pointer => Value::Pointer(decode_pointer(cursor)?),
        Type::Time => Value::Time(decode_time(cursor)?),
        Type::Array => decode_array(cursor)?,
        Type::Hashtable => decode_hashtable(cursor)?,
        Type::Hdata => decode_hdata(cursor)?,
        Type::Info => decode_info(cursor)?,
        Type::Infolist => decode_infolist(cursor)?,
    })
}

/// `str`/`buf` payload: 4-byte big-endian signed length, then that many
/// bytes. Length -1 is the null sentinel; any other negative length is
/// invalid.
fn decode_string_payload(cursor: &mut Cursor) -> Result<Option<Vec<u8>>> {
    let len = cursor.take_i32_be()?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(RelayError::InvalidData(format!(
            "negative string length {len}"
        )));
    }
    Ok(Some(cursor.take(len as usize)?.to_vec()))
}

fn ascii_digits<'a>(cursor: &mut Cursor<'a>) -> Result<&'a [u8]> {
    let len = cursor.take_u8()? as usize;
    cursor.take(len)
}

fn decode_long(cursor: &mut Cursor) -> Result<i64> {
    let digits = ascii_digits(cursor)?;
    let text = std::str::from_utf8(digits)
        .map_err(|e| RelayError::InvalidData(format!("lon not utf8: {e}")))?;
    text.parse::<i64>()
        .map_err(|e| RelayError::InvalidData(format!("malformed lon literal {text:?}: {e}")))
}

fn decode_time(cursor: &mut Cursor) -> Result<u64> {
    let digits = ascii_digits(cursor)?;
    let text = std::str::from_utf8(digits)
        .map_err(|e| RelayError::InvalidData(format!("tim not utf8: {e}")))?;
    text.parse::<u64>()
        .map_err(|e| RelayError::InvalidData(format!("malformed tim literal {text:?}: {e}")))
}

/// `ptr` payload: 1-byte length N, then N ASCII hex bytes. The corrected
/// null-pointer sentinel: length 1 AND the single payload byte equals
/// ASCII `'0'`. The original C implementation read the byte at offset 1
/// instead of offset 0 for this check, reading past the single payload
/// byte; this reads the byte actually present.
fn decode_pointer(cursor: &mut Cursor) -> Result<u64> {
    let digits = ascii_digits(cursor)?;
    if digits.len() == 1 && digits[0] == b'0' {
        return Ok(0);
    }
    let text = std::str::from_utf8(digits)
        .map_err(|e| RelayError::InvalidData(format!("ptr not utf8: {e}")))?;
    u64::from_str_radix(text, 16)
        .map_err(|e| RelayError::InvalidData(format!("malformed ptr literal {text:?}: {e}")))
}

/// `arr`: element type tag, 4-byte count, then that many elements of the
/// element type. If any element fails to decode, the already-decoded
/// siblings are released automatically when `elements` drops on the `?`
/// early return -- the direct fix for the original's buggy OR-conditioned
/// cleanup loop, which this implementation has no manual equivalent of.
fn decode_array(cursor: &mut Cursor) -> Result<Value> {
    let element_type = decode_type(cursor)?;
    if !element_type.is_primitive() {
        return Err(RelayError::InvalidData(format!(
            "array element type {:?} is not primitive",
            element_type.tag()
        )));
    }

    let count = cursor.take_u32_be()? as usize;
    let mut elements = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        elements.push(decode_value_of_type(cursor, element_type)?);
    }

    Ok(Value::Array {
        element_type,
        elements,
    })
}

fn decode_hashtable(cursor: &mut Cursor) -> Result<Value> {
    let key_type = decode_type(cursor)?;
    let value_type = decode_type(cursor)?;
    if !key_type.is_primitive() || !value_type.is_primitive() {
        return Err(RelayError::InvalidData(
            "hashtable key/value type is not primitive".into(),
        ));
    }

    let count = cursor.take_u32_be()? as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let key = decode_value_of_type(cursor, key_type)?;
        let value = decode_value_of_type(cursor, value_type)?;
        entries.push((key, value));
    }

    Ok(Value::Hashtable {
        key_type,
        value_type,
        entries,
    })
}

fn parse_key_token(token: &str) -> Result<(String, Type)> {
    let (name, type_str) = token
        .split_once(':')
        .ok_or_else(|| RelayError::InvalidData(format!("hdata key token {token:?} missing ':'")))?;

    let type_bytes = type_str.as_bytes();
    let tag: [u8; 3] = type_bytes
        .try_into()
        .map_err(|_| RelayError::InvalidData(format!("hdata key type {type_str:?} malformed")))?;
    let ty = Type::from_tag(&tag)
        .ok_or_else(|| RelayError::InvalidData(format!("hdata key type {type_str:?} unknown")))?;
    if !ty.is_primitive() {
        return Err(RelayError::InvalidData(format!(
            "hdata key {name:?} has non-primitive type {type_str:?}"
        )));
    }

    Ok((name.to_string(), ty))
}

/// `hda`: `hpath` string (slash-separated names), `keys` string
/// (comma-separated `name:type` tokens), 4-byte item count, then per item
/// one pointer per hpath segment followed by one value per key.
fn decode_hdata(cursor: &mut Cursor) -> Result<Value> {
    let hpath_bytes = decode_string_payload(cursor)?
        .ok_or_else(|| RelayError::InvalidData("hdata hpath must not be null".into()))?;
    let hpath_str = String::from_utf8(hpath_bytes)
        .map_err(|e| RelayError::InvalidData(format!("hpath not utf8: {e}")))?;
    let hpath: Vec<String> = hpath_str.split('/').map(str::to_string).collect();

    let keys_bytes = decode_string_payload(cursor)?
        .ok_or_else(|| RelayError::InvalidData("hdata keys must not be null".into()))?;
    let keys_str = String::from_utf8(keys_bytes)
        .map_err(|e| RelayError::InvalidData(format!("keys not utf8: {e}")))?;
    let keys: Vec<(String, Type)> = if keys_str.is_empty() {
        Vec::new()
    } else {
        keys_str
            .split(',')
            .map(parse_key_token)
            .collect::<Result<Vec<_>>>()?
    };

    let count = cursor.take_u32_be()? as usize;
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let mut pointers = Vec::with_capacity(hpath.len());
        for _ in &hpath {
            pointers.push(decode_pointer(cursor)?);
        }

        let mut values = Vec::with_capacity(keys.len());
        for (name, ty) in &keys {
            values.push((name.clone(), decode_value_of_type(cursor, *ty)?));
        }

        items.push(HdataItem { pointers, values });
    }

    Ok(Value::Hdata { hpath, keys, items })
}

fn decode_info(cursor: &mut Cursor) -> Result<Value> {
    let name = decode_string_payload(cursor)?;
    let value = decode_string_payload(cursor)?;
    Ok(Value::Info(name, value))
}

fn decode_infolist(cursor: &mut Cursor) -> Result<Value> {
    let name = decode_string_payload(cursor)?;

    let item_count = cursor.take_u32_be()? as usize;
    let mut items = Vec::with_capacity(item_count.min(4096));
    for _ in 0..item_count {
        let field_count = cursor.take_u32_be()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(4096));
        for _ in 0..field_count {
            let field_name = decode_string_payload(cursor)?.ok_or_else(|| {
                RelayError::InvalidData("infolist field name must not be null".into())
            })?;
            let field_name = String::from_utf8(field_name)
                .map_err(|e| RelayError::InvalidData(format!("infolist field name not utf8: {e}")))?;
            let ty = decode_type(cursor)?;
            let value = decode_value_of_type(cursor, ty)?;
            fields.push(InfolistField {
                name: field_name,
                value,
            });
        }
        items.push(fields);
    }

    Ok(Value::Infolist { name, items })
}
