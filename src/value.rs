//! The decoded representation of the WeeChat relay wire format.
//!
//! The wire protocol is dynamically typed: every object on the wire carries
//! its own three-byte type tag, so the decoded representation is a single
//! tagged sum type rather than a family of interface objects. See
//! [`Value`].

use std::fmt;

/// One decoded wire object.
///
/// Only the seven "primitive" variants ([`Value::Char`] through
/// [`Value::Time`]) are legal as the element type of [`Value::Array`], as
/// the key/value type of [`Value::Hashtable`], or as a key's declared type
/// in [`Value::Hdata`]; the decoder rejects anything else with
/// [`crate::error::RelayError::InvalidData`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Char(u8),
    Int(i32),
    Long(i64),
    /// `None` is the wire's null string, distinct from `Some(vec![])`.
    String(Option<Vec<u8>>),
    /// `None` is the wire's null buffer, distinct from `Some(vec![])`.
    Buffer(Option<Vec<u8>>),
    /// Opaque identifier; the null pointer decodes to `0`.
    Pointer(u64),
    /// Seconds since epoch.
    Time(u64),
    Array {
        element_type: Type,
        elements: Vec<Value>,
    },
    Hashtable {
        key_type: Type,
        value_type: Type,
        entries: Vec<(Value, Value)>,
    },
    Hdata {
        hpath: Vec<String>,
        keys: Vec<(String, Type)>,
        items: Vec<HdataItem>,
    },
    Info(Option<Vec<u8>>, Option<Vec<u8>>),
    Infolist {
        name: Option<Vec<u8>>,
        items: Vec<Vec<InfolistField>>,
    },
}

/// One item of an `hda` object: one pointer per `hpath` segment, then one
/// value per declared key, in key-declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct HdataItem {
    pub pointers: Vec<u64>,
    pub values: Vec<(String, Value)>,
}

/// One (name, type, value) triple inside an `inl` item.
#[derive(Debug, Clone, PartialEq)]
pub struct InfolistField {
    pub name: String,
    pub value: Value,
}

/// The three-byte wire type tag. Every [`Type`] variant other than the
/// seven primitives is rejected wherever the wire format requires a
/// primitive (array/hashtable element types, hdata key types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Char,
    Int,
    Long,
    String,
    Buffer,
    Pointer,
    Time,
    Array,
    Hashtable,
    Hdata,
    Info,
    Infolist,
}

impl Type {
    /// The three-byte ASCII identifier used on the wire.
    pub const fn tag(self) -> &'static [u8; 3] {
        match self {
            Type::Char => b"chr",
            Type::Int => b"int",
            Type::Long => b"lon",
            Type::String => b"str",
            Type::Buffer => b"buf",
            Type::Pointer => b"ptr",
            Type::Time => b"tim",
            Type::Array => b"arr",
            Type::Hashtable => b"htb",
            Type::Hdata => b"hda",
            Type::Info => b"inf",
            Type::Infolist => b"inl",
        }
    }

    pub const fn from_tag(tag: &[u8; 3]) -> Option<Type> {
        Some(match tag {
            b"chr" => Type::Char,
            b"int" => Type::Int,
            b"lon" => Type::Long,
            b"str" => Type::String,
            b"buf" => Type::Buffer,
            b"ptr" => Type::Pointer,
            b"tim" => Type::Time,
            b"arr" => Type::Array,
            b"htb" => Type::Hashtable,
            b"hda" => Type::Hdata,
            b"inf" => Type::Info,
            b"inl" => Type::Infolist,
            _ => return None,
        })
    }

    /// Whether this type is legal as an array element, hashtable key/value,
    /// or hdata key type.
    pub const fn is_primitive(self) -> bool {
        matches!(
            self,
            Type::Char
                | Type::Int
                | Type::Long
                | Type::String
                | Type::Buffer
                | Type::Pointer
                | Type::Time
        )
    }
}

fn fmt_bytes(f: &mut fmt::Formatter<'_>, bytes: &Option<Vec<u8>>) -> fmt::Result {
    match bytes {
        None => write!(f, "null"),
        Some(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Char(c) => write!(f, "chr({c})"),
            Value::Int(i) => write!(f, "int({i})"),
            Value::Long(l) => write!(f, "lon({l})"),
            Value::String(s) => {
                write!(f, "str(")?;
                fmt_bytes(f, s)?;
                write!(f, ")")
            }
            Value::Buffer(b) => {
                write!(f, "buf(")?;
                fmt_bytes(f, b)?;
                write!(f, ")")
            }
            Value::Pointer(p) => write!(f, "ptr(0x{p:x})"),
            Value::Time(t) => write!(f, "tim({t})"),
            Value::Array { elements, .. } => write!(f, "arr[{}]", elements.len()),
            Value::Hashtable { entries, .. } => write!(f, "htb[{}]", entries.len()),
            Value::Hdata { items, .. } => write!(f, "hda[{}]", items.len()),
            Value::Info(name, value) => {
                write!(f, "inf(")?;
                fmt_bytes(f, name)?;
                write!(f, ", ")?;
                fmt_bytes(f, value)?;
                write!(f, ")")
            }
            Value::Infolist { items, .. } => write!(f, "inl[{}]", items.len()),
        }
    }
}
