// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CBOR codec for the security resources.
//
// Payloads are parsed into a `serde_cbor::Value` tree first and then walked
// field by field, so every failure can name the element that caused it.
// Partially built structures never escape: a decode either yields a complete
// resource or a `ParseError`.

mod acl;
mod pstat;
mod svc;

use std::collections::BTreeMap;

use serde_cbor::Value;
use srm_core::error::{ParseError, Result, SrmError};
use uuid::Uuid;

pub use acl::{acl_from_value, acl_to_value, decode_acl, decode_aces, encode_acl};
pub use pstat::{
    PstatUpdate, decode_pstat, decode_pstat_update, encode_pstat, encode_pstat_update,
    pstat_from_value, pstat_to_value,
};
pub use svc::{decode_svc, encode_svc, svc_from_value, svc_to_value};

pub(crate) type Map = BTreeMap<Value, Value>;

/// Parse a buffer into a CBOR value; `None` for an empty buffer or bare `null`.
pub(crate) fn parse_document(bytes: &[u8]) -> std::result::Result<Option<Value>, ParseError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_cbor::from_slice(bytes).map_err(|e| ParseError::root(format!("malformed CBOR: {e}")))?;
    match value {
        Value::Null => Ok(None),
        other => Ok(Some(other)),
    }
}

/// Serialize a value tree.
pub(crate) fn to_bytes(value: &Value) -> Result<Vec<u8>> {
    serde_cbor::to_vec(value).map_err(|e| SrmError::Internal(format!("CBOR encoding failed: {e}")))
}

pub(crate) fn key(name: &str) -> Value {
    Value::Text(name.to_owned())
}

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

pub(crate) fn uint(n: impl Into<i128>) -> Value {
    Value::Integer(n.into())
}

/// Read access to the members of one CBOR map.
pub(crate) struct Fields<'a> {
    map: &'a Map,
}

impl<'a> Fields<'a> {
    pub(crate) fn of(value: &'a Value) -> std::result::Result<Self, ParseError> {
        match value {
            Value::Map(map) => Ok(Self { map }),
            other => Err(ParseError::root(format!("expected a map, found {}", kind(other)))),
        }
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.map.contains_key(&key(name))
    }

    pub(crate) fn optional(&self, name: &str) -> Option<&'a Value> {
        self.map.get(&key(name))
    }

    pub(crate) fn required(&self, name: &str) -> std::result::Result<&'a Value, ParseError> {
        self.optional(name)
            .ok_or_else(|| ParseError::new(name, "required field is missing"))
    }

    pub(crate) fn text(&self, name: &str) -> std::result::Result<&'a str, ParseError> {
        as_text(self.required(name)?).map_err(|e| e.within(name))
    }

    pub(crate) fn uint(&self, name: &str) -> std::result::Result<u64, ParseError> {
        as_uint(self.required(name)?).map_err(|e| e.within(name))
    }

    pub(crate) fn bool(&self, name: &str) -> std::result::Result<bool, ParseError> {
        match self.required(name)? {
            Value::Bool(b) => Ok(*b),
            other => Err(ParseError::new(name, format!("expected a bool, found {}", kind(other)))),
        }
    }

    pub(crate) fn uuid(&self, name: &str) -> std::result::Result<Uuid, ParseError> {
        parse_uuid(self.text(name)?).map_err(|e| e.within(name))
    }

    pub(crate) fn array(&self, name: &str) -> std::result::Result<&'a [Value], ParseError> {
        as_array(self.required(name)?).map_err(|e| e.within(name))
    }

    /// An optional array of strings; absent means empty.
    pub(crate) fn strings(&self, name: &str) -> std::result::Result<Vec<String>, ParseError> {
        let Some(value) = self.optional(name) else {
            return Ok(Vec::new());
        };
        let items = as_array(value).map_err(|e| e.within(name))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                as_text(item)
                    .map(str::to_owned)
                    .map_err(|e| e.within(&format!("{name}[{i}]")))
            })
            .collect()
    }
}

pub(crate) fn as_text(value: &Value) -> std::result::Result<&str, ParseError> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(ParseError::root(format!("expected text, found {}", kind(other)))),
    }
}

pub(crate) fn as_uint(value: &Value) -> std::result::Result<u64, ParseError> {
    match value {
        Value::Integer(n) => u64::try_from(*n)
            .map_err(|_| ParseError::root(format!("{n} is not an unsigned integer"))),
        other => Err(ParseError::root(format!("expected an integer, found {}", kind(other)))),
    }
}

pub(crate) fn as_int(value: &Value) -> std::result::Result<i64, ParseError> {
    match value {
        Value::Integer(n) => {
            i64::try_from(*n).map_err(|_| ParseError::root(format!("{n} is out of range")))
        }
        other => Err(ParseError::root(format!("expected an integer, found {}", kind(other)))),
    }
}

pub(crate) fn as_array(value: &Value) -> std::result::Result<&[Value], ParseError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(ParseError::root(format!("expected an array, found {}", kind(other)))),
    }
}

pub(crate) fn parse_uuid(s: &str) -> std::result::Result<Uuid, ParseError> {
    Uuid::parse_str(s).map_err(|e| ParseError::root(format!("`{s}` is not a UUID: {e}")))
}

/// Human-readable name of a CBOR major type, for error messages.
fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::Bytes(_) => "bytes",
        Value::Text(_) => "text",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Tag(..) => "tag",
        _ => "unknown",
    }
}
