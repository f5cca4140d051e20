// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SVC <-> CBOR.
//
//   { "svcs": [ { "ownr": "<uuid>", "svct": n, "skref": "..."? }, ... ] }

use serde_cbor::Value;
use srm_core::error::{ParseError, Result};
use srm_core::types::{ServiceRecord, ServiceType, SvcList};

use super::{Fields, Map, key, parse_document, text, to_bytes, uint};

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Decode an SVC payload. `Ok(None)` for an empty or `null` buffer.
pub fn decode_svc(bytes: &[u8]) -> ParseResult<Option<SvcList>> {
    parse_document(bytes)?.map(|v| svc_from_value(&v)).transpose()
}

pub fn encode_svc(svcs: &SvcList) -> Result<Vec<u8>> {
    to_bytes(&svc_to_value(svcs))
}

pub fn svc_from_value(value: &Value) -> ParseResult<SvcList> {
    let fields = Fields::of(value)?;
    let records = fields
        .array("svcs")?
        .iter()
        .enumerate()
        .map(|(i, item)| record_from_value(item).map_err(|e| e.within(&format!("[{i}]")).within("svcs")))
        .collect::<ParseResult<Vec<_>>>()?;
    SvcList::from_records(records).map_err(|e| e.within("svcs"))
}

pub fn svc_to_value(svcs: &SvcList) -> Value {
    let mut root = Map::new();
    root.insert(
        key("svcs"),
        Value::Array(svcs.records().iter().map(record_to_value).collect()),
    );
    Value::Map(root)
}

fn record_from_value(value: &Value) -> ParseResult<ServiceRecord> {
    let fields = Fields::of(value)?;
    let owner = fields.uuid("ownr")?;
    let code = fields.uint("svct")?;
    let code = u16::try_from(code)
        .map_err(|_| ParseError::new("svct", format!("{code} is not a service type")))?;
    let session_key_ref = match fields.optional("skref") {
        Some(_) => Some(fields.text("skref")?.to_owned()),
        None => None,
    };
    Ok(ServiceRecord {
        owner,
        service_type: ServiceType::from_code(code),
        session_key_ref,
    })
}

fn record_to_value(record: &ServiceRecord) -> Value {
    let mut map = Map::new();
    map.insert(key("ownr"), text(&record.owner.to_string()));
    map.insert(key("svct"), uint(record.service_type.code()));
    if let Some(skref) = &record.session_key_ref {
        map.insert(key("skref"), text(skref));
    }
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(owner: Uuid, code: u16) -> ServiceRecord {
        ServiceRecord {
            owner,
            service_type: ServiceType::from_code(code),
            session_key_ref: (code == 1).then(|| "cred:12".to_owned()),
        }
    }

    #[test]
    fn round_trip() {
        let owner = Uuid::new_v4();
        let list = SvcList::from_records(vec![record(owner, 1), record(owner, 9)]).unwrap();
        let bytes = encode_svc(&list).unwrap();
        assert_eq!(decode_svc(&bytes).unwrap(), Some(list));
    }

    #[test]
    fn empty_list_is_valid() {
        let bytes = encode_svc(&SvcList::default()).unwrap();
        assert_eq!(decode_svc(&bytes).unwrap(), Some(SvcList::default()));
    }

    #[test]
    fn duplicate_owner_and_type_is_rejected() {
        let owner = Uuid::new_v4();
        let mut root = Map::new();
        root.insert(
            key("svcs"),
            Value::Array(vec![record_to_value(&record(owner, 1)), record_to_value(&record(owner, 1))]),
        );
        let bytes = serde_cbor::to_vec(&Value::Map(root)).unwrap();
        assert_eq!(decode_svc(&bytes).unwrap_err().field, "svcs[1]");
    }

    #[test]
    fn missing_owner_is_named() {
        let mut entry = Map::new();
        entry.insert(key("svct"), uint(1u8));
        let mut root = Map::new();
        root.insert(key("svcs"), Value::Array(vec![Value::Map(entry)]));
        let bytes = serde_cbor::to_vec(&Value::Map(root)).unwrap();
        assert_eq!(decode_svc(&bytes).unwrap_err().field, "svcs[0].ownr");
    }
}
