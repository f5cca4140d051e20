// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PSTAT <-> CBOR.
//
//   {
//     "dos": { "s": state, "p": pending },
//     "tgt": state,                 (only while a transition is pending)
//     "om": mode-bits,
//     "rowneruuid": "<uuid>",
//     "cmt": committed,
//     "isop": bool                  (output only)
//   }
//
// A POST body carries `dos.s` (the requested target) and/or `om`.

use serde_cbor::Value;
use srm_core::error::{ParseError, Result};
use srm_core::provisioning::{DeviceState, OperationMode, Pstat};

use super::{Fields, Map, key, parse_document, text, to_bytes, uint};

type ParseResult<T> = std::result::Result<T, ParseError>;

/// The writable part of PSTAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PstatUpdate {
    pub target: Option<DeviceState>,
    pub operation_mode: Option<OperationMode>,
}

pub fn encode_pstat(pstat: &Pstat) -> Result<Vec<u8>> {
    to_bytes(&pstat_to_value(pstat))
}

/// Encode a PSTAT POST body.
pub fn encode_pstat_update(update: &PstatUpdate) -> Result<Vec<u8>> {
    let mut root = Map::new();
    if let Some(target) = update.target {
        let mut dos = Map::new();
        dos.insert(key("s"), uint(target.code()));
        root.insert(key("dos"), Value::Map(dos));
    }
    if let Some(om) = update.operation_mode {
        root.insert(key("om"), uint(om.bits()));
    }
    to_bytes(&Value::Map(root))
}

/// Decode a full PSTAT record (as persisted). `Ok(None)` for an empty buffer.
pub fn decode_pstat(bytes: &[u8]) -> ParseResult<Option<Pstat>> {
    parse_document(bytes)?.map(|v| pstat_from_value(&v)).transpose()
}

/// Decode a PSTAT POST body.
pub fn decode_pstat_update(bytes: &[u8]) -> ParseResult<PstatUpdate> {
    let value = parse_document(bytes)?
        .ok_or_else(|| ParseError::root("PSTAT update body is empty"))?;
    let fields = Fields::of(&value)?;

    let target = match fields.optional("dos") {
        Some(dos) => {
            let dos = Fields::of(dos).map_err(|e| e.within("dos"))?;
            Some(state(dos.uint("s"), "s").map_err(|e| e.within("dos"))?)
        }
        None => None,
    };
    let operation_mode = match fields.optional("om") {
        Some(_) => Some(mode(fields.uint("om"))?),
        None => None,
    };
    if target.is_none() && operation_mode.is_none() {
        return Err(ParseError::root("PSTAT update carries neither `dos` nor `om`"));
    }
    Ok(PstatUpdate {
        target,
        operation_mode,
    })
}

pub fn pstat_from_value(value: &Value) -> ParseResult<Pstat> {
    let fields = Fields::of(value)?;
    let dos = Fields::of(fields.required("dos")?).map_err(|e| e.within("dos"))?;
    let current = state(dos.uint("s"), "s").map_err(|e| e.within("dos"))?;
    let pending = dos.bool("p").map_err(|e| e.within("dos"))?;

    let target = match fields.optional("tgt") {
        Some(_) => Some(state(fields.uint("tgt"), "tgt")?),
        None => None,
    };
    if pending != target.is_some() {
        return Err(ParseError::new("dos.p", "pending flag disagrees with `tgt`"));
    }

    let operation_mode = mode(fields.uint("om"))?;
    // The RFNOP override bit is configuration dependent; the store narrows it.
    if !current.legal_modes(true).contains(operation_mode) {
        return Err(ParseError::new(
            "om",
            format!("{operation_mode:?} is not legal in {current}"),
        ));
    }

    Ok(Pstat {
        state: current,
        target,
        operation_mode,
        rowner: fields.uuid("rowneruuid")?,
        committed: fields.bool("cmt")?,
    })
}

pub fn pstat_to_value(pstat: &Pstat) -> Value {
    let mut dos = Map::new();
    dos.insert(key("s"), uint(pstat.state.code()));
    dos.insert(key("p"), Value::Bool(pstat.target.is_some()));

    let mut root = Map::new();
    root.insert(key("dos"), Value::Map(dos));
    if let Some(target) = pstat.target {
        root.insert(key("tgt"), uint(target.code()));
    }
    root.insert(key("om"), uint(pstat.operation_mode.bits()));
    root.insert(key("rowneruuid"), text(&pstat.rowner.to_string()));
    root.insert(key("cmt"), Value::Bool(pstat.committed));
    root.insert(key("isop"), Value::Bool(pstat.is_operational()));
    Value::Map(root)
}

fn state(code: ParseResult<u64>, field: &str) -> ParseResult<DeviceState> {
    let code = code?;
    DeviceState::from_code(code)
        .ok_or_else(|| ParseError::new(field, format!("{code} is not a device state")))
}

fn mode(bits: ParseResult<u64>) -> ParseResult<OperationMode> {
    let bits = bits?;
    u16::try_from(bits)
        .ok()
        .and_then(OperationMode::from_bits)
        .ok_or_else(|| ParseError::new("om", format!("{bits:#x} has undefined bits")))
}
