// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Outcome codes handed back to the request dispatcher.
//
// Every `SrmError` collapses into one of seven outcomes; the transport layer
// maps those onto protocol status codes (see `ResultCode::coap_status`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SrmError;
use crate::request::Method;

/// Enumerated outcome of an entity-handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    InvalidPayload,
    InvalidPolicy,
    NotPermittedInCurrentState,
    IllegalTransition,
    PolicyViolation,
    InternalError,
}

impl ResultCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// CoAP response code for this outcome on a request of kind `method`.
    pub fn coap_status(&self, method: Method) -> CoapCode {
        match self {
            Self::Ok => match method {
                Method::Get => CoapCode::CONTENT,
                Method::Put | Method::Post => CoapCode::CHANGED,
                Method::Delete => CoapCode::DELETED,
            },
            Self::InvalidPayload => CoapCode::BAD_REQUEST,
            Self::NotPermittedInCurrentState | Self::PolicyViolation => CoapCode::FORBIDDEN,
            Self::InvalidPolicy | Self::IllegalTransition => CoapCode::NOT_ACCEPTABLE,
            Self::InternalError => CoapCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&SrmError> for ResultCode {
    fn from(err: &SrmError) -> Self {
        match err {
            SrmError::InvalidPayload(_) | SrmError::InvalidQuery(_) => Self::InvalidPayload,
            SrmError::InvalidPolicy(_) => Self::InvalidPolicy,
            SrmError::NotPermittedInCurrentState { .. } => Self::NotPermittedInCurrentState,
            SrmError::IllegalTransition { .. } => Self::IllegalTransition,
            SrmError::PolicyViolation(_) => Self::PolicyViolation,
            SrmError::Persistence(_)
            | SrmError::Io(_)
            | SrmError::Serialization(_)
            | SrmError::Internal(_) => Self::InternalError,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::InvalidPayload => "invalid payload",
            Self::InvalidPolicy => "invalid policy",
            Self::NotPermittedInCurrentState => "not permitted in current state",
            Self::IllegalTransition => "illegal transition",
            Self::PolicyViolation => "policy violation",
            Self::InternalError => "internal error",
        };
        f.write_str(name)
    }
}

/// A CoAP response code, `class.detail` (RFC 7252 §12.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoapCode {
    pub class: u8,
    pub detail: u8,
}

impl CoapCode {
    pub const DELETED: Self = Self::new(2, 2);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const FORBIDDEN: Self = Self::new(4, 3);
    pub const NOT_ACCEPTABLE: Self = Self::new(4, 6);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// Single-byte wire form: 3-bit class, 5-bit detail.
    pub fn to_byte(&self) -> u8 {
        (self.class << 5) | (self.detail & 0x1f)
    }
}

impl fmt::Display for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}
