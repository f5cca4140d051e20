// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the Security Resource Manager.

use std::fmt;

use thiserror::Error;

use crate::provisioning::{DeviceState, Operation};

/// A payload that could not be turned into a security resource.
///
/// `field` is the dotted path of the element that failed
/// (e.g. `aclist.aces[1].resources`); `<root>` when the buffer itself is
/// not valid CBOR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub field: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The root element, used when the buffer cannot be decoded at all.
    pub fn root(reason: impl Into<String>) -> Self {
        Self::new("<root>", reason)
    }

    /// Prefix the field path with `parent`.
    pub fn within(mut self, parent: &str) -> Self {
        self.field = if self.field == "<root>" {
            parent.to_owned()
        } else if self.field.starts_with('[') {
            format!("{parent}{}", self.field)
        } else {
            format!("{parent}.{}", self.field)
        };
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.field, self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Top-level error type for all SRM operations.
#[derive(Debug, Error)]
pub enum SrmError {
    // -- Malformed input --
    #[error("invalid payload at {0}")]
    InvalidPayload(#[from] ParseError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // -- Policy --
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("{operation} is not permitted while the device is in {state}")]
    NotPermittedInCurrentState {
        operation: Operation,
        state: DeviceState,
    },

    #[error("illegal provisioning transition {from} -> {to}")]
    IllegalTransition { from: DeviceState, to: DeviceState },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    // -- Storage / persistence --
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SrmError>;
