// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SRM — Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod provisioning;
pub mod request;
pub mod result;
pub mod types;

pub use config::SrmConfig;
pub use error::{ParseError, SrmError};
pub use provisioning::{DeviceState, Operation, OperationMode, Pstat};
pub use request::{Method, Query, Request, Response};
pub use result::{CoapCode, ResultCode};
pub use types::*;
