// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Entity handlers for the ACL, SVC and PSTAT resources.
//
// Each handler runs with the store already locked by the caller, so the PSTAT
// gate, the mutation and the commit form one critical section.

mod acl;
mod pstat;
mod svc;

use chrono::Utc;
use srm_core::error::{ParseError, Result, SrmError};
use srm_core::request::{Request, Response};
use srm_core::result::ResultCode;
use srm_core::types::ResourceKind;
use tracing::{debug, instrument, warn};

use crate::access::authorize;
use crate::store::SecurityStore;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route a peer's request to the handler for `kind` and collapse the outcome
/// into a dispatcher response.
///
/// Once the device is owned, a mutating request must come from the rowner or
/// be granted by the ACL on the resource's own href.
#[instrument(skip_all, fields(resource = %kind, method = %request.method, requester = %request.requester))]
pub fn dispatch(store: &mut SecurityStore, kind: ResourceKind, request: &Request) -> Response {
    let outcome = check_requester(store, kind, request).and_then(|()| route(store, kind, request));
    report(outcome)
}

/// Serve a request raised by the device itself, which needs no ACL grant.
#[instrument(skip_all, fields(resource = %kind, method = %request.method, local = true))]
pub fn dispatch_local(store: &mut SecurityStore, kind: ResourceKind, request: &Request) -> Response {
    report(route(store, kind, request))
}

fn check_requester(store: &mut SecurityStore, kind: ResourceKind, request: &Request) -> Result<()> {
    let acl = store.acl();
    if !request.method.is_mutating() || !acl.is_owned() || acl.is_rowner(&request.requester) {
        return Ok(());
    }
    let permission = request.method.permission();
    if authorize(store, &request.requester, kind.href(), permission, Utc::now())? {
        return Ok(());
    }
    Err(SrmError::PolicyViolation(format!(
        "{} is not allowed to {} {}",
        request.requester,
        request.method,
        kind.href()
    )))
}

fn route(store: &mut SecurityStore, kind: ResourceKind, request: &Request) -> Result<Option<Vec<u8>>> {
    match kind {
        ResourceKind::Acl => acl::handle(store, request),
        ResourceKind::Svc => svc::handle(store, request),
        ResourceKind::Pstat => pstat::handle(store, request),
    }
}

fn report(outcome: Result<Option<Vec<u8>>>) -> Response {
    match &outcome {
        Ok(_) => debug!("request served"),
        Err(e) => match ResultCode::from(e) {
            ResultCode::PolicyViolation | ResultCode::InternalError => {
                warn!(error = %e, "request rejected")
            }
            code => debug!(error = %e, %code, "request rejected"),
        },
    }
    Response::from(outcome)
}

/// A mutating request must carry a body.
fn require_body<T>(decoded: std::result::Result<Option<T>, ParseError>) -> Result<T> {
    decoded?.ok_or_else(|| SrmError::InvalidPayload(ParseError::root("request body is empty")))
}
