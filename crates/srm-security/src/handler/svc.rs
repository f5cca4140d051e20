// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SVC entity handler. Same shape as the ACL handler; service records do not
// gate access, so there is no self-lockout rule.

use srm_core::error::{Result, SrmError};
use srm_core::provisioning::Operation;
use srm_core::request::{Method, Query, Request};
use srm_core::types::{ResourceKind, ServiceRecord, SvcList};
use tracing::info;

use super::require_body;
use crate::codec::{decode_svc, encode_svc};
use crate::store::SecurityStore;

pub(super) fn handle(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    match request.method {
        Method::Get => handle_get(store, &request.query),
        Method::Put => handle_put(store, request),
        Method::Post => handle_post(store, request),
        Method::Delete => handle_delete(store, &request.query),
    }
}

fn handle_get(store: &SecurityStore, query: &Query) -> Result<Option<Vec<u8>>> {
    let records = store
        .svc()
        .records()
        .iter()
        .filter(|r| selected(r, query))
        .cloned()
        .collect();
    let view = SvcList::from_records(records)?;
    encode_svc(&view).map(Some)
}

fn handle_put(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let incoming = require_body(decode_svc(&request.payload))?;
    store.transact(ResourceKind::Svc, |res| {
        res.pstat.require(Operation::SvcWrite)?;
        res.svc = incoming;
        Ok(())
    })?;
    info!(records = store.svc().records().len(), "SVC replaced");
    encode_svc(store.svc()).map(Some)
}

/// Upsert each record by (owner, service type).
fn handle_post(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let incoming = require_body(decode_svc(&request.payload))?;
    store.transact(ResourceKind::Svc, |res| {
        res.pstat.require(Operation::SvcWrite)?;
        for record in incoming.records() {
            res.svc.upsert(record.clone());
        }
        Ok(())
    })?;
    info!(records = store.svc().records().len(), "SVC records merged");
    encode_svc(store.svc()).map(Some)
}

fn handle_delete(store: &mut SecurityStore, query: &Query) -> Result<Option<Vec<u8>>> {
    if query.owner.is_none() && query.service_type.is_none() {
        return Err(SrmError::InvalidQuery(
            "SVC DELETE needs an `ownr` or `svct` selector".into(),
        ));
    }
    let removed = store.transact(ResourceKind::Svc, |res| {
        res.pstat.require(Operation::SvcDelete)?;
        Ok(res.svc.remove_where(|r| selected(r, query)))
    })?;
    info!(removed, "SVC records deleted");
    Ok(None)
}

fn selected(record: &ServiceRecord, query: &Query) -> bool {
    query.owner.is_none_or(|o| record.owner == o)
        && query.service_type.is_none_or(|t| record.service_type == t)
}
