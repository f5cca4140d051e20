// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ACL entity handler.

use srm_core::error::{Result, SrmError};
use srm_core::provisioning::Operation;
use srm_core::request::{Method, Query, Request};
use srm_core::types::{Ace, Acl, ResourceKind, Subject};
use tracing::info;

use super::require_body;
use crate::codec::{decode_acl, decode_aces, encode_acl};
use crate::store::SecurityStore;

pub(super) fn handle(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    match request.method {
        Method::Get => handle_get(store, request),
        Method::Put => handle_put(store, request),
        Method::Post => handle_post(store, request),
        Method::Delete => handle_delete(store, request),
    }
}

/// Current ACL, limited to what the requester may see and to the query.
fn handle_get(store: &SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let acl = store.acl();
    let full_view = !acl.is_owned() || acl.is_rowner(&request.requester);
    let aces = acl
        .aces
        .iter()
        .filter(|ace| {
            full_view || *ace.subject() == request.requester || *ace.subject() == Subject::Anyone
        })
        .filter(|ace| selected(ace, &request.query))
        .cloned()
        .collect();
    let view = Acl {
        aces,
        rowner: acl.rowner,
        rowner_cred: acl.rowner_cred,
    };
    encode_acl(&view).map(Some)
}

/// Replace the whole list.
///
/// Once owned, only the rowner may do this, and the replacement must keep the
/// same rowner.  An owned replacement must carry at least one ACE for its
/// rowner.
fn handle_put(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let incoming = require_body(decode_acl(&request.payload))?;
    store.transact(ResourceKind::Acl, |res| {
        res.pstat.require(Operation::AclReplace)?;
        if res.acl.is_owned() {
            if !res.acl.is_rowner(&request.requester) {
                return Err(SrmError::PolicyViolation(format!(
                    "{} is not the resource owner",
                    request.requester
                )));
            }
            if incoming.rowner != res.acl.rowner {
                return Err(SrmError::PolicyViolation(
                    "ACL replacement may not change the resource owner".into(),
                ));
            }
        }
        if incoming.is_owned() && incoming.rowner_aces().next().is_none() {
            return Err(SrmError::PolicyViolation(
                "replacement ACL has no entry for its resource owner".into(),
            ));
        }
        res.acl = incoming;
        Ok(())
    })?;
    info!(aces = store.acl().aces.len(), rowner = %store.acl().rowner, "ACL replaced");
    encode_acl(store.acl()).map(Some)
}

/// Merge ACEs by subject + resource set.
fn handle_post(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let incoming = require_body(decode_aces(&request.payload))?;
    let count = incoming.len();
    store.transact(ResourceKind::Acl, |res| {
        res.pstat.require(Operation::AclAppend)?;
        res.acl.merge(incoming);
        Ok(())
    })?;
    info!(merged = count, total = store.acl().aces.len(), "ACEs merged");
    encode_acl(store.acl()).map(Some)
}

/// Remove the ACEs selected by `subjectuuid` and/or `href`.
fn handle_delete(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let query = &request.query;
    if query.subject.is_none() && query.href.is_none() {
        return Err(SrmError::InvalidQuery(
            "ACL DELETE needs a `subjectuuid` or `href` selector".into(),
        ));
    }

    let removed = store.transact(ResourceKind::Acl, |res| {
        res.pstat.require(Operation::AclDelete)?;
        if res.acl.rowner_aces().any(|ace| selected(ace, query)) {
            return Err(SrmError::PolicyViolation(
                "refusing to remove the resource owner's own access".into(),
            ));
        }
        let before = res.acl.aces.len();
        res.acl.aces.retain(|ace| !selected(ace, query));
        if res.acl.aces.is_empty() {
            return Err(SrmError::PolicyViolation(
                "refusing to leave the ACL without entries".into(),
            ));
        }
        Ok(before - res.acl.aces.len())
    })?;
    info!(removed, "ACEs deleted");
    Ok(None)
}

fn selected(ace: &Ace, query: &Query) -> bool {
    query.subject.as_ref().is_none_or(|s| ace.subject() == s)
        && query.href.as_deref().is_none_or(|h| ace.covers_href(h))
}
