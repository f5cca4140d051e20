// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PSTAT entity handler: device state transitions and operation-mode
// narrowing.
//
// A transition is all-or-nothing.  Its side effects are staged together with
// the new state and committed as one generation; if the commit fails the
// device stays where it was, with `tgt` recording the requested state and
// `cmt` false until the whole transition is retried.

use srm_core::error::{Result, SrmError};
use srm_core::provisioning::DeviceState;
use srm_core::request::{Method, Request};
use srm_core::result::ResultCode;
use srm_core::types::ResourceKind;
use tracing::{info, warn};

use crate::codec::{PstatUpdate, decode_pstat_update, encode_pstat};
use crate::store::SecurityStore;

pub(super) fn handle(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    match request.method {
        Method::Get => encode_pstat(store.pstat()).map(Some),
        Method::Post | Method::Put => handle_update(store, request),
        Method::Delete => Err(SrmError::PolicyViolation(
            "PSTAT cannot be deleted; request a transition to RESET instead".into(),
        )),
    }
}

fn handle_update(store: &mut SecurityStore, request: &Request) -> Result<Option<Vec<u8>>> {
    let update = decode_pstat_update(&request.payload)?;
    let current = store.pstat().state;
    if let Some(target) = update.target {
        store.pstat().check_transition(target)?;
    }

    let state = update.target.unwrap_or(current);
    let legal = state.legal_modes(store.allows_default_acl_override_in_rfnop());
    if let Some(om) = update.operation_mode {
        if !legal.contains(om) {
            return Err(SrmError::InvalidPolicy(format!(
                "operation mode {om:?} exceeds what {state} allows"
            )));
        }
        // Without a transition the mode can only shrink; re-entering a state
        // restores its full legal set.
        if update.target.is_none() && !store.pstat().operation_mode.contains(om) {
            return Err(SrmError::InvalidPolicy(format!(
                "operation mode {om:?} would widen {:?}",
                store.pstat().operation_mode
            )));
        }
    }

    match (update.target, update.operation_mode) {
        (Some(target), _) => transition(store, target, update)?,
        (None, Some(om)) => {
            store.transact(ResourceKind::Pstat, |res| {
                res.pstat.operation_mode = om;
                Ok(())
            })?;
            info!(om = ?store.pstat().operation_mode, "operation mode narrowed");
        }
        (None, None) => {}
    }
    encode_pstat(store.pstat()).map(Some)
}

fn transition(store: &mut SecurityStore, target: DeviceState, update: PstatUpdate) -> Result<()> {
    let from = store.pstat().state;
    let legal = target.legal_modes(store.allows_default_acl_override_in_rfnop());

    let outcome = if target == DeviceState::Reset {
        store.reset()
    } else {
        store.transact(ResourceKind::Pstat, |res| {
            if res.pstat.rowner.is_nil() {
                res.pstat.rowner = res.acl.rowner;
            }
            res.pstat.enter(target, update.operation_mode.unwrap_or(legal));
            Ok(())
        })
    };

    match outcome {
        Ok(()) => {
            info!(%from, to = %target, om = ?store.pstat().operation_mode, "device state transition committed");
            Ok(())
        }
        Err(e) => {
            if ResultCode::from(&e) == ResultCode::InternalError {
                warn!(%from, to = %target, error = %e, "transition not committed; retry required");
                store.mark_transition_failed(target);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_pstat;
    use crate::default_acl::generate_default_acl;
    use crate::handler::{dispatch, dispatch_local};
    use crate::persistence::MemoryStorage;
    use crate::store::LoadOutcome;
    use serde_cbor::Value;
    use srm_core::config::SrmConfig;
    use srm_core::provisioning::{OperationMode, Pstat};
    use srm_core::request::Response;
    use srm_core::types::{Ace, Acl, Permission, ResourceMatcher, Subject};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn body(target: Option<DeviceState>, om: Option<OperationMode>) -> Vec<u8> {
        let mut root = BTreeMap::new();
        if let Some(target) = target {
            let mut dos = BTreeMap::new();
            dos.insert(Value::Text("s".into()), Value::Integer(target.code().into()));
            root.insert(Value::Text("dos".into()), Value::Map(dos));
        }
        if let Some(om) = om {
            root.insert(Value::Text("om".into()), Value::Integer(om.bits().into()));
        }
        serde_cbor::to_vec(&Value::Map(root)).unwrap()
    }

    fn post(store: &mut SecurityStore, target: Option<DeviceState>, om: Option<OperationMode>) -> Response {
        let request = Request::new(Method::Post, Subject::Anyone).with_payload(body(target, om));
        dispatch(store, ResourceKind::Pstat, &request)
    }

    fn walk_to(store: &mut SecurityStore, state: DeviceState) {
        let mut current = store.pstat().state;
        while current != state {
            let next = current.successor().unwrap();
            let request = Request::new(Method::Post, Subject::Anyone).with_payload(body(Some(next), None));
            assert!(dispatch_local(store, ResourceKind::Pstat, &request).result.is_ok());
            current = next;
        }
    }

    fn fresh() -> SecurityStore {
        let mut store = SecurityStore::new(&SrmConfig::default(), None);
        store.load();
        store
    }

    #[test]
    fn full_chain_sets_legal_modes() {
        let mut store = fresh();
        for state in [
            DeviceState::ReadyForOwnershipTransfer,
            DeviceState::ReadyForProvisioning,
            DeviceState::ReadyForNormalOperation,
        ] {
            let response = post(&mut store, Some(state), None);
            assert_eq!(response.result, ResultCode::Ok);
            let pstat = decode_pstat(&response.payload.unwrap()).unwrap().unwrap();
            assert_eq!(pstat.state, state);
            assert_eq!(pstat.operation_mode, state.legal_modes(false));
            assert!(pstat.committed);
            assert_eq!(pstat.target, None);
        }
        assert!(store.pstat().is_operational());
        assert!(!store.pstat().operation_mode.contains(OperationMode::ACL_REPLACE));
    }

    #[test]
    fn skipping_ahead_is_illegal_and_changes_nothing() {
        let mut store = fresh();
        walk_to(&mut store, DeviceState::ReadyForNormalOperation);
        let before = store.pstat().clone();
        let response = post(&mut store, Some(DeviceState::ReadyForOwnershipTransfer), None);
        assert_eq!(response.result, ResultCode::IllegalTransition);
        assert_eq!(*store.pstat(), before);

        let mut store = fresh();
        let response = post(&mut store, Some(DeviceState::ReadyForProvisioning), None);
        assert_eq!(response.result, ResultCode::IllegalTransition);
        assert_eq!(store.pstat().state, DeviceState::Reset);
    }

    #[test]
    fn reset_from_any_state_restores_defaults() {
        let mut store = fresh();
        walk_to(&mut store, DeviceState::ReadyForProvisioning);
        let response = post(&mut store, Some(DeviceState::Reset), None);
        assert_eq!(response.result, ResultCode::Ok);
        assert_eq!(*store.pstat(), Pstat::default());
        assert_eq!(*store.acl(), generate_default_acl());
        assert!(store.svc().is_empty());
    }

    #[test]
    fn operation_mode_can_only_narrow() {
        let mut store = fresh();
        walk_to(&mut store, DeviceState::ReadyForProvisioning);

        let narrowed = post(&mut store, None, Some(OperationMode::ACL_APPEND | OperationMode::SVC_WRITE));
        assert_eq!(narrowed.result, ResultCode::Ok);
        let further = post(&mut store, None, Some(OperationMode::ACL_APPEND));
        assert_eq!(further.result, ResultCode::Ok);
        assert_eq!(store.pstat().operation_mode, OperationMode::ACL_APPEND);

        // Legal in RFPRO, but wider than the narrowed mode.
        let rewiden = post(&mut store, None, Some(OperationMode::ACL_APPEND | OperationMode::ACL_REPLACE));
        assert_eq!(rewiden.result, ResultCode::InvalidPolicy);
        assert_eq!(store.pstat().operation_mode, OperationMode::ACL_APPEND);

        let mut normal = fresh();
        walk_to(&mut normal, DeviceState::ReadyForNormalOperation);
        let widened = post(&mut normal, None, Some(OperationMode::ACL_REPLACE));
        assert_eq!(widened.result, ResultCode::InvalidPolicy);
        assert_eq!(normal.pstat().operation_mode, DeviceState::ReadyForNormalOperation.legal_modes(false));
    }

    #[test]
    fn stranger_cannot_reset_an_owned_device() {
        let mut store = fresh();
        walk_to(&mut store, DeviceState::ReadyForProvisioning);
        let owner = Uuid::new_v4();
        store
            .transact(ResourceKind::Acl, |res| {
                let admin = Ace::new(Subject::Uuid(owner), vec![ResourceMatcher::any()], Permission::CRUD, None)?;
                res.acl = Acl::new(vec![admin], owner);
                Ok(())
            })
            .unwrap();
        walk_to(&mut store, DeviceState::ReadyForNormalOperation);
        let before = store.resources().clone();

        let reset = Request::new(Method::Post, Subject::Anyone).with_payload(body(Some(DeviceState::Reset), None));
        assert_eq!(dispatch(&mut store, ResourceKind::Pstat, &reset).result, ResultCode::PolicyViolation);
        assert_eq!(*store.resources(), before);

        let by_owner = Request::new(Method::Post, Subject::Uuid(owner)).with_payload(body(Some(DeviceState::Reset), None));
        assert_eq!(dispatch(&mut store, ResourceKind::Pstat, &by_owner).result, ResultCode::Ok);
        assert_eq!(store.pstat().state, DeviceState::Reset);
        assert!(!store.acl().is_owned());
    }

    #[test]
    fn failed_commit_leaves_transition_pending() {
        let storage = MemoryStorage::new();
        let mut store = SecurityStore::new(&SrmConfig::default(), Some(Box::new(storage.clone())));
        assert_eq!(store.load(), LoadOutcome::Absent);
        walk_to(&mut store, DeviceState::ReadyForOwnershipTransfer);

        storage.set_fail_writes(true);
        let response = post(&mut store, Some(DeviceState::ReadyForProvisioning), None);
        assert_eq!(response.result, ResultCode::InternalError);
        let pstat = store.pstat();
        assert_eq!(pstat.state, DeviceState::ReadyForOwnershipTransfer);
        assert_eq!(pstat.target, Some(DeviceState::ReadyForProvisioning));
        assert!(!pstat.committed);
        assert_eq!(pstat.operation_mode, OperationMode::ACL_APPEND);

        storage.set_fail_writes(false);
        let retry = post(&mut store, Some(DeviceState::ReadyForProvisioning), None);
        assert_eq!(retry.result, ResultCode::Ok);
        assert!(store.pstat().committed);
        assert_eq!(store.pstat().target, None);
    }

    #[test]
    fn delete_and_empty_bodies_are_rejected() {
        let mut store = fresh();
        let delete = Request::new(Method::Delete, Subject::Anyone);
        assert_eq!(dispatch(&mut store, ResourceKind::Pstat, &delete).result, ResultCode::PolicyViolation);
        let empty = Request::new(Method::Post, Subject::Anyone);
        assert_eq!(dispatch(&mut store, ResourceKind::Pstat, &empty).result, ResultCode::InvalidPayload);
    }
}
