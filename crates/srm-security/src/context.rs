// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device-wide security context, owned by the request dispatcher and handed
// to every entity-handler call.
//
// All state lives in one `SecurityStore` behind one lock.  Every public
// operation takes the lock for its whole read-decide-write sequence, so a
// PSTAT transition is observed atomically by concurrent ACL/SVC requests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use srm_core::config::SrmConfig;
use srm_core::error::Result;
use srm_core::provisioning::{DeviceState, Operation, OperationMode, Pstat};
use srm_core::request::{Method, Request, Response};
use srm_core::types::{Acl, Permission, ResourceKind, Subject};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::access::authorize;
use crate::codec::{PstatUpdate, encode_pstat_update};
use crate::handler::{dispatch, dispatch_local};
use crate::persistence::{FileStorage, PersistentStorage};
use crate::store::{LoadOutcome, Resources, SecurityStore};

pub struct SecurityContext {
    device_id: Uuid,
    store: Mutex<SecurityStore>,
}

impl SecurityContext {
    /// Bring the SRM up against `config.storage_dir` (or in memory when
    /// `config.persist` is off).
    ///
    /// A missing or corrupt blob is not an error: the device boots with the
    /// default ACL and the outcome says so.
    pub fn bring_up(config: &SrmConfig) -> Result<(Self, LoadOutcome)> {
        let storage: Option<Box<dyn PersistentStorage>> = if config.persist {
            Some(Box::new(FileStorage::open(&config.storage_dir)?))
        } else {
            None
        };
        Ok(Self::with_storage(config, storage))
    }

    /// Bring the SRM up against a caller-supplied persistence collaborator.
    #[instrument(skip_all, fields(device = %config.device_id))]
    pub fn with_storage(
        config: &SrmConfig,
        storage: Option<Box<dyn PersistentStorage>>,
    ) -> (Self, LoadOutcome) {
        let mut store = SecurityStore::new(config, storage);
        let outcome = store.load();
        if outcome.is_degraded() {
            // Persist the defaults now so the next boot is not degraded too.
            if let Err(e) = store.commit(ResourceKind::Acl) {
                warn!(error = %e, "could not persist default security resources");
            }
        }
        info!(state = %store.pstat().state, "security context up");
        let context = Self {
            device_id: config.device_id,
            store: Mutex::new(store),
        };
        (context, outcome)
    }

    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// Serve one peer request against `kind`.
    pub fn handle(&self, kind: ResourceKind, request: &Request) -> Response {
        let mut store = self.store.lock();
        dispatch(&mut store, kind, request)
    }

    fn handle_local(&self, kind: ResourceKind, request: &Request) -> Response {
        let mut store = self.store.lock();
        dispatch_local(&mut store, kind, request)
    }

    /// Ask PSTAT to move to `target` on behalf of the device itself.
    pub fn request_transition(&self, target: DeviceState) -> Result<Response> {
        let body = encode_pstat_update(&PstatUpdate {
            target: Some(target),
            operation_mode: None,
        })?;
        let request = Request::new(Method::Post, Subject::Uuid(self.device_id)).with_payload(body);
        Ok(self.handle_local(ResourceKind::Pstat, &request))
    }

    /// Narrow the current operation mode.
    pub fn narrow_operation_mode(&self, mode: OperationMode) -> Result<Response> {
        let body = encode_pstat_update(&PstatUpdate {
            target: None,
            operation_mode: Some(mode),
        })?;
        let request = Request::new(Method::Post, Subject::Uuid(self.device_id)).with_payload(body);
        Ok(self.handle_local(ResourceKind::Pstat, &request))
    }

    pub fn is_operation_permitted(&self, operation: Operation) -> bool {
        self.store.lock().pstat().is_operation_permitted(operation)
    }

    /// Whether `subject` may exercise `permission` on `href` at `now`.
    ///
    /// A grant from a count-limited ACE spends one of its uses.  If that
    /// cannot be recorded the request is denied.
    pub fn check_access(
        &self,
        subject: &Subject,
        href: &str,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> bool {
        let mut store = self.store.lock();
        authorize(&mut store, subject, href, permission, now).unwrap_or_else(|e| {
            warn!(%subject, href, error = %e, "denying access; use could not be recorded");
            false
        })
    }

    /// Replace the default ACL used after a reset or a degraded boot.
    pub fn set_default_acl(&self, acl: Acl) -> Result<()> {
        self.store.lock().set_default_acl(acl)
    }

    pub fn default_acl(&self) -> Acl {
        self.store.lock().default_acl().clone()
    }

    pub fn pstat(&self) -> Pstat {
        self.store.lock().pstat().clone()
    }

    /// A consistent copy of all three resources.
    pub fn snapshot(&self) -> Resources {
        self.store.lock().resources().clone()
    }

    /// Tear the context down, persisting anything not yet durable.
    pub fn shutdown(self) -> Result<()> {
        let mut store = self.store.into_inner();
        if store.is_dirty() {
            store.commit(ResourceKind::Pstat)?;
        }
        info!(generation = store.generation(), "security context shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_acl, encode_acl};
    use crate::default_acl::generate_default_acl;
    use crate::persistence::MemoryStorage;
    use srm_core::result::ResultCode;
    use srm_core::types::{ACL_HREF, Ace, ResourceMatcher, Validity};
    use std::sync::Arc;
    use std::thread;

    fn context_on(storage: &MemoryStorage) -> (SecurityContext, LoadOutcome) {
        SecurityContext::with_storage(&SrmConfig::default(), Some(Box::new(storage.clone())))
    }

    fn advance_to(context: &SecurityContext, state: DeviceState) {
        while context.pstat().state != state {
            let next = context.pstat().state.successor().unwrap();
            assert!(context.request_transition(next).unwrap().result.is_ok());
        }
    }

    fn light_ace(subject: Uuid) -> Ace {
        Ace::new(
            Subject::Uuid(subject),
            vec![ResourceMatcher::href("/light")],
            Permission::RETRIEVE | Permission::UPDATE,
            None,
        )
        .unwrap()
    }

    fn post_aces(aces: Vec<Ace>) -> Request {
        Request::new(Method::Post, Subject::Anyone).with_payload(encode_acl(&Acl::new(aces, Uuid::nil())).unwrap())
    }

    #[test]
    fn fresh_boot_uses_default_acl_in_reset() {
        let storage = MemoryStorage::new();
        let (context, outcome) = context_on(&storage);
        assert_eq!(outcome, LoadOutcome::Absent);
        assert_eq!(context.snapshot().acl, generate_default_acl());
        assert_eq!(context.pstat().state, DeviceState::Reset);
        // Defaults were persisted, so the next boot restores them.
        let (_, second) = context_on(&storage);
        assert_eq!(second, LoadOutcome::Restored { generation: 1 });
    }

    #[test]
    fn posted_ace_is_served_and_survives_reboot() {
        let storage = MemoryStorage::new();
        let (context, _) = context_on(&storage);
        advance_to(&context, DeviceState::ReadyForProvisioning);

        let ace = light_ace(Uuid::new_v4());
        let response = context.handle(ResourceKind::Acl, &post_aces(vec![ace.clone()]));
        assert_eq!(response.result, ResultCode::Ok);

        let get = context.handle(ResourceKind::Acl, &Request::get(Subject::Anyone));
        let served = decode_acl(&get.payload.unwrap()).unwrap().unwrap();
        assert!(served.aces.contains(&ace));

        let before = context.snapshot().acl;
        drop(context);
        let (rebooted, outcome) = context_on(&storage);
        assert!(matches!(outcome, LoadOutcome::Restored { .. }));
        assert_eq!(rebooted.snapshot().acl, before);
        assert_eq!(rebooted.pstat().state, DeviceState::ReadyForProvisioning);
    }

    #[test]
    fn normal_operation_cannot_jump_back_to_ownership_transfer() {
        let (context, _) = context_on(&MemoryStorage::new());
        advance_to(&context, DeviceState::ReadyForNormalOperation);
        let response = context
            .request_transition(DeviceState::ReadyForOwnershipTransfer)
            .unwrap();
        assert_eq!(response.result, ResultCode::IllegalTransition);
        assert_eq!(context.pstat().state, DeviceState::ReadyForNormalOperation);
    }

    #[test]
    fn write_failure_rolls_acl_back() {
        let storage = MemoryStorage::new();
        let (context, _) = context_on(&storage);
        advance_to(&context, DeviceState::ReadyForProvisioning);
        let before = context.snapshot().acl;

        storage.set_fail_writes(true);
        let response = context.handle(ResourceKind::Acl, &post_aces(vec![light_ace(Uuid::new_v4())]));
        assert_eq!(response.result, ResultCode::InternalError);
        assert_eq!(context.snapshot().acl, before);
    }

    #[test]
    fn access_follows_provisioned_acl() {
        let (context, _) = context_on(&MemoryStorage::new());
        let device = Uuid::new_v4();
        let now = Utc::now();
        assert!(!context.check_access(&Subject::Uuid(device), "/light", Permission::UPDATE, now));

        advance_to(&context, DeviceState::ReadyForProvisioning);
        context.handle(ResourceKind::Acl, &post_aces(vec![light_ace(device)]));
        assert!(context.check_access(&Subject::Uuid(device), "/light", Permission::UPDATE, now));
        assert!(!context.check_access(&Subject::Uuid(device), "/light", Permission::DELETE, now));
    }

    #[test]
    fn operation_gate_tracks_state() {
        let (context, _) = context_on(&MemoryStorage::new());
        assert!(!context.is_operation_permitted(Operation::AclAppend));
        advance_to(&context, DeviceState::ReadyForOwnershipTransfer);
        assert!(context.is_operation_permitted(Operation::AclAppend));
        assert!(!context.is_operation_permitted(Operation::AclReplace));
        advance_to(&context, DeviceState::ReadyForNormalOperation);
        assert!(!context.is_operation_permitted(Operation::AclReplace));
        assert!(!context.is_operation_permitted(Operation::DefaultAclOverride));

        let narrowed = context.narrow_operation_mode(OperationMode::SVC_WRITE).unwrap();
        assert_eq!(narrowed.result, ResultCode::Ok);
        assert!(!context.is_operation_permitted(Operation::AclAppend));
    }

    #[test]
    fn overridden_default_is_used_after_reset() {
        let (context, _) = context_on(&MemoryStorage::new());
        advance_to(&context, DeviceState::ReadyForProvisioning);
        let custom = Acl::new(vec![light_ace(Uuid::new_v4())], Uuid::nil());
        context.set_default_acl(custom.clone()).unwrap();

        assert!(context.request_transition(DeviceState::Reset).unwrap().result.is_ok());
        assert_eq!(context.snapshot().acl, custom);
        assert_eq!(context.default_acl(), custom);
    }

    #[test]
    fn concurrent_posts_are_serialised() {
        let (context, _) = context_on(&MemoryStorage::new());
        advance_to(&context, DeviceState::ReadyForProvisioning);
        let context = Arc::new(context);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let context = Arc::clone(&context);
                thread::spawn(move || {
                    for _ in 0..4 {
                        let response = context.handle(ResourceKind::Acl, &post_aces(vec![light_ace(Uuid::new_v4())]));
                        assert_eq!(response.result, ResultCode::Ok);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(context.snapshot().acl.aces.len(), generate_default_acl().aces.len() + 32);
    }

    #[test]
    fn shutdown_persists_pending_state() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        let (context, outcome) = context_on(&storage);
        assert_eq!(outcome, LoadOutcome::Absent);

        storage.set_fail_writes(false);
        context.shutdown().unwrap();
        let (_, outcome) = context_on(&storage);
        assert_eq!(outcome, LoadOutcome::Restored { generation: 1 });
    }

    #[test]
    fn memory_only_context_needs_no_storage() {
        let config = SrmConfig {
            persist: false,
            ..SrmConfig::default()
        };
        let (context, outcome) = SecurityContext::bring_up(&config).unwrap();
        assert_eq!(outcome, LoadOutcome::Absent);
        advance_to(&context, DeviceState::ReadyForOwnershipTransfer);
        context.shutdown().unwrap();
    }

    #[test]
    fn file_backed_bring_up_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = SrmConfig {
            storage_dir: dir.path().to_path_buf(),
            ..SrmConfig::default()
        };
        let (context, _) = SecurityContext::bring_up(&config).unwrap();
        advance_to(&context, DeviceState::ReadyForProvisioning);
        context.shutdown().unwrap();

        let (context, outcome) = SecurityContext::bring_up(&config).unwrap();
        assert!(matches!(outcome, LoadOutcome::Restored { .. }));
        assert_eq!(context.pstat().state, DeviceState::ReadyForProvisioning);
    }

    /// Owner claims the device with an owner-only ACL, then it goes live.
    fn owned_and_live(context: &SecurityContext, owner: Uuid) {
        advance_to(context, DeviceState::ReadyForProvisioning);
        let admin = Ace::new(Subject::Uuid(owner), vec![ResourceMatcher::any()], Permission::CRUD, None).unwrap();
        let put = Request::new(Method::Put, Subject::Uuid(owner))
            .with_payload(encode_acl(&Acl::new(vec![admin], owner)).unwrap());
        assert_eq!(context.handle(ResourceKind::Acl, &put).result, ResultCode::Ok);
        advance_to(context, DeviceState::ReadyForNormalOperation);
    }

    #[test]
    fn unauthenticated_peer_cannot_rewrite_an_owned_device() {
        let (context, _) = context_on(&MemoryStorage::new());
        let owner = Uuid::new_v4();
        owned_and_live(&context, owner);
        let before = context.snapshot();

        let everything = Ace::new(Subject::Anyone, vec![ResourceMatcher::any()], Permission::CRUD, None).unwrap();
        let grab = context.handle(ResourceKind::Acl, &post_aces(vec![everything]));
        assert_eq!(grab.result, ResultCode::PolicyViolation);
        assert!(!context.check_access(&Subject::Anyone, "/light", Permission::CRUD, Utc::now()));

        let body = encode_pstat_update(&PstatUpdate {
            target: Some(DeviceState::Reset),
            operation_mode: None,
        })
        .unwrap();
        let reset = Request::new(Method::Post, Subject::Anyone).with_payload(body);
        assert_eq!(context.handle(ResourceKind::Pstat, &reset).result, ResultCode::PolicyViolation);

        assert_eq!(context.snapshot(), before);
        assert_eq!(context.pstat().state, DeviceState::ReadyForNormalOperation);
    }

    #[test]
    fn peer_granted_on_the_acl_href_may_append() {
        let (context, _) = context_on(&MemoryStorage::new());
        let owner = Uuid::new_v4();
        let admin = Uuid::new_v4();
        owned_and_live(&context, owner);

        let delegated = Ace::new(Subject::Uuid(admin), vec![ResourceMatcher::href(ACL_HREF)], Permission::UPDATE, None)
            .unwrap();
        let by_owner = Request::new(Method::Post, Subject::Uuid(owner))
            .with_payload(encode_acl(&Acl::new(vec![delegated], Uuid::nil())).unwrap());
        assert_eq!(context.handle(ResourceKind::Acl, &by_owner).result, ResultCode::Ok);

        let by_admin = Request::new(Method::Post, Subject::Uuid(admin))
            .with_payload(encode_acl(&Acl::new(vec![light_ace(Uuid::new_v4())], Uuid::nil())).unwrap());
        assert_eq!(context.handle(ResourceKind::Acl, &by_admin).result, ResultCode::Ok);
        assert_eq!(context.snapshot().acl.aces.len(), 3);
    }

    #[test]
    fn count_limited_access_survives_reboot_spent() {
        let storage = MemoryStorage::new();
        let (context, _) = context_on(&storage);
        advance_to(&context, DeviceState::ReadyForProvisioning);
        let device = Uuid::new_v4();
        let once = Ace::new(
            Subject::Uuid(device),
            vec![ResourceMatcher::href("/light")],
            Permission::UPDATE,
            Some(Validity::Count(1)),
        )
        .unwrap();
        context.handle(ResourceKind::Acl, &post_aces(vec![once]));

        let subject = Subject::Uuid(device);
        let now = Utc::now();
        let granted = (0..5)
            .filter(|_| context.check_access(&subject, "/light", Permission::UPDATE, now))
            .count();
        assert_eq!(granted, 1);

        drop(context);
        let (rebooted, _) = context_on(&storage);
        assert!(!rebooted.check_access(&subject, "/light", Permission::UPDATE, now));
    }
}
