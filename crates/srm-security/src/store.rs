// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security Resource Store: the single authoritative copy of ACL, SVC and
// PSTAT, and its persisted mirror.
//
// The persisted set lives in two slots, `<blob>.a` and `<blob>.b`.  A commit
// always writes the slot not holding the newest durable generation, so a torn
// write can only ever damage the older copy.  `load` picks the newest slot
// that passes the integrity check and decodes cleanly.
//
// Mutations are staged on a copy of the resources and only published to
// memory once the write is durable; a failed commit leaves memory exactly as
// it was before the request.

use serde::Serialize;
use serde_cbor::Value;
use srm_core::config::SrmConfig;
use srm_core::error::{ParseError, Result, SrmError};
use srm_core::provisioning::{DeviceState, Operation, Pstat};
use srm_core::types::{Acl, ResourceKind, SvcList};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{
    Fields, Map, acl_from_value, acl_to_value, key, pstat_from_value, pstat_to_value,
    svc_from_value, svc_to_value, to_bytes,
};
use crate::default_acl::{generate_default_acl, validate_default_acl};
use crate::integrity::{hash_hex, seal, unseal};
use crate::persistence::{PersistentStorage, read_blob, write_blob};

/// The three security resources, always handled as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub acl: Acl,
    pub svc: SvcList,
    pub pstat: Pstat,
}

impl Resources {
    /// First-boot / post-reset contents.
    pub fn factory(default_acl: Acl) -> Self {
        Self {
            acl: default_acl,
            svc: SvcList::default(),
            pstat: Pstat::default(),
        }
    }
}

/// What `load` found on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A valid slot was restored.
    Restored { generation: u64 },
    /// Nothing persisted yet; defaults in use.
    Absent,
    /// Persisted data exists but none of it could be trusted; defaults in use.
    Corrupt { reason: String },
}

impl LoadOutcome {
    /// Whether the store fell back to defaults.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Restored { .. })
    }
}

pub struct SecurityStore {
    resources: Resources,
    default_acl: Acl,
    /// `None` keeps everything in memory.
    storage: Option<Box<dyn PersistentStorage>>,
    blob_name: String,
    /// Generation of the newest durable slot (0 = nothing written yet).
    generation: u64,
    /// In-memory state not yet mirrored to storage.
    dirty: bool,
    allow_default_acl_override_in_rfnop: bool,
}

impl SecurityStore {
    /// A store holding factory defaults; call `load` to restore persisted state.
    pub fn new(config: &SrmConfig, storage: Option<Box<dyn PersistentStorage>>) -> Self {
        let default_acl = generate_default_acl();
        Self {
            resources: Resources::factory(default_acl.clone()),
            default_acl,
            storage,
            blob_name: config.blob_name.clone(),
            generation: 0,
            dirty: true,
            allow_default_acl_override_in_rfnop: config.allow_default_acl_override_in_rfnop,
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn acl(&self) -> &Acl {
        &self.resources.acl
    }

    pub fn svc(&self) -> &SvcList {
        &self.resources.svc
    }

    pub fn pstat(&self) -> &Pstat {
        &self.resources.pstat
    }

    pub fn default_acl(&self) -> &Acl {
        &self.default_acl
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn allows_default_acl_override_in_rfnop(&self) -> bool {
        self.allow_default_acl_override_in_rfnop
    }

    fn slot_name(&self, generation: u64) -> String {
        let suffix = if generation % 2 == 0 { 'a' } else { 'b' };
        format!("{}.{suffix}", self.blob_name)
    }

    /// Restore persisted state, falling back to defaults when it is missing or
    /// cannot be trusted.
    #[instrument(skip_all, fields(blob = %self.blob_name))]
    pub fn load(&mut self) -> LoadOutcome {
        let (outcome, restored) = match &self.storage {
            None => (LoadOutcome::Absent, None),
            Some(storage) => self.load_slots(storage.as_ref()),
        };
        if let Some(resources) = restored {
            self.resources = resources;
        }

        match &outcome {
            LoadOutcome::Restored { generation } => {
                info!(generation, state = %self.resources.pstat.state, "security resources restored");
                self.generation = *generation;
                self.dirty = false;
            }
            LoadOutcome::Absent => {
                warn!("degraded boot: no persisted security resources, using default ACL and RESET");
                self.fall_back();
            }
            LoadOutcome::Corrupt { reason } => {
                error!(%reason, "degraded boot: persisted security resources unusable, using default ACL and RESET");
                self.fall_back();
            }
        }
        outcome
    }

    fn fall_back(&mut self) {
        self.resources = Resources::factory(self.default_acl.clone());
        self.dirty = true;
    }

    fn load_slots(&self, storage: &dyn PersistentStorage) -> (LoadOutcome, Option<Resources>) {
        let mut best: Option<(u64, Resources)> = None;
        let mut problems = Vec::new();
        let mut seen_any = false;

        for slot in [self.slot_name(0), self.slot_name(1)] {
            let bytes = match read_blob(storage, &slot) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    seen_any = true;
                    problems.push(format!("{slot}: read failed: {e}"));
                    continue;
                }
            };
            seen_any = true;

            let sealed = match unseal(&bytes) {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!(%slot, error = %e, "ignoring damaged slot");
                    problems.push(format!("{slot}: {e}"));
                    continue;
                }
            };
            match self.decode_resource_set(sealed.payload) {
                Ok(resources) => {
                    debug!(%slot, generation = sealed.generation, "slot verified");
                    if best.as_ref().is_none_or(|(g, _)| sealed.generation > *g) {
                        best = Some((sealed.generation, resources));
                    }
                }
                Err(e) => {
                    warn!(%slot, error = %e, "ignoring undecodable slot");
                    problems.push(format!("{slot}: {e}"));
                }
            }
        }

        match best {
            Some((generation, resources)) => (LoadOutcome::Restored { generation }, Some(resources)),
            None if seen_any => (
                LoadOutcome::Corrupt {
                    reason: problems.join("; "),
                },
                None,
            ),
            None => (LoadOutcome::Absent, None),
        }
    }

    /// Stage a mutation, persist it, then publish it.
    ///
    /// `apply` runs on a copy; if it or the commit fails, the in-memory
    /// resources are untouched.
    pub fn transact<T>(
        &mut self,
        kind: ResourceKind,
        apply: impl FnOnce(&mut Resources) -> Result<T>,
    ) -> Result<T> {
        let mut staged = self.resources.clone();
        let out = apply(&mut staged)?;
        if staged == self.resources && !self.dirty {
            debug!(%kind, "no change to commit");
            return Ok(out);
        }
        self.persist(kind, &staged)?;
        self.resources = staged;
        Ok(out)
    }

    /// Persist the current in-memory copy.
    pub fn commit(&mut self, kind: ResourceKind) -> Result<()> {
        let snapshot = self.resources.clone();
        self.persist(kind, &snapshot)
    }

    fn persist(&mut self, kind: ResourceKind, staged: &Resources) -> Result<()> {
        let generation = self.generation + 1;
        if let Some(storage) = &self.storage {
            let payload = encode_resource_set(staged)?;
            let slot = self.slot_name(generation);
            write_blob(storage.as_ref(), &slot, &seal(generation, &payload)).map_err(|e| {
                error!(%kind, %slot, error = %e, "commit failed, keeping previous durable copy");
                SrmError::Persistence(format!("writing {slot}: {e}"))
            })?;
            info!(%kind, generation, digest = %hash_hex(&payload), "security resources committed");
        }
        self.generation = generation;
        self.dirty = false;
        Ok(())
    }

    /// Re-seed all three resources to factory state and drop the stale slot.
    #[instrument(skip_all)]
    pub fn reset(&mut self) -> Result<()> {
        let fresh = Resources::factory(self.default_acl.clone());
        self.persist(ResourceKind::Pstat, &fresh)?;
        self.resources = fresh;

        let stale = self.slot_name(self.generation + 1);
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.unlink(&stale) {
                warn!(slot = %stale, error = %e, "could not remove pre-reset slot");
            }
        }
        info!("device reset to factory security resources");
        Ok(())
    }

    /// Record a transition toward `target` that could not be committed.
    pub fn mark_transition_failed(&mut self, target: DeviceState) {
        self.resources.pstat.mark_pending(target);
        self.dirty = true;
    }

    /// Override the default ACL used for fallback and reset.
    pub fn set_default_acl(&mut self, acl: Acl) -> Result<()> {
        self.resources.pstat.require(Operation::DefaultAclOverride)?;
        validate_default_acl(&acl)?;
        info!(aces = acl.aces.len(), "default ACL overridden");
        self.default_acl = acl;
        Ok(())
    }

    fn decode_resource_set(&self, payload: &[u8]) -> std::result::Result<Resources, ParseError> {
        let value: Value = serde_cbor::from_slice(payload)
            .map_err(|e| ParseError::root(format!("malformed CBOR: {e}")))?;
        let fields = Fields::of(&value)?;
        let acl = acl_from_value(fields.required("acl")?).map_err(|e| e.within("acl"))?;
        let svc = svc_from_value(fields.required("svc")?).map_err(|e| e.within("svc"))?;
        let mut pstat = pstat_from_value(fields.required("pstat")?).map_err(|e| e.within("pstat"))?;

        let legal = pstat
            .state
            .legal_modes(self.allow_default_acl_override_in_rfnop);
        if !legal.contains(pstat.operation_mode) {
            warn!(om = ?pstat.operation_mode, "narrowing persisted operation mode to current policy");
            pstat.operation_mode &= legal;
        }
        Ok(Resources { acl, svc, pstat })
    }
}

fn encode_resource_set(resources: &Resources) -> Result<Vec<u8>> {
    let mut root = Map::new();
    root.insert(key("acl"), acl_to_value(&resources.acl));
    root.insert(key("svc"), svc_to_value(&resources.svc));
    root.insert(key("pstat"), pstat_to_value(&resources.pstat));
    to_bytes(&Value::Map(root))
}
