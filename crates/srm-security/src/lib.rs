// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// srm-security — the Security Resource Manager engine.
//
// CBOR codec for the ACL, SVC and PSTAT resources, the compiled-in default
// ACL, integrity-framed dual-slot persistence, the resource store, the entity
// handlers and the `SecurityContext` the request dispatcher owns.

pub mod access;
pub mod codec;
pub mod context;
pub mod default_acl;
pub mod handler;
pub mod integrity;
pub mod persistence;
pub mod store;

pub use context::SecurityContext;
pub use default_acl::{generate_default_acl, validate_default_acl};
pub use persistence::{FileStorage, MemoryStorage, PersistentStorage};
pub use store::{LoadOutcome, Resources, SecurityStore};
