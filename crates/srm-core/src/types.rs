// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the ACL and SVC security resources.

use std::fmt;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// Stable resource URIs of the security resources themselves.
pub const ACL_HREF: &str = "/oic/sec/acl";
pub const SVC_HREF: &str = "/oic/sec/svc";
pub const PSTAT_HREF: &str = "/oic/sec/pstat";
pub const DOXM_HREF: &str = "/oic/sec/doxm";

/// Wildcard href / subject token used on the wire.
pub const WILDCARD: &str = "*";

/// The three resources this subsystem serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Acl,
    Svc,
    Pstat,
}

impl ResourceKind {
    /// Resource type tag (`rt`) advertised for the resource.
    pub fn resource_type(&self) -> &'static str {
        match self {
            Self::Acl => "oic.r.acl",
            Self::Svc => "oic.r.svc",
            Self::Pstat => "oic.r.pstat",
        }
    }

    pub fn href(&self) -> &'static str {
        match self {
            Self::Acl => ACL_HREF,
            Self::Svc => SVC_HREF,
            Self::Pstat => PSTAT_HREF,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_type())
    }
}

/// Who an ACE applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// A specific device or user, identified by UUID.
    Uuid(Uuid),
    /// A role asserted by a credential; `authority` scopes the role name.
    Role {
        role: String,
        authority: Option<String>,
    },
    /// Any requester, including unauthenticated ones.
    Anyone,
}

impl Subject {
    /// Whether this ACE subject covers `requester`.
    pub fn matches(&self, requester: &Subject) -> bool {
        match self {
            Self::Anyone => true,
            other => other == requester,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(id) => write!(f, "{id}"),
            Self::Role {
                role,
                authority: Some(authority),
            } => write!(f, "role:{authority}/{role}"),
            Self::Role { role, .. } => write!(f, "role:{role}"),
            Self::Anyone => f.write_str(WILDCARD),
        }
    }
}

bitflags! {
    /// CRUDN permission mask, bit values as carried on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permission: u16 {
        const CREATE = 1 << 0;
        const RETRIEVE = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const NOTIFY = 1 << 4;

        const CRUD = Self::CREATE.bits()
            | Self::RETRIEVE.bits()
            | Self::UPDATE.bits()
            | Self::DELETE.bits();
    }
}

impl Permission {
    /// Parse the compact `crudn` letter form used by the CLI.
    pub fn from_letters(letters: &str) -> Option<Self> {
        let mut perm = Self::empty();
        for c in letters.chars() {
            perm |= match c.to_ascii_lowercase() {
                'c' => Self::CREATE,
                'r' => Self::RETRIEVE,
                'u' => Self::UPDATE,
                'd' => Self::DELETE,
                'n' => Self::NOTIFY,
                _ => return None,
            };
        }
        Some(perm)
    }
}

/// Matches requests against one resource (or a family of resources).
///
/// An empty `resource_types` or `interfaces` list matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMatcher {
    pub href: String,
    pub resource_types: Vec<String>,
    pub interfaces: Vec<String>,
}

impl ResourceMatcher {
    pub fn href(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            resource_types: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self::href(WILDCARD)
    }

    pub fn is_wildcard(&self) -> bool {
        self.href == WILDCARD
    }

    pub fn matches_href(&self, href: &str) -> bool {
        self.is_wildcard() || self.href == href
    }
}

/// When an ACE is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    /// In force between the two instants (inclusive).
    Period {
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    },
    /// In force for this many remaining uses.
    Count(u32),
}

impl Validity {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Period {
                not_before,
                not_after,
            } => *not_before <= now && now <= *not_after,
            Self::Count(remaining) => *remaining > 0,
        }
    }
}

/// One subject/resource/permission rule.
///
/// Construct through [`Ace::new`], which enforces that at least one resource
/// matcher with a non-empty href and a non-empty permission are present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Ace {
    subject: Subject,
    resources: Vec<ResourceMatcher>,
    permission: Permission,
    validity: Option<Validity>,
}

impl Ace {
    pub fn new(
        subject: Subject,
        resources: Vec<ResourceMatcher>,
        permission: Permission,
        validity: Option<Validity>,
    ) -> Result<Self, ParseError> {
        if resources.is_empty() {
            return Err(ParseError::new(
                "resources",
                "at least one resource matcher is required",
            ));
        }
        if let Some(i) = resources.iter().position(|r| r.href.is_empty()) {
            return Err(ParseError::new(format!("resources[{i}].href"), "must not be empty"));
        }
        if permission.is_empty() {
            return Err(ParseError::new("permission", "permission mask is empty"));
        }
        let validity = match validity {
            Some(Validity::Period {
                not_before,
                not_after,
            }) => {
                if not_before > not_after {
                    return Err(ParseError::new("validity.period", "period ends before it starts"));
                }
                // The wire carries whole seconds.
                Some(Validity::Period {
                    not_before: whole_seconds(not_before),
                    not_after: whole_seconds(not_after),
                })
            }
            other => other,
        };
        Ok(Self {
            subject,
            resources,
            permission,
            validity,
        })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn resources(&self) -> &[ResourceMatcher] {
        &self.resources
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn validity(&self) -> Option<&Validity> {
        self.validity.as_ref()
    }

    pub fn covers_href(&self, href: &str) -> bool {
        self.resources.iter().any(|r| r.matches_href(href))
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.validity.is_none_or(|v| v.is_active_at(now))
    }

    /// Whether each grant by this entry spends one of a limited number of uses.
    pub fn is_use_limited(&self) -> bool {
        matches!(self.validity, Some(Validity::Count(_)))
    }

    /// Spend one use. Returns false if the entry is not use-limited or has
    /// none left.
    pub fn consume_use(&mut self) -> bool {
        match &mut self.validity {
            Some(Validity::Count(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Whether two ACEs address the same subject and resource set (POST merge key).
    pub fn same_key(&self, other: &Ace) -> bool {
        self.subject == other.subject && self.resources == other.resources
    }

    /// Take over the permission and validity of `other` (same key).
    pub fn merge_from(&mut self, other: &Ace) {
        self.permission = other.permission;
        self.validity = other.validity;
    }
}

fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// Identifier of the credential the rowner authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef(pub u16);

/// The device's access control list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acl {
    pub aces: Vec<Ace>,
    /// Identity allowed to replace the whole list. Nil while unowned.
    pub rowner: Uuid,
    pub rowner_cred: Option<CredentialRef>,
}

impl Acl {
    pub fn new(aces: Vec<Ace>, rowner: Uuid) -> Self {
        Self {
            aces,
            rowner,
            rowner_cred: None,
        }
    }

    pub fn is_owned(&self) -> bool {
        !self.rowner.is_nil()
    }

    /// Whether `subject` is the resource owner of this list.
    pub fn is_rowner(&self, subject: &Subject) -> bool {
        self.is_owned() && *subject == Subject::Uuid(self.rowner)
    }

    /// ACEs whose subject is the rowner; these keep the device administrable.
    pub fn rowner_aces(&self) -> impl Iterator<Item = &Ace> {
        self.aces
            .iter()
            .filter(|ace| self.is_owned() && *ace.subject() == Subject::Uuid(self.rowner))
    }

    /// Merge `incoming` by subject+resource key: matching entries take the
    /// new permission/validity, the rest are appended in order.
    pub fn merge(&mut self, incoming: Vec<Ace>) {
        for ace in incoming {
            match self.aces.iter_mut().find(|existing| existing.same_key(&ace)) {
                Some(existing) => existing.merge_from(&ace),
                None => self.aces.push(ace),
            }
        }
    }

    /// Whether any `Anyone` ACE grants all of C/R/U/D, or any of C/U/D over a
    /// wildcard href.
    pub fn grants_unauthenticated_full_access(&self) -> bool {
        self.aces
            .iter()
            .filter(|ace| *ace.subject() == Subject::Anyone)
            .any(|ace| {
                let perm = ace.permission();
                let writes = Permission::CREATE | Permission::UPDATE | Permission::DELETE;
                perm.contains(Permission::CRUD)
                    || (perm.intersects(writes) && ace.resources().iter().any(|r| r.is_wildcard()))
            })
    }
}

/// Kind of registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    AccessManagement,
    Other(u16),
}

impl ServiceType {
    pub fn code(&self) -> u16 {
        match self {
            Self::AccessManagement => 1,
            Self::Other(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::AccessManagement,
            other => Self::Other(other),
        }
    }
}

/// Ownership/session metadata for one registered service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub owner: Uuid,
    pub service_type: ServiceType,
    /// Reference to the session-key material held by the credential resource.
    pub session_key_ref: Option<String>,
}

impl ServiceRecord {
    pub fn key(&self) -> (Uuid, ServiceType) {
        (self.owner, self.service_type)
    }
}

/// Service records, unique on (owner, service type).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SvcList {
    records: Vec<ServiceRecord>,
}

impl SvcList {
    /// Build from records, rejecting duplicate (owner, type) pairs.
    pub fn from_records(records: Vec<ServiceRecord>) -> Result<Self, ParseError> {
        for (i, record) in records.iter().enumerate() {
            if records[..i].iter().any(|r| r.key() == record.key()) {
                return Err(ParseError::new(
                    format!("[{i}]"),
                    format!(
                        "duplicate service record for owner {} type {}",
                        record.owner,
                        record.service_type.code()
                    ),
                ));
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace the record with the same (owner, type) key.
    pub fn upsert(&mut self, record: ServiceRecord) {
        match self.records.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Remove every record matching `pred`; returns how many were removed.
    pub fn remove_where(&mut self, pred: impl Fn(&ServiceRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !pred(r));
        before - self.records.len()
    }
}
