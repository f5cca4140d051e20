// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Access decision over the current ACL.

use chrono::{DateTime, Utc};
use srm_core::error::Result;
use srm_core::types::{ACL_HREF, Acl, PSTAT_HREF, Permission, ResourceKind, SVC_HREF, Subject};
use tracing::debug;

use crate::store::SecurityStore;

const SECURITY_HREFS: [&str; 3] = [ACL_HREF, SVC_HREF, PSTAT_HREF];

/// What grants a request, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Denied,
    /// The rowner override, or an entry without a use limit.
    Unlimited,
    /// Only the use-limited entry at this index grants it.
    Limited(usize),
}

fn grant(acl: &Acl, subject: &Subject, href: &str, permission: Permission, now: DateTime<Utc>) -> Grant {
    if permission.is_empty() {
        return Grant::Denied;
    }
    if acl.is_rowner(subject)
        && SECURITY_HREFS.contains(&href)
        && (Permission::RETRIEVE | Permission::UPDATE).contains(permission)
    {
        return Grant::Unlimited;
    }
    let mut limited = None;
    for (i, ace) in acl.aces.iter().enumerate() {
        let grants = ace.subject().matches(subject)
            && ace.covers_href(href)
            && ace.is_active_at(now)
            && ace.permission().contains(permission);
        if !grants {
            continue;
        }
        if !ace.is_use_limited() {
            return Grant::Unlimited;
        }
        limited.get_or_insert(i);
    }
    limited.map_or(Grant::Denied, Grant::Limited)
}

/// Whether `subject` may exercise every bit of `permission` on `href` at `now`.
///
/// The rowner can always retrieve and update the security resources, so a
/// device can never lock its owner out through its own ACL.  This is a pure
/// query: it never spends a use of a count-limited entry.
pub fn is_permitted(
    acl: &Acl,
    subject: &Subject,
    href: &str,
    permission: Permission,
    now: DateTime<Utc>,
) -> bool {
    grant(acl, subject, href, permission, now) != Grant::Denied
}

/// Decide an access request and account for it.
///
/// When only a count-limited entry grants the request, one use is spent and
/// committed before the grant is reported.  Entries without a limit are
/// preferred so limited uses are not burnt needlessly.  If the spent use
/// cannot be committed the error is returned and nothing is granted.
pub(crate) fn authorize(
    store: &mut SecurityStore,
    subject: &Subject,
    href: &str,
    permission: Permission,
    now: DateTime<Utc>,
) -> Result<bool> {
    match grant(store.acl(), subject, href, permission, now) {
        Grant::Denied => Ok(false),
        Grant::Unlimited => Ok(true),
        Grant::Limited(index) => {
            let spent = store.transact(ResourceKind::Acl, |res| Ok(res.acl.aces[index].consume_use()))?;
            debug!(%subject, href, index, spent, "use-limited ACE consumed");
            Ok(spent)
        }
    }
}
