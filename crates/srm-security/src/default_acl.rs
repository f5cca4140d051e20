// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Default ACL: the minimal policy a device boots with when no persisted ACL
// is available.  It lets anyone discover the device and drive the ownership
// transfer / provisioning handshake, and nothing more.

use srm_core::error::{Result, SrmError};
use srm_core::types::{Ace, Acl, DOXM_HREF, PSTAT_HREF, Permission, ResourceMatcher, Subject};
use tracing::warn;
use uuid::Uuid;

/// Discovery resources readable by anyone.
const DISCOVERY_HREFS: [&str; 3] = ["/oic/res", "/oic/d", "/oic/p"];

/// Onboarding resources anyone may read and update.
const ONBOARDING_HREFS: [&str; 2] = [DOXM_HREF, PSTAT_HREF];

/// Build the compiled-in default ACL.
///
/// The list is unowned (nil rowner) so the first ownership transfer can claim
/// the device.
pub fn generate_default_acl() -> Acl {
    let aces = [
        (matchers(&DISCOVERY_HREFS), Permission::RETRIEVE),
        (
            matchers(&ONBOARDING_HREFS),
            Permission::RETRIEVE | Permission::UPDATE,
        ),
    ]
    .into_iter()
    .filter_map(|(resources, permission)| Ace::new(Subject::Anyone, resources, permission, None).ok())
    .collect();
    Acl::new(aces, Uuid::nil())
}

fn matchers(hrefs: &[&str]) -> Vec<ResourceMatcher> {
    hrefs.iter().map(|h| ResourceMatcher::href(*h)).collect()
}

/// Reject a candidate default ACL that would open the device to
/// unauthenticated requesters.
pub fn validate_default_acl(acl: &Acl) -> Result<()> {
    if acl.aces.is_empty() {
        return Err(SrmError::InvalidPolicy("default ACL has no entries".into()));
    }
    if acl.grants_unauthenticated_full_access() {
        warn!("rejected default ACL granting unauthenticated write access");
        return Err(SrmError::InvalidPolicy(
            "default ACL grants unauthenticated subjects full or wildcard write access".into(),
        ));
    }
    Ok(())
}
