//! Resource enumeration over a discovery snapshot.

use tracing::{debug, warn};

use crate::{DiscoverySnapshot, Gvr, Target};

/// Split a `group/version` string: `v1` is the core group, `apps/v1` a named group.
/// Segments are taken verbatim; an empty string or more than one slash is malformed.
pub fn split_group_version(group_version: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = group_version.split('/').collect();
    match parts.as_slice() {
        [version] if !version.is_empty() => Some((String::new(), (*version).to_string())),
        [group, version] => Some(((*group).to_string(), (*version).to_string())),
        _ => None,
    }
}

/// Resource kinds that can be both listed and deleted, in snapshot order.
///
/// A non-empty `allowlist` restricts the result to those plural names; an empty
/// one disables filtering. Sub-resources (`pods/log`) are never returned.
pub fn enumerate(snapshot: &DiscoverySnapshot, allowlist: &[String]) -> Vec<Target> {
    let mut out = Vec::new();
    for group in &snapshot.groups {
        let Some((group_name, version)) = split_group_version(&group.group_version) else {
            warn!(group_version = %group.group_version, "skipping malformed group/version");
            continue;
        };
        for descriptor in &group.resources {
            if descriptor.plural.contains('/') {
                continue;
            }
            if !allowlist.is_empty() && !allowlist.iter().any(|a| *a == descriptor.plural) {
                continue;
            }
            if !descriptor.supports("list") || !descriptor.supports("delete") {
                debug!(resource = %descriptor.plural, group_version = %group.group_version, "not listable and deletable");
                continue;
            }
            out.push(Target {
                gvr: Gvr::new(group_name.clone(), version.clone(), descriptor.plural.clone()),
                descriptor: descriptor.clone(),
            });
        }
    }
    out
}
