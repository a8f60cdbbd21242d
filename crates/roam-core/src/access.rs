// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-object access control.
//!
//! Every anchor carries an [`Access`] list: an optional public level plus
//! per-root overrides. The owning root always holds [`AccessLevel::Write`].
//! Everyone else gets the higher of the public level and their override.
//!
//! Policy
//! - Reads performed by a traversal step are filtered: objects the traveler
//!   cannot read are omitted from neighbor sets and never entered.
//! - Connect and write attempts fail hard with
//!   [`crate::GraphError::PermissionDenied`]; only the offending operation
//!   fails, nothing is partially applied.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::anchor::Anchor;
use crate::ident::RootId;

/// Ordered permission level: `Read < Connect < Write`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessLevel {
    /// May observe the object and traverse onto it.
    Read,
    /// May attach or detach relationships at the object.
    Connect,
    /// May modify fields, access lists, or destroy the object.
    Write,
}

/// Access list stored on every anchor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// Level granted to every root. `None` means owner-only.
    pub public: Option<AccessLevel>,
    /// Per-root overrides.
    pub roots: BTreeMap<RootId, AccessLevel>,
}

impl Access {
    /// Sets the public level.
    pub fn grant(&mut self, level: AccessLevel) {
        self.public = Some(level);
    }

    /// Returns the object to owner-only public access.
    pub fn revoke(&mut self) {
        self.public = None;
    }

    /// Sets the override for `root`.
    pub fn allow_root(&mut self, root: RootId, level: AccessLevel) {
        self.roots.insert(root, level);
    }

    /// Removes the override for `root`. Returns `true` when one existed.
    pub fn disallow_root(&mut self, root: RootId) -> bool {
        self.roots.remove(&root).is_some()
    }

    /// Best level available to a non-owner `root`.
    #[must_use]
    pub fn level_for(&self, root: RootId) -> Option<AccessLevel> {
        self.public.max(self.roots.get(&root).copied())
    }
}

/// Stateless permission oracle consulted by every graph operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessController;

impl AccessController {
    /// Effective level of `requester` on `anchor`.
    #[must_use]
    pub fn effective(requester: RootId, anchor: &Anchor) -> Option<AccessLevel> {
        if anchor.owner == requester {
            return Some(AccessLevel::Write);
        }
        anchor.access.level_for(requester)
    }

    /// Returns `true` iff `requester` holds at least `required` on `anchor`.
    #[must_use]
    pub fn check(requester: RootId, anchor: &Anchor, required: AccessLevel) -> bool {
        Self::effective(requester, anchor).is_some_and(|level| level >= required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::Anchor;
    use crate::ident::{make_node_id, make_root_id, make_type_id};
    use crate::record::NodeRecord;
    use crate::value::Fields;

    fn anchor_owned_by(owner: RootId) -> Anchor {
        Anchor::node(
            make_node_id("thing"),
            owner,
            NodeRecord::new(make_type_id("thing"), Fields::new()),
        )
    }

    #[test]
    fn owner_always_writes() {
        let owner = make_root_id("alpha");
        let anchor = anchor_owned_by(owner);
        assert!(AccessController::check(owner, &anchor, AccessLevel::Write));
    }

    #[test]
    fn default_is_owner_only() {
        let anchor = anchor_owned_by(make_root_id("alpha"));
        let other = make_root_id("beta");
        assert!(!AccessController::check(other, &anchor, AccessLevel::Read));
    }

    #[test]
    fn override_beats_lower_public_level() {
        let mut anchor = anchor_owned_by(make_root_id("alpha"));
        let other = make_root_id("beta");
        anchor.access.grant(AccessLevel::Read);
        anchor.access.allow_root(other, AccessLevel::Write);
        assert!(AccessController::check(other, &anchor, AccessLevel::Write));
        assert!(anchor.access.disallow_root(other));
        assert!(!AccessController::check(other, &anchor, AccessLevel::Connect));
        assert!(AccessController::check(other, &anchor, AccessLevel::Read));
        anchor.access.revoke();
        assert!(!AccessController::check(other, &anchor, AccessLevel::Read));
    }
}
