//! Staleness clocks deciding how much work a sync call does.

use std::time::Duration;

use crate::models::SyncState;

/// Remote work chosen for one sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Serve the snapshot as-is.
    Skip,
    /// Compare message ids only, escalating to a full sync on change.
    QuickCheck,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub plan: Plan,
    /// Whether stored assets should be checked for existence.
    pub audit: bool,
}

impl Decision {
    pub const fn is_noop(self) -> bool {
        matches!(self.plan, Plan::Skip) && !self.audit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub quick_check_ttl: Duration,
    pub full_sync_ttl: Duration,
    pub asset_audit_ttl: Duration,
}

impl FreshnessPolicy {
    /// Decide the work for a call at `now_ms`.
    ///
    /// The audit clock is checked first, then the poll clocks. `force`
    /// bypasses every clock and `validate` forces only the audit. A snapshot
    /// that has never completed a full sync always takes the full path.
    pub fn decide(&self, state: &SyncState, force: bool, validate: bool, now_ms: i64) -> Decision {
        let audit =
            force || validate || is_stale(state.last_asset_audit, self.asset_audit_ttl, now_ms);

        let plan = if force
            || state.last_full_sync <= 0
            || is_stale(state.last_full_sync, self.full_sync_ttl, now_ms)
        {
            Plan::Full
        } else if is_stale(state.last_quick_check, self.quick_check_ttl, now_ms) {
            Plan::QuickCheck
        } else {
            Plan::Skip
        };

        Decision { plan, audit }
    }
}

fn is_stale(last_ms: i64, ttl: Duration, now_ms: i64) -> bool {
    if last_ms <= 0 {
        return true;
    }
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(last_ms) >= ttl_ms
}
