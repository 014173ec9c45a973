//! Claim eligibility

use crate::ledger::UserClaimState;
use chrono::{DateTime, Utc};

/// Whether a user may claim at `now`.
///
/// A user who has never claimed is always eligible. Otherwise the cooldown
/// must have strictly elapsed: claiming exactly at `next_eligible` is refused.
pub fn can_claim(state: &UserClaimState, now: DateTime<Utc>) -> bool {
    match (state.last_claim, state.next_eligible) {
        (None, None) => true,
        (_, Some(next)) => now > next,
        (Some(_), None) => true,
    }
}
