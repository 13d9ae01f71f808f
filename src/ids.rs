//! Per-user entity identifiers of the form `{user_id}_{tag}_{timestamp}`.
//!
//! The CRUD layer mints expense, category and payment-method ids this way, so ownership can
//! be pre-checked with a prefix match before any database round trip.

use std::time::{SystemTime, UNIX_EPOCH};

/// Entity kinds that carry user-namespaced identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTag {
    /// `exp`
    Expense,
    /// `cat`
    Category,
    /// `pm`
    PaymentMethod,
}

impl EntityTag {
    /// Tag embedded in the identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "exp",
            Self::Category => "cat",
            Self::PaymentMethod => "pm",
        }
    }
}

/// Builds `{user_id}_{tag}_{timestamp_ms}`.
pub fn entity_id(user_id: &str, tag: EntityTag, timestamp_ms: u64) -> String {
    format!("{user_id}_{}_{timestamp_ms}", tag.as_str())
}

/// Same as [`entity_id`] stamped with the current wall clock.
pub fn entity_id_now(user_id: &str, tag: EntityTag) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    entity_id(user_id, tag, millis)
}

/// Cheap ownership pre-check: does `id` carry the `{user_id}_{tag}_` prefix?
pub fn owns(user_id: &str, tag: EntityTag, id: &str) -> bool {
    if user_id.is_empty() {
        return false;
    }
    id.strip_prefix(user_id)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_prefix(tag.as_str()))
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|stamp| !stamp.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_namespaced_ids() {
        assert_eq!(
            entity_id("u1", EntityTag::Expense, 1_700_000_000_000),
            "u1_exp_1700000000000"
        );
        assert_eq!(entity_id("42", EntityTag::PaymentMethod, 7), "42_pm_7");
        assert!(entity_id_now("u1", EntityTag::Category).starts_with("u1_cat_"));
    }

    #[test]
    fn ownership_prefix_check() {
        assert!(owns("u1", EntityTag::Expense, "u1_exp_1"));
        assert!(!owns("u1", EntityTag::Category, "u1_exp_1"));
        assert!(!owns("u1", EntityTag::Expense, "u2_exp_1"));
        // `u1` must not claim ids minted for `u11`.
        assert!(!owns("u1", EntityTag::Expense, "u11_exp_1"));
        assert!(!owns("u1", EntityTag::Expense, "u1_exp_"));
        assert!(!owns("", EntityTag::Expense, "_exp_1"));
    }
}
