//! Builders shared by the inline module tests. No live database needed;
//! these construct plain row values for the pure workflow logic.

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::core::shared::models::DbUser;

pub fn tenant_id() -> Uuid {
    Uuid::from_u128(0x11)
}

/// Deterministic timestamp so ordering assertions are stable.
pub fn ts(offset_secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_770_000_000 + offset_secs, 0).unwrap()
}

pub fn user(name: &str, role: &str) -> DbUser {
    DbUser {
        id: Uuid::new_v4(),
        tenant_id: tenant_id(),
        username: name.to_string(),
        email: format!("{name}@example.test"),
        role: role.to_string(),
        is_active: true,
        created_at: ts(0),
        updated_at: ts(0),
    }
}

pub fn inactive_user(name: &str, role: &str) -> DbUser {
    let mut u = user(name, role);
    u.is_active = false;
    u
}
