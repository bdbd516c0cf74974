use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::shared::enums::UserRole;
use crate::core::shared::schema::{tenants, users};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = tenants)]
pub struct DbTenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
pub struct DbUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbUser {
    /// Typed view of the stored role string. Unknown strings fall back to
    /// the least-privileged role.
    pub fn user_role(&self) -> UserRole {
        self.role.parse().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_string_is_least_privileged() {
        let mut user = crate::core::shared::test_utils::user("someone", "approver");
        user.role = "super_duper_admin".to_string();
        assert_eq!(user.user_role(), UserRole::Member);
        assert!(!user.user_role().can_approve());
    }
}
