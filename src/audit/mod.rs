//! Fire-and-forget audit sink. Failures are logged and never fail the
//! primary request.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::shared::schema::audit_log;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = audit_log)]
pub struct DbAuditRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub fn log_action(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    detail: serde_json::Value,
) {
    let record = DbAuditRecord {
        id: Uuid::new_v4(),
        tenant_id,
        actor_id,
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        detail,
        created_at: Utc::now(),
    };
    if let Err(e) = diesel::insert_into(audit_log::table)
        .values(&record)
        .execute(conn)
    {
        warn!("audit write failed for {action} on {entity_type}: {e}");
    }
}
