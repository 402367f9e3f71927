use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::Severity;

/// Role inside a single project. Owners are not members; ownership lives on
/// the project row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ProjectRole {
    Manager,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: ProjectRole,
    pub joined_at: DateTime<Utc>,
}

impl crate::events::Loggable for ProjectMember {
    fn entity_type() -> &'static str {
        "member"
    }

    fn subject_id(&self) -> Uuid {
        self.user_id
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

/// Roster row joined with the user record for display.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct ProjectMemberDetail {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: ProjectRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberAddRequest {
    pub user_id: Uuid,
    #[schema(example = "member")]
    pub role: Option<ProjectRole>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberRoleUpdateRequest {
    #[schema(example = "manager")]
    pub role: ProjectRole,
}
