use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::task::TaskPriority;

/// Owner-controlled switches that widen what plain members may do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct ProjectSettings {
    pub allow_member_task_creation: bool,
    pub allow_member_task_assignment: bool,
    pub default_task_priority: TaskPriority,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            allow_member_task_creation: true,
            allow_member_task_assignment: false,
            default_task_priority: TaskPriority::Medium,
        }
    }
}

impl ProjectSettings {
    pub fn apply(&mut self, update: &ProjectSettingsUpdate) {
        if let Some(allow) = update.allow_member_task_creation {
            self.allow_member_task_creation = allow;
        }
        if let Some(allow) = update.allow_member_task_assignment {
            self.allow_member_task_assignment = allow;
        }
        if let Some(priority) = update.default_task_priority {
            self.default_task_priority = priority;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub settings: ProjectSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Project {
    fn entity_type() -> &'static str {
        "project"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProject {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub allow_member_task_creation: bool,
    pub allow_member_task_assignment: bool,
    pub default_task_priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbProject {
    pub fn settings(&self) -> ProjectSettings {
        ProjectSettings {
            allow_member_task_creation: self.allow_member_task_creation,
            allow_member_task_assignment: self.allow_member_task_assignment,
            default_task_priority: self.default_task_priority,
        }
    }
}

impl TryFrom<DbProject> for Project {
    type Error = AppError;

    fn try_from(value: DbProject) -> Result<Self, Self::Error> {
        let settings = value.settings();
        Ok(Project {
            id: value.id,
            owner_id: value.owner_id,
            name: value.name,
            description: value.description,
            settings,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectSettingsUpdate {
    pub allow_member_task_creation: Option<bool>,
    pub allow_member_task_assignment: Option<bool>,
    pub default_task_priority: Option<TaskPriority>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Launch Planning")]
    pub name: String,
    #[schema(example = "Prepare milestones for the product launch.")]
    pub description: Option<String>,
    pub settings: Option<ProjectSettingsUpdate>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    #[schema(example = "Launch Planning")]
    pub name: Option<String>,
    #[schema(example = "Updated description")]
    pub description: Option<String>,
    pub settings: Option<ProjectSettingsUpdate>,
}
