use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::comment::Comment;
use crate::utils::utc_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: Option<Uuid>,
    pub created_by: Uuid,
    #[schema(format = DateTime, example = "2025-10-10T10:00:00Z")]
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// Derived at read time: past due and not done.
    pub is_overdue: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Task {
    fn entity_type() -> &'static str {
        "task"
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: Option<Uuid>,
    pub created_by: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbTask {
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => self.status != TaskStatus::Done && due < now,
            None => false,
        }
    }
}

impl TryFrom<DbTask> for Task {
    type Error = AppError;

    fn try_from(value: DbTask) -> Result<Self, Self::Error> {
        let is_overdue = value.is_overdue_at(utc_now());
        // Tags are stored as a JSON array; a malformed cell degrades to empty
        // rather than failing the whole read.
        let tags: Vec<String> = serde_json::from_str(&value.tags).unwrap_or_default();
        Ok(Task {
            id: value.id,
            project_id: value.project_id,
            title: value.title,
            description: value.description,
            status: value.status,
            priority: value.priority,
            assignee: value.assignee,
            created_by: value.created_by,
            due_date: value.due_date,
            tags,
            is_overdue,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Single-task read: the task plus its comment thread.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Define launch checklist")]
    pub title: String,
    #[schema(example = "Collect sign-offs from every team.")]
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<Uuid>,
    #[schema(format = DateTime, example = "2025-10-10T10:00:00Z")]
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    #[schema(format = DateTime, example = "2025-11-01T10:00:00Z")]
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskStatusUpdateRequest {
    #[schema(example = "done")]
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskAssignRequest {
    /// `null` clears the assignment.
    pub assignee: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub assignee: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_task(status: TaskStatus, due_date: Option<DateTime<Utc>>) -> DbTask {
        let now = utc_now();
        DbTask {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            title: "sample".to_string(),
            description: None,
            status,
            priority: TaskPriority::Medium,
            assignee: None,
            created_by: Uuid::new_v4(),
            due_date,
            tags: "[]".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn overdue_requires_past_due_date() {
        let now = utc_now();
        let task = sample_task(TaskStatus::InProgress, Some(now - Duration::hours(1)));
        assert!(task.is_overdue_at(now));

        let task = sample_task(TaskStatus::InProgress, Some(now + Duration::hours(1)));
        assert!(!task.is_overdue_at(now));

        let task = sample_task(TaskStatus::InProgress, None);
        assert!(!task.is_overdue_at(now));
    }

    #[test]
    fn done_tasks_are_never_overdue() {
        let now = utc_now();
        let task = sample_task(TaskStatus::Done, Some(now - Duration::days(30)));
        assert!(!task.is_overdue_at(now));
    }

    #[test]
    fn malformed_tags_degrade_to_empty() {
        let mut task = sample_task(TaskStatus::Todo, None);
        task.tags = "not json".to_string();
        let task: Task = task.try_into().unwrap();
        assert!(task.tags.is_empty());
    }
}
