//! The permission rules, one pure function per action family.
//!
//! Functions only combine facts the handler already fetched; they never touch
//! the database. Admin override is baked into each rule except the
//! self-protection checks, which refuse the acting user's own account first.

use uuid::Uuid;

use super::actor::{Actor, ProjectRelation};
use crate::models::project::ProjectSettings;

/// Viewing a project, its roster, its tasks and their comments.
pub fn can_view_project(actor: &Actor, relation: ProjectRelation) -> bool {
    actor.is_admin() || relation.is_participant()
}

/// Updating project fields/settings and deleting the project.
pub fn can_modify_project(actor: &Actor, relation: ProjectRelation) -> bool {
    actor.is_admin() || relation == ProjectRelation::Owner
}

/// Adding members and changing their project role.
pub fn can_manage_members(actor: &Actor, relation: ProjectRelation) -> bool {
    actor.is_admin() || relation == ProjectRelation::Owner
}

/// Removing a member. The owner is never removable, not even by an admin;
/// ownership transfer is not a roster operation.
pub fn can_remove_member(actor: &Actor, relation: ProjectRelation, target_is_owner: bool) -> bool {
    if target_is_owner {
        return false;
    }
    can_manage_members(actor, relation)
}

pub fn can_create_task(actor: &Actor, relation: ProjectRelation, settings: &ProjectSettings) -> bool {
    if actor.is_admin() {
        return true;
    }
    match relation {
        ProjectRelation::Owner | ProjectRelation::Manager => true,
        ProjectRelation::Member => settings.allow_member_task_creation,
        ProjectRelation::Outsider => false,
    }
}

/// Changing who a task is assigned to, including clearing the assignment.
pub fn can_assign_task(actor: &Actor, relation: ProjectRelation, settings: &ProjectSettings) -> bool {
    if actor.is_admin() {
        return true;
    }
    match relation {
        ProjectRelation::Owner | ProjectRelation::Manager => true,
        ProjectRelation::Member => settings.allow_member_task_assignment,
        ProjectRelation::Outsider => false,
    }
}

/// Moving a task between statuses. The current assignee may always move
/// their own task, even if they have since left the roster.
pub fn can_change_task_status(
    actor: &Actor,
    relation: ProjectRelation,
    assignee: Option<Uuid>,
) -> bool {
    if actor.is_admin() || assignee == Some(actor.id) {
        return true;
    }
    matches!(relation, ProjectRelation::Owner | ProjectRelation::Manager)
}

/// Editing task fields (title, description, priority, due date, tags).
/// Deliberately permissive: every participant may edit.
pub fn can_edit_task(actor: &Actor, relation: ProjectRelation) -> bool {
    actor.is_admin() || relation.is_participant()
}

/// Deleting a task. Creators keep this right even after leaving the roster.
pub fn can_delete_task(actor: &Actor, relation: ProjectRelation, created_by: Uuid) -> bool {
    actor.is_admin() || relation == ProjectRelation::Owner || created_by == actor.id
}

/// Commenting is open to anyone who can view the project.
pub fn can_comment(actor: &Actor, relation: ProjectRelation) -> bool {
    can_view_project(actor, relation)
}

pub fn can_list_users(actor: &Actor) -> bool {
    actor.is_admin()
}

/// A user may always read their own profile; everyone else's is admin-only.
pub fn can_view_user(actor: &Actor, target: Uuid) -> bool {
    actor.id == target || actor.is_admin()
}

/// Self-protection comes first: no one changes their own role, not even an
/// admin.
pub fn can_change_user_role(actor: &Actor, target: Uuid) -> bool {
    actor.id != target && actor.is_admin()
}

pub fn can_change_user_status(actor: &Actor, target: Uuid) -> bool {
    actor.id != target && actor.is_admin()
}

pub fn can_delete_user(actor: &Actor, target: Uuid) -> bool {
    actor.id != target && actor.is_admin()
}
