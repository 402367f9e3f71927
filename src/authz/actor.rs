use uuid::Uuid;

use crate::models::member::{ProjectMember, ProjectRole};
use crate::models::user::GlobalRole;

/// The authenticated caller, as far as authorization cares: a live account's
/// id and instance-wide role.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: GlobalRole,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, GlobalRole::Admin)
    }
}

/// How a user stands relative to one project. Ownership is checked before the
/// roster, so an owner resolves to `Owner` no matter what the roster says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectRelation {
    Owner,
    Manager,
    Member,
    Outsider,
}

impl ProjectRelation {
    pub fn resolve(owner_id: Uuid, members: &[ProjectMember], user_id: Uuid) -> Self {
        if user_id == owner_id {
            return ProjectRelation::Owner;
        }
        match members.iter().find(|m| m.user_id == user_id) {
            Some(member) => match member.role {
                ProjectRole::Manager => ProjectRelation::Manager,
                ProjectRole::Member => ProjectRelation::Member,
            },
            None => ProjectRelation::Outsider,
        }
    }

    /// Owner or any roster member.
    pub fn is_participant(self) -> bool {
        !matches!(self, ProjectRelation::Outsider)
    }
}
