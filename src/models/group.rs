use rorm::fields::types::ForeignModel;
use rorm::{DbEnum, Model, Patch};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Account, RequestStatus};

/// The role of a member inside a group.
///
/// Every group has exactly one member with [GroupRole::Owner], created
/// together with the group. The owner can not be changed afterwards.
#[derive(DbEnum, Serialize, Deserialize, ToSchema, Copy, Clone, Debug, PartialEq, Eq)]
pub enum GroupRole {
    /// The creator of the group
    Owner,
    /// A member that may manage join requests
    Admin,
    /// A regular member
    Member,
}

impl GroupRole {
    /// Whether this role may answer join requests for its group
    pub fn manages_requests(&self) -> bool {
        matches!(self, GroupRole::Owner | GroupRole::Admin)
    }
}

/// A group of users
#[derive(Model)]
pub struct Group {
    /// Primary key of the group
    #[rorm(primary_key)]
    pub uuid: Uuid,

    /// Name of the group
    #[rorm(max_length = 255)]
    pub name: String,

    /// The owner of this group
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub owner: ForeignModel<Account>,

    /// The point in time the group was created
    #[rorm(auto_create_time)]
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Patch)]
#[rorm(model = "Group")]
pub(crate) struct GroupInsert {
    pub(crate) uuid: Uuid,
    pub(crate) name: String,
    pub(crate) owner: ForeignModel<Account>,
}

/// The m2m relation between groups and accounts
#[derive(Model)]
pub struct GroupMember {
    /// Primary key of a group member
    #[rorm(primary_key)]
    pub uuid: Uuid,

    /// The group
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub group: ForeignModel<Group>,

    /// The account in the group
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub member: ForeignModel<Account>,

    /// The role of the member in the group
    pub role: GroupRole,

    /// When the account joined the group
    #[rorm(auto_create_time)]
    pub joined_at: chrono::NaiveDateTime,
}

#[derive(Patch)]
#[rorm(model = "GroupMember")]
pub(crate) struct GroupMemberInsert {
    pub(crate) uuid: Uuid,
    pub(crate) group: ForeignModel<Group>,
    pub(crate) member: ForeignModel<Account>,
    pub(crate) role: GroupRole,
}

/// A pending request to join a group
#[derive(Model)]
pub struct GroupJoinRequest {
    /// Primary key of the request
    #[rorm(primary_key)]
    pub uuid: Uuid,

    /// The applying user
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub applicant: ForeignModel<Account>,

    /// The group the applicant wants to join
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub group: ForeignModel<Group>,

    /// Opaque message the applicant attached
    #[rorm(max_length = 255)]
    pub message: String,

    /// Current state of the request
    pub status: RequestStatus,

    /// The point in time the request was created
    #[rorm(auto_create_time)]
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Patch)]
#[rorm(model = "GroupJoinRequest")]
pub(crate) struct GroupJoinRequestInsert {
    pub(crate) uuid: Uuid,
    pub(crate) applicant: ForeignModel<Account>,
    pub(crate) group: ForeignModel<Group>,
    pub(crate) message: String,
    pub(crate) status: RequestStatus,
}

#[cfg(test)]
mod tests {
    use super::GroupRole;

    #[test]
    fn only_owner_and_admin_manage_requests() {
        assert!(GroupRole::Owner.manages_requests());
        assert!(GroupRole::Admin.manages_requests());
        assert!(!GroupRole::Member.manages_requests());
    }
}
