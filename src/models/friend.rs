use rorm::fields::types::ForeignModel;
use rorm::{DbEnum, Model, Patch};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Account;

/// The state of a pending request.
///
/// A request starts out as [RequestStatus::Pending] and is moved exactly once
/// to one of the terminal states. Expired requests are deleted, not marked.
#[derive(DbEnum, Serialize, Deserialize, ToSchema, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// The request has not been answered yet
    Pending,
    /// The target accepted the request
    Accepted,
    /// The target rejected the request
    Rejected,
}

impl RequestStatus {
    /// Whether this status may still move to `to`.
    ///
    /// Only `Pending` is non-terminal.
    pub fn can_transition(&self, to: RequestStatus) -> bool {
        matches!(self, RequestStatus::Pending) && to != RequestStatus::Pending
    }
}

/// One direction of a friendship.
///
/// This model is created 2 times for every relation: accepting a friend
/// request always inserts both directions in the same transaction.
#[derive(Model)]
pub struct FriendLink {
    /// Primary key of this link
    #[rorm(primary_key)]
    pub uuid: Uuid,

    /// The owning side of this link
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub user: ForeignModel<Account>,

    /// The befriended user
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub friend: ForeignModel<Account>,

    /// The point in time the link was created
    #[rorm(auto_create_time)]
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Patch)]
#[rorm(model = "FriendLink")]
pub(crate) struct FriendLinkInsert {
    pub(crate) uuid: Uuid,
    pub(crate) user: ForeignModel<Account>,
    pub(crate) friend: ForeignModel<Account>,
}

/// A pending friend request
#[derive(Model)]
pub struct FriendRequest {
    /// Primary key of the request
    #[rorm(primary_key)]
    pub uuid: Uuid,

    /// The requesting user
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub from: ForeignModel<Account>,

    /// The user the request is aimed at
    #[rorm(on_update = "Cascade", on_delete = "Cascade")]
    pub to: ForeignModel<Account>,

    /// Opaque message the requester attached
    #[rorm(max_length = 255)]
    pub message: String,

    /// Current state of the request
    pub status: RequestStatus,

    /// The point in time the request was created
    #[rorm(auto_create_time)]
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Patch)]
#[rorm(model = "FriendRequest")]
pub(crate) struct FriendRequestInsert {
    pub(crate) uuid: Uuid,
    pub(crate) from: ForeignModel<Account>,
    pub(crate) to: ForeignModel<Account>,
    pub(crate) message: String,
    pub(crate) status: RequestStatus,
}

#[cfg(test)]
mod tests {
    use super::RequestStatus;

    #[test]
    fn only_pending_may_transition() {
        assert!(RequestStatus::Pending.can_transition(RequestStatus::Accepted));
        assert!(RequestStatus::Pending.can_transition(RequestStatus::Rejected));
        assert!(!RequestStatus::Pending.can_transition(RequestStatus::Pending));
        assert!(!RequestStatus::Accepted.can_transition(RequestStatus::Rejected));
        assert!(!RequestStatus::Rejected.can_transition(RequestStatus::Accepted));
    }
}
