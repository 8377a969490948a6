//! The cache key scheme.
//!
//! These keys are part of the deployment's external surface: presence,
//! routing and queue keys are shared with every node that consumes them,
//! so the format must stay stable.

use uuid::Uuid;

/// Pending friend requests aimed at `to`
pub fn friend_request(to: Uuid) -> String {
    format!("friend_request:{to}")
}

/// Friend links owned by `user`
pub fn friendship(user: Uuid) -> String {
    format!("friendship:{user}")
}

/// Group metadata
pub fn group(group: Uuid) -> String {
    format!("group:{group}")
}

/// Members of a group, serialized for display
pub fn group_member(group: Uuid) -> String {
    format!("group_member:{group}")
}

/// Derived set of member uuids of a group, used for O(1) membership checks
pub fn group_member_set(group: Uuid) -> String {
    format!("group_member_set:{group}")
}

/// Groups a user is a member of
pub fn group_list(user: Uuid) -> String {
    format!("groupList:{user}")
}

/// Pending join requests visible to a group owner or admin
pub fn group_application_list(user: Uuid) -> String {
    format!("GroupApplicationList:{user}")
}

/// Account profile, looked up by username
pub fn user(username: &str) -> String {
    format!("user:{username}")
}

/// Presence hash of a user, field `status`
pub fn presence(user: Uuid) -> String {
    format!("presence:{user}")
}

/// Routing address of a user's current connection
pub fn route(user: Uuid) -> String {
    format!("route:{user}")
}

/// Pending outbound messages of a user
pub fn messages(user: Uuid) -> String {
    format!("messages:{user}")
}

/// Inbound routing queue of a node
pub fn message_queue(address: &str) -> String {
    format!("message_queue:{address}")
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    #[test]
    fn scheme_is_stable() {
        let uuid = Uuid::nil();
        assert_eq!(
            super::friend_request(uuid),
            "friend_request:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            super::friendship(uuid),
            "friendship:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(super::group(uuid), "group:00000000-0000-0000-0000-000000000000");
        assert_eq!(
            super::group_member(uuid),
            "group_member:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            super::group_list(uuid),
            "groupList:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            super::group_application_list(uuid),
            "GroupApplicationList:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(super::user("herbert"), "user:herbert");
        assert_eq!(super::message_queue("node-1"), "message_queue:node-1");
    }
}
