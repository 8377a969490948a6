//! This module holds the definition of the swagger declaration

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::cache::entries;
use crate::server::handler;

struct CookieSecurity;

impl Modify for CookieSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("id"))),
            )
        }
    }
}

/// Helper struct for the openapi definitions.
#[derive(OpenApi)]
#[openapi(
    paths(
        handler::register_account,
        handler::get_me,
        handler::lookup_account_by_uuid,
        handler::lookup_account_by_username,
        handler::login,
        handler::logout,
        handler::websocket,
        handler::create_friend_request,
        handler::get_friend_requests,
        handler::accept_friend_request,
        handler::reject_friend_request,
        handler::get_friends,
        handler::create_group,
        handler::get_groups,
        handler::get_group,
        handler::get_group_members,
        handler::create_group_join_request,
        handler::get_group_applications,
        handler::accept_group_application,
        handler::reject_group_application,
        handler::health,
    ),
    components(schemas(
        handler::ApiErrorResponse,
        handler::ApiStatusCode,
        handler::AccountRegistrationRequest,
        handler::LookupAccountUsernameRequest,
        handler::LoginRequest,
        handler::CreateFriendRequest,
        handler::GetFriendRequestsResponse,
        handler::FriendResponse,
        handler::GetFriendsResponse,
        handler::CreateGroupRequest,
        handler::CreateGroupResponse,
        handler::GetGroupsResponse,
        handler::GetGroupMembersResponse,
        handler::CreateGroupJoinRequest,
        handler::GetGroupApplicationsResponse,
        handler::HealthResponse,
        entries::AccountEntry,
        entries::FriendRequestEntry,
        entries::FriendLinkEntry,
        entries::GroupEntry,
        entries::GroupMemberEntry,
        entries::GroupJoinRequestEntry,
    )),
    modifiers(&CookieSecurity)
)]
pub struct ApiDoc;
