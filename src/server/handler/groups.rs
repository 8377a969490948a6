//! Handlers for groups, their members and join requests

use actix_toolbox::tb_middleware::Session;
use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, put, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cache::entries::{GroupEntry, GroupJoinRequestEntry, GroupMemberEntry};
use crate::server::handler::{ApiError, ApiErrorResponse, ApiResult, PathUuid};
use crate::service::RequestLifecycle;

/// The request to create a new group
#[derive(Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    #[schema(example = "Herbert's group")]
    name: String,
    /// Accounts that are added as members right away
    #[serde(default)]
    initial_members: Vec<Uuid>,
}

/// The response of a group creation
#[derive(Serialize, ToSchema)]
pub struct CreateGroupResponse {
    group: GroupEntry,
}

/// Create a new group
///
/// The executing user becomes the owner; the owner is set at creation and
/// can not be changed.
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Group got created", body = CreateGroupResponse),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "An initial member does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    request_body = CreateGroupRequest,
    security(("session_cookie" = []))
)]
#[post("/groups")]
pub async fn create_group(
    req: Json<CreateGroupRequest>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<Json<CreateGroupResponse>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    if req.name.is_empty() {
        return Err(ApiError::InvalidDisplayName);
    }

    let req = req.into_inner();
    let group = lifecycle
        .create_group(uuid, req.name, req.initial_members)
        .await?;

    Ok(Json(CreateGroupResponse { group }))
}

/// The groups the executing user is a member of
#[derive(Serialize, ToSchema)]
pub struct GetGroupsResponse {
    groups: Vec<GroupEntry>,
}

/// Retrieve all groups the executing user is a member of
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns all groups of the user", body = GetGroupsResponse),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    security(("session_cookie" = []))
)]
#[get("/groups")]
pub async fn get_groups(
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<Json<GetGroupsResponse>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    Ok(Json(GetGroupsResponse {
        groups: lifecycle.groups_of(uuid).await?,
    }))
}

/// Retrieve a single group
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns the requested group", body = GroupEntry),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Group does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[get("/groups/{uuid}")]
pub async fn get_group(
    path: Path<PathUuid>,
    lifecycle: Data<RequestLifecycle>,
) -> ApiResult<Json<GroupEntry>> {
    Ok(Json(lifecycle.group_by_uuid(path.uuid).await?))
}

/// The members of a group
#[derive(Serialize, ToSchema)]
pub struct GetGroupMembersResponse {
    members: Vec<GroupMemberEntry>,
}

/// Retrieve the members of a group
///
/// Only members may see the member list.
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns the members of the group", body = GetGroupMembersResponse),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Group does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[get("/groups/{uuid}/members")]
pub async fn get_group_members(
    path: Path<PathUuid>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<Json<GetGroupMembersResponse>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    lifecycle.group_by_uuid(path.uuid).await?;
    if !lifecycle.is_group_member(path.uuid, uuid).await? {
        return Err(ApiError::MissingPrivileges);
    }

    Ok(Json(GetGroupMembersResponse {
        members: lifecycle.members_of(path.uuid).await?,
    }))
}

/// The request to join a group
#[derive(Deserialize, ToSchema)]
pub struct CreateGroupJoinRequest {
    /// An optional message for the group's managers
    #[serde(default)]
    #[schema(example = "let me in please")]
    message: String,
}

/// Apply for membership in a group
///
/// The group's owner and admins are notified and can accept or reject the
/// request. At most one pending request per (applicant, group) pair can be
/// outstanding.
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 201, description = "Join request has been created"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Group does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    request_body = CreateGroupJoinRequest,
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[post("/groups/{uuid}/join")]
pub async fn create_group_join_request(
    path: Path<PathUuid>,
    req: Json<CreateGroupJoinRequest>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<HttpResponse> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    let req = req.into_inner();
    lifecycle
        .create_group_join_request(uuid, path.uuid, req.message)
        .await?;

    Ok(HttpResponse::Created().finish())
}

/// The pending join requests of all groups the executing user manages
#[derive(Serialize, ToSchema)]
pub struct GetGroupApplicationsResponse {
    applications: Vec<GroupJoinRequestEntry>,
}

/// Retrieve the pending join requests of all groups the executing user
/// owns or administrates
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns all pending join requests", body = GetGroupApplicationsResponse),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    security(("session_cookie" = []))
)]
#[get("/groups/applications")]
pub async fn get_group_applications(
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<Json<GetGroupApplicationsResponse>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    Ok(Json(GetGroupApplicationsResponse {
        applications: lifecycle.pending_group_join_requests(uuid).await?,
    }))
}

/// Accept a group join request
///
/// The executing user must own or administrate the group the request is
/// aimed at.
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Join request has been accepted"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Request does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[put("/groups/applications/{uuid}/accept")]
pub async fn accept_group_application(
    path: Path<PathUuid>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<HttpResponse> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    lifecycle.accept_group_join_request(uuid, path.uuid).await?;

    Ok(HttpResponse::Ok().finish())
}

/// Reject a group join request
#[utoipa::path(
    tag = "Groups",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Join request has been rejected"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Request does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[put("/groups/applications/{uuid}/reject")]
pub async fn reject_group_application(
    path: Path<PathUuid>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<HttpResponse> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    lifecycle.reject_group_join_request(uuid, path.uuid).await?;

    Ok(HttpResponse::Ok().finish())
}
