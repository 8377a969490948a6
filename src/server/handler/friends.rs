//! Handlers for friend links and friend requests

use actix_toolbox::tb_middleware::Session;
use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, put, HttpResponse};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cache::entries::{FriendLinkEntry, FriendRequestEntry};
use crate::server::handler::{ApiError, ApiErrorResponse, ApiResult, PathUuid};
use crate::service::{PresenceRegistry, PresenceStatus, RequestLifecycle};

/// The request of a new friendship
#[derive(Deserialize, ToSchema)]
pub struct CreateFriendRequest {
    /// The uuid of the new friend
    uuid: Uuid,
    /// An optional message for the new friend
    #[serde(default)]
    #[schema(example = "hi, it's me")]
    message: String,
}

/// Create a new friend request
///
/// At most one pending request per (requester, target) pair can be
/// outstanding; a second one is rejected.
#[utoipa::path(
    tag = "Friends",
    context_path = "/api/v1",
    responses(
        (status = 201, description = "Friend request has been created"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Target does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    request_body = CreateFriendRequest,
    security(("session_cookie" = []))
)]
#[post("/friends/requests")]
pub async fn create_friend_request(
    req: Json<CreateFriendRequest>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<HttpResponse> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    if req.uuid == uuid {
        return Err(ApiError::InvalidUuid);
    }

    let req = req.into_inner();
    lifecycle
        .create_friend_request(uuid, req.uuid, req.message)
        .await?;

    Ok(HttpResponse::Created().finish())
}

/// The pending friend requests aimed at the executing user
#[derive(serde::Serialize, ToSchema)]
pub struct GetFriendRequestsResponse {
    requests: Vec<FriendRequestEntry>,
}

/// Retrieve all pending friend requests aimed at the executing user
#[utoipa::path(
    tag = "Friends",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns all pending friend requests", body = GetFriendRequestsResponse),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    security(("session_cookie" = []))
)]
#[get("/friends/requests")]
pub async fn get_friend_requests(
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<Json<GetFriendRequestsResponse>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    Ok(Json(GetFriendRequestsResponse {
        requests: lifecycle.pending_friend_requests(uuid).await?,
    }))
}

/// Accept a friend request
///
/// Both directions of the friendship are created; afterwards the request is
/// gone from the pending list and both friend lists reflect the new link.
#[utoipa::path(
    tag = "Friends",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Friend request has been accepted"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Request does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[put("/friends/requests/{uuid}/accept")]
pub async fn accept_friend_request(
    path: Path<PathUuid>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<HttpResponse> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    lifecycle.accept_friend_request(uuid, path.uuid).await?;

    Ok(HttpResponse::Ok().finish())
}

/// Reject a friend request
#[utoipa::path(
    tag = "Friends",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Friend request has been rejected"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 404, description = "Request does not exist", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = []))
)]
#[put("/friends/requests/{uuid}/reject")]
pub async fn reject_friend_request(
    path: Path<PathUuid>,
    lifecycle: Data<RequestLifecycle>,
    session: Session,
) -> ApiResult<HttpResponse> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    lifecycle.reject_friend_request(uuid, path.uuid).await?;

    Ok(HttpResponse::Ok().finish())
}

/// A single friend with their current reachability
#[derive(serde::Serialize, ToSchema)]
pub struct FriendResponse {
    online: bool,
    #[serde(flatten)]
    link: FriendLinkEntry,
}

/// The friends of the executing user
#[derive(serde::Serialize, ToSchema)]
pub struct GetFriendsResponse {
    friends: Vec<FriendResponse>,
}

/// Retrieve the friends of the executing user
///
/// `online` is a display-only snapshot of the friend's presence record; an
/// unknown presence is reported as offline.
#[utoipa::path(
    tag = "Friends",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns all friends", body = GetFriendsResponse),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    security(("session_cookie" = []))
)]
#[get("/friends")]
pub async fn get_friends(
    lifecycle: Data<RequestLifecycle>,
    presence: Data<PresenceRegistry>,
    session: Session,
) -> ApiResult<Json<GetFriendsResponse>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    let links = lifecycle.friends_of(uuid).await?;

    let mut friends = Vec::with_capacity(links.len());
    for link in links {
        let online = matches!(
            presence.status_or_offline(link.friend).await,
            PresenceStatus::Online(_)
        );
        friends.push(FriendResponse { online, link });
    }

    Ok(Json(GetFriendsResponse { friends }))
}
