//! All handlers for the account endpoints live in here

use actix_toolbox::tb_middleware::Session;
use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, HttpResponse};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use rand::thread_rng;
use rorm::{insert, query, FieldAccess, Model};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cache::entries::{self, AccountEntry};
use crate::cache::keys;
use crate::models::{Account, AccountInsert};
use crate::server::handler::{ApiError, ApiErrorResponse, ApiResult, PathUuid};
use crate::service::Stores;

/// The content to register a new account
#[derive(Debug, Deserialize, ToSchema)]
pub struct AccountRegistrationRequest {
    #[schema(example = "user123")]
    username: String,
    #[schema(example = "Herbert")]
    display_name: String,
    #[schema(example = "super-secure-password")]
    password: String,
}

/// Register a new account
#[utoipa::path(
    tag = "Accounts",
    responses(
        (status = 200, description = "Account got created"),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    request_body = AccountRegistrationRequest,
)]
#[post("/api/v1/accounts/register")]
pub async fn register_account(
    req: Json<AccountRegistrationRequest>,
    stores: Data<Stores>,
) -> ApiResult<HttpResponse> {
    if req.username.is_empty() {
        return Err(ApiError::InvalidUsername);
    }

    if req.display_name.is_empty() {
        return Err(ApiError::InvalidDisplayName);
    }

    let mut tx = stores.db.start_transaction().await?;

    if query!(&mut tx, (Account::F.uuid,))
        .condition(Account::F.username.equals(&req.username))
        .optional()
        .await?
        .is_some()
    {
        return Err(ApiError::UsernameAlreadyOccupied);
    }

    let salt = SaltString::generate(&mut thread_rng());
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)?
        .to_string();

    let uuid = Uuid::new_v4();
    insert!(&mut tx, AccountInsert)
        .single(&AccountInsert {
            uuid,
            username: req.username.clone(),
            display_name: req.display_name.clone(),
            password_hash,
            avatar_url: None,
            last_login: None,
        })
        .await?;

    tx.commit().await?;

    // Warm the profile cache for username lookups
    let entry = AccountEntry {
        uuid,
        username: req.username.clone(),
        display_name: req.display_name.clone(),
        avatar_url: None,
    };
    if let Some(payload) = entries::encode(&entry) {
        stores
            .cache
            .put_value(
                &keys::user(&req.username),
                &payload,
                stores.cache.derived_ttl(),
            )
            .await;
    }

    Ok(HttpResponse::Ok().finish())
}

/// Returns the account that is currently logged-in
#[utoipa::path(
    tag = "Accounts",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns the account data of the current user", body = AccountEntry),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    security(("session_cookie" = []))
)]
#[get("/accounts/me")]
pub async fn get_me(stores: Data<Stores>, session: Session) -> ApiResult<Json<AccountEntry>> {
    let uuid: Uuid = session.get("uuid")?.ok_or(ApiError::SessionCorrupt)?;

    let account = query!(&stores.db, Account)
        .condition(Account::F.uuid.equals(uuid.as_ref()))
        .optional()
        .await?
        .ok_or(ApiError::SessionCorrupt)?;

    Ok(Json(AccountEntry {
        uuid: account.uuid,
        username: account.username,
        display_name: account.display_name,
        avatar_url: account.avatar_url,
    }))
}

/// Retrieve details for an account by uuid
///
/// As usernames are changeable, accounts are identified by uuids, which are used throughout
/// the API.
#[utoipa::path(
    tag = "Accounts",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns the requested account data", body = AccountEntry),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    params(PathUuid),
    security(("session_cookie" = [])))]
#[get("/accounts/{uuid}")]
pub async fn lookup_account_by_uuid(
    req: Path<PathUuid>,
    stores: Data<Stores>,
) -> ApiResult<Json<AccountEntry>> {
    let account = query!(&stores.db, Account)
        .condition(Account::F.uuid.equals(req.uuid.as_ref()))
        .optional()
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(AccountEntry {
        uuid: req.uuid,
        username: account.username,
        display_name: account.display_name,
        avatar_url: account.avatar_url,
    }))
}

/// The request to lookup an account by its username
#[derive(Deserialize, ToSchema)]
pub struct LookupAccountUsernameRequest {
    #[schema(example = "user123")]
    username: String,
}

/// Retrieve details for an account by its username
///
/// If you receive a username by a user, you should convert them with this endpoint to an uuid.
/// Those are used in the database to uniquely identify a user and can't be changed.
///
/// The profile is served from the cache when possible; the store answers on
/// a miss and the cache is backfilled.
#[utoipa::path(
    tag = "Accounts",
    context_path = "/api/v1",
    responses(
        (status = 200, description = "Returns the requested account data", body = AccountEntry),
        (status = 400, description = "Client error", body = ApiErrorResponse),
        (status = 500, description = "Server error", body = ApiErrorResponse),
    ),
    request_body = LookupAccountUsernameRequest,
    security(("session_cookie" = []))
)]
#[post("/accounts/lookup")]
pub async fn lookup_account_by_username(
    req: Json<LookupAccountUsernameRequest>,
    stores: Data<Stores>,
) -> ApiResult<Json<AccountEntry>> {
    let cache = &stores.cache;
    let key = keys::user(&req.username);

    let loaded = cache
        .value_or_load(&key, cache.derived_ttl(), || async {
            let account = query!(&stores.db, Account)
                .condition(Account::F.username.equals(&req.username))
                .optional()
                .await
                .ok()
                .flatten()?;
            entries::encode(&AccountEntry {
                uuid: account.uuid,
                username: account.username,
                display_name: account.display_name,
                avatar_url: account.avatar_url,
            })
        })
        .await;

    if let Some(entry) = loaded.as_deref().and_then(entries::decode::<AccountEntry>) {
        return Ok(Json(entry));
    }

    let account = query!(&stores.db, Account)
        .condition(Account::F.username.equals(&req.username))
        .optional()
        .await?
        .ok_or(ApiError::InvalidUsername)?;

    Ok(Json(AccountEntry {
        uuid: account.uuid,
        username: account.username,
        display_name: account.display_name,
        avatar_url: account.avatar_url,
    }))
}
