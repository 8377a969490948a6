//! This module holds the handler of sograph

use std::fmt::{Display, Formatter};

use actix_toolbox::tb_middleware::actix_session::{SessionGetError, SessionInsertError};
use actix_web::body::BoxBody;
use actix_web::HttpResponse;
use log::{debug, error, trace};
use serde::{Deserialize, Serialize};
use serde_repr::Serialize_repr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::service::ServiceError;

pub use crate::server::handler::accounts::*;
pub use crate::server::handler::auth::*;
pub use crate::server::handler::friends::*;
pub use crate::server::handler::groups::*;
pub use crate::server::handler::health::*;
pub use crate::server::handler::websocket::*;

pub mod accounts;
pub mod auth;
pub mod friends;
pub mod groups;
pub mod health;
pub mod websocket;

/// The result that is used throughout the complete api.
pub type ApiResult<T> = Result<T, ApiError>;

/// A uuid in a path
#[derive(Deserialize, IntoParams)]
pub struct PathUuid {
    /// The uuid
    pub uuid: Uuid,
}

#[derive(Serialize_repr, ToSchema)]
#[repr(u16)]
pub(crate) enum ApiStatusCode {
    Unauthenticated = 1000,
    LoginFailed = 1001,
    UsernameAlreadyOccupied = 1002,
    InvalidUsername = 1003,
    InvalidDisplayName = 1004,
    InvalidPassword = 1005,
    InvalidUuid = 1006,
    NotFound = 1007,
    AlreadyExists = 1008,
    Conflict = 1009,
    MissingPrivileges = 1010,
    EmptyJson = 1011,

    InternalServerError = 2000,
    DatabaseError = 2001,
    SessionError = 2002,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct ApiErrorResponse {
    #[schema(example = "Error message is here")]
    message: String,
    #[schema(example = 1000)]
    status_code: ApiStatusCode,
}

impl ApiErrorResponse {
    pub(crate) fn new(status_code: ApiStatusCode, message: String) -> Self {
        Self {
            message,
            status_code,
        }
    }
}

/// This enum holds all possible error types that can occur in the API
#[derive(Debug)]
pub enum ApiError {
    /// The user is not allowed to access the resource
    Unauthenticated,

    /// Login was not successful. Can be caused by incorrect username / password
    LoginFailed,
    /// The username is already occupied
    UsernameAlreadyOccupied,
    /// The username is invalid or unknown
    InvalidUsername,
    /// The display name is invalid
    InvalidDisplayName,
    /// The password is invalid
    InvalidPassword,
    /// The uuid is invalid, e.g. addressing yourself
    InvalidUuid,
    /// The addressed entity does not exist
    NotFound,
    /// The pending request or relationship already exists
    AlreadyExists,
    /// The request is not in a state that allows the transition
    Conflict,
    /// The executing user is missing privileges for this action
    MissingPrivileges,
    /// The json body was empty, but at least one parameter is required
    EmptyJson,

    /// Unspecified internal error
    InternalServerError,
    /// All errors that are thrown by the database
    DatabaseError(rorm::Error),
    /// An invalid hash is retrieved from the database
    InvalidHash(argon2::password_hash::Error),
    /// The session is in a corrupt state
    SessionCorrupt,
    /// An error occurred while retrieving data from the session
    SessionGet(SessionGetError),
    /// An error occurred while writing data to the session
    SessionInsert(SessionInsertError),
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthenticated => write!(f, "Unauthenticated"),
            ApiError::LoginFailed => write!(f, "The login was not successful"),
            ApiError::UsernameAlreadyOccupied => write!(f, "Username is already occupied"),
            ApiError::InvalidUsername => write!(f, "Invalid username"),
            ApiError::InvalidDisplayName => write!(f, "Invalid display name"),
            ApiError::InvalidPassword => write!(f, "Invalid password"),
            ApiError::InvalidUuid => write!(f, "Invalid uuid"),
            ApiError::NotFound => write!(f, "Not found"),
            ApiError::AlreadyExists => write!(f, "Already exists"),
            ApiError::Conflict => write!(f, "The request is not pending anymore"),
            ApiError::MissingPrivileges => write!(f, "Missing privileges"),
            ApiError::EmptyJson => write!(f, "Empty json, at least one parameter is required"),
            ApiError::InternalServerError
            | ApiError::DatabaseError(_)
            | ApiError::InvalidHash(_)
            | ApiError::SessionCorrupt
            | ApiError::SessionGet(_)
            | ApiError::SessionInsert(_) => write!(f, "Internal server error"),
        }
    }
}

impl actix_web::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse<BoxBody> {
        match self {
            ApiError::Unauthenticated => {
                trace!("Unauthenticated");

                HttpResponse::Unauthorized().json(ApiErrorResponse::new(
                    ApiStatusCode::Unauthenticated,
                    self.to_string(),
                ))
            }
            ApiError::LoginFailed => {
                debug!("Login request failed");

                HttpResponse::BadRequest().json(ApiErrorResponse::new(
                    ApiStatusCode::LoginFailed,
                    self.to_string(),
                ))
            }
            ApiError::UsernameAlreadyOccupied => HttpResponse::BadRequest().json(
                ApiErrorResponse::new(ApiStatusCode::UsernameAlreadyOccupied, self.to_string()),
            ),
            ApiError::InvalidUsername => HttpResponse::BadRequest().json(ApiErrorResponse::new(
                ApiStatusCode::InvalidUsername,
                self.to_string(),
            )),
            ApiError::InvalidDisplayName => HttpResponse::BadRequest().json(
                ApiErrorResponse::new(ApiStatusCode::InvalidDisplayName, self.to_string()),
            ),
            ApiError::InvalidPassword => HttpResponse::BadRequest().json(ApiErrorResponse::new(
                ApiStatusCode::InvalidPassword,
                self.to_string(),
            )),
            ApiError::InvalidUuid => HttpResponse::BadRequest().json(ApiErrorResponse::new(
                ApiStatusCode::InvalidUuid,
                self.to_string(),
            )),
            ApiError::NotFound => {
                trace!("Entity not found");

                HttpResponse::NotFound().json(ApiErrorResponse::new(
                    ApiStatusCode::NotFound,
                    self.to_string(),
                ))
            }
            ApiError::AlreadyExists => {
                debug!("Rejected duplicate request");

                HttpResponse::BadRequest().json(ApiErrorResponse::new(
                    ApiStatusCode::AlreadyExists,
                    self.to_string(),
                ))
            }
            ApiError::Conflict => {
                debug!("Rejected transition on settled request");

                HttpResponse::BadRequest().json(ApiErrorResponse::new(
                    ApiStatusCode::Conflict,
                    self.to_string(),
                ))
            }
            ApiError::MissingPrivileges => HttpResponse::BadRequest().json(ApiErrorResponse::new(
                ApiStatusCode::MissingPrivileges,
                self.to_string(),
            )),
            ApiError::EmptyJson => HttpResponse::BadRequest().json(ApiErrorResponse::new(
                ApiStatusCode::EmptyJson,
                self.to_string(),
            )),
            ApiError::InternalServerError => HttpResponse::InternalServerError().json(
                ApiErrorResponse::new(ApiStatusCode::InternalServerError, self.to_string()),
            ),
            ApiError::DatabaseError(err) => {
                error!("Database error: {err}");

                HttpResponse::InternalServerError().json(ApiErrorResponse::new(
                    ApiStatusCode::DatabaseError,
                    self.to_string(),
                ))
            }
            ApiError::InvalidHash(err) => {
                error!("Got invalid password hash from db: {err}");

                HttpResponse::InternalServerError().json(ApiErrorResponse::new(
                    ApiStatusCode::InternalServerError,
                    self.to_string(),
                ))
            }
            ApiError::SessionCorrupt => {
                error!("Session is corrupt");

                HttpResponse::InternalServerError().json(ApiErrorResponse::new(
                    ApiStatusCode::SessionError,
                    self.to_string(),
                ))
            }
            ApiError::SessionGet(err) => {
                error!("Could not retrieve data from session: {err}");

                HttpResponse::InternalServerError().json(ApiErrorResponse::new(
                    ApiStatusCode::SessionError,
                    self.to_string(),
                ))
            }
            ApiError::SessionInsert(err) => {
                error!("Could not write data to session: {err}");

                HttpResponse::InternalServerError().json(ApiErrorResponse::new(
                    ApiStatusCode::SessionError,
                    self.to_string(),
                ))
            }
        }
    }
}

impl From<rorm::Error> for ApiError {
    fn from(value: rorm::Error) -> Self {
        Self::DatabaseError(value)
    }
}

impl From<argon2::password_hash::Error> for ApiError {
    fn from(value: argon2::password_hash::Error) -> Self {
        Self::InvalidHash(value)
    }
}

impl From<SessionGetError> for ApiError {
    fn from(value: SessionGetError) -> Self {
        Self::SessionGet(value)
    }
}

impl From<SessionInsertError> for ApiError {
    fn from(value: SessionInsertError) -> Self {
        Self::SessionInsert(value)
    }
}

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::NotFound => Self::NotFound,
            ServiceError::AlreadyExists => Self::AlreadyExists,
            ServiceError::Conflict => Self::Conflict,
            ServiceError::MissingPrivileges => Self::MissingPrivileges,
            ServiceError::Store(err) => Self::DatabaseError(err),
        }
    }
}
