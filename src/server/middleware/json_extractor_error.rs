use actix_web::error::JsonPayloadError;
use actix_web::{HttpRequest, HttpResponse};
use log::debug;

use crate::server::handler::{ApiErrorResponse, ApiStatusCode};

/// Render json extraction failures as the api's json error format
pub(crate) fn json_extractor_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    debug!("Json extractor error: {err}");

    let response = HttpResponse::BadRequest().json(ApiErrorResponse::new(
        ApiStatusCode::EmptyJson,
        "Invalid json body".to_string(),
    ));

    actix_web::error::InternalError::from_response(err, response).into()
}
