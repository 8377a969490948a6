//! This module holds the server definition

use std::io;
use std::net::SocketAddr;

use actix_toolbox::tb_middleware::{setup_logging_mw, LoggingMiddlewareConfig};
use actix_web::http::StatusCode;
use actix_web::middleware::{Compress, ErrorHandlers};
use actix_web::web::{scope, Data, JsonConfig, PayloadConfig};
use actix_web::{App, HttpServer};
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::chan::WsManagerChan;
use crate::config::Config;
use crate::server::handler::{
    accept_friend_request, accept_group_application, create_friend_request, create_group,
    create_group_join_request, get_friend_requests, get_friends, get_group,
    get_group_applications, get_group_members, get_groups, get_me, health, login, logout,
    lookup_account_by_username, lookup_account_by_uuid, register_account, reject_friend_request,
    reject_group_application, websocket,
};
use crate::server::middleware::{handle_not_found, json_extractor_error, AuthenticationRequired};
use crate::server::swagger::ApiDoc;
use crate::service::{MessageDispatcher, PresenceRegistry, RequestLifecycle, Stores};

pub mod handler;
pub mod middleware;
pub mod swagger;

/// Settings the handlers need at runtime that are not part of a component
pub struct RuntimeSettings {
    /// The routing address connections on this node are registered with
    pub node_address: String,
}

/// Start the sograph server
///
/// **Parameter**:
/// - `config`: Reference to a [Config] struct
/// - `stores`: [Stores] : The store and cache handles
/// - `lifecycle`: [RequestLifecycle] : The request lifecycle service
/// - `presence`: [PresenceRegistry] : The presence registry
/// - `dispatcher`: [MessageDispatcher] : The message dispatcher
/// - `ws_manager_chan`: [WsManagerChan] : The channel to manage websocket connections
pub async fn start_server(
    config: &Config,
    stores: Stores,
    lifecycle: RequestLifecycle,
    presence: PresenceRegistry,
    dispatcher: MessageDispatcher,
    ws_manager_chan: WsManagerChan,
) -> Result<(), io::Error> {
    let s_addr = SocketAddr::new(config.server.listen_address, config.server.listen_port);

    info!("Starting to listen on {}", s_addr);

    let runtime_settings = Data::new(RuntimeSettings {
        node_address: config.dispatch.node_address.clone(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(PayloadConfig::default())
            .app_data(JsonConfig::default().error_handler(json_extractor_error))
            .app_data(runtime_settings.clone())
            .app_data(Data::new(stores.clone()))
            .app_data(Data::new(lifecycle.clone()))
            .app_data(Data::new(presence.clone()))
            .app_data(Data::new(dispatcher.clone()))
            .app_data(Data::new(ws_manager_chan.clone()))
            .wrap(setup_logging_mw(LoggingMiddlewareConfig::default()))
            .wrap(Compress::default())
            .wrap(ErrorHandlers::new().handler(StatusCode::NOT_FOUND, handle_not_found))
            .service(SwaggerUi::new("/docs/{_:.*}").url("/api-doc/openapi.json", ApiDoc::openapi()))
            .service(register_account)
            .service(scope("/api/v1/auth").service(login).service(logout))
            .service(
                scope("/api/v1")
                    .wrap(AuthenticationRequired)
                    .service(websocket)
                    .service(get_me)
                    .service(lookup_account_by_username)
                    .service(lookup_account_by_uuid)
                    .service(create_friend_request)
                    .service(get_friend_requests)
                    .service(accept_friend_request)
                    .service(reject_friend_request)
                    .service(get_friends)
                    // Must come before the `/groups/{uuid}` routes
                    .service(get_group_applications)
                    .service(accept_group_application)
                    .service(reject_group_application)
                    .service(create_group)
                    .service(get_groups)
                    .service(get_group)
                    .service(get_group_members)
                    .service(create_group_join_request)
                    .service(health),
            )
    })
    .bind(s_addr)?
    .run()
    .await?;

    Ok(())
}
