use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::header;
use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{CredentialStore, TokenService};
use crate::configuration::Settings;
use crate::error::AppError;
use crate::logger::LoggerMiddleware;
use crate::middleware::AccessGate;
use crate::routes::{
    accept_invitation, accept_request, add_participant, category_events, create_category,
    create_event, current_user, delete_category, delete_event, delete_user, get_category,
    get_event, get_user, health_check, invite_friends, list_categories, list_events,
    list_friends, list_users, login, logout, refuse_invitation, refuse_request, remove_friend,
    remove_participant, search_events, send_request, signup, update_category, update_event,
    update_user,
};

pub fn run(
    listener: TcpListener,
    connection: PgPool,
    store: Arc<dyn CredentialStore>,
    settings: &Settings,
) -> Result<Server, std::io::Error> {
    let connection = web::Data::new(connection);
    let token_service = Arc::new(TokenService::new(&settings.jwt));
    let token_data = web::Data::from(token_service.clone());
    let store_data = web::Data::from(store.clone());
    let application = web::Data::new(settings.application.clone());
    let allowed_origin = settings.application.allowed_origin.clone();
    let secure_cookies = settings.application.secure_cookies;

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&allowed_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .supports_credentials()
            .max_age(3600);

        // Extractor failures get the same error shape as everything else
        let json_config = web::JsonConfig::default()
            .error_handler(|err, _req| AppError::invalid(err.to_string()).into());
        let query_config = web::QueryConfig::default()
            .error_handler(|err, _req| AppError::invalid(err.to_string()).into());
        let path_config = web::PathConfig::default()
            .error_handler(|err, _req| AppError::invalid(err.to_string()).into());

        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)
            .wrap(cors)

            // Shared state
            .app_data(json_config)
            .app_data(query_config)
            .app_data(path_config)
            .app_data(connection.clone())
            .app_data(token_data.clone())
            .app_data(store_data.clone())
            .app_data(application.clone())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login))
                    .route("/logout", web::post().to(logout)),
            )

            // Protected routes
            .service(
                web::scope("/api")
                    .wrap(AccessGate::new(
                        token_service.clone(),
                        store.clone(),
                        secure_cookies,
                    ))
                    .route("/me", web::get().to(current_user))
                    .service(
                        web::scope("/users")
                            .route("", web::get().to(list_users))
                            .route("/{id}", web::get().to(get_user))
                            .route("/{id}", web::put().to(update_user))
                            .route("/{id}", web::delete().to(delete_user)),
                    )
                    .service(
                        web::scope("/friends")
                            .route("", web::get().to(list_friends))
                            .route("/{id}/request", web::post().to(send_request))
                            .route("/{id}/accept", web::post().to(accept_request))
                            .route("/{id}/refuse", web::post().to(refuse_request))
                            .route("/{id}", web::delete().to(remove_friend)),
                    )
                    .service(
                        web::scope("/categories")
                            .route("", web::get().to(list_categories))
                            .route("", web::post().to(create_category))
                            .route("/{id}", web::get().to(get_category))
                            .route("/{id}", web::put().to(update_category))
                            .route("/{id}", web::delete().to(delete_category))
                            .route("/{id}/events", web::get().to(category_events)),
                    )
                    .service(
                        web::scope("/events")
                            .route("", web::get().to(list_events))
                            .route("", web::post().to(create_event))
                            // Before "/{id}" so "search" is not taken for an id
                            .route("/search", web::get().to(search_events))
                            .route("/{id}", web::get().to(get_event))
                            .route("/{id}", web::put().to(update_event))
                            .route("/{id}", web::delete().to(delete_event))
                            .route("/{id}/participants", web::post().to(add_participant))
                            .route(
                                "/{id}/participants/{user_id}",
                                web::delete().to(remove_participant),
                            )
                            .route("/{id}/invitations", web::post().to(invite_friends))
                            .route("/{id}/invitations/accept", web::post().to(accept_invitation))
                            .route("/{id}/invitations/refuse", web::post().to(refuse_invitation)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
