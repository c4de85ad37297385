use actix_web::web;

use crate::core::errors::AppError;
use crate::{auth, follow, posts, search, static_server, translate, users};

/// Route table for the whole application.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::FormConfig::default()
            .error_handler(|err, _| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::BadRequest(err.to_string()).into()),
    )
    .route(
        "/static/{filename:.*}",
        web::get().to(static_server::serve_static),
    )
    .service(
        web::scope("/auth")
            .route("/login", web::get().to(auth::login_form))
            .route("/login", web::post().to(auth::login_user))
            .route("/logout", web::get().to(auth::logout_user))
            .route("/register", web::get().to(auth::register_form))
            .route("/register", web::post().to(auth::register_user))
            .route(
                "/reset_password_request",
                web::get().to(auth::reset_password_request_form),
            )
            .route(
                "/reset_password_request",
                web::post().to(auth::reset_password_request),
            )
            .route(
                "/reset_password/{token}",
                web::get().to(auth::reset_password_form),
            )
            .route("/reset_password/{token}", web::post().to(auth::reset_password)),
    )
    .route("/", web::get().to(posts::index))
    .route("/", web::post().to(posts::submit_post))
    .route("/index", web::get().to(posts::index))
    .route("/index", web::post().to(posts::submit_post))
    .route("/explore", web::get().to(posts::explore))
    .route("/search", web::get().to(search::search))
    .route("/profile/{username}", web::get().to(users::profile))
    .route("/edit_profile", web::get().to(users::edit_profile_form))
    .route("/edit_profile", web::post().to(users::edit_profile))
    .route("/follow/{username}", web::post().to(follow::handle_follow))
    .route("/unfollow/{username}", web::post().to(follow::handle_unfollow))
    .route("/translate", web::post().to(translate::translate_text))
    .route("/{username}/followers", web::get().to(follow::followers_list))
    .route("/{username}/followed", web::get().to(follow::followed_list));
}
