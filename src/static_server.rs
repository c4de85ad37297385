use actix_web::{web, HttpResponse};
use mime_guess::from_path;
use rust_embed::RustEmbed;

use crate::core::errors::{AppError, AppResult};

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

pub async fn serve_static(path: web::Path<String>) -> AppResult<HttpResponse> {
    let file_path = path.into_inner();
    let file = Assets::get(file_path.trim_start_matches('/'))
        .ok_or_else(|| AppError::NotFound(format!("{} not found", file_path)))?;

    let mime = from_path(&file_path).first_or_octet_stream();

    Ok(HttpResponse::Ok()
        .content_type(mime.as_ref())
        .body(file.data.into_owned()))
}
