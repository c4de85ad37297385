use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    /// Anonymous access to a page that needs a session. Carries the path to
    /// come back to after login.
    #[error("Login required")]
    LoginRequired(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Store Error: {0}")]
    Store(String),
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl AppError {
    fn title(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "Bad Request",
            AppError::LoginRequired(_) => "Unauthorized",
            AppError::NotFound(_) => "File Not Found",
            AppError::Store(_) | AppError::Internal(_) => "An unexpected error has occurred",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::LoginRequired(_) => StatusCode::FOUND,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::LoginRequired(next) = self {
            let location = format!("/auth/login?next={}", urlencoding::encode(next));
            return HttpResponse::Found()
                .insert_header((header::LOCATION, location))
                .finish();
        }

        if matches!(self, AppError::Store(_) | AppError::Internal(_)) {
            tracing::error!(error = %self, "request failed");
        }

        let body = format!(
            "<!doctype html><html><head><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{detail}</p><p><a href=\"/index\">Back</a></p></body></html>",
            title = self.title(),
            detail = html_escape::encode_text(&self.to_string()),
        );
        HttpResponse::build(self.status_code())
            .content_type("text/html; charset=utf-8")
            .body(body)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_required_redirects_with_next() {
        let resp = AppError::LoginRequired("/profile/bob".to_string()).error_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "/auth/login?next=%2Fprofile%2Fbob");
    }

    #[test]
    fn not_found_is_404() {
        let err = AppError::NotFound("User not found".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Not Found: User not found");
    }
}
