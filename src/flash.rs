//! One-shot messages carried across a redirect in a cookie, then shown once
//! by the next rendered page.

use actix_web::cookie::Cookie;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse};

use crate::config::FLASH_COOKIE;

pub fn pending(req: &HttpRequest) -> Vec<String> {
    req.cookie(FLASH_COOKIE)
        .and_then(|c| {
            let raw = urlencoding::decode(c.value()).ok()?.into_owned();
            serde_json::from_str::<Vec<String>>(&raw).ok()
        })
        .unwrap_or_default()
}

fn encode(messages: &[String]) -> String {
    let json = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string());
    urlencoding::encode(&json).into_owned()
}

/// 302 to `location`, queueing `message` after any still-pending ones.
pub fn redirect_with_flash(
    req: &HttpRequest,
    location: &str,
    message: impl Into<String>,
) -> HttpResponse {
    let mut messages = pending(req);
    messages.push(message.into());

    let cookie = Cookie::build(FLASH_COOKIE, encode(&messages))
        .path("/")
        .http_only(true)
        .finish();

    HttpResponse::Found()
        .insert_header((header::LOCATION, location.to_string()))
        .cookie(cookie)
        .finish()
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location.to_string()))
        .finish()
}

/// Drops the flash cookie from the client once its messages were rendered.
pub fn consume(req: &HttpRequest, resp: &mut HttpResponse) {
    if req.cookie(FLASH_COOKIE).is_some() {
        let mut removal = Cookie::new(FLASH_COOKIE, "");
        removal.set_path("/");
        removal.make_removal();
        let _ = resp.add_cookie(&removal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn redirect_appends_to_pending() {
        let first = TestRequest::default().to_http_request();
        let resp = redirect_with_flash(&first, "/index", "one");
        let cookie = resp.cookies().find(|c| c.name() == FLASH_COOKIE).unwrap().into_owned();

        let second = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(pending(&second), vec!["one".to_string()]);

        let resp = redirect_with_flash(&second, "/index", "two");
        let cookie = resp.cookies().find(|c| c.name() == FLASH_COOKIE).unwrap().into_owned();
        let third = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(pending(&third), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn garbage_cookie_is_ignored() {
        let req = TestRequest::default()
            .cookie(Cookie::new(FLASH_COOKIE, "%%%not-json"))
            .to_http_request();
        assert!(pending(&req).is_empty());
    }
}
