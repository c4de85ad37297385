use actix_web::cookie::{time, Cookie};
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use futures::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::{now, safe_next, validate_uuid, verify_password};
use crate::core::store::Store;
use crate::flash::{redirect, redirect_with_flash};
use crate::forms::{
    FormErrors, LoginForm, RegistrationForm, ResetPasswordForm, ResetPasswordRequestForm,
};
use crate::models::models::{TokenData, User};
use crate::templates::{self, Vars};
use crate::users::{
    find_user, find_user_by_email, find_user_by_username, insert_user, set_password,
    touch_last_seen,
};
use crate::AppState;

// === Session tokens ===

pub async fn issue_token(store: &Store, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now(),
    };
    store.set_json(&token_key(&token), &data).await?;
    Ok(token)
}

pub async fn revoke_token(store: &Store, token: &str) -> anyhow::Result<()> {
    store.delete(&token_key(token)).await
}

fn is_expired(data: &TokenData, expiration_hours: i64) -> bool {
    Utc::now() - data.created_at > Duration::hours(expiration_hours)
}

/// Resolves a session token to its user id. Expired tokens are deleted on
/// sight; they and tokens of users that no longer exist resolve to `None`.
pub async fn validate_token(
    store: &Store,
    expiration_hours: i64,
    token: &str,
) -> anyhow::Result<Option<String>> {
    if !validate_uuid(token) {
        return Ok(None);
    }
    let Some(data) = store.get_json::<TokenData>(&token_key(token)).await? else {
        return Ok(None);
    };
    if is_expired(&data, expiration_hours) {
        revoke_token(store, token).await?;
        return Ok(None);
    }
    if !store.exists(&user_key(&data.user_id)).await? {
        return Ok(None);
    }
    Ok(Some(data.user_id))
}

/// Deletes every expired session token. Returns how many were removed.
pub async fn purge_expired_tokens(store: &Store, expiration_hours: i64) -> anyhow::Result<usize> {
    let mut purged = 0;
    for key in store.keys_with_prefix(&token_key("")).await? {
        let expired = match store.get_json::<TokenData>(&key).await {
            Ok(Some(data)) => is_expired(&data, expiration_hours),
            Ok(None) => false,
            Err(_) => true,
        };
        if expired {
            store.delete(&key).await?;
            purged += 1;
        }
    }
    Ok(purged)
}

/// Candidate tokens in the order they are tried: session cookie, then
/// `Authorization: Bearer`.
fn request_tokens(req: &HttpRequest) -> Vec<String> {
    let mut tokens = Vec::new();
    if let Some(c) = req.cookie(SESSION_COOKIE) {
        tokens.push(c.value().to_string());
    }
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if let Some(token) = bearer {
        tokens.push(token);
    }
    tokens
}

fn session_cookie(token: &str, remember: bool, hours: i64) -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .finish();
    if remember {
        cookie.set_max_age(time::Duration::hours(hours));
    }
    cookie
}

fn app_state(req: &HttpRequest) -> Result<web::Data<AppState>, AppError> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("application state missing".to_string()))
}

/// The user of the first candidate token that validates.
async fn session_user(req: &HttpRequest) -> Result<Option<User>, AppError> {
    let state = app_state(req)?;
    for token in request_tokens(req) {
        let hours = state.config.token_expiration_hours;
        if let Some(user_id) = validate_token(&state.store, hours, &token).await? {
            return Ok(find_user(&state.store, &user_id).await?);
        }
    }
    Ok(None)
}

/// The logged-in user. Extracting it from an anonymous request fails with a
/// redirect to the login page; extracting it refreshes `last_seen`.
pub struct CurrentUser(User);

impl CurrentUser {
    pub fn user(&self) -> &User {
        &self.0
    }

    pub fn into_user(self) -> User {
        self.0
    }
}

async fn authenticate(req: HttpRequest) -> Result<CurrentUser, AppError> {
    let next = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/index".to_string());

    let mut user = session_user(&req)
        .await?
        .ok_or(AppError::LoginRequired(next))?;
    let state = app_state(&req)?;
    touch_last_seen(&state.store, &mut user).await?;
    Ok(CurrentUser(user))
}

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        Box::pin(authenticate(req.clone()))
    }
}

/// The logged-in user if any, for pages anonymous visitors may see.
pub struct MaybeUser(pub Option<User>);

impl FromRequest for MaybeUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move { session_user(&req).await.map(MaybeUser) })
    }
}

// === Password reset tokens ===

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    reset_password: String,
    exp: i64,
}

pub fn get_reset_password_token(user: &User, secret: &str) -> anyhow::Result<String> {
    let claims = ResetClaims {
        reset_password: user.id.clone(),
        exp: Utc::now().timestamp() + RESET_TOKEN_EXPIRATION_SECS,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_reset_password_token(token: &str, secret: &str) -> Option<String> {
    decode::<ResetClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.reset_password)
}

// === HTTP Handlers ===

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

fn next_query(next: Option<&str>) -> String {
    safe_next(next)
        .map(|n| format!("?next={}", urlencoding::encode(&n)))
        .unwrap_or_default()
}

fn render_login(
    req: &HttpRequest,
    form: &LoginForm,
    errors: &FormErrors,
    next: Option<&str>,
) -> AppResult<HttpResponse> {
    let mut vars = Vars::new();
    vars.insert(
        "username",
        html_escape::encode_double_quoted_attribute(&form.username).to_string(),
    );
    vars.insert("username_errors", errors.render("username"));
    vars.insert("password_errors", errors.render("password"));
    vars.insert(
        "next_query",
        html_escape::encode_double_quoted_attribute(&next_query(next)).to_string(),
    );
    templates::page(req, None, "Sign In", "login.html", vars)
}

pub async fn login_form(
    req: HttpRequest,
    maybe: MaybeUser,
    query: web::Query<NextQuery>,
) -> AppResult<HttpResponse> {
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    render_login(&req, &LoginForm::default(), &FormErrors::default(), query.next.as_deref())
}

pub async fn login_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    maybe: MaybeUser,
    query: web::Query<NextQuery>,
    form: web::Form<LoginForm>,
) -> AppResult<HttpResponse> {
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    let form = form.into_inner();
    let errors = form.check();
    if !errors.is_empty() {
        return render_login(&req, &form, &errors, query.next.as_deref());
    }

    let user = find_user_by_username(&state.store, form.username.trim())
        .await?
        .filter(|u| verify_password(&form.password, &u.password_hash));
    let Some(user) = user else {
        tracing::info!(username = %form.username, "failed login");
        return Ok(redirect_with_flash(
            &req,
            &format!("/auth/login{}", next_query(query.next.as_deref())),
            "Invalid username or password",
        ));
    };

    let hours = state.config.token_expiration_hours;
    let purged = purge_expired_tokens(&state.store, hours).await?;
    if purged > 0 {
        tracing::debug!(purged, "expired session tokens removed");
    }
    let token = issue_token(&state.store, &user.id).await?;
    tracing::info!(user_id = %user.id, "login");

    let location = safe_next(query.next.as_deref()).unwrap_or_else(|| "/index".to_string());
    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .cookie(session_cookie(
            &token,
            form.remember(),
            state.config.token_expiration_hours,
        ))
        .finish())
}

pub async fn logout_user(req: HttpRequest, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    for token in request_tokens(&req) {
        if validate_uuid(&token) {
            revoke_token(&state.store, &token).await?;
        }
    }
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.make_removal();

    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, "/index"))
        .cookie(removal)
        .finish())
}

fn render_register(
    req: &HttpRequest,
    form: &RegistrationForm,
    errors: &FormErrors,
) -> AppResult<HttpResponse> {
    let mut vars = Vars::new();
    vars.insert(
        "username",
        html_escape::encode_double_quoted_attribute(&form.username).to_string(),
    );
    vars.insert(
        "email",
        html_escape::encode_double_quoted_attribute(&form.email).to_string(),
    );
    vars.insert("username_errors", errors.render("username"));
    vars.insert("email_errors", errors.render("email"));
    vars.insert("password_errors", errors.render("password"));
    vars.insert("password2_errors", errors.render("password2"));
    templates::page(req, None, "Register", "register.html", vars)
}

pub async fn register_form(req: HttpRequest, maybe: MaybeUser) -> AppResult<HttpResponse> {
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    render_register(&req, &RegistrationForm::default(), &FormErrors::default())
}

pub async fn register_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    maybe: MaybeUser,
    form: web::Form<RegistrationForm>,
) -> AppResult<HttpResponse> {
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    let form = form.into_inner();
    let errors = form.check(&state.store).await?;
    if !errors.is_empty() {
        return render_register(&req, &form, &errors);
    }

    let user = insert_user(&state.store, &form.username, &form.email, &form.password).await?;
    tracing::info!(user_id = %user.id, username = %user.username, "registered");

    Ok(redirect_with_flash(
        &req,
        "/auth/login",
        "Congratulations, you are now a registered user!",
    ))
}

fn render_reset_request(
    req: &HttpRequest,
    form: &ResetPasswordRequestForm,
    errors: &FormErrors,
) -> AppResult<HttpResponse> {
    let mut vars = Vars::new();
    vars.insert(
        "email",
        html_escape::encode_double_quoted_attribute(&form.email).to_string(),
    );
    vars.insert("email_errors", errors.render("email"));
    templates::page(req, None, "Reset Password", "reset_password_request.html", vars)
}

pub async fn reset_password_request_form(
    req: HttpRequest,
    maybe: MaybeUser,
) -> AppResult<HttpResponse> {
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    render_reset_request(&req, &ResetPasswordRequestForm::default(), &FormErrors::default())
}

pub async fn reset_password_request(
    req: HttpRequest,
    state: web::Data<AppState>,
    maybe: MaybeUser,
    form: web::Form<ResetPasswordRequestForm>,
) -> AppResult<HttpResponse> {
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    let form = form.into_inner();
    let errors = form.check();
    if !errors.is_empty() {
        return render_reset_request(&req, &form, &errors);
    }

    if let Some(user) = find_user_by_email(&state.store, form.email.trim()).await? {
        let token = get_reset_password_token(&user, &state.config.secret_key)?;
        let link = {
            let conn = req.connection_info();
            format!("{}://{}/auth/reset_password/{}", conn.scheme(), conn.host(), token)
        };
        if let Err(e) = state.mailer.send_password_reset(&user, &link).await {
            tracing::warn!(error = %e, user_id = %user.id, "password reset mail failed");
        }
    }

    Ok(redirect_with_flash(
        &req,
        "/auth/login",
        "Check your email for the instructions to reset your password",
    ))
}

fn render_reset(req: &HttpRequest, token: &str, errors: &FormErrors) -> AppResult<HttpResponse> {
    let mut vars = Vars::new();
    vars.insert("token", urlencoding::encode(token).into_owned());
    vars.insert("password_errors", errors.render("password"));
    vars.insert("password2_errors", errors.render("password2"));
    templates::page(req, None, "Reset Password", "reset_password.html", vars)
}

pub async fn reset_password_form(
    req: HttpRequest,
    state: web::Data<AppState>,
    maybe: MaybeUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let token = path.into_inner();
    if maybe.0.is_some() || verify_reset_password_token(&token, &state.config.secret_key).is_none() {
        return Ok(redirect("/index"));
    }
    render_reset(&req, &token, &FormErrors::default())
}

pub async fn reset_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    maybe: MaybeUser,
    path: web::Path<String>,
    form: web::Form<ResetPasswordForm>,
) -> AppResult<HttpResponse> {
    let token = path.into_inner();
    if maybe.0.is_some() {
        return Ok(redirect("/index"));
    }
    let Some(user_id) = verify_reset_password_token(&token, &state.config.secret_key) else {
        return Ok(redirect("/index"));
    };
    let Some(mut user) = find_user(&state.store, &user_id).await? else {
        return Ok(redirect("/index"));
    };

    let form = form.into_inner();
    let errors = form.check();
    if !errors.is_empty() {
        return render_reset(&req, &token, &errors);
    }

    set_password(&state.store, &mut user, &form.password).await?;
    tracing::info!(user_id = %user.id, "password reset");

    Ok(redirect_with_flash(&req, "/auth/login", "Your password has been reset."))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_user() -> (Store, User) {
        let store = Store::in_memory().await.unwrap();
        let user = insert_user(&store, "john", "john@example.com", "x").await.unwrap();
        (store, user)
    }

    async fn token_aged(store: &Store, user_id: &str, age: Duration) -> String {
        let token = Uuid::new_v4().to_string();
        let data = TokenData {
            user_id: user_id.to_string(),
            created_at: now() - age,
        };
        store.set_json(&token_key(&token), &data).await.unwrap();
        token
    }

    #[tokio::test]
    async fn token_lifecycle() {
        let (store, user) = store_with_user().await;
        let token = issue_token(&store, &user.id).await.unwrap();
        assert_eq!(
            validate_token(&store, 24, &token).await.unwrap(),
            Some(user.id.clone())
        );

        revoke_token(&store, &token).await.unwrap();
        assert_eq!(validate_token(&store, 24, &token).await.unwrap(), None);
        assert_eq!(validate_token(&store, 24, "not-a-uuid").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_token_rejected_and_deleted() {
        let (store, user) = store_with_user().await;
        let token = token_aged(&store, &user.id, Duration::hours(30)).await;
        assert_eq!(validate_token(&store, 24, &token).await.unwrap(), None);
        assert!(!store.exists(&token_key(&token)).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_counts_partial_hours() {
        let (store, user) = store_with_user().await;
        let over = token_aged(&store, &user.id, Duration::hours(24) + Duration::minutes(59)).await;
        assert_eq!(validate_token(&store, 24, &over).await.unwrap(), None);

        let under = token_aged(&store, &user.id, Duration::hours(23) + Duration::minutes(59)).await;
        assert_eq!(
            validate_token(&store, 24, &under).await.unwrap(),
            Some(user.id.clone())
        );
    }

    #[tokio::test]
    async fn purge_removes_only_expired_tokens() {
        let (store, user) = store_with_user().await;
        let stale = token_aged(&store, &user.id, Duration::hours(48)).await;
        let fresh = issue_token(&store, &user.id).await.unwrap();

        assert_eq!(purge_expired_tokens(&store, 24).await.unwrap(), 1);
        assert!(!store.exists(&token_key(&stale)).await.unwrap());
        assert!(store.exists(&token_key(&fresh)).await.unwrap());
    }

    #[tokio::test]
    async fn reset_token_roundtrip() {
        let (_store, user) = store_with_user().await;
        let token = get_reset_password_token(&user, "secret").unwrap();
        assert_eq!(verify_reset_password_token(&token, "secret"), Some(user.id));
        assert_eq!(verify_reset_password_token(&token, "other"), None);
        assert_eq!(verify_reset_password_token("garbage", "secret"), None);
    }
}
