use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::{hash_password, now};
use crate::core::query_params::PageQuery;
use crate::core::store::Store;
use crate::flash::redirect_with_flash;
use crate::follow::{followers_count, followings_count, is_following};
use crate::forms::{EditProfileForm, FormErrors};
use crate::models::models::User;
use crate::posts::{user_posts, with_authors};
use crate::templates::{self, Vars};
use crate::AppState;

// === Store access ===

pub async fn find_user(store: &Store, user_id: &str) -> anyhow::Result<Option<User>> {
    store.get_json::<User>(&user_key(user_id)).await
}

pub async fn find_user_by_username(store: &Store, username: &str) -> anyhow::Result<Option<User>> {
    match store.get_json::<String>(&username_key(username)).await? {
        Some(id) => find_user(store, &id).await,
        None => Ok(None),
    }
}

pub async fn find_user_by_email(store: &Store, email: &str) -> anyhow::Result<Option<User>> {
    let users: Vec<String> = store.get_json(USERS_LIST_KEY).await?.unwrap_or_default();
    for id in users {
        if let Some(u) = find_user(store, &id).await? {
            if u.email.eq_ignore_ascii_case(email) {
                return Ok(Some(u));
            }
        }
    }
    Ok(None)
}

/// Inserts a new user. Callers check username and email availability first;
/// the check and the insert are not atomic.
pub async fn insert_user(
    store: &Store,
    username: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<User> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.trim().to_string(),
        email: email.trim().to_string(),
        password_hash: hash_password(password)?,
        about_me: None,
        last_seen: None,
    };

    store.set_json(&user_key(&user.id), &user).await?;
    store.set_json(&username_key(&user.username), &user.id).await?;
    store
        .update_json(USERS_LIST_KEY, |users: &mut Vec<String>| {
            users.push(user.id.clone())
        })
        .await?;

    Ok(user)
}

/// Changes the profile fields of the stored record, leaving every other field
/// as it currently is, and moves the username index entry on rename.
pub async fn update_profile(
    store: &Store,
    user_id: &str,
    username: &str,
    about_me: Option<String>,
) -> anyhow::Result<Option<User>> {
    let mut previous = None;
    let updated = store
        .modify_json(&user_key(user_id), |u: &mut User| {
            previous = Some(std::mem::replace(&mut u.username, username.to_string()));
            u.about_me = about_me;
        })
        .await?;
    let Some(user) = updated else {
        return Ok(None);
    };

    if let Some(previous) = previous.filter(|p| *p != user.username) {
        store.delete(&username_key(&previous)).await?;
    }
    store.set_json(&username_key(&user.username), &user.id).await?;
    Ok(Some(user))
}

pub async fn set_password(store: &Store, user: &mut User, password: &str) -> anyhow::Result<()> {
    let hash = hash_password(password)?;
    store
        .modify_json(&user_key(&user.id), |u: &mut User| u.password_hash = hash.clone())
        .await?;
    user.password_hash = hash;
    Ok(())
}

/// Stamps `last_seen` on the stored record only, so a request holding an
/// older copy of the user never writes stale fields back.
pub async fn touch_last_seen(store: &Store, user: &mut User) -> anyhow::Result<()> {
    let seen = now();
    store
        .modify_json(&user_key(&user.id), |u: &mut User| u.last_seen = Some(seen))
        .await?;
    user.last_seen = Some(seen);
    Ok(())
}

pub async fn username_taken(store: &Store, username: &str) -> anyhow::Result<bool> {
    store.exists(&username_key(username)).await
}

// === HTTP Handlers ===

pub async fn profile(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let username = path.into_inner();
    let store = &state.store;
    let user = find_user_by_username(store, &username)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let page = with_authors(
        store,
        user_posts(store, &user.id, query.page(), state.config.posts_per_page).await?,
    )
    .await?;

    let me = current.user();
    let action = if me.id == user.id {
        r#"<p><a href="/edit_profile">Edit your profile</a></p>"#.to_string()
    } else {
        let (verb, label) = if is_following(store, &me.id, &user.id).await? {
            ("unfollow", "Unfollow")
        } else {
            ("follow", "Follow")
        };
        format!(
            r#"<form action="/{verb}/{name}" method="post"><input type="submit" value="{label}"></form>"#,
            verb = verb,
            name = urlencoding::encode(&user.username),
            label = label,
        )
    };

    let last_seen = user
        .last_seen
        .map(|t| format!("<p>Last seen on: {}</p>", t.format("%Y-%m-%d %H:%M UTC")))
        .unwrap_or_default();
    let about_me = user
        .about_me
        .as_ref()
        .map(|a| format!("<p>{}</p>", html_escape::encode_text(a)))
        .unwrap_or_default();
    let profile_path = format!("/profile/{}", urlencoding::encode(&user.username));

    let mut vars = Vars::new();
    vars.insert("username", html_escape::encode_text(&user.username).to_string());
    vars.insert("username_url", urlencoding::encode(&user.username).to_string());
    vars.insert("about_me", about_me);
    vars.insert("last_seen", last_seen);
    vars.insert("followers_count", followers_count(store, &user.id).await?.to_string());
    vars.insert("followed_count", followings_count(store, &user.id).await?.to_string());
    vars.insert("action", action);
    vars.insert("posts", templates::render_posts(&page.items, &templates::locale(&req)));
    vars.insert("pager", templates::render_pager(&profile_path, &page, None));

    templates::page(&req, Some(me), &user.username, "profile.html", vars)
}

pub async fn edit_profile_form(
    req: HttpRequest,
    current: CurrentUser,
) -> AppResult<HttpResponse> {
    let me = current.user();
    let form = EditProfileForm {
        username: me.username.clone(),
        about_me: me.about_me.clone().unwrap_or_default(),
    };
    render_edit_profile(&req, me, &form, &FormErrors::default())
}

pub async fn edit_profile(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    form: web::Form<EditProfileForm>,
) -> AppResult<HttpResponse> {
    let form = form.into_inner();
    let me = current.into_user();

    let errors = form.check(&state.store, &me.username).await?;
    if !errors.is_empty() {
        return render_edit_profile(&req, &me, &form, &errors);
    }

    let about_me = form.about_me.trim().to_string();
    let about_me = if about_me.is_empty() { None } else { Some(about_me) };
    let me = update_profile(&state.store, &me.id, form.username.trim(), about_me)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tracing::info!(user_id = %me.id, "profile updated");

    Ok(redirect_with_flash(
        &req,
        &format!("/profile/{}", urlencoding::encode(&me.username)),
        "Your changes have been saved.",
    ))
}

fn render_edit_profile(
    req: &HttpRequest,
    me: &User,
    form: &EditProfileForm,
    errors: &FormErrors,
) -> AppResult<HttpResponse> {
    let mut vars = Vars::new();
    vars.insert(
        "username",
        html_escape::encode_double_quoted_attribute(&form.username).to_string(),
    );
    vars.insert("about_me", html_escape::encode_text(&form.about_me).to_string());
    vars.insert("username_errors", errors.render("username"));
    vars.insert("about_me_errors", errors.render("about_me"));
    templates::page(req, Some(me), "Edit Profile", "edit_profile.html", vars)
}
