use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::CurrentUser;
use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::query_params::{Page, PageQuery};
use crate::core::store::Store;
use crate::flash::redirect_with_flash;
use crate::models::models::{Followers, Followings, User};
use crate::templates::{self, Vars};
use crate::users::{find_user, find_user_by_username};
use crate::AppState;

/// Adds the edge `follower -> followed`. Following twice is a no-op.
pub async fn follow_user(store: &Store, follower_id: &str, followed_id: &str) -> anyhow::Result<()> {
    store
        .update_json(&followings_key(follower_id), |followings: &mut Followings| {
            if !followings.iter().any(|id| id == followed_id) {
                followings.push(followed_id.to_string());
            }
        })
        .await?;
    store
        .update_json(&followers_key(followed_id), |followers: &mut Followers| {
            if !followers.iter().any(|id| id == follower_id) {
                followers.push(follower_id.to_string());
            }
        })
        .await?;
    Ok(())
}

/// Removes the edge `follower -> followed` if present.
pub async fn unfollow_user(store: &Store, follower_id: &str, followed_id: &str) -> anyhow::Result<()> {
    store
        .update_json(&followings_key(follower_id), |followings: &mut Followings| {
            followings.retain(|id| id != followed_id)
        })
        .await?;
    store
        .update_json(&followers_key(followed_id), |followers: &mut Followers| {
            followers.retain(|id| id != follower_id)
        })
        .await?;
    Ok(())
}

pub async fn is_following(store: &Store, follower_id: &str, followed_id: &str) -> anyhow::Result<bool> {
    Ok(get_followings(store, follower_id)
        .await?
        .iter()
        .any(|id| id == followed_id))
}

pub async fn get_followings(store: &Store, user_id: &str) -> anyhow::Result<Followings> {
    Ok(store
        .get_json(&followings_key(user_id))
        .await?
        .unwrap_or_default())
}

pub async fn get_followers(store: &Store, user_id: &str) -> anyhow::Result<Followers> {
    Ok(store
        .get_json(&followers_key(user_id))
        .await?
        .unwrap_or_default())
}

pub async fn followings_count(store: &Store, user_id: &str) -> anyhow::Result<usize> {
    Ok(get_followings(store, user_id).await?.len())
}

pub async fn followers_count(store: &Store, user_id: &str) -> anyhow::Result<usize> {
    Ok(get_followers(store, user_id).await?.len())
}

async fn load_users(store: &Store, ids: &[String]) -> anyhow::Result<Vec<User>> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(u) = find_user(store, id).await? {
            users.push(u);
        }
    }
    Ok(users)
}

// === HTTP Handlers ===

pub async fn handle_follow(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let username = path.into_inner();
    let me = current.user();

    let Some(target) = find_user_by_username(&state.store, &username).await? else {
        return Ok(redirect_with_flash(
            &req,
            "/index",
            format!("User {} not found.", username),
        ));
    };
    let profile = format!("/profile/{}", urlencoding::encode(&username));
    if target.id == me.id {
        return Ok(redirect_with_flash(&req, &profile, "You cannot follow yourself!"));
    }

    follow_user(&state.store, &me.id, &target.id).await?;
    tracing::info!(follower = %me.username, followed = %target.username, "follow");

    Ok(redirect_with_flash(
        &req,
        &profile,
        format!("You are now following {}!", username),
    ))
}

pub async fn handle_unfollow(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let username = path.into_inner();
    let me = current.user();

    let Some(target) = find_user_by_username(&state.store, &username).await? else {
        return Ok(redirect_with_flash(
            &req,
            "/index",
            format!("User {} not found.", username),
        ));
    };
    let profile = format!("/profile/{}", urlencoding::encode(&username));
    if target.id == me.id {
        return Ok(redirect_with_flash(&req, &profile, "You cannot unfollow yourself!"));
    }

    unfollow_user(&state.store, &me.id, &target.id).await?;
    tracing::info!(follower = %me.username, followed = %target.username, "unfollow");

    Ok(redirect_with_flash(
        &req,
        &profile,
        format!("You are now not following {}.", username),
    ))
}

enum Direction {
    Followers,
    Followed,
}

async fn users_list(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    username: String,
    query: PageQuery,
    direction: Direction,
) -> AppResult<HttpResponse> {
    let store = &state.store;
    let me = current.user();
    let owner = if me.username == username {
        me.clone()
    } else {
        find_user_by_username(store, &username)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
    };

    let (ids, suffix, heading) = match direction {
        Direction::Followers => (get_followers(store, &owner.id).await?, "followers", "Followers of"),
        Direction::Followed => (get_followings(store, &owner.id).await?, "followed", "Followed by"),
    };
    let page = Page::paginate(ids, query.page(), state.config.users_per_page);
    let users = load_users(store, &page.items).await?;
    let page = Page::from_parts(users, page.page, page.per_page, page.total);

    let list = if page.items.is_empty() {
        "<p>Nobody here yet.</p>".to_string()
    } else {
        let rows: String = page
            .items
            .iter()
            .map(|u| {
                format!(
                    r#"<li><a href="/profile/{}">{}</a></li>"#,
                    urlencoding::encode(&u.username),
                    html_escape::encode_text(&u.username)
                )
            })
            .collect();
        format!("<ul class=\"users\">{}</ul>", rows)
    };

    let base = format!("/{}/{}", urlencoding::encode(&owner.username), suffix);
    let mut vars = Vars::new();
    vars.insert("heading", heading.to_string());
    vars.insert("username", html_escape::encode_text(&owner.username).to_string());
    vars.insert("username_url", urlencoding::encode(&owner.username).to_string());
    vars.insert("users", list);
    vars.insert("pager", templates::render_pager(&base, &page, None));

    let title = format!("{} {}", heading, owner.username);
    templates::page(&req, Some(me), &title, "users.html", vars)
}

pub async fn followers_list(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    users_list(req, state, current, path.into_inner(), query.into_inner(), Direction::Followers).await
}

pub async fn followed_list(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    users_list(req, state, current, path.into_inner(), query.into_inner(), Direction::Followed).await
}
