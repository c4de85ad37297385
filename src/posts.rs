use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::HashMap;
use uuid::Uuid;
use whatlang::Lang;

use crate::auth::CurrentUser;
use crate::config::*;
use crate::core::errors::AppResult;
use crate::core::helpers::now;
use crate::core::query_params::{Page, PageQuery};
use crate::core::store::Store;
use crate::flash::redirect_with_flash;
use crate::follow::get_followings;
use crate::forms::{FormErrors, PostForm};
use crate::models::models::{Post, PostView, User};
use crate::templates::{self, Vars};
use crate::users::find_user;
use crate::AppState;

pub async fn create_post(store: &Store, user_id: &str, body: &str) -> anyhow::Result<Post> {
    let body = body.trim().to_string();
    if body.is_empty() || body.chars().count() > MAX_POST_LENGTH {
        anyhow::bail!("post body must be 1-{} characters", MAX_POST_LENGTH);
    }

    let post = Post {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        language: detect_language(&body),
        body,
        timestamp: now(),
    };

    store.set_json(&post_key(&post.id), &post).await?;
    // newest first in both timelines
    store
        .update_json(FEED_KEY, |feed: &mut Vec<String>| feed.insert(0, post.id.clone()))
        .await?;
    store
        .update_json(&user_posts_key(user_id), |ids: &mut Vec<String>| {
            ids.insert(0, post.id.clone())
        })
        .await?;

    Ok(post)
}

pub async fn get_post(store: &Store, post_id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json::<Post>(&post_key(post_id)).await
}

async fn load_posts(store: &Store, ids: &[String]) -> anyhow::Result<Vec<Post>> {
    let mut posts = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(p) = get_post(store, id).await? {
            posts.push(p);
        }
    }
    Ok(posts)
}

fn newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

/// All posts, newest first.
pub async fn explore_posts(store: &Store, page: usize, per_page: usize) -> anyhow::Result<Page<Post>> {
    let feed: Vec<String> = store.get_json(FEED_KEY).await?.unwrap_or_default();
    let page = Page::paginate(feed, page, per_page);
    let items = load_posts(store, &page.items).await?;
    Ok(Page::from_parts(items, page.page, page.per_page, page.total))
}

/// Posts written by one user, newest first.
pub async fn user_posts(
    store: &Store,
    user_id: &str,
    page: usize,
    per_page: usize,
) -> anyhow::Result<Page<Post>> {
    let ids: Vec<String> = store
        .get_json(&user_posts_key(user_id))
        .await?
        .unwrap_or_default();
    let page = Page::paginate(ids, page, per_page);
    let items = load_posts(store, &page.items).await?;
    Ok(Page::from_parts(items, page.page, page.per_page, page.total))
}

/// The user's own posts plus those of everyone they follow, newest first.
/// Posts with equal timestamps are ordered by id, descending.
pub async fn followed_posts(
    store: &Store,
    user_id: &str,
    page: usize,
    per_page: usize,
) -> anyhow::Result<Page<Post>> {
    let mut authors = get_followings(store, user_id).await?;
    if !authors.iter().any(|id| id == user_id) {
        authors.push(user_id.to_string());
    }

    let mut posts = Vec::new();
    for author in &authors {
        let ids: Vec<String> = store
            .get_json(&user_posts_key(author))
            .await?
            .unwrap_or_default();
        posts.extend(load_posts(store, &ids).await?);
    }
    newest_first(&mut posts);

    Ok(Page::paginate(posts, page, per_page))
}

/// Attaches authors to a page of posts. Posts whose author vanished are dropped.
pub async fn with_authors(store: &Store, page: Page<Post>) -> anyhow::Result<Page<PostView>> {
    let mut cache: HashMap<String, User> = HashMap::new();
    let mut views = Vec::with_capacity(page.items.len());
    for post in page.items {
        if !cache.contains_key(&post.user_id) {
            match find_user(store, &post.user_id).await? {
                Some(u) => {
                    cache.insert(post.user_id.clone(), u);
                }
                None => continue,
            }
        }
        if let Some(author) = cache.get(&post.user_id) {
            views.push(PostView {
                author: author.clone(),
                post,
            });
        }
    }
    Ok(Page::from_parts(views, page.page, page.per_page, page.total))
}

/// Two-letter language code of `text`, or empty when unknown.
pub fn detect_language(text: &str) -> String {
    let code = match whatlang::detect(text).map(|info| info.lang()) {
        Some(Lang::Eng) => "en",
        Some(Lang::Spa) => "es",
        Some(Lang::Fra) => "fr",
        Some(Lang::Deu) => "de",
        Some(Lang::Ita) => "it",
        Some(Lang::Por) => "pt",
        Some(Lang::Rus) => "ru",
        Some(Lang::Ukr) => "uk",
        Some(Lang::Pol) => "pl",
        Some(Lang::Nld) => "nl",
        Some(Lang::Swe) => "sv",
        Some(Lang::Dan) => "da",
        Some(Lang::Fin) => "fi",
        Some(Lang::Tur) => "tr",
        Some(Lang::Ces) => "cs",
        Some(Lang::Hun) => "hu",
        Some(Lang::Ron) => "ro",
        Some(Lang::Bul) => "bg",
        Some(Lang::Ell) => "el",
        Some(Lang::Cmn) => "zh",
        Some(Lang::Jpn) => "ja",
        Some(Lang::Kor) => "ko",
        Some(Lang::Ara) => "ar",
        Some(Lang::Heb) => "he",
        Some(Lang::Hin) => "hi",
        Some(Lang::Vie) => "vi",
        Some(Lang::Ind) => "id",
        Some(Lang::Cat) => "ca",
        _ => "",
    };
    code.to_string()
}

// === HTTP Handlers ===

pub async fn index(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    render_index(
        &req,
        &state,
        current.user(),
        query.page(),
        &PostForm::default(),
        &FormErrors::default(),
    )
    .await
}

pub async fn submit_post(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    form: web::Form<PostForm>,
) -> AppResult<HttpResponse> {
    let form = form.into_inner();
    let me = current.user();

    let errors = form.check();
    if !errors.is_empty() {
        return render_index(&req, &state, me, 1, &form, &errors).await;
    }

    let post = create_post(&state.store, &me.id, &form.post).await?;
    tracing::info!(user_id = %me.id, post_id = %post.id, language = %post.language, "post created");

    Ok(redirect_with_flash(&req, "/index", "Your post is now live!"))
}

async fn render_index(
    req: &HttpRequest,
    state: &AppState,
    me: &User,
    page: usize,
    form: &PostForm,
    errors: &FormErrors,
) -> AppResult<HttpResponse> {
    let page = with_authors(
        &state.store,
        followed_posts(&state.store, &me.id, page, state.config.posts_per_page).await?,
    )
    .await?;

    let mut vars = Vars::new();
    vars.insert("greeting", format!("Hi, {}!", html_escape::encode_text(&me.username)));
    vars.insert(
        "post_form",
        templates::render_post_form(&form.post, &errors.render("post")),
    );
    vars.insert("posts", templates::render_posts(&page.items, &templates::locale(req)));
    vars.insert("pager", templates::render_pager("/index", &page, None));

    templates::page(req, Some(me), "Home", "index.html", vars)
}

pub async fn explore(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let page = with_authors(
        &state.store,
        explore_posts(&state.store, query.page(), state.config.posts_per_page).await?,
    )
    .await?;

    let mut vars = Vars::new();
    vars.insert("greeting", "Explore".to_string());
    vars.insert("post_form", String::new());
    vars.insert("posts", templates::render_posts(&page.items, &templates::locale(&req)));
    vars.insert("pager", templates::render_pager("/explore", &page, None));

    templates::page(&req, Some(current.user()), "Explore", "index.html", vars)
}
