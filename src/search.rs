use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::CurrentUser;
use crate::config::FEED_KEY;
use crate::core::errors::AppResult;
use crate::core::query_params::{Page, PageQuery};
use crate::core::store::Store;
use crate::flash::redirect;
use crate::models::models::Post;
use crate::posts::{get_post, with_authors};
use crate::templates::{self, Vars};
use crate::AppState;

fn terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect()
}

fn matches(post: &Post, terms: &[String]) -> bool {
    let body = post.body.to_lowercase();
    terms.iter().all(|t| body.contains(t.as_str()))
}

/// Posts whose body contains every term of `query`, newest first, with the
/// total hit count.
pub async fn search_posts(
    store: &Store,
    query: &str,
    page: usize,
    per_page: usize,
) -> anyhow::Result<(Vec<Post>, usize)> {
    let terms = terms(query);
    if terms.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let feed: Vec<String> = store.get_json(FEED_KEY).await?.unwrap_or_default();
    let mut hits = Vec::new();
    for id in &feed {
        if let Some(post) = get_post(store, id).await? {
            if matches(&post, &terms) {
                hits.push(post);
            }
        }
    }

    let page = Page::paginate(hits, page, per_page);
    Ok((page.items, page.total))
}

// === HTTP Handlers ===

pub async fn search(
    req: HttpRequest,
    state: web::Data<AppState>,
    current: CurrentUser,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let Some(q) = query.search_terms() else {
        return Ok(redirect("/explore"));
    };
    let page_num = query.page();
    let per_page = state.config.posts_per_page;

    let (posts, total) = search_posts(&state.store, q, page_num, per_page).await?;
    let page = with_authors(&state.store, Page::from_parts(posts, page_num, per_page, total)).await?;

    let extra = format!("q={}", urlencoding::encode(q));
    let mut vars = Vars::new();
    vars.insert("query", html_escape::encode_text(q).to_string());
    vars.insert("total", total.to_string());
    vars.insert("posts", templates::render_posts(&page.items, &templates::locale(&req)));
    vars.insert("pager", templates::render_pager("/search", &page, Some(&extra)));

    templates::page(&req, Some(current.user()), "Search", "search.html", vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::create_post;
    use crate::users::insert_user;

    #[tokio::test]
    async fn every_term_must_match_case_insensitively() {
        let store = Store::in_memory().await.unwrap();
        let john = insert_user(&store, "john", "john@example.com", "x").await.unwrap();
        create_post(&store, &john.id, "Rust makes systems programming fun").await.unwrap();
        create_post(&store, &john.id, "Python is fun too").await.unwrap();
        create_post(&store, &john.id, "nothing to see").await.unwrap();

        let (hits, total) = search_posts(&store, "FUN", 1, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(hits[0].body, "Python is fun too");

        let (hits, total) = search_posts(&store, "rust fun", 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert!(hits[0].body.starts_with("Rust"));

        let (_, total) = search_posts(&store, "   ", 1, 10).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn hits_are_paginated() {
        let store = Store::in_memory().await.unwrap();
        let john = insert_user(&store, "john", "john@example.com", "x").await.unwrap();
        for i in 0..5 {
            create_post(&store, &john.id, &format!("match {}", i)).await.unwrap();
        }
        let (hits, total) = search_posts(&store, "match", 2, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(hits.len(), 2);
    }
}
