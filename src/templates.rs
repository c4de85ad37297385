use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse};
use regex::{Captures, Regex};
use rust_embed::RustEmbed;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core::errors::{AppError, AppResult};
use crate::core::query_params::Page;
use crate::flash;
use crate::models::models::{PostView, User};

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

/// Placeholder values. Callers escape anything user-supplied before inserting.
pub type Vars = HashMap<&'static str, String>;

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("Regex should compile"))
}

pub fn load(name: &str) -> anyhow::Result<String> {
    let file = Templates::get(name).ok_or_else(|| anyhow::anyhow!("template {} not found", name))?;
    Ok(String::from_utf8(file.data.into_owned())?)
}

/// Substitutes `{{ name }}` placeholders in one pass, so inserted values are
/// never scanned again. Unknown placeholders render empty.
pub fn fill(template: &str, vars: &Vars) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

pub fn render(name: &str, vars: &Vars) -> anyhow::Result<String> {
    Ok(fill(&load(name)?, vars))
}

/// Request locale: primary subtag of the first `Accept-Language` entry.
/// Anything but two or three ASCII letters falls back to `en`; the value is
/// embedded in inline script.
pub fn locale(req: &HttpRequest) -> String {
    req.headers()
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .and_then(|tag| tag.trim().split('-').next())
        .map(|tag| tag.trim().to_ascii_lowercase())
        .filter(|tag| (2..=3).contains(&tag.len()) && tag.bytes().all(|b| b.is_ascii_lowercase()))
        .unwrap_or_else(|| "en".to_string())
}

fn nav(user: Option<&User>) -> String {
    match user {
        Some(u) => format!(
            r#"<a href="/index">Home</a> <a href="/explore">Explore</a>
<form class="search" action="/search" method="get"><input type="text" name="q" placeholder="Search"></form>
<a href="/profile/{}">Profile</a> <a href="/auth/logout">Logout</a>"#,
            urlencoding::encode(&u.username)
        ),
        None => r#"<a href="/auth/login">Login</a>"#.to_string(),
    }
}

fn flashes(messages: &[String]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let items: String = messages
        .iter()
        .map(|m| format!("<li>{}</li>", html_escape::encode_text(m)))
        .collect();
    format!(r#"<ul class="flashes">{}</ul>"#, items)
}

/// Renders `template` into the base layout and answers 200 with HTML. Pending
/// flash messages are shown and then cleared.
pub fn page(
    req: &HttpRequest,
    user: Option<&User>,
    title: &str,
    template: &str,
    vars: Vars,
) -> AppResult<HttpResponse> {
    let content = render(template, &vars).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut layout = Vars::new();
    layout.insert("title", html_escape::encode_text(title).to_string());
    layout.insert("nav", nav(user));
    layout.insert("flashes", flashes(&flash::pending(req)));
    layout.insert("content", content);
    let html = render("base.html", &layout).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut resp = HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html);
    flash::consume(req, &mut resp);
    Ok(resp)
}

pub fn render_posts(posts: &[PostView], locale: &str) -> String {
    if posts.is_empty() {
        return r#"<p class="empty">No posts yet.</p>"#.to_string();
    }
    posts
        .iter()
        .map(|view| {
            let post = &view.post;
            let translate = if !post.language.is_empty() && post.language != locale {
                format!(
                    r#"<span id="translation{id}"><a href="javascript:translate('post{id}', 'translation{id}', '{dest}');">Translate</a></span>"#,
                    id = html_escape::encode_double_quoted_attribute(&post.id),
                    dest = html_escape::encode_double_quoted_attribute(locale),
                )
            } else {
                String::new()
            };
            format!(
                r#"<div class="post"><a href="/profile/{url}">{author}</a> said <time>{when}</time>:<br><span id="post{id}">{body}</span> {translate}</div>"#,
                url = urlencoding::encode(&view.author.username),
                author = html_escape::encode_text(&view.author.username),
                when = post.timestamp.format("%Y-%m-%d %H:%M UTC"),
                id = html_escape::encode_double_quoted_attribute(&post.id),
                body = html_escape::encode_text(&post.body),
                translate = translate,
            )
        })
        .collect()
}

pub fn render_post_form(value: &str, errors: &str) -> String {
    format!(
        r#"<form action="/index" method="post">
<p><label for="post">Say something</label><br>
<textarea id="post" name="post" rows="3" cols="50">{}</textarea><br>{}</p>
<p><input type="submit" value="Submit"></p>
</form>"#,
        html_escape::encode_text(value),
        errors
    )
}

/// "Newer posts" / "Older posts" links. `extra` is an already-encoded query
/// fragment such as `q=rust`.
pub fn render_pager<T>(base: &str, page: &Page<T>, extra: Option<&str>) -> String {
    let link = |n: usize| match extra {
        Some(extra) => format!("{}?{}&page={}", base, extra, n),
        None => format!("{}?page={}", base, n),
    };
    let mut out = String::new();
    if let Some(prev) = page.prev_num() {
        out.push_str(&format!(
            r#"<a class="newer" href="{}">&larr; Newer posts</a> "#,
            html_escape::encode_double_quoted_attribute(&link(prev))
        ));
    }
    if let Some(next) = page.next_num() {
        out.push_str(&format!(
            r#"<a class="older" href="{}">Older posts &rarr;</a>"#,
            html_escape::encode_double_quoted_attribute(&link(next))
        ));
    }
    if out.is_empty() {
        out
    } else {
        format!(r#"<nav class="pager">{}</nav>"#, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn fill_is_single_pass() {
        let mut vars = Vars::new();
        vars.insert("a", "{{ b }}".to_string());
        vars.insert("b", "boom".to_string());
        assert_eq!(fill("<p>{{ a }}</p>", &vars), "<p>{{ b }}</p>");
        assert_eq!(fill("{{missing}}!", &vars), "!");
    }

    #[test]
    fn locale_from_accept_language() {
        let req = TestRequest::default()
            .insert_header((header::ACCEPT_LANGUAGE, "es-ES,es;q=0.9,en;q=0.8"))
            .to_http_request();
        assert_eq!(locale(&req), "es");
        let req = TestRequest::default().to_http_request();
        assert_eq!(locale(&req), "en");
    }

    #[test]
    fn locale_rejects_script_injection() {
        for header_value in ["x');alert(1)//", "*", "e", "english", "de1"] {
            let req = TestRequest::default()
                .insert_header((header::ACCEPT_LANGUAGE, header_value))
                .to_http_request();
            assert_eq!(locale(&req), "en", "{}", header_value);
        }
        let req = TestRequest::default()
            .insert_header((header::ACCEPT_LANGUAGE, "FIL-PH"))
            .to_http_request();
        assert_eq!(locale(&req), "fil");
    }

    #[test]
    fn pager_links_carry_query() {
        let page = Page::paginate((0..10).collect::<Vec<_>>(), 2, 3);
        let html = render_pager("/search", &page, Some("q=rust"));
        assert!(html.contains("/search?q=rust&amp;page=1"));
        assert!(html.contains("/search?q=rust&amp;page=3"));
    }

    #[test]
    fn base_layout_is_embedded() {
        assert!(load("base.html").unwrap().contains("{{ content }}"));
    }
}
