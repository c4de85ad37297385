use actix_web::cookie::Cookie;
use actix_web::{test, web, App};
use std::time::Instant;

use microblog::config::{Config, SESSION_COOKIE};
use microblog::core::store::Store;
use microblog::follow::follow_user;
use microblog::posts::{create_post, followed_posts};
use microblog::AppState;

const NUM_USERS: usize = 20;
const POSTS_PER_USER: usize = 25;
const FEED_PAGES: usize = 10;

#[ignore]
#[actix_web::test]
async fn perf_test_feed_with_many_followings() {
    let store = Store::in_memory().await.unwrap();
    let state = web::Data::new(AppState::with_store(Config::default(), store).await.unwrap());
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(microblog::configure),
    )
    .await;

    println!("\n=== Performance Test ===");
    println!("Creating {} users with {} posts each...", NUM_USERS, POSTS_PER_USER);

    let user_creation_start = Instant::now();
    let mut users = Vec::new();
    for i in 0..NUM_USERS {
        let username = format!("perf_user_{}", i);
        let user = microblog::users::insert_user(
            &state.store,
            &username,
            &format!("{}@example.com", username),
            "password123",
        )
        .await
        .unwrap();
        users.push(user);
    }
    println!(
        "User creation done: {} users in {:.2}s",
        users.len(),
        user_creation_start.elapsed().as_secs_f64()
    );

    let post_creation_start = Instant::now();
    for user in &users {
        for j in 0..POSTS_PER_USER {
            create_post(&state.store, &user.id, &format!("post {} from {}", j, user.username))
                .await
                .unwrap();
        }
    }
    let total_posts = NUM_USERS * POSTS_PER_USER;
    let post_time = post_creation_start.elapsed();
    println!(
        "Post creation done: {} posts in {:.2}s ({:.2} posts/sec)",
        total_posts,
        post_time.as_secs_f64(),
        total_posts as f64 / post_time.as_secs_f64()
    );

    let reader = &users[0];
    for other in &users[1..] {
        follow_user(&state.store, &reader.id, &other.id).await.unwrap();
    }

    let feed_start = Instant::now();
    let first = followed_posts(&state.store, &reader.id, 1, 25).await.unwrap();
    println!(
        "followed_posts: {} of {} posts in {:.2}ms",
        first.items.len(),
        first.total,
        feed_start.elapsed().as_secs_f64() * 1000.0
    );
    assert_eq!(first.total, total_posts);

    let token = microblog::auth::issue_token(&state.store, &reader.id).await.unwrap();
    let cookie = Cookie::new(SESSION_COOKIE, token);

    let http_start = Instant::now();
    for page in 1..=FEED_PAGES {
        let req = test::TestRequest::get()
            .uri(&format!("/index?page={}", page))
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
    let http_time = http_start.elapsed();
    println!(
        "GET /index: {} pages in {:.2}s ({:.2} req/sec)",
        FEED_PAGES,
        http_time.as_secs_f64(),
        FEED_PAGES as f64 / http_time.as_secs_f64()
    );
}
