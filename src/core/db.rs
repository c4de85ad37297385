use crate::core::store::Store;
use crate::follow::follow_user;
use crate::posts::create_post;
use crate::users::{find_user_by_username, insert_user};

const DEMO_USERS: &[(&str, &str, &[&str])] = &[
    ("test", "test@example.com", &["This is my first post on Microblog!"]),
    (
        "alice",
        "alice@example.com",
        &[
            "Welcome to my blog! Excited to share thoughts here.",
            "Just finished an amazing project. Feeling productive today!",
        ],
    ),
    (
        "bob",
        "bob@example.com",
        &["Hey everyone! Just joined, looking forward to connecting with you all."],
    ),
];

/// Creates the demo accounts (password = username) with a few posts, and
/// makes "test" follow "bob". Accounts that already exist are left alone.
pub async fn seed_demo_data(store: &Store) -> anyhow::Result<()> {
    for (username, email, posts) in DEMO_USERS {
        if find_user_by_username(store, username).await?.is_some() {
            continue;
        }
        let user = insert_user(store, username, email, username).await?;
        for body in posts.iter() {
            create_post(store, &user.id, body).await?;
        }
        tracing::info!(username = %username, "seeded demo user");
    }

    if let (Some(test), Some(bob)) = (
        find_user_by_username(store, "test").await?,
        find_user_by_username(store, "bob").await?,
    ) {
        follow_user(store, &test.id, &bob.id).await?;
    }

    Ok(())
}
