use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub about_me: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    /// ISO 639-1 code, or empty when detection was inconclusive.
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenData {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// A post joined with its author, ready for rendering.
#[derive(Debug, Clone)]
pub struct PostView {
    pub post: Post,
    pub author: User,
}

pub type Followings = Vec<String>;
pub type Followers = Vec<String>;
