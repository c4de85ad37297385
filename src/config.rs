use std::env;

pub const MAX_POST_LENGTH: usize = 140;
pub const RESET_TOKEN_EXPIRATION_SECS: i64 = 600;
pub const SESSION_COOKIE: &str = "microblog_session";
pub const FLASH_COOKIE: &str = "microblog_flash";

pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn user_posts_key(id: &str) -> String {
    format!("user_posts:{}", id)
}

pub fn followings_key(id: &str) -> String {
    format!("followings:{}", id)
}

pub fn followers_key(id: &str) -> String {
    format!("followers:{}", id)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub server: Option<String>,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub secret_key: String,
    /// sqlx SQLite URL such as `sqlite://microblog.db`. Memory only when unset.
    pub database_url: Option<String>,
    pub mail: MailSettings,
    pub admins: Vec<String>,
    pub posts_per_page: usize,
    pub users_per_page: usize,
    pub translator_key: Option<String>,
    pub translator_endpoint: String,
    pub translator_timeout_secs: u64,
    pub token_expiration_hours: i64,
    pub bind_addr: String,
    pub seed_demo_data: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_key: "you-will-never-guess".to_string(),
            database_url: None,
            mail: MailSettings {
                server: None,
                port: 25,
                use_tls: false,
                username: None,
                password: None,
            },
            admins: vec!["admin@example.com".to_string()],
            posts_per_page: 25,
            users_per_page: 25,
            translator_key: None,
            translator_endpoint: "https://api.cognitive.microsofttranslator.com".to_string(),
            translator_timeout_secs: 10,
            token_expiration_hours: 24,
            bind_addr: "0.0.0.0:5000".to_string(),
            seed_demo_data: false,
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn flag(name: &str) -> bool {
    var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Config {
    /// Builds the configuration from environment variables, falling back to
    /// development defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let admins = var("ADMINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.admins);

        Self {
            secret_key: var("SECRET_KEY").unwrap_or(defaults.secret_key),
            database_url: var("DATABASE_URL"),
            mail: MailSettings {
                server: var("MAIL_SERVER"),
                port: parsed("MAIL_PORT", defaults.mail.port),
                use_tls: flag("MAIL_USE_TLS"),
                username: var("MAIL_USERNAME"),
                password: var("MAIL_PASSWORD"),
            },
            admins,
            posts_per_page: parsed("POSTS_PER_PAGE", defaults.posts_per_page).max(1),
            users_per_page: parsed("USERS_PER_PAGE", defaults.users_per_page).max(1),
            translator_key: var("MS_TRANSLATOR_KEY"),
            translator_endpoint: var("MS_TRANSLATOR_ENDPOINT")
                .unwrap_or(defaults.translator_endpoint),
            translator_timeout_secs: parsed(
                "TRANSLATOR_TIMEOUT_SECS",
                defaults.translator_timeout_secs,
            ),
            token_expiration_hours: parsed(
                "TOKEN_EXPIRATION_HOURS",
                defaults.token_expiration_hours,
            ),
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            seed_demo_data: flag("SEED_DEMO_DATA"),
        }
    }

    pub fn mail_sender(&self) -> &str {
        self.admins
            .first()
            .map(String::as_str)
            .unwrap_or("admin@example.com")
    }
}
