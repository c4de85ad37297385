use serde::Deserialize;
use std::collections::BTreeMap;
use validator::{Validate, ValidationErrors};

use crate::core::store::Store;
use crate::users::{find_user_by_email, username_taken};

const REQUIRED: &str = "This field is required.";

/// Field name to messages, in the order they should be shown.
#[derive(Debug, Default)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn from_validation(result: Result<(), ValidationErrors>) -> Self {
        let mut errors = Self::default();
        if let Err(e) = result {
            for (field, errs) in e.field_errors() {
                for err in errs.iter() {
                    let msg = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({}).", err.code));
                    errors.add(&field.to_string(), msg);
                }
            }
        }
        errors
    }

    pub fn add(&mut self, field: &str, msg: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(msg.into());
    }

    /// DataRequired: blank or whitespace-only input is rejected.
    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() && !self.0.contains_key(field) {
            self.add(field, REQUIRED);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn render(&self, field: &str) -> String {
        self.get(field)
            .iter()
            .map(|m| {
                format!(
                    r#"<span class="error">[{}]</span>"#,
                    html_escape::encode_text(m)
                )
            })
            .collect::<Vec<_>>()
            .join("<br>")
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct PostForm {
    #[serde(default)]
    #[validate(length(max = 140, message = "Field must be between 1 and 140 characters long."))]
    pub post: String,
}

impl PostForm {
    /// Length is checked on the trimmed text, which is what gets stored.
    pub fn check(&self) -> FormErrors {
        let trimmed = PostForm {
            post: self.post.trim().to_string(),
        };
        let mut errors = FormErrors::from_validation(trimmed.validate());
        errors.require("post", &self.post);
        errors
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct EditProfileForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    #[validate(length(max = 140, message = "Field cannot be longer than 140 characters."))]
    pub about_me: String,
}

impl EditProfileForm {
    pub async fn check(&self, store: &Store, current_username: &str) -> anyhow::Result<FormErrors> {
        let trimmed = EditProfileForm {
            username: self.username.trim().to_string(),
            about_me: self.about_me.trim().to_string(),
        };
        let mut errors = FormErrors::from_validation(trimmed.validate());
        errors.require("username", &self.username);
        if errors.get("username").is_empty() {
            if let Err(msg) = self.validate_username(store, current_username).await? {
                errors.add("username", msg);
            }
        }
        Ok(errors)
    }

    /// Rejects a new username that already belongs to someone else. Looked up
    /// against current data, so two concurrent renames can both pass.
    pub async fn validate_username(
        &self,
        store: &Store,
        current_username: &str,
    ) -> anyhow::Result<Result<(), &'static str>> {
        let wanted = self.username.trim();
        if wanted != current_username && username_taken(store, wanted).await? {
            return Ok(Err("This username is already taken!"));
        }
        Ok(Ok(()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remember_me: Option<String>,
}

impl LoginForm {
    pub fn check(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        errors.require("username", &self.username);
        errors.require("password", &self.password);
        errors
    }

    pub fn remember(&self) -> bool {
        self.remember_me.is_some()
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RegistrationForm {
    #[serde(default)]
    #[validate(length(max = 64, message = "Field cannot be longer than 64 characters."))]
    pub username: String,
    #[serde(default)]
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password2: String,
}

impl RegistrationForm {
    pub async fn check(&self, store: &Store) -> anyhow::Result<FormErrors> {
        let mut errors = FormErrors::from_validation(self.validate());
        errors.require("username", &self.username);
        errors.require("email", &self.email);
        errors.require("password", &self.password);
        errors.require("password2", &self.password2);
        if self.password != self.password2 && errors.get("password2").is_empty() {
            errors.add("password2", "Field must be equal to password.");
        }
        if errors.get("username").is_empty() && username_taken(store, self.username.trim()).await? {
            errors.add("username", "Please use a different username.");
        }
        if errors.get("email").is_empty() && find_user_by_email(store, self.email.trim()).await?.is_some()
        {
            errors.add("email", "Please use a different email address.");
        }
        Ok(errors)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ResetPasswordRequestForm {
    #[serde(default)]
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
}

impl ResetPasswordRequestForm {
    pub fn check(&self) -> FormErrors {
        let mut errors = FormErrors::from_validation(self.validate());
        errors.require("email", &self.email);
        errors
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password2: String,
}

impl ResetPasswordForm {
    pub fn check(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        errors.require("password", &self.password);
        errors.require("password2", &self.password2);
        if self.password != self.password2 && errors.get("password2").is_empty() {
            errors.add("password2", "Field must be equal to password.");
        }
        errors
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TranslateForm {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub dest_language: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::insert_user;

    #[test]
    fn post_must_not_be_blank() {
        let form = PostForm {
            post: "   ".to_string(),
        };
        assert_eq!(form.check().get("post"), [REQUIRED.to_string()]);
    }

    #[test]
    fn post_over_140_chars_rejected() {
        let form = PostForm {
            post: "a".repeat(141),
        };
        assert!(!form.check().get("post").is_empty());
        let form = PostForm {
            post: "a".repeat(140),
        };
        assert!(form.check().is_empty());
    }

    #[test]
    fn surrounding_whitespace_does_not_count() {
        let form = PostForm {
            post: format!("  {}\n", "a".repeat(140)),
        };
        assert!(form.check().is_empty());
    }

    #[tokio::test]
    async fn edit_profile_rejects_taken_username() {
        let store = Store::in_memory().await.unwrap();
        insert_user(&store, "susan", "susan@example.com", "x").await.unwrap();
        insert_user(&store, "john", "john@example.com", "x").await.unwrap();

        let form = EditProfileForm {
            username: "susan".to_string(),
            about_me: String::new(),
        };
        let errors = form.check(&store, "john").await.unwrap();
        assert_eq!(errors.get("username"), ["This username is already taken!".to_string()]);

        // keeping your own name is fine
        let errors = form.check(&store, "susan").await.unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn about_me_limited_to_140() {
        let store = Store::in_memory().await.unwrap();
        let form = EditProfileForm {
            username: "john".to_string(),
            about_me: "b".repeat(141),
        };
        let errors = form.check(&store, "john").await.unwrap();
        assert!(!errors.get("about_me").is_empty());

        let form = EditProfileForm {
            username: "john".to_string(),
            about_me: format!(" {} ", "b".repeat(140)),
        };
        assert!(form.check(&store, "john").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn registration_checks_email_and_passwords() {
        let store = Store::in_memory().await.unwrap();
        insert_user(&store, "susan", "susan@example.com", "x").await.unwrap();
        let form = RegistrationForm {
            username: "susan".to_string(),
            email: "susan@example.com".to_string(),
            password: "a".to_string(),
            password2: "b".to_string(),
        };
        let errors = form.check(&store).await.unwrap();
        assert_eq!(errors.get("username"), ["Please use a different username.".to_string()]);
        assert_eq!(errors.get("email"), ["Please use a different email address.".to_string()]);
        assert_eq!(errors.get("password2"), ["Field must be equal to password.".to_string()]);

        let form = RegistrationForm {
            username: "bob".to_string(),
            email: "not-an-email".to_string(),
            password: "a".to_string(),
            password2: "a".to_string(),
        };
        let errors = form.check(&store).await.unwrap();
        assert_eq!(errors.get("email"), ["Invalid email address.".to_string()]);
        assert!(errors.get("username").is_empty());
    }
}
