use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::auth::CurrentUser;
use crate::config::Config;
use crate::core::errors::AppResult;
use crate::forms::TranslateForm;
use crate::AppState;

/// The `Display` text of each variant is what the user sees in place of a
/// translation.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Error: the translation service is not configured.")]
    NotConfigured,
    #[error("Error: the translation service failed.")]
    Failed(String),
}

#[derive(Serialize)]
struct TextItem<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

#[derive(Deserialize)]
struct TranslationResult {
    translations: Vec<Translation>,
}

/// Client for the Microsoft Translator v3 `translate` endpoint.
#[derive(Clone)]
pub struct Translator {
    client: reqwest::Client,
    key: Option<String>,
    endpoint: String,
}

impl Translator {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.translator_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            key: config.translator_key.clone(),
            endpoint: config.translator_endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn translate(&self, text: &str, dest_language: &str) -> Result<String, TranslateError> {
        let key = self
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(TranslateError::NotConfigured)?;

        let response = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .query(&[("api-version", "3.0"), ("to", dest_language)])
            .header("Ocp-Apim-Subscription-Key", key)
            .json(&[TextItem { text }])
            .send()
            .await
            .map_err(|e| TranslateError::Failed(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(TranslateError::Failed(format!("status {}", response.status())));
        }

        let results: Vec<TranslationResult> = response
            .json()
            .await
            .map_err(|e| TranslateError::Failed(e.to_string()))?;

        results
            .into_iter()
            .next()
            .and_then(|r| r.translations.into_iter().next())
            .map(|t| t.text)
            .ok_or_else(|| TranslateError::Failed("empty translation response".to_string()))
    }
}

// === HTTP Handlers ===

pub async fn translate_text(
    state: web::Data<AppState>,
    _current: CurrentUser,
    form: web::Form<TranslateForm>,
) -> AppResult<HttpResponse> {
    let form = form.into_inner();
    let text = match state.translator.translate(&form.text, &form.dest_language).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = ?e, dest = %form.dest_language, "translation failed");
            e.to_string()
        }
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({ "text": text })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn translator(endpoint: &str, key: Option<&str>) -> Translator {
        let config = Config {
            translator_key: key.map(str::to_string),
            translator_endpoint: endpoint.to_string(),
            ..Config::default()
        };
        Translator::new(&config).unwrap()
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let t = translator("http://127.0.0.1:9", None);
        let err = t.translate("hola", "en").await.unwrap_err();
        assert_eq!(err.to_string(), "Error: the translation service is not configured.");
    }

    #[tokio::test]
    async fn returns_first_translation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(query_param("api-version", "3.0"))
            .and(query_param("to", "en"))
            .and(header("Ocp-Apim-Subscription-Key", "secret"))
            .and(body_json(serde_json::json!([{ "text": "hola" }])))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "translations": [{ "text": "hello", "to": "en" }] }
            ])))
            .mount(&server)
            .await;

        let t = translator(&server.uri(), Some("secret"));
        assert_eq!(t.translate("hola", "en").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn non_200_is_failure_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let t = translator(&server.uri(), Some("bad"));
        let err = t.translate("hola", "en").await.unwrap_err();
        assert_eq!(err.to_string(), "Error: the translation service failed.");
    }
}
