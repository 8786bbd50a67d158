//! LibreTranslate text translation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Translator;
use crate::error::{ServiceError, check_status};

const LIBRETRANSLATE_URL: &str = "https://libretranslate.com/translate";

pub struct LibreTranslate {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LibreTranslate {
    pub fn new(client: reqwest::Client, url: Option<&str>, api_key: Option<String>) -> Self {
        Self {
            url: url.unwrap_or(LIBRETRANSLATE_URL).to_string(),
            api_key,
            client,
        }
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: Option<String>,
}

#[async_trait]
impl Translator for LibreTranslate {
    fn id(&self) -> &str {
        "libretranslate"
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, ServiceError> {
        debug!(source, target, text_len = text.len(), "Translating text");

        let resp = self
            .client
            .post(&self.url)
            .json(&TranslateRequest {
                q: text,
                source,
                target,
                format: "text",
                api_key: self.api_key.as_deref(),
            })
            .send()
            .await
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let resp = check_status(self.id(), resp).await?;

        let body: TranslateResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::invalid_response(self.id(), e.to_string()))?;
        body.translated_text
            .map(|t| t.trim().to_string())
            .ok_or_else(|| ServiceError::invalid_response(self.id(), "missing translatedText"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(TranslateRequest {
            q: "Hello",
            source: "en",
            target: "es",
            format: "text",
            api_key: None,
        })
        .unwrap();
        assert_eq!(body["q"], "Hello");
        assert_eq!(body["format"], "text");
        assert!(body.get("api_key").is_none());
    }

    #[test]
    fn test_response_parse() {
        let body: TranslateResponse = serde_json::from_str(r#"{"translatedText":"Hola"}"#).unwrap();
        assert_eq!(body.translated_text.as_deref(), Some("Hola"));
    }

    #[test]
    fn test_default_url() {
        let t = LibreTranslate::new(reqwest::Client::new(), None, None);
        assert_eq!(t.url, "https://libretranslate.com/translate");
    }
}
