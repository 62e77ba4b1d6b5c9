//! Gemini adapter (text + image questions).
//!
//! Talks to the `generateContent` REST endpoint of the Generative Language API.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use base64::Engine as _;

use gtb_core::{errors::Error, formatting::truncate_chars, model::GenerativeModel, Result};

mod types;

use types::{Content, GenerateContentRequest, GenerateContentResponse, InlineData, Part};

const ERROR_BODY_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: Option<String>,
    api_base: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        api_key: Option<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("gemini http client: {e}")))?;
        Ok(Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/{}:generateContent", self.api_base, model_name(model))
    }

    async fn generate(&self, model: &str, parts: Vec<Part>) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            return Err(Error::External("GEMINI_API_KEY is not configured".to_string()));
        };

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
        };

        tracing::debug!(model, "gemini generateContent");
        let resp = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::External(format!("gemini request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "gemini request failed: {status} {}",
                error_message(&body)
            )));
        }

        let body: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("gemini json error: {e}")))?;

        extract_text(&body)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate_text(&self, model: &str, prompt: &str) -> Result<String> {
        self.generate(model, vec![Part::text(prompt)]).await
    }

    async fn generate_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_path: &Path,
        mime_type: &str,
    ) -> Result<String> {
        let bytes = tokio::fs::read(image_path).await.map_err(Error::Io)?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);

        let parts = vec![
            Part::text(prompt),
            Part::inline_data(InlineData {
                mime_type: mime_type.to_string(),
                data,
            }),
        ];
        self.generate(model, parts).await
    }
}

fn model_name(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn extract_text(resp: &GenerateContentResponse) -> Result<String> {
    let Some(candidate) = resp.candidates.as_ref().and_then(|c| c.first()) else {
        let reason = resp
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref());
        return Err(match reason {
            Some(r) => Error::External(format!("gemini blocked the prompt: {r}")),
            None => Error::External("no response from gemini".to_string()),
        });
    };

    let text = candidate
        .content
        .as_ref()
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
        return Err(Error::External(format!(
            "gemini returned no text (finish reason: {reason})"
        )));
    }

    Ok(text)
}

/// Prefer the API's `error.message`; fall back to a truncated raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| truncate_chars(body, ERROR_BODY_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_are_prefixed_once() {
        assert_eq!(model_name("gemini-1.5-flash-latest"), "models/gemini-1.5-flash-latest");
        assert_eq!(model_name("models/gemini-1.5-pro"), "models/gemini-1.5-pro");
    }

    #[test]
    fn endpoint_uses_base_and_model() {
        let c = GeminiClient::new(
            Some("k".into()),
            "https://example.test/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            c.endpoint("gemini-pro"),
            "https://example.test/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn request_serializes_inline_image_in_camel_case() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::text("Explain"),
                    Part::inline_data(InlineData {
                        mime_type: "image/jpeg".to_string(),
                        data: "AAAA".to_string(),
                    }),
                ],
            }],
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "Explain");
        assert_eq!(v["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert!(v["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"there"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(&resp).unwrap(), "Hello there");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let resp: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let err = extract_text(&resp).unwrap_err().to_string();
        assert!(err.contains("SAFETY"), "{err}");
    }

    #[test]
    fn candidate_without_text_reports_finish_reason() {
        let resp: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"RECITATION"}]}"#).unwrap();
        let err = extract_text(&resp).unwrap_err().to_string();
        assert!(err.contains("RECITATION"), "{err}");
    }

    #[test]
    fn error_message_prefers_api_message() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(error_message(body), "Quota exceeded");
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn raw_error_body_is_truncated() {
        let body = "é".repeat(500);
        assert_eq!(error_message(&body).chars().count(), ERROR_BODY_CHARS);
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let c = GeminiClient::new(None, "https://example.invalid", Duration::from_secs(1)).unwrap();
        let err = c.generate_text("gemini-pro", "hi").await.unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }
}
