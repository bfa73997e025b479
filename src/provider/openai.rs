use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::prompt::{analysis_schema, build_content, ContentBlock, SCHEMA_NAME};
use super::{parse_analysis, AnalysisProvider, ProviderError};
use crate::model::AnalysisResult;
use crate::validation::ValidatedDocument;

pub const DEFAULT_BASE_URL: &str = "https://ai-gateway.vercel.sh/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-5-nano";

/// Error bodies from the provider are logged, truncated to this many bytes.
const MAX_LOGGED_BODY: usize = 512;

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Client-side timeout.  `None` leaves the call bounded only by the
    /// provider and the transport.
    pub timeout_ms: Option<u64>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: None,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [UserMessage<'a>; 1],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Chat-completions client requesting structured output.
pub struct OpenAiProvider {
    cfg: OpenAiConfig,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = cfg.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder.build()?;
        let endpoint = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        Ok(Self {
            cfg,
            endpoint,
            client,
        })
    }

    fn render_body(&self, documents: &[ValidatedDocument<'_>]) -> Result<Vec<u8>, ProviderError> {
        let request = ChatRequest {
            model: &self.cfg.model,
            messages: [UserMessage {
                role: "user",
                content: build_content(documents),
            }],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME,
                    strict: true,
                    schema: analysis_schema(),
                },
            },
        };
        serde_json::to_vec(&request).map_err(|err| ProviderError::Malformed(err.to_string()))
    }
}

fn extract_output(response: ChatResponse) -> Result<String, ProviderError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ProviderError::Malformed("response has no choices".into()))?;
    if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(ProviderError::Refused(refusal));
    }
    match message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::Malformed("response message is empty".into())),
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_LOGGED_BODY {
        let mut cut = MAX_LOGGED_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

#[async_trait::async_trait]
impl AnalysisProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(
        &self,
        documents: &[ValidatedDocument<'_>],
    ) -> Result<AnalysisResult, ProviderError> {
        let api_key = self
            .cfg
            .api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured("no API key set"))?;
        let body = self.render_body(documents)?;
        tracing::debug!(
            model = %self.cfg.model,
            documents = documents.len(),
            request_bytes = body.len(),
            "sending analysis request"
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(text),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let output = extract_output(parsed)?;
        parse_analysis(&output)
    }
}
