use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::agent::tools::FunctionSpec;
use crate::settings::{AppConfig, GenerationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: Role::User, parts }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self { role: Role::Model, parts }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// One unit of content. On the wire a part is an object carrying exactly one
/// of `text`, `functionCall` or `functionResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WirePart", into = "WirePart")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Part::FunctionResponse(FunctionResponse { name: name.into(), response })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl TryFrom<WirePart> for Part {
    type Error = String;

    fn try_from(w: WirePart) -> Result<Self, Self::Error> {
        match (w.text, w.function_call, w.function_response) {
            (_, Some(fc), _) => Ok(Part::FunctionCall(fc)),
            (_, _, Some(fr)) => Ok(Part::FunctionResponse(fr)),
            (Some(t), None, None) => Ok(Part::Text(t)),
            (None, None, None) => Err("part has no text, functionCall or functionResponse".into()),
        }
    }
}

impl From<Part> for WirePart {
    fn from(p: Part) -> Self {
        match p {
            Part::Text(t) => WirePart { text: Some(t), ..Default::default() },
            Part::FunctionCall(fc) => WirePart { function_call: Some(fc), ..Default::default() },
            Part::FunctionResponse(fr) => WirePart { function_response: Some(fr), ..Default::default() },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub content: Content,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageMetadata {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub candidates: Vec<Candidate>,
    pub usage: UsageMetadata,
}

impl ModelResponse {
    pub fn from_content(content: Content) -> Self {
        Self {
            candidates: vec![Candidate { content, finish_reason: None }],
            usage: UsageMetadata::default(),
        }
    }

    pub fn first_content(&self) -> Option<&Content> {
        self.candidates.first().map(|c| &c.content)
    }

    /// The only part the dispatcher ever looks at.
    pub fn first_part(&self) -> Option<&Part> {
        self.first_content().and_then(|c| c.parts.first())
    }

    /// Text of the first part. A reply without usable text cannot be shown
    /// or replayed, so it fails the turn.
    pub fn text(&self) -> Result<String, ModelError> {
        match self.first_part() {
            Some(Part::Text(t)) if !t.is_empty() => Ok(t.clone()),
            Some(Part::Text(_)) => Err(ModelError::NoText("empty text part")),
            Some(Part::FunctionCall(_)) => Err(ModelError::NoText("function call without arguments")),
            Some(Part::FunctionResponse(_)) => Err(ModelError::NoText("function response")),
            None => Err(ModelError::NoText("no parts")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub tools: Vec<FunctionSpec>,
    pub generation: GenerationConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("no API key configured (set GEMINI_API_KEY)")]
    MissingApiKey,
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited,
    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("response contained no candidates")]
    NoCandidates,
    #[error("response has no text to show: {0}")]
    NoText(&'static str),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, ModelError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    base: Url,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base: Url, api_key: impl Into<String>) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self { base, api_key: api_key.into(), http })
    }

    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let key = cfg.api_key.clone().ok_or(ModelError::MissingApiKey)?;
        Ok(Self::new(cfg.api_base_url()?, key)?)
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.base.as_str().trim_end_matches('/'), model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations<'a>>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations<'a> {
    function_declarations: &'a [FunctionSpec],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

pub(crate) fn request_body(req: &ModelRequest) -> Value {
    let body = GenerateContentRequest {
        contents: &req.contents,
        tools: if req.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations { function_declarations: &req.tools }]
        },
        generation_config: WireGenerationConfig {
            temperature: req.generation.temperature,
            top_p: req.generation.top_p,
            top_k: req.generation.top_k,
            max_output_tokens: req.generation.max_output_tokens,
        },
    };
    // Serializing plain structs and string-keyed maps cannot fail.
    serde_json::to_value(body).unwrap_or(Value::Null)
}

pub(crate) fn parse_response(json: Value) -> Result<ModelResponse, ModelError> {
    let wire: GenerateContentResponse =
        serde_json::from_value(json).map_err(|e| ModelError::Parse(e.to_string()))?;
    if wire.candidates.is_empty() {
        return Err(ModelError::NoCandidates);
    }
    let candidates = wire
        .candidates
        .into_iter()
        .map(|c| Candidate {
            content: c.content.unwrap_or_else(|| Content::model(Vec::new())),
            finish_reason: c.finish_reason,
        })
        .collect();
    let usage = wire.usage_metadata.unwrap_or_default();
    Ok(ModelResponse {
        candidates,
        usage: UsageMetadata {
            prompt_tokens: usage.prompt_token_count,
            candidate_tokens: usage.candidates_token_count,
        },
    })
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = self.endpoint(&req.model);
        debug!(model = %req.model, turns = req.contents.len(), "gemini request");
        let result = async {
            let resp = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request_body(&req))
                .send()
                .await
                .map_err(|e| ModelError::Network(e.to_string()))?;
            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ModelError::RateLimited);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ModelError::Api { status: status.as_u16(), body });
            }
            let json: Value = resp.json().await.map_err(|e| ModelError::Parse(e.to_string()))?;
            parse_response(json)
        }
        .await;
        match &result {
            Ok(r) => {
                metrics::counter!("gemini_flights_model_requests_total", "outcome" => "ok").increment(1);
                debug!(prompt_tokens = r.usage.prompt_tokens, candidate_tokens = r.usage.candidate_tokens, "gemini response");
            }
            Err(e) => {
                metrics::counter!("gemini_flights_model_requests_total", "outcome" => "error").increment(1);
                warn!(error = %e, "gemini request failed");
            }
        }
        result
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and keeps every request it saw.
    #[derive(Default)]
    pub struct ScriptedModel {
        responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
        pub requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        pub fn new(responses: Vec<ModelResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(Ok).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn push_err(&self, err: ModelError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
            self.requests.lock().unwrap().push(req);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Api { status: 500, body: "script exhausted".into() }))
        }
    }

    pub fn text_reply(text: &str) -> ModelResponse {
        ModelResponse::from_content(Content::model(vec![Part::text(text)]))
    }

    pub fn call_reply(name: &str, args: Value) -> ModelResponse {
        let args = match args {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        ModelResponse::from_content(Content::model(vec![Part::FunctionCall(FunctionCall {
            name: name.into(),
            args,
        })]))
    }
}
