//! LLM agent collaborators.
//!
//! Two seams isolate every non-deterministic call:
//! - [`DialogueAgent`]: produces the next utterance for one persona
//! - [`Judge`]: scores one rubric criterion against a transcript
//!
//! Deterministic implementations (`ScriptedAgent`, `OfflineAgent`,
//! `ScriptedJudge`, `OfflineJudge`) back tests and offline runs;
//! `HttpChatAgent` talks to an OpenAI-compatible endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::LlmConfig;
use crate::domain::{AgentError, JudgeError, Judgment, Phase, RubricCriterion, ScoringType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One simulated persona.
#[async_trait]
pub trait DialogueAgent: Send + Sync {
    /// `prompt` is the rendered instruction for this turn; `history` is the
    /// conversation from this agent's point of view (own turns as
    /// assistant, the other persona's as user).
    async fn respond(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, AgentError>;
}

/// Everything a judge needs for one criterion at one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeRequest {
    pub tag: String,
    pub criterion: RubricCriterion,
    pub phase: Phase,
    /// Number of turns in the judged transcript prefix.
    pub checkpoint: u32,
    /// Rendered formative or summative template.
    pub prompt: String,
    /// Plain-text transcript prefix being judged.
    pub transcript: String,
}

/// Rubric judgment capability.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment, JudgeError>;
}

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(AgentError),
    /// Reply after sleeping; used to exercise call timeouts.
    Delayed { delay: Duration, reply: String },
}

/// Replays a fixed script, cycling when it runs out.
#[derive(Debug)]
pub struct ScriptedAgent {
    steps: Vec<ScriptStep>,
    cursor: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Cycle through canned replies.
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            replies
                .into_iter()
                .map(|r| ScriptStep::Reply(r.into()))
                .collect(),
        )
    }

    /// Fail every call with `err`.
    pub fn failing(err: AgentError) -> Self {
        Self::new(vec![ScriptStep::Fail(err)])
    }

    /// Calls made so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DialogueAgent for ScriptedAgent {
    async fn respond(&self, _prompt: &str, _history: &[ChatMessage]) -> Result<String, AgentError> {
        if self.steps.is_empty() {
            return Err(AgentError::MalformedOutput("script is empty".to_string()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.steps.len();
        match &self.steps[idx] {
            ScriptStep::Reply(reply) => Ok(reply.clone()),
            ScriptStep::Fail(err) => Err(err.clone()),
            ScriptStep::Delayed { delay, reply } => {
                tokio::time::sleep(*delay).await;
                Ok(reply.clone())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OfflineAgent
// ---------------------------------------------------------------------------

const OFFLINE_PREFIX: &str = "[offline-response]";
const OFFLINE_ECHO_CHARS: usize = 200;

/// Deterministic stand-in when no LLM is configured: echoes the start of
/// what it was told.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAgent;

#[async_trait]
impl DialogueAgent for OfflineAgent {
    async fn respond(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, AgentError> {
        let heard: Vec<&str> = history
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .collect();
        let combined = if heard.is_empty() {
            prompt.to_string()
        } else {
            heard.join(" ")
        };
        let echo: String = combined.chars().take(OFFLINE_ECHO_CHARS).collect();
        Ok(format!("{OFFLINE_PREFIX} {echo}"))
    }
}

// ---------------------------------------------------------------------------
// HttpChatAgent
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpChatAgent {
    client: reqwest::Client,
    config: LlmConfig,
    timeout_ms: u64,
}

impl HttpChatAgent {
    pub fn new(config: LlmConfig, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trainexus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn map_transport(&self, err: reqwest::Error) -> AgentError {
        if err.is_timeout() {
            AgentError::Timeout(self.timeout_ms)
        } else if err.is_decode() {
            AgentError::MalformedOutput(err.to_string())
        } else {
            AgentError::Transient(err.to_string())
        }
    }
}

fn classify_status(status: reqwest::StatusCode, body: String) -> AgentError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AgentError::RateLimited(body)
    } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        AgentError::Transient(format!("{status}: {body}"))
    } else {
        AgentError::Fatal(format!("{status}: {body}"))
    }
}

#[async_trait]
impl DialogueAgent for HttpChatAgent {
    #[instrument(skip_all, fields(model = %self.config.model, history = history.len()))]
    async fn respond(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, AgentError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: prompt.to_string(),
        });
        messages.extend(history.iter().cloned());

        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages,
        };

        let mut request = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "chat completion rejected");
            return Err(classify_status(status, text));
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| self.map_transport(e))?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                AgentError::MalformedOutput("response has no choices[0].message.content".into())
            })?;
        debug!(chars = content.len(), "chat completion received");
        Ok(content.to_string())
    }
}

// ---------------------------------------------------------------------------
// Judges
// ---------------------------------------------------------------------------

/// Appended to every judge call so the model answers in the parseable shape.
pub const JUDGE_CONTRACT: &str = "Respond with JSON only, exactly of the form \
{\"score\": <number>, \"justification\": \"<text>\"}.";

/// Judge backed by any dialogue agent (usually `HttpChatAgent`).
pub struct LlmJudge {
    agent: Arc<dyn DialogueAgent>,
}

impl LlmJudge {
    pub fn new(agent: Arc<dyn DialogueAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment, JudgeError> {
        let raw = self
            .agent
            .respond(&request.prompt, &[ChatMessage::user(JUDGE_CONTRACT)])
            .await?;
        Ok(Judgment::parse(&raw)?)
    }
}

type JudgeFn = dyn Fn(&JudgeRequest) -> Result<String, AgentError> + Send + Sync;

/// Deterministic judge returning raw text that still goes through the
/// strict parser.
pub struct ScriptedJudge {
    respond: Box<JudgeFn>,
}

impl ScriptedJudge {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&JudgeRequest) -> Result<String, AgentError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(f),
        }
    }

    /// Same well-formed judgment for every request.
    pub fn constant(score: f64, justification: &str) -> Self {
        let raw = serde_json::json!({ "score": score, "justification": justification }).to_string();
        Self::from_fn(move |_| Ok(raw.clone()))
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment, JudgeError> {
        let raw = (self.respond)(request)?;
        Ok(Judgment::parse(&raw)?)
    }
}

/// Length-based heuristic judge used when no LLM is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineJudge;

impl OfflineJudge {
    /// Overall score on a 0..=100 scale: `60 + chars/100`, clamped to 40..=95.
    pub fn base_score(transcript: &str) -> u32 {
        let len = transcript.chars().count() as u32;
        (60 + len / 100).clamp(40, 95)
    }
}

#[async_trait]
impl Judge for OfflineJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment, JudgeError> {
        let base = Self::base_score(&request.transcript);
        let score = match request.criterion.scoring {
            ScoringType::Binary => {
                if base >= 60 {
                    1.0
                } else {
                    0.0
                }
            }
            ScoringType::Scaled => f64::from(base),
        };
        Ok(Judgment {
            score,
            justification: "Offline evaluation (no LLM client)".to_string(),
        })
    }
}
