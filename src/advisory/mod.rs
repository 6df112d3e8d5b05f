pub mod guardrails;

use crate::clock::Clock;
use crate::models::{Levels, Side};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 256;
const TEMPERATURE: f32 = 0.1;
const REQUEST_TIMEOUT_SECS: u64 = 8;

/// After a 429 the advisory service is not consulted again for this long
const RATE_LIMIT_COOLDOWN_MINUTES: i64 = 15;

const SYSTEM_PROMPT: &str = "You are a strict trading risk filter. You review automated trade \
recommendations and either approve or reject them, with a small confidence adjustment. You never \
invent data. Always respond with valid JSON only, no markdown formatting.";

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("advisory service rate limited")]
    RateLimited,
    #[error("advisory service error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed advisory reply: {0}")]
    Malformed(String),
}

fn serialize_side<S: Serializer>(side: &Side, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(side.as_str())
}

/// Everything the advisor sees about one candidate
///
/// The entry price is informational only; replacement ladders keep it
/// fixed and only the stop and targets can move.
#[derive(Debug, Serialize)]
pub struct TradeContext {
    pub symbol: String,
    #[serde(serialize_with = "serialize_side")]
    pub side: Side,
    pub entry: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub confidence: i32,
    pub chg_1h: f64,
    pub chg_24h: f64,
    pub rr_tp1: f64,
    pub atr: Option<f64>,
    pub recent_win_rate: Option<f64>,
    pub request_levels: bool,
}

impl TradeContext {
    fn current_levels(&self) -> Levels {
        Levels {
            stop_loss: self.stop_loss,
            tp1: self.tp1,
            tp2: self.tp2,
            tp3: self.tp3,
        }
    }
}

/// Raw advisor reply before the guardrails touch it
///
/// Missing fields default to the harmless values: approved with no
/// adjustment. `levels` stays loose JSON until the rails validate it.
#[derive(Debug, Deserialize)]
pub struct AdvisoryReply {
    #[serde(default = "default_approved")]
    pub approved: bool,
    #[serde(default)]
    pub confidence_adjust: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub levels: Option<serde_json::Value>,
}

fn default_approved() -> bool {
    true
}

/// Advisor reply after local vetting
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryVerdict {
    pub approved: bool,
    pub confidence_delta: i32,
    pub reason: Option<String>,
    pub levels_override: Option<Levels>,
    /// A ladder was proposed but failed the guardrails
    pub levels_discarded: bool,
}

/// What the orchestrator gets back from one consultation
#[derive(Debug, Clone, PartialEq)]
pub enum AdvisoryOutcome {
    /// Advisory disabled or on rate-limit cooldown; candidate proceeds
    Skipped,
    /// Call failed; candidate proceeds unadjusted
    Unavailable,
    Assessed(AdvisoryVerdict),
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// One-shot client for the advisory service
///
/// No retry loop: a failed consultation must not stall the scan cycle,
/// so any error is reported once and the candidate proceeds.
pub struct AdvisoryClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AdvisoryClient {
    pub fn new(api_key: String) -> Result<Self, AdvisoryError> {
        Self::with_base_url(api_key, DEFAULT_API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, AdvisoryError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub async fn assess(&self, ctx: &TradeContext) -> Result<AdvisoryReply, AdvisoryError> {
        let context_json = serde_json::to_string_pretty(ctx)
            .map_err(|e| AdvisoryError::Malformed(format!("context encode: {}", e)))?;

        let levels_instruction = if ctx.request_levels {
            "\nYou MAY also propose a replacement price ladder as a \"levels\" object with numeric \
             \"stop_loss\", \"tp1\", \"tp2\", \"tp3\" keys. The entry price is fixed and cannot change."
        } else {
            ""
        };

        let user_prompt = format!(
            "Review this trade recommendation:\n\n{}\n\nRespond ONLY with valid JSON:\n\
             {{\"approved\": true|false, \"confidence_adjust\": -20..20, \"reason\": \"one short sentence\"}}{}",
            context_json, levels_instruction
        );

        let request = ChatRequest {
            model: MODEL.to_string(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AdvisoryError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdvisoryError::Malformed(format!("chat payload: {}", e)))?;

        let mut text = chat
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| AdvisoryError::Malformed("empty choices".to_string()))?;

        // Some replies arrive fenced despite the prompt
        if text.starts_with("```") {
            text = text
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim()
                .to_string();
        }

        serde_json::from_str(&text)
            .map_err(|e| AdvisoryError::Malformed(format!("reply parse: {} (text: {})", e, text)))
    }
}

/// Consultation gate in front of the advisory client
///
/// Owns the rate-limit cooldown and runs every reply through the
/// guardrails before the orchestrator sees it.
pub struct AdvisoryGate {
    client: Option<AdvisoryClient>,
    clock: Arc<dyn Clock>,
    rate_limited_until: Mutex<Option<DateTime<Utc>>>,
}

impl AdvisoryGate {
    pub fn new(client: Option<AdvisoryClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            rate_limited_until: Mutex::new(None),
        }
    }

    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, clock)
    }

    pub async fn consult(&self, ctx: &TradeContext) -> AdvisoryOutcome {
        let Some(client) = &self.client else {
            return AdvisoryOutcome::Skipped;
        };

        let now = self.clock.now();
        if let Some(until) = *self.rate_limited_until.lock().unwrap() {
            if now < until {
                tracing::debug!("Advisory on rate-limit cooldown until {}", until);
                return AdvisoryOutcome::Skipped;
            }
        }

        match client.assess(ctx).await {
            Ok(reply) => AdvisoryOutcome::Assessed(vet_reply(ctx, reply)),
            Err(AdvisoryError::RateLimited) => {
                let until = now + Duration::minutes(RATE_LIMIT_COOLDOWN_MINUTES);
                *self.rate_limited_until.lock().unwrap() = Some(until);
                tracing::warn!(
                    "Advisory rate limited, pausing consultations until {}",
                    until
                );
                AdvisoryOutcome::Unavailable
            }
            Err(e) => {
                tracing::warn!("Advisory unavailable for {}: {}", ctx.symbol, e);
                AdvisoryOutcome::Unavailable
            }
        }
    }
}

/// Apply the guardrails to a raw reply
fn vet_reply(ctx: &TradeContext, reply: AdvisoryReply) -> AdvisoryVerdict {
    let confidence_delta = guardrails::clamp_adjustment(reply.confidence_adjust);
    let reason = reply.reason.map(|r| guardrails::truncate_reason(&r));

    let proposed = ctx.request_levels && reply.levels.is_some();
    let levels_override = if ctx.request_levels {
        reply
            .levels
            .as_ref()
            .and_then(guardrails::parse_levels)
            .and_then(|proposed| match ctx.atr {
                Some(atr) => guardrails::vet_levels(
                    &proposed,
                    ctx.entry,
                    ctx.side,
                    atr,
                    &ctx.current_levels(),
                ),
                // Without an ATR the rails cannot be checked, so a
                // proposed ladder is discarded
                None => None,
            })
    } else {
        None
    };

    AdvisoryVerdict {
        approved: reply.approved,
        confidence_delta,
        reason,
        levels_discarded: proposed && levels_override.is_none(),
        levels_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_ctx(request_levels: bool, atr: Option<f64>) -> TradeContext {
        TradeContext {
            symbol: "BTC".to_string(),
            side: Side::Long,
            entry: 100.0,
            stop_loss: 97.8,
            tp1: 101.2,
            tp2: 102.0,
            tp3: 103.2,
            confidence: 75,
            chg_1h: 0.9,
            chg_24h: 3.1,
            rr_tp1: 0.545,
            atr,
            recent_win_rate: Some(0.6),
            request_levels,
        }
    }

    fn chat_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_assess_parses_fenced_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_body(
                "```json\n{\"approved\": true, \"confidence_adjust\": 35, \"reason\": \"momentum intact\"}\n```",
            ))
            .create_async()
            .await;

        let client = AdvisoryClient::with_base_url("key".to_string(), server.url()).unwrap();
        let reply = client.assess(&test_ctx(false, Some(2.0))).await.unwrap();

        assert!(reply.approved);
        // Raw value survives here; clamping happens in the gate
        assert_eq!(reply.confidence_adjust, 35);
        assert_eq!(reply.reason.as_deref(), Some("momentum intact"));
    }

    #[tokio::test]
    async fn test_gate_clamps_and_truncates() {
        let mut server = mockito::Server::new_async().await;
        let long_reason = "y".repeat(200);
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body(&format!(
                "{{\"approved\": false, \"confidence_adjust\": -90, \"reason\": \"{}\"}}",
                long_reason
            )))
            .create_async()
            .await;

        let client = AdvisoryClient::with_base_url("key".to_string(), server.url()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = AdvisoryGate::new(Some(client), clock);

        let outcome = gate.consult(&test_ctx(false, Some(2.0))).await;
        let AdvisoryOutcome::Assessed(verdict) = outcome else {
            panic!("expected an assessment");
        };
        assert!(!verdict.approved);
        assert_eq!(verdict.confidence_delta, -20);
        assert_eq!(verdict.reason.unwrap().len(), 120);
    }

    #[tokio::test]
    async fn test_gate_vets_proposed_levels() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body(
                "{\"approved\": true, \"confidence_adjust\": 5, \"reason\": \"ok\", \
                 \"levels\": {\"stop_loss\": 98.0, \"tp1\": 101.4, \"tp2\": 102.2, \"tp3\": 103.4}}",
            ))
            .create_async()
            .await;

        let client = AdvisoryClient::with_base_url("key".to_string(), server.url()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = AdvisoryGate::new(Some(client), clock);

        let outcome = gate.consult(&test_ctx(true, Some(2.0))).await;
        let AdvisoryOutcome::Assessed(verdict) = outcome else {
            panic!("expected an assessment");
        };
        let levels = verdict.levels_override.unwrap();
        assert_eq!(levels.stop_loss, 98.0);
        assert_eq!(levels.tp3, 103.4);
    }

    #[tokio::test]
    async fn test_gate_discards_levels_without_atr() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body(
                "{\"approved\": true, \"confidence_adjust\": 0, \
                 \"levels\": {\"stop_loss\": 98.0, \"tp1\": 101.4, \"tp2\": 102.2, \"tp3\": 103.4}}",
            ))
            .create_async()
            .await;

        let client = AdvisoryClient::with_base_url("key".to_string(), server.url()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = AdvisoryGate::new(Some(client), clock);

        let outcome = gate.consult(&test_ctx(true, None)).await;
        let AdvisoryOutcome::Assessed(verdict) = outcome else {
            panic!("expected an assessment");
        };
        assert!(verdict.levels_override.is_none());
        assert!(verdict.levels_discarded);
    }

    #[tokio::test]
    async fn test_partial_ladder_discarded_whole() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body(
                "{\"approved\": true, \"confidence_adjust\": 0, \
                 \"levels\": {\"stop_loss\": 98.0, \"tp1\": 101.4, \"tp3\": 103.4}}",
            ))
            .create_async()
            .await;

        let client = AdvisoryClient::with_base_url("key".to_string(), server.url()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = AdvisoryGate::new(Some(client), clock);

        let outcome = gate.consult(&test_ctx(true, Some(2.0))).await;
        let AdvisoryOutcome::Assessed(verdict) = outcome else {
            panic!("expected an assessment");
        };
        assert!(verdict.levels_override.is_none());
        assert!(verdict.levels_discarded);
    }

    #[tokio::test]
    async fn test_rate_limit_cooldown() {
        let mut server = mockito::Server::new_async().await;
        // The second consult falls inside the cooldown window, so only
        // the first and third reach the server
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .expect(2)
            .create_async()
            .await;

        let client = AdvisoryClient::with_base_url("key".to_string(), server.url()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = AdvisoryGate::new(Some(client), clock.clone());

        let ctx = test_ctx(false, Some(2.0));
        assert_eq!(gate.consult(&ctx).await, AdvisoryOutcome::Unavailable);
        assert_eq!(gate.consult(&ctx).await, AdvisoryOutcome::Skipped);

        clock.advance(Duration::minutes(16));
        assert_eq!(gate.consult(&ctx).await, AdvisoryOutcome::Unavailable);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_disabled_gate_skips() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = AdvisoryGate::disabled(clock);
        let outcome = gate.consult(&test_ctx(false, Some(2.0))).await;
        assert_eq!(outcome, AdvisoryOutcome::Skipped);
    }
}
