//! Inbound usage events.
//!
//! A wire message is a JSON array of events. Each event carries a `report_type` (`text`, `image`
//! or `video`, defaulting to `text`) and a `token_usage` object whose shape depends on it. On
//! decode the pair becomes a single [`Usage`] variant, so pricing can dispatch on the variant.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Text,
    Image,
    Video,
}

/// Token counts of one LLM call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_tokens: i64,
    pub reasoning_tokens: i64,
    pub tokens_per_sec: i64,
    pub latency: f64,
}

impl TokenUsage {
    /// Whether the charged token counts sum to zero. A sum that overflows is not zero.
    pub fn is_zero(&self) -> bool {
        self.input_tokens
            .checked_add(self.output_tokens)
            .and_then(|sum| sum.checked_add(self.cache_tokens))
            == Some(0)
    }
}

/// One image generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUsage {
    pub quality: String,
    pub size: String,
    /// Number of images produced
    #[serde(default = "default_image_count", alias = "n")]
    pub count: u32,
}

fn default_image_count() -> u32 {
    1
}

/// One video render
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoUsage {
    pub seconds: f64,
    /// Resolution, e.g. `1280x720`
    pub size: String,
}

/// Usage payload, keyed by report type
#[derive(Debug, Clone, PartialEq)]
pub enum Usage {
    Text(TokenUsage),
    Image(ImageUsage),
    Video(VideoUsage),
}

impl Usage {
    pub fn report_type(&self) -> ReportType {
        match self {
            Usage::Text(_) => ReportType::Text,
            Usage::Image(_) => ReportType::Image,
            Usage::Video(_) => ReportType::Video,
        }
    }

    /// Whether there is nothing to bill
    pub fn is_zero(&self) -> bool {
        match self {
            Usage::Text(tokens) => tokens.is_zero(),
            Usage::Image(image) => image.count == 0,
            Usage::Video(video) => video.seconds <= 0.0,
        }
    }
}

/// A single billable call reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireUsageEvent", into = "WireUsageEvent")]
pub struct UsageEvent {
    pub id: String,
    pub node_id: String,
    pub model: String,
    /// Identifier used for token price lookup
    pub model_id: String,
    pub actual_model: String,
    pub provider: String,
    pub actual_provider: String,
    pub actual_provider_id: String,
    /// User id as a numeric string
    pub caller: String,
    pub caller_key: String,
    pub client_version: Option<String>,
    pub agent_version: Option<String>,
    pub stream: bool,
    pub usage: Usage,
}

impl UsageEvent {
    /// The billed user's id, parsed from `caller`
    pub fn user_id(&self) -> Result<i64> {
        self.caller.trim().parse::<i64>().map_err(|_| Error::InvalidCaller {
            caller: self.caller.clone(),
        })
    }
}

impl fmt::Display for UsageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<UsageEvent: id:{}, model:{}, caller:{}, node:{}>",
            self.id, self.model, self.caller, self.node_id
        )
    }
}

/// Wire shape of a usage event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireUsageEvent {
    id: String,
    node_id: String,
    model: String,
    model_id: String,
    actual_model: String,
    provider: String,
    actual_provider: String,
    actual_provider_id: String,
    caller: String,
    caller_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_version: Option<String>,
    stream: bool,
    report_type: ReportType,
    token_usage: serde_json::Value,
}

impl TryFrom<WireUsageEvent> for UsageEvent {
    type Error = serde_json::Error;

    fn try_from(wire: WireUsageEvent) -> std::result::Result<Self, Self::Error> {
        let payload = wire.token_usage;
        let usage = match wire.report_type {
            ReportType::Text if payload.is_null() => Usage::Text(TokenUsage::default()),
            ReportType::Text => Usage::Text(serde_json::from_value(payload)?),
            ReportType::Image => Usage::Image(serde_json::from_value(payload)?),
            ReportType::Video => Usage::Video(serde_json::from_value(payload)?),
        };

        Ok(Self {
            id: wire.id,
            node_id: wire.node_id,
            model: wire.model,
            model_id: wire.model_id,
            actual_model: wire.actual_model,
            provider: wire.provider,
            actual_provider: wire.actual_provider,
            actual_provider_id: wire.actual_provider_id,
            caller: wire.caller,
            caller_key: wire.caller_key,
            client_version: wire.client_version,
            agent_version: wire.agent_version,
            stream: wire.stream,
            usage,
        })
    }
}

impl From<UsageEvent> for WireUsageEvent {
    fn from(event: UsageEvent) -> Self {
        let report_type = event.usage.report_type();
        let token_usage = match &event.usage {
            Usage::Text(tokens) => serde_json::to_value(tokens),
            Usage::Image(image) => serde_json::to_value(image),
            Usage::Video(video) => serde_json::to_value(video),
        }
        .unwrap_or_default();

        Self {
            id: event.id,
            node_id: event.node_id,
            model: event.model,
            model_id: event.model_id,
            actual_model: event.actual_model,
            provider: event.provider,
            actual_provider: event.actual_provider,
            actual_provider_id: event.actual_provider_id,
            caller: event.caller,
            caller_key: event.caller_key,
            client_version: event.client_version,
            agent_version: event.agent_version,
            stream: event.stream,
            report_type,
            token_usage,
        }
    }
}

/// The events decoded from one inbound message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageBatch(pub Vec<UsageEvent>);

impl UsageBatch {
    /// Decode a JSON array of events. Any malformed element fails the whole message.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UsageEvent> {
        self.0.iter()
    }
}

impl From<Vec<UsageEvent>> for UsageBatch {
    fn from(events: Vec<UsageEvent>) -> Self {
        Self(events)
    }
}

impl<'a> IntoIterator for &'a UsageBatch {
    type Item = &'a UsageEvent;
    type IntoIter = std::slice::Iter<'a, UsageEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
