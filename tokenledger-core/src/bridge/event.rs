//! Usage events as the host reports them, and their normalized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::usage::{RequestDetail, TokenStats};

/// Placeholder identity for events that carry no model or API identifier.
pub const UNKNOWN: &str = "unknown";

/// One completed request, as published by the host.
///
/// Fields may be empty; [`UsageEvent::normalize`] fills the gaps before
/// anything is recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// When the request was made; `None` means "now"
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub auth_index: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub tokens: TokenStats,
}

/// Request-scoped information the host attaches to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageContext {
    /// Path of the inbound request, e.g. `/v1/chat/completions`
    pub request_path: Option<String>,
    /// HTTP status sent to the client, when one was written
    pub status: Option<u16>,
}

impl UsageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_path(mut self, path: impl Into<String>) -> Self {
        self.request_path = Some(path.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// A request with no recorded status counts as successful.
    pub fn success(&self) -> bool {
        self.status.map_or(true, |status| status < 400)
    }

    fn api_identifier(&self) -> Option<&str> {
        self.request_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
    }
}

/// An event reduced to the `(api_key, model, detail)` triple the store keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUsage {
    pub api_key: String,
    pub model: String,
    pub detail: RequestDetail,
}

impl UsageEvent {
    /// Fill defaults and resolve identity.
    ///
    /// - API identifier: `api_key`, then the request path, then `provider`,
    ///   then [`UNKNOWN`]
    /// - model: [`UNKNOWN`] when empty
    /// - timestamp: `now` when absent
    /// - failed: set explicitly, or implied by a status of 400 or above
    /// - tokens: see [`normalize_tokens`]
    pub fn normalize(&self, ctx: &UsageContext, now: DateTime<Utc>) -> NormalizedUsage {
        let api_key = if !self.api_key.is_empty() {
            self.api_key.clone()
        } else if let Some(path) = ctx.api_identifier() {
            path.to_string()
        } else if !self.provider.is_empty() {
            self.provider.clone()
        } else {
            UNKNOWN.to_string()
        };

        let model = if self.model.is_empty() {
            UNKNOWN.to_string()
        } else {
            self.model.clone()
        };

        NormalizedUsage {
            api_key,
            model,
            detail: RequestDetail {
                timestamp: self.requested_at.unwrap_or(now),
                source: self.source.clone(),
                auth_index: self.auth_index.clone(),
                tokens: normalize_tokens(self.tokens),
                failed: self.failed || !ctx.success(),
            },
        }
    }
}

/// Clamp negative counters to zero and derive `total_tokens` when the
/// producer left it at zero.
///
/// Input, output and reasoning are summed first; cached tokens only count when
/// that sum is still zero.
pub fn normalize_tokens(tokens: TokenStats) -> TokenStats {
    let mut tokens = TokenStats {
        input_tokens: tokens.input_tokens.max(0),
        output_tokens: tokens.output_tokens.max(0),
        reasoning_tokens: tokens.reasoning_tokens.max(0),
        cached_tokens: tokens.cached_tokens.max(0),
        total_tokens: tokens.total_tokens.max(0),
    };
    if tokens.total_tokens == 0 {
        tokens.total_tokens = tokens
            .input_tokens
            .saturating_add(tokens.output_tokens)
            .saturating_add(tokens.reasoning_tokens);
    }
    if tokens.total_tokens == 0 {
        tokens.total_tokens = tokens.cached_tokens;
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_empty_event_gets_defaults() {
        let normalized = UsageEvent::default().normalize(&UsageContext::new(), now());

        assert_eq!(normalized.api_key, UNKNOWN);
        assert_eq!(normalized.model, UNKNOWN);
        assert_eq!(normalized.detail.timestamp, now());
        assert!(!normalized.detail.failed);
    }

    #[test]
    fn test_api_identifier_fallback_order() {
        let mut event = UsageEvent {
            provider: "openai".to_string(),
            ..Default::default()
        };
        let ctx = UsageContext::new().with_request_path("/v1/chat/completions");

        assert_eq!(event.normalize(&ctx, now()).api_key, "/v1/chat/completions");
        assert_eq!(event.normalize(&UsageContext::new(), now()).api_key, "openai");

        // Whitespace-only paths don't count
        let blank = UsageContext::new().with_request_path("  ");
        assert_eq!(event.normalize(&blank, now()).api_key, "openai");

        event.api_key = "sk-team".to_string();
        assert_eq!(event.normalize(&ctx, now()).api_key, "sk-team");
    }

    #[test]
    fn test_failure_from_status() {
        let event = UsageEvent::default();

        let ok = UsageContext::new().with_status(200);
        assert!(!event.normalize(&ok, now()).detail.failed);

        let redirect = UsageContext::new().with_status(399);
        assert!(!event.normalize(&redirect, now()).detail.failed);

        let bad = UsageContext::new().with_status(400);
        assert!(event.normalize(&bad, now()).detail.failed);

        let explicit = UsageEvent {
            failed: true,
            ..Default::default()
        };
        assert!(explicit.normalize(&ok, now()).detail.failed);
    }

    #[test]
    fn test_requested_at_is_kept() {
        let at = Utc.timestamp_opt(1_600_000_000, 5).unwrap();
        let event = UsageEvent {
            requested_at: Some(at),
            model: "gpt-4o".to_string(),
            ..Default::default()
        };
        let normalized = event.normalize(&UsageContext::new(), now());
        assert_eq!(normalized.detail.timestamp, at);
        assert_eq!(normalized.model, "gpt-4o");
    }

    #[test]
    fn test_normalize_tokens() {
        let summed = normalize_tokens(TokenStats {
            input_tokens: 10,
            output_tokens: 5,
            reasoning_tokens: 2,
            cached_tokens: 100,
            total_tokens: 0,
        });
        assert_eq!(summed.total_tokens, 17);

        let cached_only = normalize_tokens(TokenStats {
            cached_tokens: 8,
            ..Default::default()
        });
        assert_eq!(cached_only.total_tokens, 8);

        let reported = normalize_tokens(TokenStats {
            input_tokens: 10,
            total_tokens: 3,
            ..Default::default()
        });
        assert_eq!(reported.total_tokens, 3);

        let negative = normalize_tokens(TokenStats {
            input_tokens: -4,
            output_tokens: 6,
            total_tokens: -1,
            ..Default::default()
        });
        assert_eq!(negative.input_tokens, 0);
        assert_eq!(negative.total_tokens, 6);
    }
}
