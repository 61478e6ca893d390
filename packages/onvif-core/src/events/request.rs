//! Subscription request parameters.
//!
//! Parameters come from resource attributes first and the command body
//! second; body values win. Keys are accepted in camelCase or PascalCase.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::duration::parse_iso8601;
use crate::error::{OnvifError, OnvifResult};
use crate::protocol_constants::{MAX_MESSAGE_TIMEOUT_SECS, MIN_TERMINATION_SECS};

const TOPIC_DIALECT: &str = "http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet";
const MESSAGE_CONTENT_DIALECT: &str =
    "http://www.onvif.org/ver10/tev/messageContentFilter/ItemFilter";

/// Subscription flavour selected by `subscribeType`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscribeType {
    #[default]
    PullPoint,
    BaseNotification,
}

impl FromStr for SubscribeType {
    type Err = OnvifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pullpoint" => Ok(Self::PullPoint),
            "basenotification" => Ok(Self::BaseNotification),
            other => Err(OnvifError::contract(format!(
                "unknown subscribeType {other:?}"
            ))),
        }
    }
}

impl fmt::Display for SubscribeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullPoint => f.write_str("PullPoint"),
            Self::BaseNotification => f.write_str("BaseNotification"),
        }
    }
}

/// Validated parameters of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub subscribe_type: SubscribeType,
    pub auto_renew: bool,
    pub topic_filter: Option<String>,
    pub message_content_filter: Option<String>,
    pub subscription_policy: Option<Value>,
    /// ISO-8601 duration, sent verbatim in `Renew`.
    pub initial_termination_time: String,
    /// ISO-8601 duration of each `PullMessages` long-poll.
    pub message_timeout: String,
    pub message_limit: u32,
}

impl Default for SubscriptionRequest {
    fn default() -> Self {
        Self {
            subscribe_type: SubscribeType::PullPoint,
            auto_renew: true,
            topic_filter: None,
            message_content_filter: None,
            subscription_policy: None,
            initial_termination_time: "PT60S".to_string(),
            message_timeout: "PT5S".to_string(),
            message_limit: 10,
        }
    }
}

impl SubscriptionRequest {
    /// Merges attributes and body (body wins) and validates the result.
    pub fn from_parts(attributes: &Map<String, Value>, body: &Value) -> OnvifResult<Self> {
        let mut request = Self::default();
        request.apply(attributes)?;
        if let Value::Object(body) = body {
            request.apply(body)?;
        }
        request.validate()?;
        Ok(request)
    }

    fn apply(&mut self, source: &Map<String, Value>) -> OnvifResult<()> {
        if let Some(v) = lookup(source, "subscribeType") {
            self.subscribe_type = as_string(v)?.parse()?;
        }
        if let Some(v) = lookup(source, "autoRenew") {
            self.auto_renew = as_bool(v)?;
        }
        if let Some(v) = lookup(source, "topicFilter") {
            self.topic_filter = non_empty(as_string(v)?);
        }
        if let Some(v) = lookup(source, "messageContentFilter") {
            self.message_content_filter = non_empty(as_string(v)?);
        }
        if let Some(v) = lookup(source, "subscriptionPolicy") {
            self.subscription_policy = match v {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                other => Some(other.clone()),
            };
        }
        if let Some(v) = lookup(source, "initialTerminationTime") {
            self.initial_termination_time = as_string(v)?;
        }
        if let Some(v) = lookup(source, "messageTimeout") {
            self.message_timeout = as_string(v)?;
        }
        if let Some(v) = lookup(source, "messageLimit") {
            self.message_limit = as_u32(v)?;
        }
        Ok(())
    }

    fn validate(&self) -> OnvifResult<()> {
        let termination = self.termination()?;
        if termination < Duration::from_secs(MIN_TERMINATION_SECS) {
            return Err(OnvifError::contract(format!(
                "initialTerminationTime {} must be at least {}s",
                self.initial_termination_time, MIN_TERMINATION_SECS
            )));
        }
        if self.message_timeout()? > Duration::from_secs(MAX_MESSAGE_TIMEOUT_SECS) {
            return Err(OnvifError::contract(format!(
                "messageTimeout {} must not exceed {}s",
                self.message_timeout, MAX_MESSAGE_TIMEOUT_SECS
            )));
        }
        Ok(())
    }

    pub fn termination(&self) -> OnvifResult<Duration> {
        Ok(parse_iso8601(&self.initial_termination_time)?)
    }

    pub fn message_timeout(&self) -> OnvifResult<Duration> {
        Ok(parse_iso8601(&self.message_timeout)?)
    }

    /// `wsnt:Filter` content, or `None` without filters.
    pub fn filter(&self) -> Option<Value> {
        let mut filter = Map::new();
        if let Some(topic) = &self.topic_filter {
            filter.insert(
                "wsnt:TopicExpression".into(),
                json!({ "@Dialect": TOPIC_DIALECT, "#text": topic }),
            );
        }
        if let Some(content) = &self.message_content_filter {
            filter.insert(
                "wsnt:MessageContent".into(),
                json!({ "@Dialect": MESSAGE_CONTENT_DIALECT, "#text": content }),
            );
        }
        (!filter.is_empty()).then_some(Value::Object(filter))
    }
}

/// Finds `key` in camelCase or with its first letter uppercased.
fn lookup<'a>(source: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    source.get(key).or_else(|| {
        let mut chars = key.chars();
        let pascal: String = match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => return None,
        };
        source.get(&pascal)
    })
}

fn as_string(v: &Value) -> OnvifResult<String> {
    match v {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(OnvifError::contract(format!("expected a string, got {other}"))),
    }
}

fn as_bool(v: &Value) -> OnvifResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| OnvifError::contract(format!("expected a boolean, got {s:?}"))),
        other => Err(OnvifError::contract(format!("expected a boolean, got {other}"))),
    }
}

fn as_u32(v: &Value) -> OnvifResult<u32> {
    let parsed = match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| OnvifError::contract(format!("expected a positive integer, got {v}")))
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn body_overrides_attributes() {
        let attributes = attrs(json!({
            "subscribeType": "BaseNotification",
            "autoRenew": "false",
            "initialTerminationTime": "PT120S",
            "messageLimit": "5"
        }));
        let body = json!({ "AutoRenew": true, "MessageLimit": 20, "TopicFilter": "tns1:VideoSource" });
        let request = SubscriptionRequest::from_parts(&attributes, &body).unwrap();

        assert_eq!(request.subscribe_type, SubscribeType::BaseNotification);
        assert!(request.auto_renew);
        assert_eq!(request.message_limit, 20);
        assert_eq!(request.initial_termination_time, "PT120S");
        assert_eq!(request.termination().unwrap(), Duration::from_secs(120));
        assert_eq!(request.topic_filter.as_deref(), Some("tns1:VideoSource"));
    }

    #[test]
    fn short_termination_is_a_contract_error() {
        let body = json!({ "initialTerminationTime": "PT10S" });
        let err = SubscriptionRequest::from_parts(&Map::new(), &body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);

        let body = json!({ "initialTerminationTime": "PT11S" });
        assert!(SubscriptionRequest::from_parts(&Map::new(), &body).is_ok());
    }

    #[test]
    fn filter_is_built_only_when_requested() {
        let request = SubscriptionRequest::default();
        assert_eq!(request.filter(), None);

        let request = SubscriptionRequest {
            topic_filter: Some("tns1:RuleEngine//.".into()),
            ..Default::default()
        };
        let filter = request.filter().unwrap();
        assert_eq!(filter["wsnt:TopicExpression"]["#text"], "tns1:RuleEngine//.");
        assert_eq!(filter["wsnt:TopicExpression"]["@Dialect"], TOPIC_DIALECT);
    }

    #[test]
    fn oversized_message_timeout_is_a_contract_error() {
        let body = json!({ "messageTimeout": "PT18446744073709551615S" });
        let err = SubscriptionRequest::from_parts(&Map::new(), &body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);

        let body = json!({ "messageTimeout": "PT3601S" });
        assert!(SubscriptionRequest::from_parts(&Map::new(), &body).is_err());

        let body = json!({ "messageTimeout": "PT1H" });
        let request = SubscriptionRequest::from_parts(&Map::new(), &body).unwrap();
        assert_eq!(request.message_timeout().unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn unknown_subscribe_type_is_rejected() {
        let body = json!({ "subscribeType": "Polling" });
        assert!(SubscriptionRequest::from_parts(&Map::new(), &body).is_err());
    }
}
