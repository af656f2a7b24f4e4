//! Idempotent publish boundary
//!
//! [`DedupPublisher`] remembers the last value emitted on every topic and
//! only calls the transport when a value changes. The remembered value is
//! advanced strictly after the transport reports success, so a failed publish
//! is retried on the next cycle.

pub mod anonymize;

use crate::config::MqttConfig;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::topics;
use std::collections::HashMap;
use std::sync::Arc;

/// Outward transport of the publish/subscribe broker
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Send one payload to a fully qualified topic
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;

    /// Whether the transport is currently connected
    fn is_connected(&self) -> bool {
        true
    }
}

/// Transport that writes every message to the log
#[derive(Debug, Clone)]
pub struct LogPublisher {
    logger: StructuredLogger,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self {
            logger: get_logger("publisher"),
        }
    }
}

impl Default for LogPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        self.logger.info(&format!(
            "{} = {}{}",
            topic,
            payload,
            if retain { " (retained)" } else { "" }
        ));
        Ok(())
    }
}

/// A value as remembered in the canonical state
#[derive(Debug, Clone, PartialEq)]
pub enum TopicValue {
    Json(serde_json::Value),
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl TopicValue {
    /// Payload text sent on the wire
    pub fn render(&self) -> Result<String> {
        Ok(match self {
            Self::Json(value) => serde_json::to_string(value)?,
            Self::Str(value) => value.clone(),
            Self::Int(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
        })
    }
}

/// Change-only publisher holding the canonical state of one owner
pub struct DedupPublisher {
    transport: Arc<dyn Publisher>,
    topic_root: String,
    anonymize: bool,
    canonical: HashMap<String, TopicValue>,
    logger: StructuredLogger,
}

impl std::fmt::Debug for DedupPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupPublisher")
            .field("topic_root", &self.topic_root)
            .field("anonymize", &self.anonymize)
            .field("canonical_topics", &self.canonical.len())
            .finish()
    }
}

impl DedupPublisher {
    pub fn new(transport: Arc<dyn Publisher>, config: &MqttConfig) -> Self {
        Self {
            transport,
            topic_root: config.topic_root.clone(),
            anonymize: config.anonymized_publishing,
            canonical: HashMap::new(),
            logger: get_logger("publisher"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn topic_root(&self) -> &str {
        &self.topic_root
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Fully qualified, sanitized topic of a key
    pub fn topic_for(&self, key: &str, no_prefix: bool) -> String {
        if no_prefix {
            topics::sanitize(key)
        } else {
            topics::sanitize(&format!("{}/{}", self.topic_root, key))
        }
    }

    /// Last value successfully published on a fully qualified topic
    pub fn last_published(&self, topic: &str) -> Option<&TopicValue> {
        self.canonical.get(topic)
    }

    /// Publish a value if it differs from the canonical state.
    ///
    /// Returns `Ok(true)` when the transport was called and succeeded.
    pub async fn publish_value(
        &mut self,
        key: &str,
        value: TopicValue,
        no_prefix: bool,
    ) -> Result<bool> {
        let topic = self.topic_for(key, no_prefix);
        if self.canonical.get(&topic) == Some(&value) {
            return Ok(false);
        }

        let payload = match &value {
            TopicValue::Json(doc) if self.anonymize => {
                serde_json::to_string(&anonymize::anonymize(doc.clone()))?
            }
            other => other.render()?,
        };

        if let Err(e) = self.transport.publish(&topic, payload, true).await {
            self.logger
                .warn(&format!("Publishing to {} failed: {}", topic, e));
            return Err(e);
        }

        self.logger.trace(&format!("Published {}", topic));
        self.canonical.insert(topic, value);
        Ok(true)
    }

    pub async fn publish_json(
        &mut self,
        key: &str,
        value: serde_json::Value,
        no_prefix: bool,
    ) -> Result<bool> {
        self.publish_value(key, TopicValue::Json(value), no_prefix)
            .await
    }

    pub async fn publish_str<S: Into<String>>(
        &mut self,
        key: &str,
        value: S,
        no_prefix: bool,
    ) -> Result<bool> {
        self.publish_value(key, TopicValue::Str(value.into()), no_prefix)
            .await
    }

    pub async fn publish_int(&mut self, key: &str, value: i64, no_prefix: bool) -> Result<bool> {
        self.publish_value(key, TopicValue::Int(value), no_prefix)
            .await
    }

    pub async fn publish_bool(&mut self, key: &str, value: bool, no_prefix: bool) -> Result<bool> {
        self.publish_value(key, TopicValue::Bool(value), no_prefix)
            .await
    }

    pub async fn publish_float(&mut self, key: &str, value: f64, no_prefix: bool) -> Result<bool> {
        self.publish_value(key, TopicValue::Float(value), no_prefix)
            .await
    }

    /// Liveness message; never deduplicated
    pub async fn keepalive(&self) -> Result<()> {
        let topic = self.topic_for(topics::INTERNAL_LWT, false);
        self.transport
            .publish(&topic, topics::LWT_ONLINE.to_string(), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_payloads() {
        assert_eq!(TopicValue::Float(61.0).render().unwrap(), "61");
        assert_eq!(TopicValue::Float(4.5).render().unwrap(), "4.5");
        assert_eq!(TopicValue::Bool(true).render().unwrap(), "true");
        assert_eq!(
            TopicValue::Json(serde_json::json!({"a": 1}))
                .render()
                .unwrap(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn topic_is_sanitized() {
        let config = MqttConfig::default();
        let publisher = DedupPublisher::new(Arc::new(LogPublisher::new()), &config);
        assert_eq!(
            publisher.topic_for("me+you/vehicles/V#1/doors/locked", false),
            "saic/me_you/vehicles/V_1/doors/locked"
        );
        assert_eq!(publisher.topic_for("station/soc", true), "station/soc");
    }
}
