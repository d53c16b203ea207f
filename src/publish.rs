//! # Publishing Module
//!
//! Best-effort delivery of measurements as topic/payload messages.
//!
//! Each configured [`MessageTemplate`] turns a [`Measurement`] into one
//! message. Templates understand these placeholders:
//!
//! | Placeholder | Replaced with |
//! |-------------|---------------|
//! | `{name}` | Measurement name (channel name, `live_consumption`, ...) |
//! | `{value}` | Value with default formatting |
//! | `{value:.N}` | Value with `N` decimals (`{value:.Nf}` also accepted) |
//! | `{unit}` | Unit string |
//! | `{json}` | The whole measurement as a JSON object |
//!
//! Unknown placeholders are left as they are.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// A single named value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// Topic and payload patterns for one outgoing message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageTemplate {
    pub topic: String,

    #[serde(default = "default_payload")]
    pub payload: String,
}

fn default_payload() -> String { "{json}".to_string() }

impl MessageTemplate {
    /// Fill in topic and payload for `measurement`
    pub fn render(&self, measurement: &Measurement) -> (String, String) {
        (fill(&self.topic, measurement), fill(&self.payload, measurement))
    }
}

/// Substitute the placeholders of `template`
fn fill(template: &str, measurement: &Measurement) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let placeholder = &after[..close];
        match expand(placeholder, measurement) {
            Some(text) => out.push_str(&text),
            None => {
                out.push('{');
                out.push_str(placeholder);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn expand(placeholder: &str, measurement: &Measurement) -> Option<String> {
    let (key, format) = match placeholder.split_once(':') {
        Some((key, format)) => (key, Some(format)),
        None => (placeholder, None),
    };

    match (key, format) {
        ("name", None) => Some(measurement.name.clone()),
        ("unit", None) => Some(measurement.unit.clone()),
        ("json", None) => Some(serde_json::to_string(measurement).unwrap_or_default()),
        ("value", None) => Some(measurement.value.to_string()),
        ("value", Some(format)) => {
            let digits = format.strip_prefix('.')?.trim_end_matches('f');
            let precision: usize = digits.parse().ok()?;
            Some(format!("{:.*}", precision, measurement.value))
        }
        _ => None,
    }
}

/// Outgoing message sink
#[cfg_attr(test, mockall::automock)]
pub trait Publisher: Send + Sync {
    /// Send one message
    fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// Publisher that writes every message to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        info!("publishing message with topic {}: {}", topic, payload);
        Ok(())
    }
}

/// Renders measurements through every template and hands them to a publisher
pub struct MessageDispatcher {
    templates: Vec<MessageTemplate>,
    publisher: Box<dyn Publisher>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}

impl MessageDispatcher {
    pub fn new(templates: Vec<MessageTemplate>, publisher: Box<dyn Publisher>) -> Self {
        Self { templates, publisher }
    }

    /// Publish `measurement` once per template
    ///
    /// Failures are logged and otherwise ignored.
    pub fn dispatch(&self, measurement: &Measurement) {
        for template in &self.templates {
            let (topic, payload) = template.render(measurement);
            if let Err(e) = self.publisher.publish(&topic, &payload) {
                warn!("Failed to publish {}: {}", topic, e);
            }
        }
    }
}
