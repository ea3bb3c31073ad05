//! Desktop notifications for warnings and errors.

use std::fmt::{self, Write as _};
use std::time::{Duration, Instant};

use notify_rust::Notification;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, error};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::{APP_NAME, APP_NAME_PRETTY};

/// The same text is not shown twice within this window.
const REPEAT_WINDOW: Duration = Duration::from_secs(10);

/// Send a system notification with a summary and body.
pub fn notify(summary: &str, body: &str) {
    Notification::new()
        .appname(APP_NAME)
        .summary(&format!("{} - {}", APP_NAME_PRETTY, summary))
        .body(body)
        .show()
        .map_err(|e| error!("Failed to send notification: {}", e))
        .ok();
}

/// Collects the message and the structured fields of an event.
#[derive(Default)]
struct EventText {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl EventText {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name(), value));
        }
    }

    /// `message (key=value, ...)`, or `None` for events without a message.
    fn body(self) -> Option<String> {
        let mut body = self.message?;
        if !self.fields.is_empty() {
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            let _ = write!(body, " ({})", fields.join(", "));
        }
        Some(body)
    }
}

impl Visit for EventText {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}

/// Tracing layer that turns warnings and errors from this workspace into
/// desktop notifications.
///
/// A warning that repeats, like a tool failing on every attempt, is shown once
/// per [`REPEAT_WINDOW`].
#[derive(Debug, Default)]
pub struct NotificationLayer {
    last: Mutex<Option<(String, Instant)>>,
}

impl NotificationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `text` should be shown at `now`, remembering it if so.
    fn admit(&self, text: &str, now: Instant) -> bool {
        let mut last = self.last.lock();
        if let Some((previous, at)) = last.as_ref() {
            if previous == text && now.duration_since(*at) < REPEAT_WINDOW {
                return false;
            }
        }
        *last = Some((text.to_owned(), now));
        true
    }
}

fn is_own_target(target: &str) -> bool {
    target
        .split("::")
        .next()
        .is_some_and(|krate| krate.starts_with(APP_NAME))
}

/// Notification title for an event: severity plus the module it came from,
/// e.g. `error in session`.
fn summary(level: Level, target: &str) -> Option<String> {
    let severity = match level {
        Level::ERROR => "error",
        Level::WARN => "warning",
        _ => return None,
    };
    let component = target.rsplit("::").next().unwrap_or(target);
    Some(format!("{} in {}", severity, component))
}

impl<S: Subscriber> Layer<S> for NotificationLayer {
    fn on_event(&self, event: &Event<'_>, _: Context<'_, S>) {
        let metadata = event.metadata();
        // Failures to notify are logged from this module; don't loop on them.
        if !is_own_target(metadata.target()) || metadata.target() == module_path!() {
            return;
        }
        let Some(summary) = summary(*metadata.level(), metadata.target()) else {
            return;
        };

        let mut text = EventText::default();
        event.record(&mut text);
        if let Some(body) = text.body() {
            if self.admit(&body, Instant::now()) {
                notify(&summary, &body);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        assert_eq!(
            summary(Level::ERROR, "voxagent::session").as_deref(),
            Some("error in session")
        );
        assert_eq!(
            summary(Level::WARN, "voxagent_models::openai").as_deref(),
            Some("warning in openai")
        );
        assert_eq!(summary(Level::INFO, "voxagent::session"), None);
    }

    #[test]
    fn test_own_targets() {
        assert!(is_own_target("voxagent::session"));
        assert!(is_own_target("voxagent_models::openai"));
        assert!(!is_own_target("reqwest::connect"));
    }

    #[test]
    fn test_body_lists_fields() {
        let text = EventText {
            message: Some("Tool failed".to_owned()),
            fields: vec![("tool", "run_shell".to_owned())],
        };
        assert_eq!(text.body().as_deref(), Some("Tool failed (tool=run_shell)"));
        assert_eq!(EventText::default().body(), None);
    }

    #[test]
    fn test_repeats_are_suppressed() {
        let layer = NotificationLayer::new();
        let t0 = Instant::now();
        assert!(layer.admit("Chat request failed", t0));
        assert!(!layer.admit("Chat request failed", t0 + Duration::from_secs(3)));
        assert!(layer.admit("Tool failed", t0 + Duration::from_secs(4)));
        assert!(layer.admit("Chat request failed", t0 + Duration::from_secs(5)));
        assert!(layer.admit("Chat request failed", t0 + REPEAT_WINDOW + Duration::from_secs(6)));
    }
}
