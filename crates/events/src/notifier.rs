//! Fire-and-forget facade over the event bus and resource email.
//!
//! Callers never await delivery: events go onto the bus, emails are
//! spawned, and any failure is only logged.

use std::sync::Arc;

use crate::bus::{EventBus, PlatformEvent};
use crate::delivery::email::{EmailDelivery, ResourceEmail};

/// Environments in which resource email is never sent.
const SILENT_ENVIRONMENTS: [&str; 2] = ["default", "local"];

#[derive(Clone)]
pub struct Notifier {
    bus: Arc<EventBus>,
    email: Option<Arc<EmailDelivery>>,
    environment: String,
}

impl Notifier {
    pub fn new(
        bus: Arc<EventBus>,
        email: Option<EmailDelivery>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            email: email.map(Arc::new),
            environment: environment.into(),
        }
    }

    /// A notifier with its own bus and no mailer.
    pub fn detached() -> Self {
        Self::new(Arc::new(EventBus::default()), None, "local")
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn publish(&self, event: PlatformEvent) {
        tracing::debug!(event_type = %event.event_type, "Publishing event");
        self.bus.publish(event);
    }

    /// Whether `email` would be handed to the mailer.
    pub fn will_send(&self, email: &ResourceEmail) -> bool {
        self.email.is_some()
            && email.has_valid_recipient()
            && !SILENT_ENVIRONMENTS.contains(&self.environment.as_str())
    }

    /// Send `email` in the background. Returns whether it was dispatched.
    pub fn email(&self, email: ResourceEmail) -> bool {
        if !self.will_send(&email) {
            tracing::debug!(
                to = %email.recipient,
                environment = %self.environment,
                "Skipping resource email"
            );
            return false;
        }
        let Some(mailer) = self.email.clone() else {
            return false;
        };
        tokio::spawn(async move {
            if let Err(e) = mailer.deliver(&email).await {
                tracing::error!(to = %email.recipient, error = %e, "Failed to send resource email");
            }
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
