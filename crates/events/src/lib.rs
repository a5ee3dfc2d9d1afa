//! Alaska side channels.
//!
//! - [`EventBus`] carries every lifecycle [`PlatformEvent`] in process.
//! - [`persistence`] appends each event to the `events` table.
//! - [`delivery`] pushes events and resource emails outside the platform.
//! - [`Notifier`] is the fire-and-forget facade the worker and API use.
//! - [`EventServices`] starts and drains the bus subscribers.

pub mod bus;
pub mod delivery;
pub mod notifier;
pub mod persistence;
pub mod services;

pub use bus::{EventBus, PlatformEvent};
pub use delivery::email::{EmailConfig, EmailDelivery, ResourceEmail};
pub use delivery::webhook::WebhookRelay;
pub use notifier::Notifier;
pub use persistence::{record_events, EventLog, PgEventLog};
pub use services::EventServices;
