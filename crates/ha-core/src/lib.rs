//! Core runtime types for Home Assistant
//!
//! This crate holds the hub-wide state that configuration processing writes
//! into: the runtime [`Config`], unit systems, the authentication bootstrap
//! state, the issue registry, persistent notifications and the customize
//! tables.

mod auth;
mod config;
mod entity_id;
mod entity_values;
mod hass;
mod issue_registry;
mod persistent_notification;
mod unit_system;

pub use auth::{AuthManager, AuthState};
pub use config::{Config, ConfigSource};
pub use entity_id::{split_entity_id, valid_domain, valid_entity_id};
pub use entity_values::EntityValues;
pub use hass::HomeAssistant;
pub use issue_registry::{Issue, IssueRegistry, IssueSeverity};
pub use persistent_notification::{Notification, PersistentNotificationManager, UpdateType};
pub use unit_system::{
    get_unit_system, validate_unit_system, UnitSystem, UnitSystemError, UNIT_SYSTEM_METRIC,
    UNIT_SYSTEM_US_CUSTOMARY,
};

/// Domain of the core integration, i.e. the `homeassistant:` section
pub const DOMAIN: &str = "homeassistant";

/// Version of this Home Assistant build
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
