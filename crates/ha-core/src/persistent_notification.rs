//! Persistent notifications
//!
//! In-memory notification storage for UI alerts. Configuration problems are
//! surfaced through the `invalid_config` notification.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A persistent notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    /// Markdown message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`PersistentNotificationManager::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Added,
    Updated,
}

/// Notification storage; creating the same ID replaces the message
#[derive(Debug, Default)]
pub struct PersistentNotificationManager {
    notifications: DashMap<String, Notification>,
}

impl PersistentNotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a notification
    pub fn create(
        &self,
        notification_id: impl Into<String>,
        message: impl Into<String>,
        title: Option<String>,
    ) -> UpdateType {
        let notification_id = notification_id.into();
        let notification = Notification {
            notification_id: notification_id.clone(),
            message: message.into(),
            title,
            created_at: Utc::now(),
        };

        if self
            .notifications
            .insert(notification_id.clone(), notification)
            .is_some()
        {
            debug!("Updated notification: {}", notification_id);
            UpdateType::Updated
        } else {
            info!("Created notification: {}", notification_id);
            UpdateType::Added
        }
    }

    /// Dismiss a notification, returning it if it existed
    pub fn dismiss(&self, notification_id: &str) -> Option<Notification> {
        self.notifications
            .remove(notification_id)
            .map(|(_, notification)| notification)
    }

    /// Get a notification by ID
    pub fn get(&self, notification_id: &str) -> Option<Notification> {
        self.notifications
            .get(notification_id)
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}
