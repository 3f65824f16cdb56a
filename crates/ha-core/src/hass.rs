//! The hub instance seen by configuration processing

use indexmap::IndexMap;
use std::path::PathBuf;

use crate::auth::{AuthManager, AuthState};
use crate::config::Config;
use crate::entity_values::EntityValues;
use crate::issue_registry::IssueRegistry;
use crate::persistent_notification::PersistentNotificationManager;
use std::sync::Arc;

/// Hub state touched while loading configuration
///
/// Configuration is processed on a single task during startup, so the
/// configuration engine takes `&mut HomeAssistant` rather than locking.
#[derive(Debug)]
pub struct HomeAssistant {
    pub config: Config,
    pub auth: AuthState,
    pub issues: IssueRegistry,
    pub notifications: PersistentNotificationManager,
    /// Merged customize tables
    pub customize: EntityValues,
    /// Integrations that failed setup, with their documentation link
    pub setup_errors: IndexMap<String, Option<String>>,
}

impl HomeAssistant {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: Config::new(config_dir),
            auth: AuthState::Uninitialized,
            issues: IssueRegistry::new(),
            notifications: PersistentNotificationManager::new(),
            customize: EntityValues::default(),
            setup_errors: IndexMap::new(),
        }
    }

    /// Attach the auth manager unless one is already attached
    ///
    /// Returns `true` when `init` ran.
    pub fn ensure_auth(&mut self, init: impl FnOnce() -> AuthManager) -> bool {
        if self.auth.is_ready() {
            return false;
        }
        self.auth = AuthState::Ready(Arc::new(init()));
        true
    }
}
