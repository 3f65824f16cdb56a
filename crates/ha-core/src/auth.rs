//! Authentication bootstrap state
//!
//! The auth manager is created once per process from the configured
//! providers and MFA modules. Its internals live elsewhere; the hub only
//! tracks whether it has been attached.

use serde_yaml::Value;
use std::sync::Arc;

/// Auth manager configuration attached to the hub
#[derive(Debug, Clone, PartialEq)]
pub struct AuthManager {
    providers: Vec<Value>,
    mfa_modules: Vec<Value>,
}

impl AuthManager {
    pub fn new(providers: Vec<Value>, mfa_modules: Vec<Value>) -> Self {
        Self {
            providers,
            mfa_modules,
        }
    }

    /// Provider configurations in declaration order
    pub fn providers(&self) -> &[Value] {
        &self.providers
    }

    /// MFA module configurations in declaration order
    pub fn mfa_modules(&self) -> &[Value] {
        &self.mfa_modules
    }

    /// The `type` of every provider
    pub fn provider_types(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter_map(|p| p.get("type").and_then(Value::as_str))
            .collect()
    }
}

/// Whether the auth manager has been created
#[derive(Debug, Clone, Default)]
pub enum AuthState {
    #[default]
    Uninitialized,
    Ready(Arc<AuthManager>),
}

impl AuthState {
    pub fn is_ready(&self) -> bool {
        matches!(self, AuthState::Ready(_))
    }

    /// The attached manager, if any
    pub fn manager(&self) -> Option<&Arc<AuthManager>> {
        match self {
            AuthState::Ready(manager) => Some(manager),
            AuthState::Uninitialized => None,
        }
    }
}
