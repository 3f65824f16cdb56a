//! Issue registry
//!
//! Advisory repair issues raised by the hub. Issues are keyed by
//! `(domain, issue_id)`; creating an existing issue refreshes it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Severity of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Error,
    Warning,
}

/// A registered issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub domain: String,
    pub issue_id: String,
    pub is_fixable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learn_more_url: Option<String>,
    pub severity: IssueSeverity,
    pub translation_key: String,
    pub translation_placeholders: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
}

impl Issue {
    /// Create a non-fixable issue whose translation key equals its ID
    pub fn new(
        domain: impl Into<String>,
        issue_id: impl Into<String>,
        severity: IssueSeverity,
    ) -> Self {
        let issue_id = issue_id.into();
        Self {
            domain: domain.into(),
            translation_key: issue_id.clone(),
            issue_id,
            is_fixable: false,
            learn_more_url: None,
            severity,
            translation_placeholders: BTreeMap::new(),
            created: Utc::now(),
        }
    }

    /// Attach a "learn more" link
    pub fn with_learn_more_url(mut self, url: impl Into<String>) -> Self {
        self.learn_more_url = Some(url.into());
        self
    }

    /// Add a translation placeholder
    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.translation_placeholders.insert(key.into(), value.into());
        self
    }
}

/// Thread-safe in-memory issue storage
#[derive(Debug, Default)]
pub struct IssueRegistry {
    issues: DashMap<(String, String), Issue>,
}

impl IssueRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh an issue, keeping the original creation time
    pub fn create_issue(&self, mut issue: Issue) {
        let key = (issue.domain.clone(), issue.issue_id.clone());
        if let Some(existing) = self.issues.get(&key) {
            issue.created = existing.created;
            debug!("Refreshed issue {}.{}", key.0, key.1);
        } else {
            info!("Created issue {}.{}", key.0, key.1);
        }
        self.issues.insert(key, issue);
    }

    /// Delete an issue; deleting a missing issue is a no-op
    pub fn delete_issue(&self, domain: &str, issue_id: &str) -> Option<Issue> {
        let removed = self
            .issues
            .remove(&(domain.to_string(), issue_id.to_string()))
            .map(|(_, issue)| issue);
        if removed.is_some() {
            info!("Deleted issue {}.{}", domain, issue_id);
        }
        removed
    }

    /// Get an issue
    pub fn get(&self, domain: &str, issue_id: &str) -> Option<Issue> {
        self.issues
            .get(&(domain.to_string(), issue_id.to_string()))
            .map(|r| r.value().clone())
    }

    /// Number of registered issues
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Whether no issues are registered
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
