//! Client-resident lockdown stack: the exclusive-session controller, the
//! integrity monitor that samples OS state, the classifier that debounces
//! raw signals, and the penalty escalator driven by serious violations.

pub mod classifier;
pub mod controller;
pub mod monitor;
pub mod penalty;
pub mod platform;
pub mod policy;

use serde::{Deserialize, Serialize};

use crate::models::exam_attempt::ViolationType;

/// A detected integrity signal on its way to the reporting path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub description: String,
    pub details: Option<String>,
}

impl ViolationReport {
    pub fn new(
        violation_type: ViolationType,
        description: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            violation_type,
            description: description.into(),
            details,
        }
    }
}

/// Receives classified violations from the controller. The production
/// implementation posts them to the server; tests collect them in a channel.
pub trait ViolationSink: Send + Sync {
    fn report(&self, attempt_id: uuid::Uuid, violation: ViolationReport);
}

/// A destination is allowed when its host matches one of the allowed URLs.
/// Anything unparseable is blocked.
pub fn is_url_allowed(candidate: &str, allowed_urls: &[String]) -> bool {
    let Ok(candidate) = url::Url::parse(candidate) else {
        return false;
    };
    let Some(host) = candidate.host_str() else {
        return false;
    };
    allowed_urls.iter().any(|allowed| {
        url::Url::parse(allowed)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == host))
            .unwrap_or(false)
    })
}
