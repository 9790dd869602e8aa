//! Debounces bursts of identical raw signals before they reach the network.

use std::time::{Duration, Instant};

use crate::models::exam_attempt::ViolationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Emit,
    Suppress,
}

/// Suppresses a signal iff the same `(type, details)` pair was last emitted
/// less than the cooldown ago. Two different apps or shortcuts therefore
/// both get through even within the same instant, while a held key does not
/// flood the pipeline.
#[derive(Debug)]
pub struct ViolationClassifier {
    cooldown: Duration,
    last_emitted: Option<(ViolationType, Option<String>, Instant)>,
}

impl ViolationClassifier {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_emitted: None,
        }
    }

    pub fn classify(
        &mut self,
        violation_type: ViolationType,
        details: Option<&str>,
        now: Instant,
    ) -> Classification {
        if let Some((last_type, last_details, emitted_at)) = &self.last_emitted {
            if *last_type == violation_type
                && last_details.as_deref() == details
                && now.duration_since(*emitted_at) < self.cooldown
            {
                return Classification::Suppress;
            }
        }
        self.last_emitted = Some((violation_type, details.map(String::from), now));
        Classification::Emit
    }

    pub fn reset(&mut self) {
        self.last_emitted = None;
    }
}
