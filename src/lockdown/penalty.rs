//! Deterrent access locks derived from the running count of serious
//! violations. The escalator never blocks anything itself; the embedding
//! client consults it for its countdown UI.

use std::sync::Arc;
use std::time::Instant;

use crate::lockdown::policy::LockdownPolicy;
use crate::models::exam_attempt::ViolationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyState {
    pub penalty_level: u32,
    pub lock_until: Option<Instant>,
}

#[derive(Debug)]
pub struct PenaltyEscalator {
    policy: Arc<LockdownPolicy>,
    serious_count: u32,
    level: u32,
    lock_until: Option<Instant>,
}

impl PenaltyEscalator {
    pub fn new(policy: Arc<LockdownPolicy>) -> Self {
        Self {
            policy,
            serious_count: 0,
            level: 0,
            lock_until: None,
        }
    }

    fn is_serious(violation_type: ViolationType) -> bool {
        matches!(
            violation_type,
            ViolationType::AppOpened | ViolationType::ShortcutBlocked
        )
    }

    /// Feed a classified violation. Every second serious violation raises the
    /// level by one; a raised level extends the lock deadline but an existing
    /// longer lock is never shortened.
    pub fn on_violation(&mut self, violation_type: ViolationType, now: Instant) -> PenaltyState {
        if Self::is_serious(violation_type) {
            self.serious_count += 1;
            if self.serious_count % 2 == 0 {
                self.level += 1;
                let candidate = now + self.policy.penalty_lock_duration(self.level);
                self.lock_until = Some(match self.lock_until {
                    Some(existing) if existing > candidate => existing,
                    _ => candidate,
                });
            }
        }
        self.state()
    }

    pub fn state(&self) -> PenaltyState {
        PenaltyState {
            penalty_level: self.level,
            lock_until: self.lock_until,
        }
    }

    /// Wall-clock deadline check, robust to skipped ticks.
    pub fn is_locked(&self, now: Instant) -> bool {
        self.lock_until.map(|until| now < until).unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.serious_count = 0;
        self.level = 0;
        self.lock_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn escalator() -> PenaltyEscalator {
        PenaltyEscalator::new(Arc::new(LockdownPolicy::default()))
    }

    #[test]
    fn every_second_serious_violation_raises_the_level() {
        let mut esc = escalator();
        let now = Instant::now();

        assert_eq!(esc.on_violation(ViolationType::AppOpened, now).penalty_level, 0);
        let state = esc.on_violation(ViolationType::ShortcutBlocked, now);
        assert_eq!(state.penalty_level, 1);
        assert_eq!(state.lock_until, Some(now + Duration::from_secs(120)));

        esc.on_violation(ViolationType::AppOpened, now);
        assert_eq!(esc.on_violation(ViolationType::AppOpened, now).penalty_level, 2);
    }

    #[test]
    fn non_serious_violations_do_not_count() {
        let mut esc = escalator();
        let now = Instant::now();

        for _ in 0..10 {
            esc.on_violation(ViolationType::FocusLost, now);
            esc.on_violation(ViolationType::BlacklistedProcess, now);
        }
        assert_eq!(esc.state().penalty_level, 0);
        assert!(!esc.is_locked(now));
    }

    #[test]
    fn a_longer_lock_is_never_shortened() {
        let policy = LockdownPolicy {
            // level 1 locks longer than level 2 to exercise the clamp
            penalty_lock_seconds: vec![600, 10],
            ..Default::default()
        };
        let mut esc = PenaltyEscalator::new(Arc::new(policy));
        let now = Instant::now();

        esc.on_violation(ViolationType::AppOpened, now);
        let first = esc.on_violation(ViolationType::AppOpened, now);
        assert_eq!(first.lock_until, Some(now + Duration::from_secs(600)));

        esc.on_violation(ViolationType::AppOpened, now);
        let second = esc.on_violation(ViolationType::AppOpened, now);
        assert_eq!(second.penalty_level, 2);
        assert_eq!(second.lock_until, Some(now + Duration::from_secs(600)));
    }

    #[test]
    fn lock_expiry_is_a_deadline_not_a_countdown() {
        let mut esc = escalator();
        let now = Instant::now();

        esc.on_violation(ViolationType::ShortcutBlocked, now);
        esc.on_violation(ViolationType::ShortcutBlocked, now);
        assert!(esc.is_locked(now));
        assert!(esc.is_locked(now + Duration::from_secs(119)));
        assert!(!esc.is_locked(now + Duration::from_secs(121)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut esc = escalator();
        let now = Instant::now();

        esc.on_violation(ViolationType::AppOpened, now);
        esc.on_violation(ViolationType::AppOpened, now);
        esc.reset();
        assert_eq!(esc.state().penalty_level, 0);
        assert!(!esc.is_locked(now));
        // the serious counter restarts as well
        assert_eq!(esc.on_violation(ViolationType::AppOpened, now).penalty_level, 0);
    }
}
