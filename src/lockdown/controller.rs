//! The exclusive-session state machine. Every path out of "locked"
//! (student submission, admin override, time expiry, status-poll terminate)
//! converges on the same cleanup sequence, and each reversal step is
//! independently guarded so one failure cannot block the rest.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lockdown::classifier::{Classification, ViolationClassifier};
use crate::lockdown::monitor::IntegrityMonitor;
use crate::lockdown::penalty::{PenaltyEscalator, PenaltyState};
use crate::lockdown::platform::{InputKind, InterceptedInput, PlatformLockdownAdapter};
use crate::lockdown::policy::LockdownPolicy;
use crate::lockdown::{ViolationReport, ViolationSink};
use crate::models::exam_attempt::ViolationType;

/// One controller per device. A second construction attempt is refused at
/// the API boundary instead of silently sharing state.
static INSTANCE_HELD: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockdownMode {
    Idle,
    Entering,
    Active,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    Terminated,
    AdminTerminated,
    TimeExpired,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Terminated => "terminated",
            EndReason::AdminTerminated => "admin_terminated",
            EndReason::TimeExpired => "time_expired",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockdownSession {
    pub attempt_id: Uuid,
    pub allowed_urls: Vec<String>,
    pub end_time: Option<DateTime<Utc>>,
}

pub struct LockdownController {
    adapter: Arc<dyn PlatformLockdownAdapter>,
    policy: Arc<LockdownPolicy>,
    sink: Arc<dyn ViolationSink>,
    admin_secret: String,
    mode: Mutex<LockdownMode>,
    session: Mutex<Option<LockdownSession>>,
    live: Arc<AtomicBool>,
    penalty: Arc<Mutex<PenaltyEscalator>>,
    monitor: Mutex<Option<IntegrityMonitor>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Raw-signal entry point for the presentation surface (navigation
    /// filtering); present only while a session is up.
    signals: Mutex<Option<mpsc::UnboundedSender<ViolationReport>>>,
}

impl LockdownController {
    pub fn new(
        adapter: Arc<dyn PlatformLockdownAdapter>,
        policy: Arc<LockdownPolicy>,
        sink: Arc<dyn ViolationSink>,
        admin_secret: impl Into<String>,
    ) -> Result<Arc<Self>> {
        if INSTANCE_HELD
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Conflict(
                "A lockdown controller is already running on this device".to_string(),
            ));
        }

        Ok(Arc::new(Self {
            adapter,
            penalty: Arc::new(Mutex::new(PenaltyEscalator::new(policy.clone()))),
            policy,
            sink,
            admin_secret: admin_secret.into(),
            mode: Mutex::new(LockdownMode::Idle),
            session: Mutex::new(None),
            live: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            signals: Mutex::new(None),
        }))
    }

    pub fn mode(&self) -> LockdownMode {
        *self.mode.lock().expect("lockdown mode mutex poisoned")
    }

    pub fn attempt_id(&self) -> Option<Uuid> {
        self.session
            .lock()
            .expect("lockdown session mutex poisoned")
            .as_ref()
            .map(|s| s.attempt_id)
    }

    pub fn allowed_urls(&self) -> Vec<String> {
        self.session
            .lock()
            .expect("lockdown session mutex poisoned")
            .as_ref()
            .map(|s| s.allowed_urls.clone())
            .unwrap_or_default()
    }

    pub fn penalty(&self) -> PenaltyState {
        self.penalty
            .lock()
            .expect("penalty mutex poisoned")
            .state()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Enter lockdown. A no-op (returning the current mode) unless Idle.
    pub async fn start(
        self: &Arc<Self>,
        attempt_id: Uuid,
        allowed_urls: Vec<String>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<LockdownMode> {
        if allowed_urls.is_empty() {
            return Err(Error::BadRequest(
                "At least one allowed URL is required".to_string(),
            ));
        }

        {
            let mut mode = self.mode.lock().expect("lockdown mode mutex poisoned");
            if *mode != LockdownMode::Idle {
                tracing::warn!(current = ?*mode, "start requested while not idle; ignoring");
                return Ok(*mode);
            }
            *mode = LockdownMode::Entering;
        }

        let primary_url = allowed_urls[0].clone();
        *self.session.lock().expect("lockdown session mutex poisoned") = Some(LockdownSession {
            attempt_id,
            allowed_urls,
            end_time,
        });
        self.live.store(true, Ordering::SeqCst);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<ViolationReport>();

        // The platform layer pushes every intercepted combination through
        // the same raw-signal channel the monitor uses.
        let intercept_tx = signal_tx.clone();
        let on_intercept = Arc::new(move |input: InterceptedInput| {
            let (violation_type, description) = match input.kind {
                InputKind::Shortcut => (
                    ViolationType::ShortcutBlocked,
                    format!("Blocked shortcut: {}", input.combo),
                ),
                InputKind::Key => (
                    ViolationType::KeyBlocked,
                    format!("Blocked key: {}", input.combo),
                ),
            };
            let _ = intercept_tx.send(ViolationReport::new(
                violation_type,
                description,
                Some(input.combo),
            ));
        });

        enforce("suppress sleep", self.adapter.suppress_sleep()).await;
        enforce(
            "install input interception",
            self.adapter.install_input_interception(
                self.policy.blocked_shortcuts.clone(),
                self.policy.blocked_keys.clone(),
                on_intercept,
            ),
        )
        .await;
        enforce(
            "apply feature restrictions",
            self.adapter.apply_feature_restrictions(),
        )
        .await;
        enforce(
            "create pinned surface",
            self.adapter.create_pinned_surface(primary_url),
        )
        .await;
        enforce(
            "create control surface",
            self.adapter.create_control_surface(),
        )
        .await;

        let mut monitor = IntegrityMonitor::new(
            self.adapter.clone(),
            self.policy.clone(),
            self.live.clone(),
            signal_tx.clone(),
        );
        monitor.start();
        *self.monitor.lock().expect("monitor slot mutex poisoned") = Some(monitor);

        *self.signals.lock().expect("signal slot mutex poisoned") = Some(signal_tx.clone());

        let mut tasks = Vec::new();
        tasks.push(self.spawn_signal_forwarder(attempt_id, signal_rx));
        tasks.push(self.spawn_focus_reconciliation(signal_tx));
        if let Some(end) = end_time {
            tasks.push(self.spawn_deadline(end));
        }
        self.tasks
            .lock()
            .expect("lockdown tasks mutex poisoned")
            .extend(tasks);

        *self.mode.lock().expect("lockdown mode mutex poisoned") = LockdownMode::Active;
        tracing::info!(%attempt_id, "lockdown active");
        Ok(LockdownMode::Active)
    }

    /// Leave lockdown. Idempotent; a no-op from Idle, Entering or a
    /// concurrent Exiting. Runs every reversal step even when some fail.
    pub async fn end(&self, reason: EndReason) -> Result<()> {
        {
            let mut mode = self.mode.lock().expect("lockdown mode mutex poisoned");
            match *mode {
                LockdownMode::Idle | LockdownMode::Entering | LockdownMode::Exiting => {
                    return Ok(());
                }
                LockdownMode::Active => *mode = LockdownMode::Exiting,
            }
        }
        tracing::info!(reason = reason.as_str(), "ending lockdown");

        if let Some(mut monitor) = self
            .monitor
            .lock()
            .expect("monitor slot mutex poisoned")
            .take()
        {
            monitor.stop();
        }
        self.live.store(false, Ordering::SeqCst);
        for task in self
            .tasks
            .lock()
            .expect("lockdown tasks mutex poisoned")
            .drain(..)
        {
            task.abort();
        }

        enforce("release sleep suppression", self.adapter.release_sleep()).await;
        enforce(
            "uninstall input interception",
            self.adapter.uninstall_input_interception(),
        )
        .await;
        enforce(
            "revert feature restrictions",
            self.adapter.revert_feature_restrictions(),
        )
        .await;
        enforce("close surfaces", self.adapter.close_surfaces()).await;

        self.penalty.lock().expect("penalty mutex poisoned").reset();
        *self.signals.lock().expect("signal slot mutex poisoned") = None;
        *self.session.lock().expect("lockdown session mutex poisoned") = None;
        *self.mode.lock().expect("lockdown mode mutex poisoned") = LockdownMode::Idle;
        Ok(())
    }

    /// Navigation filter for the presentation surface: returns whether the
    /// destination is allowed, reporting `navigation_blocked` when it isn't.
    pub fn handle_navigation(&self, destination: &str) -> bool {
        if !self.live.load(Ordering::SeqCst) {
            return true;
        }
        if crate::lockdown::is_url_allowed(destination, &self.allowed_urls()) {
            return true;
        }
        if let Some(signals) = self
            .signals
            .lock()
            .expect("signal slot mutex poisoned")
            .as_ref()
        {
            let _ = signals.send(ViolationReport::new(
                ViolationType::NavigationBlocked,
                format!("Attempted to navigate to: {}", destination),
                Some(destination.to_string()),
            ));
        }
        false
    }

    /// Authorized exit for an administrator standing at the machine. A
    /// failed comparison changes nothing.
    pub async fn admin_override(&self, password: &str) -> Result<()> {
        let supplied = password.as_bytes();
        let expected = self.admin_secret.as_bytes();
        let matches = supplied.len() == expected.len() && bool::from(supplied.ct_eq(expected));
        if !matches {
            return Err(Error::Unauthorized("Invalid password".to_string()));
        }
        self.end(EndReason::AdminTerminated).await
    }

    fn spawn_signal_forwarder(
        &self,
        attempt_id: Uuid,
        mut signals: mpsc::UnboundedReceiver<ViolationReport>,
    ) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let penalty = self.penalty.clone();
        let live = self.live.clone();
        let mut classifier = ViolationClassifier::new(self.policy.classifier_cooldown());

        tokio::spawn(async move {
            while let Some(report) = signals.recv().await {
                if !live.load(Ordering::SeqCst) {
                    break;
                }
                let now = Instant::now();
                if classifier.classify(report.violation_type, report.details.as_deref(), now)
                    == Classification::Suppress
                {
                    continue;
                }
                penalty
                    .lock()
                    .expect("penalty mutex poisoned")
                    .on_violation(report.violation_type, now);
                sink.report(attempt_id, report);
            }
        })
    }

    /// Loss-of-focus events are unreliable on some platforms, so a recurring
    /// tick re-asserts that one of our surfaces holds input focus.
    fn spawn_focus_reconciliation(
        &self,
        signals: mpsc::UnboundedSender<ViolationReport>,
    ) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let live = self.live.clone();
        let timeout = self.policy.probe_timeout();
        let interval =
            std::time::Duration::from_millis(self.policy.focus_tick_ms.max(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !live.load(Ordering::SeqCst) {
                    break;
                }
                let focused =
                    match tokio::time::timeout(timeout, adapter.surface_has_focus()).await {
                        Ok(Ok(focused)) => focused,
                        Ok(Err(e)) => {
                            tracing::debug!(error = %e, "focus probe failed; skipping tick");
                            continue;
                        }
                        Err(_) => continue,
                    };
                if focused {
                    continue;
                }
                let _ = signals.send(ViolationReport::new(
                    ViolationType::FocusLost,
                    "Exam surface lost focus - possible attempt to switch applications",
                    None,
                ));
                if let Ok(Err(e)) =
                    tokio::time::timeout(timeout, adapter.focus_primary_surface()).await
                {
                    tracing::debug!(error = %e, "failed to re-focus primary surface");
                }
            }
        })
    }

    fn spawn_deadline(self: &Arc<Self>, end_time: DateTime<Utc>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let remaining = (end_time - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(remaining).await;
            if controller.live.load(Ordering::SeqCst) {
                if let Err(e) = controller.end(EndReason::TimeExpired).await {
                    tracing::error!(error = ?e, "time-expiry end failed");
                }
            }
        })
    }
}

impl Drop for LockdownController {
    fn drop(&mut self) {
        INSTANCE_HELD.store(false, Ordering::SeqCst);
    }
}

/// Run one enforcement or reversal step. Failure is logged and swallowed:
/// an imperfect lockdown beats stranding the student in a half-configured
/// state with no way to submit.
async fn enforce<F>(step: &str, fut: F)
where
    F: Future<Output = Result<()>>,
{
    if let Err(e) = fut.await {
        tracing::warn!(step, error = %e, "lockdown step failed; continuing");
    }
}
