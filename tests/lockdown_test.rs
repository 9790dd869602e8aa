//! End-to-end behavior of the client lockdown stack against a scripted
//! platform adapter: monitor loops, classifier debounce, input interception,
//! penalty escalation, and teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use examlock::error::Result;
use examlock::lockdown::controller::{EndReason, LockdownController, LockdownMode};
use examlock::lockdown::platform::{
    InputKind, InterceptHandler, InterceptedInput, PlatformLockdownAdapter,
};
use examlock::lockdown::policy::LockdownPolicy;
use examlock::lockdown::{ViolationReport, ViolationSink};
use examlock::models::exam_attempt::ViolationType;

/// One lockdown controller may exist per process, so these tests run one at
/// a time.
fn serial() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct FakeAdapter {
    processes: Mutex<Vec<String>>,
    foreground: Mutex<Option<String>>,
    own_surface_focused: AtomicBool,
    killed: Mutex<Vec<String>>,
    identity: Mutex<String>,
    focus_calls: AtomicBool,
    handler: Mutex<Option<InterceptHandler>>,
}

impl FakeAdapter {
    fn set_processes(&self, names: &[&str]) {
        *self.processes.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }

    fn set_foreground(&self, name: Option<&str>) {
        *self.foreground.lock().unwrap() = name.map(String::from);
    }

    fn set_focused(&self, focused: bool) {
        self.own_surface_focused.store(focused, Ordering::SeqCst);
    }

    fn intercept(&self, combo: &str, kind: InputKind) {
        let handler = self.handler.lock().unwrap().clone().expect("interception installed");
        handler(InterceptedInput {
            combo: combo.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl PlatformLockdownAdapter for FakeAdapter {
    async fn suppress_sleep(&self) -> Result<()> {
        Ok(())
    }

    async fn release_sleep(&self) -> Result<()> {
        Ok(())
    }

    async fn install_input_interception(
        &self,
        _shortcuts: Vec<String>,
        _keys: Vec<String>,
        on_intercept: InterceptHandler,
    ) -> Result<()> {
        *self.handler.lock().unwrap() = Some(on_intercept);
        Ok(())
    }

    async fn uninstall_input_interception(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_feature_restrictions(&self) -> Result<()> {
        Ok(())
    }

    async fn revert_feature_restrictions(&self) -> Result<()> {
        Ok(())
    }

    async fn create_pinned_surface(&self, _url: String) -> Result<()> {
        Ok(())
    }

    async fn create_control_surface(&self) -> Result<()> {
        Ok(())
    }

    async fn close_surfaces(&self) -> Result<()> {
        Ok(())
    }

    async fn surface_has_focus(&self) -> Result<bool> {
        Ok(self.own_surface_focused.load(Ordering::SeqCst))
    }

    async fn focus_primary_surface(&self) -> Result<()> {
        self.focus_calls.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn enumerate_processes(&self) -> Result<Vec<String>> {
        Ok(self.processes.lock().unwrap().clone())
    }

    async fn terminate_process(&self, name: String) -> Result<()> {
        self.killed.lock().unwrap().push(name.clone());
        self.processes.lock().unwrap().retain(|p| *p != name);
        Ok(())
    }

    async fn query_foreground_process(&self) -> Result<Option<String>> {
        Ok(self.foreground.lock().unwrap().clone())
    }

    async fn machine_identity(&self) -> Result<String> {
        Ok(self.identity.lock().unwrap().clone())
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<(Uuid, ViolationReport)>,
}

impl ViolationSink for ChannelSink {
    fn report(&self, attempt_id: Uuid, violation: ViolationReport) {
        let _ = self.tx.send((attempt_id, violation));
    }
}

fn fast_policy() -> LockdownPolicy {
    LockdownPolicy {
        classifier_cooldown_ms: 200,
        probe_timeout_ms: 500,
        focus_tick_ms: 100,
        process_scan_ms: 100,
        foreground_scan_ms: 100,
        ..Default::default()
    }
}

fn build(
    adapter: Arc<FakeAdapter>,
    policy: LockdownPolicy,
) -> (
    Arc<LockdownController>,
    mpsc::UnboundedReceiver<(Uuid, ViolationReport)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = LockdownController::new(
        adapter,
        Arc::new(policy),
        Arc::new(ChannelSink { tx }),
        "override-secret",
    )
    .expect("controller slot free");
    (controller, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<(Uuid, ViolationReport)>) -> Vec<ViolationReport> {
    let mut out = Vec::new();
    while let Ok((_, report)) = rx.try_recv() {
        out.push(report);
    }
    out
}

fn of_type(reports: &[ViolationReport], t: ViolationType) -> Vec<ViolationReport> {
    reports
        .iter()
        .filter(|r| r.violation_type == t)
        .cloned()
        .collect()
}

#[tokio::test]
async fn blacklisted_process_is_reported_once_and_killed() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(true);
    adapter.set_processes(&["bash", "discord"]);

    let (controller, mut rx) = build(adapter.clone(), fast_policy());
    controller
        .start(Uuid::new_v4(), vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;
    controller.end(EndReason::Completed).await.unwrap();

    let reports = drain(&mut rx);
    let blacklisted = of_type(&reports, ViolationType::BlacklistedProcess);
    assert_eq!(blacklisted.len(), 1, "reported once despite repeated scans");
    assert_eq!(blacklisted[0].details.as_deref(), Some("discord"));
    assert!(adapter.killed.lock().unwrap().contains(&"discord".to_string()));
}

#[tokio::test]
async fn foreground_escape_reports_re_focuses_and_rearms_on_focus_return() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(false);
    adapter.set_foreground(Some("chrome.exe"));

    let (controller, mut rx) = build(adapter.clone(), fast_policy());
    controller
        .start(Uuid::new_v4(), vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;
    let reports = drain(&mut rx);
    let opened = of_type(&reports, ViolationType::AppOpened);
    assert_eq!(opened.len(), 1, "same app is not re-reported while unfocused");
    assert!(opened[0].description.contains("Google Chrome"));
    assert_eq!(opened[0].details.as_deref(), Some("chrome.exe"));
    assert!(adapter.focus_calls.load(Ordering::SeqCst));

    // focus returns briefly, then is lost to the same app again
    adapter.set_focused(true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    drain(&mut rx);
    adapter.set_focused(false);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reports = drain(&mut rx);
    assert_eq!(
        of_type(&reports, ViolationType::AppOpened).len(),
        1,
        "fresh report after focus round-trip"
    );

    controller.end(EndReason::Completed).await.unwrap();
}

#[tokio::test]
async fn intercepted_inputs_are_classified_and_escalate_penalties() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(true);

    let (controller, mut rx) = build(adapter.clone(), fast_policy());
    let attempt_id = Uuid::new_v4();
    controller
        .start(attempt_id, vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();

    // identical burst within the cooldown collapses to one report
    adapter.intercept("Alt+Tab", InputKind::Shortcut);
    adapter.intercept("Alt+Tab", InputKind::Shortcut);
    // a different combination passes straight through
    adapter.intercept("Alt+F4", InputKind::Shortcut);
    adapter.intercept("F5", InputKind::Key);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reports = drain(&mut rx);
    let shortcuts = of_type(&reports, ViolationType::ShortcutBlocked);
    assert_eq!(shortcuts.len(), 2);
    assert_eq!(shortcuts[0].details.as_deref(), Some("Alt+Tab"));
    assert_eq!(shortcuts[1].details.as_deref(), Some("Alt+F4"));
    assert_eq!(of_type(&reports, ViolationType::KeyBlocked).len(), 1);

    // two serious violations -> penalty level 1 with a lock deadline
    let penalty = controller.penalty();
    assert_eq!(penalty.penalty_level, 1);
    assert!(penalty.lock_until.is_some());

    // past the cooldown the same combination is reported again
    tokio::time::sleep(Duration::from_millis(250)).await;
    adapter.intercept("Alt+Tab", InputKind::Shortcut);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let reports = drain(&mut rx);
    assert_eq!(of_type(&reports, ViolationType::ShortcutBlocked).len(), 1);

    controller.end(EndReason::Completed).await.unwrap();
    assert_eq!(controller.penalty().penalty_level, 0);
}

#[tokio::test]
async fn ending_stops_every_signal_path() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(true);

    let (controller, mut rx) = build(adapter.clone(), fast_policy());
    controller
        .start(Uuid::new_v4(), vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();
    assert!(controller.is_live());

    controller.end(EndReason::Completed).await.unwrap();
    assert!(!controller.is_live());
    assert_eq!(controller.mode(), LockdownMode::Idle);
    drain(&mut rx);

    // late signals from a stale hook are dropped, and the processes that
    // appear now are never reported
    adapter.intercept("Alt+Tab", InputKind::Shortcut);
    adapter.set_processes(&["discord"]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain(&mut rx).is_empty());

    // a fresh start reports blacklisted processes again: the arena was reset
    controller
        .start(Uuid::new_v4(), vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let reports = drain(&mut rx);
    assert_eq!(of_type(&reports, ViolationType::BlacklistedProcess).len(), 1);
    controller.end(EndReason::Completed).await.unwrap();
}

#[tokio::test]
async fn time_expiry_ends_the_lockdown_exactly_once() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(true);

    let (controller, _rx) = build(adapter.clone(), fast_policy());
    let deadline = chrono::Utc::now() + chrono::Duration::milliseconds(200);
    controller
        .start(
            Uuid::new_v4(),
            vec!["https://exam.example.com".into()],
            Some(deadline),
        )
        .await
        .unwrap();
    assert_eq!(controller.mode(), LockdownMode::Active);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(controller.mode(), LockdownMode::Idle);
    assert!(!controller.is_live());
    assert_eq!(controller.attempt_id(), None);
}

#[tokio::test]
async fn navigation_outside_allowed_hosts_is_blocked_and_reported() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(true);

    let (controller, mut rx) = build(adapter.clone(), fast_policy());
    controller
        .start(Uuid::new_v4(), vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();

    assert!(controller.handle_navigation("https://exam.example.com/question/2"));
    assert!(!controller.handle_navigation("https://evil.example.net/answers"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reports = drain(&mut rx);
    let blocked = of_type(&reports, ViolationType::NavigationBlocked);
    assert_eq!(blocked.len(), 1);
    assert_eq!(
        blocked[0].details.as_deref(),
        Some("https://evil.example.net/answers")
    );

    controller.end(EndReason::Completed).await.unwrap();
    // the filter only applies while locked
    assert!(controller.handle_navigation("https://anywhere.example.org"));
}

#[tokio::test]
async fn virtual_machine_probe_reports_at_most_once() {
    let _guard = serial();
    let adapter = Arc::new(FakeAdapter::default());
    adapter.set_focused(true);
    *adapter.identity.lock().unwrap() = "VMware, Inc. VMware Virtual Platform".to_string();

    let (controller, mut rx) = build(adapter.clone(), fast_policy());
    controller
        .start(Uuid::new_v4(), vec!["https://exam.example.com".into()], None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.end(EndReason::Completed).await.unwrap();

    let reports = drain(&mut rx);
    let vm = of_type(&reports, ViolationType::VirtualMachine);
    assert_eq!(vm.len(), 1);
    assert!(vm[0].details.as_deref().unwrap().contains("manufacturer"));
}
