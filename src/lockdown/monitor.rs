//! Samples ambient OS state while lockdown is active and turns it into raw
//! violation signals. Every probe is treated as blocking I/O with a short
//! timeout: a failed or slow probe means "no signal this tick", never a
//! crash, and never delays the next tick.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::lockdown::platform::PlatformLockdownAdapter;
use crate::lockdown::policy::LockdownPolicy;
use crate::lockdown::ViolationReport;
use crate::models::exam_attempt::ViolationType;

/// Per-session scratch state, reset wholesale on stop so nothing leaks into
/// the next session.
#[derive(Debug, Default)]
struct MonitorArena {
    reported_processes: HashSet<String>,
    vm_reported: bool,
    last_foreground: Option<String>,
}

pub struct IntegrityMonitor {
    adapter: Arc<dyn PlatformLockdownAdapter>,
    policy: Arc<LockdownPolicy>,
    live: Arc<AtomicBool>,
    arena: Arc<Mutex<MonitorArena>>,
    signals: mpsc::UnboundedSender<ViolationReport>,
    handles: Vec<JoinHandle<()>>,
}

impl IntegrityMonitor {
    pub fn new(
        adapter: Arc<dyn PlatformLockdownAdapter>,
        policy: Arc<LockdownPolicy>,
        live: Arc<AtomicBool>,
        signals: mpsc::UnboundedSender<ViolationReport>,
    ) -> Self {
        Self {
            adapter,
            policy,
            live,
            arena: Arc::new(Mutex::new(MonitorArena::default())),
            signals,
            handles: Vec::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }
        self.live.store(true, Ordering::SeqCst);

        self.handles.push(self.spawn_vm_probe());
        self.handles.push(self.spawn_process_scan());
        self.handles.push(self.spawn_foreground_scan());
    }

    /// Disable all loops. In-flight ticks check the liveness flag before
    /// acting, so no signal is emitted after this returns.
    pub fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        *self.arena.lock().expect("monitor arena mutex poisoned") = MonitorArena::default();
    }

    fn spawn_process_scan(&self) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let live = self.live.clone();
        let arena = self.arena.clone();
        let signals = self.signals.clone();
        let timeout = self.policy.probe_timeout();
        let interval = Duration::from_millis(self.policy.process_scan_ms.max(100));
        let blacklist: HashSet<String> = self
            .policy
            .process_blacklist
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !live.load(Ordering::SeqCst) {
                    break;
                }
                let Some(processes) =
                    probe(timeout, "process scan", adapter.enumerate_processes()).await
                else {
                    continue;
                };

                let mut newly_detected = Vec::new();
                {
                    let mut arena = arena.lock().expect("monitor arena mutex poisoned");
                    for process in processes {
                        let name = process.to_ascii_lowercase();
                        if blacklist.contains(&name) && !arena.reported_processes.contains(&name) {
                            arena.reported_processes.insert(name.clone());
                            newly_detected.push(name);
                        }
                    }
                }

                if !live.load(Ordering::SeqCst) {
                    break;
                }
                for name in newly_detected {
                    emit(
                        &signals,
                        ViolationReport::new(
                            ViolationType::BlacklistedProcess,
                            format!("Detected blacklisted process: {}", name),
                            Some(name.clone()),
                        ),
                    );
                    // Fire-and-forget kill; a failure is logged, not retried.
                    let adapter = adapter.clone();
                    tokio::spawn(async move {
                        if probe(timeout, "process kill", adapter.terminate_process(name.clone()))
                            .await
                            .is_none()
                        {
                            tracing::warn!(process = %name, "failed to terminate blacklisted process");
                        }
                    });
                }
            }
        })
    }

    fn spawn_vm_probe(&self) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let live = self.live.clone();
        let arena = self.arena.clone();
        let signals = self.signals.clone();
        let timeout = self.policy.probe_timeout();
        let indicators: HashSet<String> = self
            .policy
            .vm_indicator_processes
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();
        let markers = self.policy.vm_identity_markers.clone();

        tokio::spawn(async move {
            if !live.load(Ordering::SeqCst) {
                return;
            }

            let detail = 'detect: {
                if let Some(processes) =
                    probe(timeout, "vm process probe", adapter.enumerate_processes()).await
                {
                    for process in processes {
                        let name = process.to_ascii_lowercase();
                        if indicators.contains(&name) {
                            break 'detect Some(format!("VM indicator process: {}", name));
                        }
                    }
                }
                if let Some(identity) =
                    probe(timeout, "machine identity probe", adapter.machine_identity()).await
                {
                    let identity = identity.to_ascii_lowercase();
                    if markers.iter().any(|marker| identity.contains(marker)) {
                        break 'detect Some(
                            "System manufacturer/model indicates a virtual machine".to_string(),
                        );
                    }
                }
                None
            };

            let Some(detail) = detail else { return };
            {
                let mut arena = arena.lock().expect("monitor arena mutex poisoned");
                if arena.vm_reported {
                    return;
                }
                arena.vm_reported = true;
            }
            if live.load(Ordering::SeqCst) {
                emit(
                    &signals,
                    ViolationReport::new(
                        ViolationType::VirtualMachine,
                        "Virtual machine detected",
                        Some(detail),
                    ),
                );
            }
        })
    }

    fn spawn_foreground_scan(&self) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let policy = self.policy.clone();
        let live = self.live.clone();
        let arena = self.arena.clone();
        let signals = self.signals.clone();
        let timeout = self.policy.probe_timeout();
        let interval = Duration::from_millis(self.policy.foreground_scan_ms.max(100));
        let allowed: HashSet<String> = self
            .policy
            .allowed_foreground
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !live.load(Ordering::SeqCst) {
                    break;
                }

                let Some(own_focus) =
                    probe(timeout, "focus probe", adapter.surface_has_focus()).await
                else {
                    continue;
                };
                if own_focus {
                    // Focus returned to our surfaces; the next escape is a
                    // fresh report.
                    arena
                        .lock()
                        .expect("monitor arena mutex poisoned")
                        .last_foreground = None;
                    continue;
                }

                let Some(Some(process)) =
                    probe(timeout, "foreground probe", adapter.query_foreground_process()).await
                else {
                    continue;
                };
                let name = process.to_ascii_lowercase();
                if allowed.contains(&name) {
                    continue;
                }

                let fresh = {
                    let mut arena = arena.lock().expect("monitor arena mutex poisoned");
                    if arena.last_foreground.as_deref() == Some(name.as_str()) {
                        false
                    } else {
                        arena.last_foreground = Some(name.clone());
                        true
                    }
                };

                if fresh && live.load(Ordering::SeqCst) {
                    let display = policy.friendly_name(&name).to_string();
                    emit(
                        &signals,
                        ViolationReport::new(
                            ViolationType::AppOpened,
                            format!("Switched to another application: {}", display),
                            Some(name.clone()),
                        ),
                    );
                }

                // Self-healing: drag focus back regardless of dedup.
                probe(timeout, "focus recovery", adapter.focus_primary_surface()).await;
            }
        })
    }
}

fn emit(signals: &mpsc::UnboundedSender<ViolationReport>, report: ViolationReport) {
    if signals.send(report).is_err() {
        tracing::debug!("violation signal dropped: reporting pipeline is gone");
    }
}

/// Run a platform probe under a timeout. Errors and timeouts degrade to
/// `None` so a flaky probe can never take the monitor down.
async fn probe<T, F>(timeout: Duration, label: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::debug!(probe = label, error = %e, "probe failed; skipping this tick");
            None
        }
        Err(_) => {
            tracing::debug!(probe = label, ?timeout, "probe timed out; skipping this tick");
            None
        }
    }
}
