//! Platform capability boundary. Every OS hook the lockdown needs goes
//! through this trait so the controller and monitor stay testable and
//! portable; each operation is best-effort from the caller's point of view.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A multi-key combination (task switching, devtools, clipboard, ...).
    Shortcut,
    /// A single intercepted key (escape, function keys).
    Key,
}

#[derive(Debug, Clone)]
pub struct InterceptedInput {
    pub combo: String,
    pub kind: InputKind,
}

/// Called by the platform layer for every intercepted input while the
/// interception is installed.
pub type InterceptHandler = Arc<dyn Fn(InterceptedInput) + Send + Sync>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformLockdownAdapter: Send + Sync {
    async fn suppress_sleep(&self) -> Result<()>;
    async fn release_sleep(&self) -> Result<()>;

    async fn install_input_interception(
        &self,
        shortcuts: Vec<String>,
        keys: Vec<String>,
        on_intercept: InterceptHandler,
    ) -> Result<()>;
    async fn uninstall_input_interception(&self) -> Result<()>;

    /// Task switcher, lock screen, secondary input, taskbar visibility.
    async fn apply_feature_restrictions(&self) -> Result<()>;
    async fn revert_feature_restrictions(&self) -> Result<()>;

    /// Pinned, border-less, always-topmost presentation surface.
    async fn create_pinned_surface(&self, url: String) -> Result<()>;
    /// Always-on-top surface carrying the submit/terminate controls.
    async fn create_control_surface(&self) -> Result<()>;
    /// Close both surfaces, overriding their non-closable flag.
    async fn close_surfaces(&self) -> Result<()>;

    /// Whether either of the lockdown's own surfaces holds input focus.
    async fn surface_has_focus(&self) -> Result<bool>;
    async fn focus_primary_surface(&self) -> Result<()>;

    async fn enumerate_processes(&self) -> Result<Vec<String>>;
    async fn terminate_process(&self, name: String) -> Result<()>;
    /// Name of the process owning the focused window, when determinable.
    async fn query_foreground_process(&self) -> Result<Option<String>>;
    /// Manufacturer/model string used by the virtual-machine probe.
    async fn machine_identity(&self) -> Result<String>;
}

/// Logs every operation and succeeds. Used on platforms without native
/// hooks, and as the base the real adapters fall back to.
#[derive(Debug, Default)]
pub struct NoopAdapter;

#[async_trait]
impl PlatformLockdownAdapter for NoopAdapter {
    async fn suppress_sleep(&self) -> Result<()> {
        tracing::debug!("noop adapter: suppress_sleep");
        Ok(())
    }

    async fn release_sleep(&self) -> Result<()> {
        tracing::debug!("noop adapter: release_sleep");
        Ok(())
    }

    async fn install_input_interception(
        &self,
        shortcuts: Vec<String>,
        keys: Vec<String>,
        _on_intercept: InterceptHandler,
    ) -> Result<()> {
        tracing::debug!(
            shortcuts = shortcuts.len(),
            keys = keys.len(),
            "noop adapter: install_input_interception"
        );
        Ok(())
    }

    async fn uninstall_input_interception(&self) -> Result<()> {
        tracing::debug!("noop adapter: uninstall_input_interception");
        Ok(())
    }

    async fn apply_feature_restrictions(&self) -> Result<()> {
        tracing::debug!("noop adapter: apply_feature_restrictions");
        Ok(())
    }

    async fn revert_feature_restrictions(&self) -> Result<()> {
        tracing::debug!("noop adapter: revert_feature_restrictions");
        Ok(())
    }

    async fn create_pinned_surface(&self, url: String) -> Result<()> {
        tracing::debug!(%url, "noop adapter: create_pinned_surface");
        Ok(())
    }

    async fn create_control_surface(&self) -> Result<()> {
        tracing::debug!("noop adapter: create_control_surface");
        Ok(())
    }

    async fn close_surfaces(&self) -> Result<()> {
        tracing::debug!("noop adapter: close_surfaces");
        Ok(())
    }

    async fn surface_has_focus(&self) -> Result<bool> {
        Ok(true)
    }

    async fn focus_primary_surface(&self) -> Result<()> {
        Ok(())
    }

    async fn enumerate_processes(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn terminate_process(&self, name: String) -> Result<()> {
        tracing::debug!(%name, "noop adapter: terminate_process");
        Ok(())
    }

    async fn query_foreground_process(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn machine_identity(&self) -> Result<String> {
        Ok(String::new())
    }
}

/// Adapter with real process probes (enumeration, kill, DMI identity) via
/// shell tooling; window and input hooks are not available here and behave
/// like the noop adapter with a warning.
#[derive(Debug, Default)]
pub struct SystemProbeAdapter;

impl SystemProbeAdapter {
    async fn run(program: &str, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PlatformLockdownAdapter for SystemProbeAdapter {
    async fn suppress_sleep(&self) -> Result<()> {
        tracing::warn!("sleep suppression not available on this platform");
        Ok(())
    }

    async fn release_sleep(&self) -> Result<()> {
        Ok(())
    }

    async fn install_input_interception(
        &self,
        _shortcuts: Vec<String>,
        _keys: Vec<String>,
        _on_intercept: InterceptHandler,
    ) -> Result<()> {
        tracing::warn!("global input interception not available on this platform");
        Ok(())
    }

    async fn uninstall_input_interception(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_feature_restrictions(&self) -> Result<()> {
        tracing::warn!("feature restrictions not available on this platform");
        Ok(())
    }

    async fn revert_feature_restrictions(&self) -> Result<()> {
        Ok(())
    }

    async fn create_pinned_surface(&self, url: String) -> Result<()> {
        tracing::warn!(%url, "pinned surface not available on this platform");
        Ok(())
    }

    async fn create_control_surface(&self) -> Result<()> {
        Ok(())
    }

    async fn close_surfaces(&self) -> Result<()> {
        Ok(())
    }

    async fn surface_has_focus(&self) -> Result<bool> {
        Ok(true)
    }

    async fn focus_primary_surface(&self) -> Result<()> {
        Ok(())
    }

    async fn enumerate_processes(&self) -> Result<Vec<String>> {
        let raw = if cfg!(windows) {
            Self::run("tasklist", &["/FO", "CSV", "/NH"]).await?
        } else {
            Self::run("ps", &["-eo", "comm="]).await?
        };

        let names = raw
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                if cfg!(windows) {
                    // CSV row: "name.exe","pid",...
                    line.trim_start_matches('"').split('"').next()
                } else {
                    // ps prints full command paths on some systems
                    line.rsplit('/').next()
                }
            })
            .map(|name| name.to_ascii_lowercase())
            .collect();
        Ok(names)
    }

    async fn terminate_process(&self, name: String) -> Result<()> {
        if cfg!(windows) {
            Self::run("taskkill", &["/F", "/IM", &name]).await?;
        } else {
            Self::run("pkill", &["-x", &name]).await?;
        }
        Ok(())
    }

    async fn query_foreground_process(&self) -> Result<Option<String>> {
        // No portable way to resolve the focused window's owner here.
        Ok(None)
    }

    async fn machine_identity(&self) -> Result<String> {
        if cfg!(windows) {
            return Self::run("wmic", &["computersystem", "get", "manufacturer,model"]).await;
        }
        let mut identity = String::new();
        for path in [
            "/sys/class/dmi/id/sys_vendor",
            "/sys/class/dmi/id/product_name",
        ] {
            if let Ok(value) = tokio::fs::read_to_string(path).await {
                identity.push_str(value.trim());
                identity.push(' ');
            }
        }
        Ok(identity)
    }
}
