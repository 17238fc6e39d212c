use crate::error::{Result, SnapError};
use crate::events::{AxWindow, AxWindowRef, OnScreenWindow, RunningApp, WindowBounds};
use crate::{snap_error, trace_if_enabled};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::r#trait::{Accessibility, AppRegistry, WindowServer};

const OSASCRIPT: &str = "/usr/bin/osascript";
const OPEN: &str = "/usr/bin/open";

// Все скрипты получают параметры через argv, а не подстановкой в текст
const SCRIPT_ON_SCREEN_WINDOWS: &str = r#"
ObjC.import('CoreGraphics');
function run(argv) {
    const list = $.CGWindowListCopyWindowInfo($.kCGWindowListOptionOnScreenOnly, $.kCGNullWindowID);
    if (!list) { return 'null'; }
    const windows = ObjC.deepUnwrap(ObjC.castRefToObject(list)) || [];
    return JSON.stringify(windows.map(w => ({
        owner: w.kCGWindowOwnerName || '',
        name: (w.kCGWindowName === undefined ? null : w.kCGWindowName),
        pid: w.kCGWindowOwnerPID,
        id: w.kCGWindowNumber,
        bounds: w.kCGWindowBounds
    })));
}
"#;

const SCRIPT_SCREEN_CAPTURE_ACCESS: &str = r#"
ObjC.bindFunction('CGPreflightScreenCaptureAccess', ['bool', []]);
ObjC.bindFunction('CGRequestScreenCaptureAccess', ['bool', []]);
function run(argv) {
    if (argv[0] === 'request') { return String($.CGRequestScreenCaptureAccess()); }
    return String($.CGPreflightScreenCaptureAccess());
}
"#;

const SCRIPT_RUNNING_APPS: &str = r#"
ObjC.import('AppKit');
function run(argv) {
    const apps = $.NSWorkspace.sharedWorkspace.runningApplications;
    const out = [];
    for (let i = 0; i < apps.count; i++) {
        const app = apps.objectAtIndex(i);
        out.push({
            name: ObjC.unwrap(app.localizedName) || '',
            bundleId: ObjC.unwrap(app.bundleIdentifier) || null,
            pid: app.processIdentifier
        });
    }
    return JSON.stringify(out);
}
"#;

const SCRIPT_ACTIVATE: &str = r#"
ObjC.import('AppKit');
function run(argv) {
    const app = $.NSRunningApplication.runningApplicationWithProcessIdentifier(parseInt(argv[0], 10));
    if (!app || app.isNil()) { throw new Error('no such process'); }
    app.activateWithOptions($.NSApplicationActivateIgnoringOtherApps);
    return 'ok';
}
"#;

const SCRIPT_IS_TRUSTED: &str = r#"
ObjC.import('Foundation');
ObjC.bindFunction('AXIsProcessTrustedWithOptions', ['bool', ['id']]);
function run(argv) {
    const options = $.NSDictionary.dictionaryWithObjectForKey($.NSNumber.numberWithBool(argv[0] === 'prompt'), $('AXTrustedCheckOptionPrompt'));
    return String($.AXIsProcessTrustedWithOptions(options));
}
"#;

const SCRIPT_AX_WINDOWS: &str = r#"
function run(argv) {
    const se = Application('System Events');
    const procs = se.processes.whose({ unixId: parseInt(argv[0], 10) });
    if (procs.length === 0) { throw new Error('no such process'); }
    const windows = procs[0].windows();
    return JSON.stringify(windows.map((w, i) => {
        const pos = w.position();
        const size = w.size();
        return { index: i, title: w.name() || '', x: pos[0], y: pos[1], width: size[0], height: size[1] };
    }));
}
"#;

const SCRIPT_AX_SET: &str = r#"
function run(argv) {
    const se = Application('System Events');
    const procs = se.processes.whose({ unixId: parseInt(argv[0], 10) });
    if (procs.length === 0) { throw new Error('no such process'); }
    const window = procs[0].windows[parseInt(argv[1], 10)];
    const a = parseFloat(argv[3]);
    const b = parseFloat(argv[4]);
    if (argv[2] === 'position') { window.position = [a, b]; }
    else if (argv[2] === 'size') { window.size = [a, b]; }
    else { throw new Error('unknown attribute ' + argv[2]); }
    return 'ok';
}
"#;

const SCRIPT_AX_RAISE: &str = r#"
function run(argv) {
    const se = Application('System Events');
    const procs = se.processes.whose({ unixId: parseInt(argv[0], 10) });
    if (procs.length === 0) { throw new Error('no such process'); }
    procs[0].windows[parseInt(argv[1], 10)].actions.byName('AXRaise').perform();
    return 'ok';
}
"#;

#[derive(Debug, Deserialize)]
struct RawBounds {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "Width")]
    width: f64,
    #[serde(rename = "Height")]
    height: f64,
}

#[derive(Debug, Deserialize)]
struct RawOnScreenWindow {
    owner: String,
    name: Option<String>,
    pid: i32,
    id: u32,
    bounds: RawBounds,
}

#[derive(Debug, Deserialize)]
struct RawRunningApp {
    name: String,
    #[serde(rename = "bundleId")]
    bundle_id: Option<String>,
    pid: i32,
}

#[derive(Debug, Deserialize)]
struct RawAxWindow {
    index: u64,
    title: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Бэкенд macOS поверх `osascript` (JXA) и `open`
pub struct OsascriptBackend;

impl OsascriptBackend {
    pub fn new() -> Result<Self> {
        if !std::path::Path::new(OSASCRIPT).exists() {
            return Err(snap_error!(
                service_unavailable,
                "{} не найден, бэкенд работает только на macOS (используйте --dry-run)",
                OSASCRIPT
            ));
        }
        Ok(Self)
    }

    async fn run_jxa(script: &str, args: &[String]) -> Result<String> {
        let output = Command::new(OSASCRIPT)
            .args(["-l", "JavaScript", "-e", script])
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!("osascript завершился с ошибкой: {}", stderr);
            return Err(SnapError::Accessibility(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        trace_if_enabled!("osascript вернул {} байт", stdout.len());
        Ok(stdout)
    }

    async fn run_bool(script: &str, arg: &str) -> bool {
        match Self::run_jxa(script, &[arg.to_string()]).await {
            Ok(out) => out == "true",
            Err(e) => {
                warn!("Не удалось проверить разрешение: {}", e);
                false
            }
        }
    }

    async fn set_attribute(window: &AxWindowRef, attribute: &str, a: f64, b: f64) -> Result<()> {
        Self::run_jxa(
            SCRIPT_AX_SET,
            &[
                window.pid.to_string(),
                window.token.to_string(),
                attribute.to_string(),
                a.to_string(),
                b.to_string(),
            ],
        )
        .await
        .map(|_| ())
    }
}

#[async_trait::async_trait]
impl WindowServer for OsascriptBackend {
    async fn has_screen_capture_access(&self) -> bool {
        Self::run_bool(SCRIPT_SCREEN_CAPTURE_ACCESS, "preflight").await
    }

    async fn request_screen_capture_access(&self) {
        Self::run_bool(SCRIPT_SCREEN_CAPTURE_ACCESS, "request").await;
    }

    async fn on_screen_windows(&self) -> Option<Vec<OnScreenWindow>> {
        let out = match Self::run_jxa(SCRIPT_ON_SCREEN_WINDOWS, &[]).await {
            Ok(out) => out,
            Err(e) => {
                warn!("Не удалось получить список окон: {}", e);
                return None;
            }
        };

        let raw: Option<Vec<RawOnScreenWindow>> = match serde_json::from_str(&out) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Некорректный ответ оконного сервера: {}", e);
                return None;
            }
        };

        raw.map(|windows| {
            windows
                .into_iter()
                .map(|w| OnScreenWindow {
                    owner_name: w.owner,
                    title: w.name,
                    bounds: WindowBounds::new(w.bounds.x, w.bounds.y, w.bounds.width, w.bounds.height),
                    window_id: w.id,
                    owner_pid: w.pid,
                })
                .collect()
        })
    }
}

#[async_trait::async_trait]
impl AppRegistry for OsascriptBackend {
    async fn running_apps(&self) -> Result<Vec<RunningApp>> {
        let out = Self::run_jxa(SCRIPT_RUNNING_APPS, &[]).await?;
        let raw: Vec<RawRunningApp> = serde_json::from_str(&out)?;
        Ok(raw
            .into_iter()
            .map(|a| RunningApp {
                name: a.name,
                bundle_identifier: a.bundle_id.filter(|b| !b.is_empty()),
                pid: a.pid,
            })
            .collect())
    }

    async fn launch(&self, bundle_identifier: &str) -> Result<()> {
        let output = Command::new(OPEN)
            .args(["-g", "-b", bundle_identifier])
            .output()
            .await?;

        if !output.status.success() {
            return Err(SnapError::TargetNotFound(format!(
                "open -b {}: {}",
                bundle_identifier,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn activate(&self, pid: i32) -> Result<()> {
        Self::run_jxa(SCRIPT_ACTIVATE, &[pid.to_string()]).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl Accessibility for OsascriptBackend {
    async fn is_trusted(&self, prompt: bool) -> bool {
        Self::run_bool(SCRIPT_IS_TRUSTED, if prompt { "prompt" } else { "check" }).await
    }

    async fn windows(&self, pid: i32) -> Result<Vec<AxWindow>> {
        let out = Self::run_jxa(SCRIPT_AX_WINDOWS, &[pid.to_string()]).await?;
        let raw: Vec<RawAxWindow> = serde_json::from_str(&out)?;
        Ok(raw
            .into_iter()
            .map(|w| AxWindow {
                // Индекс в списке окон System Events, сдвигается после AXRaise
                handle: AxWindowRef { pid, token: w.index },
                title: w.title,
                bounds: WindowBounds::new(w.x, w.y, w.width, w.height),
            })
            .collect())
    }

    async fn set_position(&self, window: &AxWindowRef, x: f64, y: f64) -> Result<()> {
        Self::set_attribute(window, "position", x, y).await
    }

    async fn set_size(&self, window: &AxWindowRef, width: f64, height: f64) -> Result<()> {
        Self::set_attribute(window, "size", width, height).await
    }

    async fn raise(&self, window: &AxWindowRef) -> Result<()> {
        Self::run_jxa(SCRIPT_AX_RAISE, &[window.pid.to_string(), window.token.to_string()])
            .await
            .map(|_| ())
    }
}
