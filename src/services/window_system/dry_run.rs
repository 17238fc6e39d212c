use crate::snap_error;
use crate::error::{Result, SnapError};
use crate::events::{AxWindow, AxWindowRef, OnScreenWindow, RunningApp, WindowBounds};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::r#trait::{Accessibility, AppRegistry, WindowServer};

#[derive(Debug, Clone)]
struct SimWindow {
    id: u32,
    pid: i32,
    title: String,
    bounds: WindowBounds,
}

#[derive(Debug, Clone)]
struct SimApp {
    name: String,
    bundle: Option<String>,
    pid: i32,
}

#[derive(Debug, Clone)]
struct Installed {
    name: String,
    windows: Vec<(String, WindowBounds)>,
    latency: Duration,
}

#[derive(Debug)]
struct PendingLaunch {
    ready_at: Instant,
    bundle: String,
}

#[derive(Debug)]
struct DesktopState {
    apps: Vec<SimApp>,
    windows: HashMap<u32, SimWindow>,
    // Идентификаторы окон от верхнего к нижнему
    z_order: Vec<u32>,
    installed: HashMap<String, Installed>,
    pending: Vec<PendingLaunch>,
    launches: Vec<String>,
    screen_capture_granted: bool,
    grant_on_request: bool,
    screen_capture_requests: u32,
    enumeration_available: bool,
    trusted: bool,
    trust_prompts: u32,
    failing_titles: HashSet<String>,
    geometry_writes: u32,
    next_pid: i32,
    next_window_id: u32,
}

/// Эмуляция рабочего стола для dry-run режима и тестов.
///
/// Держит приложения, окна и их порядок наложения в памяти, умеет "запускать"
/// установленные приложения с задержкой и отказывать в отдельных операциях.
pub struct DryRunDesktop {
    state: Mutex<DesktopState>,
}

impl Default for DryRunDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunDesktop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DesktopState {
                apps: Vec::new(),
                windows: HashMap::new(),
                z_order: Vec::new(),
                installed: HashMap::new(),
                pending: Vec::new(),
                launches: Vec::new(),
                screen_capture_granted: true,
                grant_on_request: true,
                screen_capture_requests: 0,
                enumeration_available: true,
                trusted: true,
                trust_prompts: 0,
                failing_titles: HashSet::new(),
                geometry_writes: 0,
                next_pid: 100,
                next_window_id: 1,
            }),
        }
    }

    /// Рабочий стол с несколькими фиктивными окнами для `--dry-run`
    pub fn demo(self_name: &str) -> Self {
        let desktop = Self::new();

        let terminal = desktop.add_app("Terminal", Some("com.apple.Terminal"));
        desktop.add_window(terminal, "Terminal - dry_run", WindowBounds::new(40.0, 60.0, 900.0, 600.0));

        let browser = desktop.add_app("Safari", Some("com.apple.Safari"));
        desktop.add_window(browser, "Browser - dry_run", WindowBounds::new(960.0, 40.0, 1200.0, 900.0));

        let editor = desktop.add_app("Editor", Some("com.example.editor"));
        desktop.add_window(editor, "Editor - dry_run", WindowBounds::new(200.0, 300.0, 1000.0, 700.0));

        let dock = desktop.add_app("Dock", Some("com.apple.dock"));
        desktop.add_window(dock, "Dock", WindowBounds::new(0.0, 1050.0, 1920.0, 30.0));

        let own = desktop.add_app(self_name, Some("com.example.snap"));
        desktop.add_window(own, "Item-0", WindowBounds::new(1700.0, 0.0, 30.0, 24.0));

        desktop.install(
            "com.example.notes",
            "Notes",
            vec![("Notes - dry_run", WindowBounds::new(100.0, 100.0, 600.0, 500.0))],
            Duration::from_millis(300),
        );

        info!("Dry-run: эмулируемый рабочий стол с {} окнами", desktop.z_order().len());
        desktop
    }

    pub fn add_app(&self, name: &str, bundle: Option<&str>) -> i32 {
        let mut state = self.state.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.apps.push(SimApp {
            name: name.to_string(),
            bundle: bundle.map(str::to_string),
            pid,
        });
        pid
    }

    /// Новое окно попадает в конец порядка наложения (под уже существующие)
    pub fn add_window(&self, pid: i32, title: &str, bounds: WindowBounds) -> u32 {
        let mut state = self.state.lock();
        Self::insert_window(&mut state, pid, title, bounds)
    }

    fn insert_window(state: &mut DesktopState, pid: i32, title: &str, bounds: WindowBounds) -> u32 {
        let id = state.next_window_id;
        state.next_window_id += 1;
        state.windows.insert(
            id,
            SimWindow {
                id,
                pid,
                title: title.to_string(),
                bounds,
            },
        );
        state.z_order.push(id);
        id
    }

    /// Зарегистрировать приложение, которое можно запустить по bundle id
    pub fn install(&self, bundle: &str, name: &str, windows: Vec<(&str, WindowBounds)>, latency: Duration) {
        self.state.lock().installed.insert(
            bundle.to_string(),
            Installed {
                name: name.to_string(),
                windows: windows
                    .into_iter()
                    .map(|(title, bounds)| (title.to_string(), bounds))
                    .collect(),
                latency,
            },
        );
    }

    pub fn quit_app(&self, name: &str) {
        let mut state = self.state.lock();
        let pids: Vec<i32> = state.apps.iter().filter(|a| a.name == name).map(|a| a.pid).collect();
        state.apps.retain(|a| a.name != name);
        state.windows.retain(|_, w| !pids.contains(&w.pid));
        let windows = &state.windows;
        let remaining: Vec<u32> = state.z_order.iter().copied().filter(|id| windows.contains_key(id)).collect();
        state.z_order = remaining;
    }

    pub fn move_window(&self, id: u32, bounds: WindowBounds) {
        if let Some(window) = self.state.lock().windows.get_mut(&id) {
            window.bounds = bounds;
        }
    }

    pub fn set_title(&self, id: u32, title: &str) {
        if let Some(window) = self.state.lock().windows.get_mut(&id) {
            window.title = title.to_string();
        }
    }

    pub fn window_bounds(&self, id: u32) -> Option<WindowBounds> {
        self.state.lock().windows.get(&id).map(|w| w.bounds)
    }

    pub fn window_id_by_title(&self, title: &str) -> Option<u32> {
        let state = self.state.lock();
        state.z_order.iter().copied().find(|id| state.windows[id].title == title)
    }

    pub fn z_order(&self) -> Vec<u32> {
        self.state.lock().z_order.clone()
    }

    /// Текущий хэндл окна; он меняется, когда меняется порядок наложения
    pub fn handle_of(&self, id: u32) -> Option<AxWindowRef> {
        let state = self.state.lock();
        let pid = state.windows.get(&id)?.pid;
        let token = Self::windows_of(&state, pid).position(|w| w == id)?;
        Some(AxWindowRef {
            pid,
            token: token as u64,
        })
    }

    pub fn frontmost_window(&self) -> Option<u32> {
        self.state.lock().z_order.first().copied()
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.state.lock().trusted = trusted;
    }

    pub fn trust_prompts(&self) -> u32 {
        self.state.lock().trust_prompts
    }

    pub fn set_screen_capture(&self, granted: bool, grant_on_request: bool) {
        let mut state = self.state.lock();
        state.screen_capture_granted = granted;
        state.grant_on_request = grant_on_request;
    }

    pub fn screen_capture_requests(&self) -> u32 {
        self.state.lock().screen_capture_requests
    }

    pub fn set_enumeration_available(&self, available: bool) {
        self.state.lock().enumeration_available = available;
    }

    /// Операции изменения геометрии для окон с этим заголовком будут падать
    pub fn fail_geometry_for(&self, title: &str) {
        self.state.lock().failing_titles.insert(title.to_string());
    }

    pub fn geometry_writes(&self) -> u32 {
        self.state.lock().geometry_writes
    }

    pub fn launches(&self) -> Vec<String> {
        self.state.lock().launches.clone()
    }

    // Завершить "запуск" приложений, время которых пришло
    fn promote_pending(state: &mut DesktopState) {
        let now = Instant::now();
        let (ready, waiting): (Vec<PendingLaunch>, Vec<PendingLaunch>) =
            state.pending.drain(..).partition(|p| p.ready_at <= now);
        state.pending = waiting;

        for launch in ready {
            let Some(installed) = state.installed.get(&launch.bundle).cloned() else {
                continue;
            };
            let pid = state.next_pid;
            state.next_pid += 1;
            state.apps.push(SimApp {
                name: installed.name.clone(),
                bundle: Some(launch.bundle.clone()),
                pid,
            });
            for (title, bounds) in &installed.windows {
                Self::insert_window(state, pid, title, *bounds);
            }
            info!("Dry-run: приложение {} запущено (pid {})", installed.name, pid);
        }
    }

    // Окна процесса сверху вниз
    fn windows_of(state: &DesktopState, pid: i32) -> impl Iterator<Item = u32> + '_ {
        state
            .z_order
            .iter()
            .copied()
            .filter(move |id| state.windows.get(id).is_some_and(|w| w.pid == pid))
    }

    // Токен - позиция окна среди окон процесса, как индекс в System Events
    fn resolve(state: &DesktopState, window: &AxWindowRef) -> Result<u32> {
        usize::try_from(window.token)
            .ok()
            .and_then(|index| Self::windows_of(state, window.pid).nth(index))
            .ok_or_else(|| {
                snap_error!(accessibility, "окно {} процесса {} больше не существует", window.token, window.pid)
            })
    }

    fn geometry_target(state: &DesktopState, window: &AxWindowRef) -> Result<u32> {
        if !state.trusted {
            return Err(snap_error!(permission, "Accessibility API недоступен"));
        }
        let id = Self::resolve(state, window)?;
        let sim = &state.windows[&id];
        if state.failing_titles.contains(&sim.title) {
            return Err(SnapError::Accessibility(format!(
                "окно \"{}\" отклонило изменение геометрии",
                sim.title
            )));
        }
        Ok(id)
    }
}

#[async_trait::async_trait]
impl WindowServer for DryRunDesktop {
    async fn has_screen_capture_access(&self) -> bool {
        self.state.lock().screen_capture_granted
    }

    async fn request_screen_capture_access(&self) {
        let mut state = self.state.lock();
        state.screen_capture_requests += 1;
        if state.grant_on_request {
            state.screen_capture_granted = true;
        }
    }

    async fn on_screen_windows(&self) -> Option<Vec<OnScreenWindow>> {
        let mut state = self.state.lock();
        Self::promote_pending(&mut state);
        if !state.enumeration_available {
            return None;
        }

        let granted = state.screen_capture_granted;
        let windows = state
            .z_order
            .iter()
            .filter_map(|id| {
                let window = state.windows.get(id)?;
                let owner = state.apps.iter().find(|a| a.pid == window.pid)?;
                Some(OnScreenWindow {
                    owner_name: owner.name.clone(),
                    title: granted.then(|| window.title.clone()),
                    bounds: window.bounds,
                    window_id: window.id,
                    owner_pid: window.pid,
                })
            })
            .collect();
        Some(windows)
    }
}

#[async_trait::async_trait]
impl AppRegistry for DryRunDesktop {
    async fn running_apps(&self) -> Result<Vec<RunningApp>> {
        let mut state = self.state.lock();
        Self::promote_pending(&mut state);
        Ok(state
            .apps
            .iter()
            .map(|a| RunningApp {
                name: a.name.clone(),
                bundle_identifier: a.bundle.clone(),
                pid: a.pid,
            })
            .collect())
    }

    async fn launch(&self, bundle_identifier: &str) -> Result<()> {
        let mut state = self.state.lock();
        let latency = state
            .installed
            .get(bundle_identifier)
            .map(|i| i.latency)
            .ok_or_else(|| {
                snap_error!(target_not_found, "приложение {} не установлено", bundle_identifier)
            })?;
        state.launches.push(bundle_identifier.to_string());
        state.pending.push(PendingLaunch {
            ready_at: Instant::now() + latency,
            bundle: bundle_identifier.to_string(),
        });
        info!("Dry-run: запуск {} через {:?}", bundle_identifier, latency);
        Ok(())
    }

    async fn activate(&self, pid: i32) -> Result<()> {
        let state = self.state.lock();
        if state.apps.iter().any(|a| a.pid == pid) {
            Ok(())
        } else {
            Err(snap_error!(target_not_found, "процесс {} не найден", pid))
        }
    }
}

#[async_trait::async_trait]
impl Accessibility for DryRunDesktop {
    async fn is_trusted(&self, prompt: bool) -> bool {
        let mut state = self.state.lock();
        if prompt {
            state.trust_prompts += 1;
        }
        state.trusted
    }

    async fn windows(&self, pid: i32) -> Result<Vec<AxWindow>> {
        let state = self.state.lock();
        if !state.trusted {
            return Err(snap_error!(permission, "Accessibility API недоступен"));
        }
        if !state.apps.iter().any(|a| a.pid == pid) {
            return Err(snap_error!(target_not_found, "процесс {} не найден", pid));
        }
        Ok(Self::windows_of(&state, pid)
            .enumerate()
            .map(|(token, id)| {
                let window = &state.windows[&id];
                AxWindow {
                    handle: AxWindowRef {
                        pid,
                        token: token as u64,
                    },
                    title: window.title.clone(),
                    bounds: window.bounds,
                }
            })
            .collect())
    }

    async fn set_position(&self, window: &AxWindowRef, x: f64, y: f64) -> Result<()> {
        let mut state = self.state.lock();
        let id = Self::geometry_target(&state, window)?;
        state.geometry_writes += 1;
        if let Some(sim) = state.windows.get_mut(&id) {
            sim.bounds.x = x;
            sim.bounds.y = y;
        }
        Ok(())
    }

    async fn set_size(&self, window: &AxWindowRef, width: f64, height: f64) -> Result<()> {
        let mut state = self.state.lock();
        let id = Self::geometry_target(&state, window)?;
        state.geometry_writes += 1;
        if let Some(sim) = state.windows.get_mut(&id) {
            sim.bounds.width = width;
            sim.bounds.height = height;
        }
        Ok(())
    }

    async fn raise(&self, window: &AxWindowRef) -> Result<()> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, window)?;
        state.z_order.retain(|w| *w != id);
        state.z_order.insert(0, id);
        Ok(())
    }
}
