use crate::config::Config;
use crate::debug_if_enabled;
use crate::events::WindowDescriptor;
use crate::services::exclusion::is_excluded;
use crate::services::window_system::Platform;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Снимок окон на экране в последовательность дескрипторов
pub struct CaptureEngine {
    config: Arc<Config>,
    platform: Platform,
}

impl CaptureEngine {
    pub fn new(config: Arc<Config>, platform: Platform) -> Self {
        Self { config, platform }
    }

    /// Захватить текущие окна.
    ///
    /// Без доступа к записи экрана один раз запрашивает его, ждёт `permission_grace`
    /// и продолжает с тем, что удалось получить. `None` означает, что список окон
    /// недоступен вовсе, и раскладку записывать нельзя.
    pub async fn capture(&self) -> Option<Vec<WindowDescriptor>> {
        if !self.platform.windows.has_screen_capture_access().await {
            warn!("Нет доступа к записи экрана, запрашиваем разрешение");
            self.platform.windows.request_screen_capture_access().await;
            tokio::time::sleep(self.config.capture.permission_grace()).await;
        }

        let Some(windows) = self.platform.windows.on_screen_windows().await else {
            warn!("Список окон на экране недоступен, захват пропущен");
            return None;
        };

        let bundles: HashMap<i32, Option<String>> = match self.platform.apps.running_apps().await {
            Ok(apps) => apps.into_iter().map(|a| (a.pid, a.bundle_identifier)).collect(),
            Err(e) => {
                warn!("Не удалось получить список приложений: {}", e);
                HashMap::new()
            }
        };

        let total = windows.len();
        let descriptors: Vec<WindowDescriptor> = windows
            .into_iter()
            .filter_map(|window| {
                if is_excluded(&window.owner_name, &self.config) {
                    debug_if_enabled!("Пропуск системного окна: {}", window.owner_name);
                    return None;
                }
                // Окно без заголовка видно только при отсутствии прав
                let Some(title) = window.title else {
                    debug_if_enabled!("Пропуск окна {} без заголовка ({})", window.window_id, window.owner_name);
                    return None;
                };

                let mut descriptor = WindowDescriptor::new(window.owner_name, title, window.bounds)
                    .with_window_id(window.window_id);
                descriptor.bundle_identifier = bundles
                    .get(&window.owner_pid)
                    .cloned()
                    .flatten()
                    .filter(|b| !b.is_empty());
                Some(descriptor)
            })
            .collect();

        info!("Захвачено окон: {} из {}", descriptors.len(), total);
        Some(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WindowBounds;
    use crate::services::window_system::DryRunDesktop;

    fn engine(desktop: &Arc<DryRunDesktop>) -> CaptureEngine {
        CaptureEngine::new(Arc::new(Config::default()), Platform::from_backend(desktop.clone()))
    }

    #[tokio::test]
    async fn test_capture_preserves_order_and_resolves_bundles() {
        let desktop = Arc::new(DryRunDesktop::new());
        let editor = desktop.add_app("Editor", Some("com.example.editor"));
        let terminal = desktop.add_app("Terminal", None);
        desktop.add_window(editor, "main.rs", WindowBounds::new(0.0, 25.0, 1200.0, 800.0));
        desktop.add_window(terminal, "zsh", WindowBounds::new(1200.0, 25.0, 720.0, 800.0));

        let descriptors = engine(&desktop).capture().await.unwrap();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].owner_name, "Editor");
        assert_eq!(descriptors[0].bundle_identifier.as_deref(), Some("com.example.editor"));
        assert_eq!(descriptors[0].bounds, WindowBounds::new(0.0, 25.0, 1200.0, 800.0));
        assert_eq!(descriptors[1].owner_name, "Terminal");
        assert_eq!(descriptors[1].bundle_identifier, None);
        assert_eq!(descriptors[1].window_title, "zsh");
    }

    #[tokio::test]
    async fn test_excluded_owners_never_captured() {
        let desktop = Arc::new(DryRunDesktop::demo("snap"));
        let descriptors = engine(&desktop).capture().await.unwrap();

        assert!(!descriptors.is_empty());
        let config = Config::default();
        assert!(descriptors.iter().all(|d| !is_excluded(&d.owner_name, &config)));
        assert!(descriptors.iter().all(|d| d.owner_name != "Dock" && d.owner_name != "snap"));
    }

    #[tokio::test]
    async fn test_only_excluded_windows_gives_empty_capture() {
        let desktop = Arc::new(DryRunDesktop::new());
        let dock = desktop.add_app("Dock", None);
        desktop.add_window(dock, "Dock", WindowBounds::new(0.0, 0.0, 10.0, 10.0));

        assert_eq!(engine(&desktop).capture().await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_unavailable_enumeration_yields_none() {
        let desktop = Arc::new(DryRunDesktop::new());
        desktop.set_enumeration_available(false);
        assert!(engine(&desktop).capture().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_permission_requests_and_degrades() {
        let desktop = Arc::new(DryRunDesktop::new());
        let editor = desktop.add_app("Editor", None);
        desktop.add_window(editor, "main.rs", WindowBounds::new(0.0, 0.0, 100.0, 100.0));
        desktop.set_screen_capture(false, false);

        let started = tokio::time::Instant::now();
        let descriptors = engine(&desktop).capture().await.unwrap();

        assert_eq!(desktop.screen_capture_requests(), 1);
        assert!(started.elapsed() >= Config::default().capture.permission_grace());
        // Без прав заголовки не видны, такие окна пропускаются
        assert!(descriptors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_granted_during_grace() {
        let desktop = Arc::new(DryRunDesktop::new());
        let editor = desktop.add_app("Editor", None);
        desktop.add_window(editor, "main.rs", WindowBounds::new(0.0, 0.0, 100.0, 100.0));
        desktop.set_screen_capture(false, true);

        let descriptors = engine(&desktop).capture().await.unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].window_title, "main.rs");
    }
}
