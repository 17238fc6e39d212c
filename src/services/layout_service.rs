//! Единственный владелец хранилища и движков.
//!
//! Все захваты, восстановления и мутации таблицы проходят через очередь одного
//! актора и выполняются строго по одному. Чтение таблицы идёт напрямую из хранилища.

use crate::config::Config;
use crate::snap_error;
use crate::error::{Result, SnapError};
use crate::events::{LayoutRecord, LayoutsChanged, Shortcut};
use crate::services::capture_engine::CaptureEngine;
use crate::services::layout_store::LayoutStore;
use crate::services::restore_engine::{RestoreEngine, RestoreReport};
use crate::services::shortcut_registry::ShortcutRegistry;
use crate::services::window_system::Platform;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const QUEUE_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Save { reply: Reply<Option<LayoutRecord>> },
    Replace { name: String, reply: Reply<Option<LayoutRecord>> },
    Restore { name: String, reply: Reply<RestoreReport> },
    RestoreByShortcut { shortcut: Shortcut, reply: Reply<Option<RestoreReport>> },
    Rename { from: String, to: String, reply: Reply<()> },
    Delete { name: String, reply: Reply<bool> },
    SetShortcut { name: String, shortcut: Option<Shortcut>, reply: Reply<bool> },
    ToggleFavorite { name: String, reply: Reply<Option<bool>> },
    ClearAll { reply: Reply<()> },
}

pub struct LayoutService {
    store: Arc<LayoutStore>,
    registry: Arc<ShortcutRegistry>,
    capture: CaptureEngine,
    restore: RestoreEngine,
    changes: broadcast::Receiver<LayoutsChanged>,
    requests: mpsc::Receiver<Request>,
}

impl LayoutService {
    /// Запустить актор; он работает, пока жив хотя бы один хэндл
    pub fn spawn(
        config: Arc<Config>,
        platform: Platform,
        store: Arc<LayoutStore>,
    ) -> (LayoutServiceHandle, JoinHandle<()>) {
        let (sender, requests) = mpsc::channel(QUEUE_CAPACITY);
        let registry = Arc::new(ShortcutRegistry::from_layouts(&store.list()));

        let service = Self {
            changes: store.subscribe(),
            store: store.clone(),
            registry: registry.clone(),
            capture: CaptureEngine::new(config.clone(), platform.clone()),
            restore: RestoreEngine::new(config, platform),
            requests,
        };
        let task = tokio::spawn(service.run());

        (LayoutServiceHandle { sender, store, registry }, task)
    }

    async fn run(mut self) {
        info!("Сервис раскладок запущен ({} раскладок)", self.store.len());
        while let Some(request) = self.requests.recv().await {
            self.handle(request).await;
            self.sync_registry();
        }
        info!("Сервис раскладок остановлен");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Save { reply } => {
                let _ = reply.send(self.save().await);
            }
            Request::Replace { name, reply } => {
                let _ = reply.send(self.replace(&name).await);
            }
            Request::Restore { name, reply } => {
                let _ = reply.send(self.restore_layout(&name).await);
            }
            Request::RestoreByShortcut { shortcut, reply } => {
                let result = match self.registry.resolve(&shortcut) {
                    Some(name) => self.restore_layout(&name).await.map(Some),
                    None => {
                        debug!("Сочетание {} не назначено ни одной раскладке", shortcut);
                        Ok(None)
                    }
                };
                let _ = reply.send(result);
            }
            Request::Rename { from, to, reply } => {
                let _ = reply.send(self.store.rename(&from, &to));
            }
            Request::Delete { name, reply } => {
                let _ = reply.send(self.store.delete(&name));
            }
            Request::SetShortcut { name, shortcut, reply } => {
                let _ = reply.send(self.store.set_shortcut(&name, shortcut));
            }
            Request::ToggleFavorite { name, reply } => {
                let _ = reply.send(self.store.toggle_favorite(&name));
            }
            Request::ClearAll { reply } => {
                let _ = reply.send(self.store.clear_all());
            }
        }
    }

    // Рассылки хранилища отправляются синхронно внутри мутации, поэтому к этому
    // моменту все изменения последнего запроса уже лежат в канале
    fn sync_registry(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(event) => self.registry.apply(&event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Пропущено {} рассылок, реестр сочетаний перестроен заново", skipped);
                    self.registry.apply(&self.store.snapshot());
                }
                Err(_) => break,
            }
        }
    }

    async fn save(&self) -> Result<Option<LayoutRecord>> {
        let Some(windows) = self.capture.capture().await else {
            return Ok(None);
        };
        let record = LayoutRecord::new(self.store.next_default_name(), windows);
        self.store.upsert(record.clone())?;
        info!("Сохранена раскладка {}", record);
        Ok(Some(record))
    }

    async fn replace(&self, name: &str) -> Result<Option<LayoutRecord>> {
        let Some(windows) = self.capture.capture().await else {
            return Ok(None);
        };
        let record = match self.store.get(name) {
            Some(existing) => existing.replaced_with(windows),
            None => LayoutRecord::new(name, windows),
        };
        self.store.upsert(record.clone())?;
        info!("Раскладка {} перезаписана", record);
        Ok(Some(record))
    }

    async fn restore_layout(&self, name: &str) -> Result<RestoreReport> {
        let Some(record) = self.store.get(name) else {
            return SnapError::layout_not_found(name);
        };
        self.restore.restore(&record).await
    }
}

/// Клонируемый хэндл для отправки запросов актору
#[derive(Clone)]
pub struct LayoutServiceHandle {
    sender: mpsc::Sender<Request>,
    store: Arc<LayoutStore>,
    registry: Arc<ShortcutRegistry>,
}

impl LayoutServiceHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| snap_error!(service_unavailable, "сервис раскладок остановлен"))?;
        response
            .await
            .map_err(|_| snap_error!(service_unavailable, "сервис раскладок не ответил"))?
    }

    /// Захватить окна в новую раскладку `Layout N`; `None`, если список окон недоступен
    pub async fn save(&self) -> Result<Option<LayoutRecord>> {
        self.call(|reply| Request::Save { reply }).await
    }

    /// Новый снимок окон под существующим именем с сохранением сочетания и избранного
    pub async fn replace(&self, name: &str) -> Result<Option<LayoutRecord>> {
        let name = name.to_string();
        self.call(|reply| Request::Replace { name, reply }).await
    }

    pub async fn restore(&self, name: &str) -> Result<RestoreReport> {
        let name = name.to_string();
        self.call(|reply| Request::Restore { name, reply }).await
    }

    /// Восстановить раскладку, которой назначено сочетание; `None`, если такой нет
    pub async fn restore_by_shortcut(&self, shortcut: Shortcut) -> Result<Option<RestoreReport>> {
        self.call(|reply| Request::RestoreByShortcut { shortcut, reply }).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.call(|reply| Request::Rename { from, to, reply }).await
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.call(|reply| Request::Delete { name, reply }).await
    }

    pub async fn set_shortcut(&self, name: &str, shortcut: Option<Shortcut>) -> Result<bool> {
        let name = name.to_string();
        self.call(|reply| Request::SetShortcut { name, shortcut, reply }).await
    }

    pub async fn toggle_favorite(&self, name: &str) -> Result<Option<bool>> {
        let name = name.to_string();
        self.call(|reply| Request::ToggleFavorite { name, reply }).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.call(|reply| Request::ClearAll { reply }).await
    }

    pub fn list(&self) -> Vec<LayoutRecord> {
        self.store.list()
    }

    /// Раскладки в порядке меню: избранные первыми, затем от старых к новым
    pub fn menu(&self) -> Vec<LayoutRecord> {
        self.store.menu_order()
    }

    pub fn favorites(&self) -> Vec<LayoutRecord> {
        self.store.favorites()
    }

    pub fn get(&self, name: &str) -> Option<LayoutRecord> {
        self.store.get(name)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LayoutsChanged> {
        self.store.subscribe()
    }

    pub fn shortcut_bindings(&self) -> Vec<(Shortcut, String)> {
        self.registry.bindings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeCause, KeyCode, Modifiers, WindowBounds};
    use crate::services::layout_store::MemoryStore;
    use crate::services::restore_engine::DescriptorOutcome;
    use crate::services::window_system::DryRunDesktop;

    struct Fixture {
        desktop: Arc<DryRunDesktop>,
        handle: LayoutServiceHandle,
    }

    fn fixture() -> Fixture {
        let desktop = Arc::new(DryRunDesktop::new());
        let editor = desktop.add_app("Editor", Some("com.example.editor"));
        let terminal = desktop.add_app("Terminal", Some("com.apple.Terminal"));
        desktop.add_window(editor, "main.rs", WindowBounds::new(0.0, 25.0, 1200.0, 800.0));
        desktop.add_window(terminal, "zsh", WindowBounds::new(1200.0, 25.0, 720.0, 800.0));

        let store = Arc::new(LayoutStore::open(Arc::new(MemoryStore::new()), "layouts"));
        let (handle, _task) = LayoutService::spawn(
            Arc::new(Config::default()),
            Platform::from_backend(desktop.clone()),
            store,
        );
        Fixture { desktop, handle }
    }

    fn cmd_shift(key: u16) -> Shortcut {
        Shortcut::new(KeyCode::new(key), Modifiers::new().with_command(true).with_shift(true))
    }

    #[tokio::test]
    async fn test_stopped_service_is_unavailable() {
        let store = Arc::new(LayoutStore::open(Arc::new(MemoryStore::new()), "layouts"));
        let (handle, task) = LayoutService::spawn(
            Arc::new(Config::default()),
            Platform::from_backend(Arc::new(DryRunDesktop::new())),
            store,
        );
        task.abort();
        let _ = task.await;

        let err = handle.delete("Work").await.unwrap_err();
        assert!(matches!(err, SnapError::ServiceUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_then_delete_scenario() {
        let Fixture { handle, .. } = fixture();

        let saved = handle.save().await.unwrap().unwrap();
        assert_eq!(saved.name, "Layout 1");

        let layouts = handle.list();
        assert_eq!(layouts.len(), 1);
        let owners: Vec<_> = layouts[0].windows.iter().map(|w| w.owner_name.as_str()).collect();
        assert_eq!(owners, ["Editor", "Terminal"]);
        assert_eq!(layouts[0].windows[0].bounds, WindowBounds::new(0.0, 25.0, 1200.0, 800.0));
        assert_eq!(layouts[0].windows[1].bounds, WindowBounds::new(1200.0, 25.0, 720.0, 800.0));

        assert!(handle.delete("Layout 1").await.unwrap());
        assert!(handle.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_preserves_shortcut_and_favorite() {
        let Fixture { desktop, handle } = fixture();
        let original = handle.save().await.unwrap().unwrap();
        handle.set_shortcut("Layout 1", Some(cmd_shift(18))).await.unwrap();
        handle.toggle_favorite("Layout 1").await.unwrap();

        let id = desktop.window_id_by_title("zsh").unwrap();
        desktop.move_window(id, WindowBounds::new(0.0, 0.0, 500.0, 500.0));

        let replaced = handle.replace("Layout 1").await.unwrap().unwrap();

        assert_eq!(replaced.shortcut, Some(cmd_shift(18)));
        assert!(replaced.favorite);
        assert_ne!(replaced.windows, original.windows);
        assert_eq!(replaced.windows[1].bounds, WindowBounds::new(0.0, 0.0, 500.0, 500.0));
        assert!(replaced.saved_at >= original.saved_at);
        assert_eq!(handle.get("Layout 1").unwrap(), replaced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_by_shortcut_follows_registry() {
        let Fixture { desktop, handle } = fixture();
        handle.save().await.unwrap();
        handle.set_shortcut("Layout 1", Some(cmd_shift(18))).await.unwrap();
        assert_eq!(handle.shortcut_bindings(), vec![(cmd_shift(18), "Layout 1".to_string())]);

        let id = desktop.window_id_by_title("main.rs").unwrap();
        desktop.move_window(id, WindowBounds::new(9.0, 9.0, 9.0, 9.0));

        let report = handle.restore_by_shortcut("⌘⇧1".parse().unwrap()).await.unwrap().unwrap();
        assert!(matches!(report.outcomes[0].outcome, DescriptorOutcome::Positioned { .. }));
        assert_eq!(desktop.window_bounds(id), Some(WindowBounds::new(0.0, 25.0, 1200.0, 800.0)));

        handle.rename("Layout 1", "Work").await.unwrap();
        let report = handle.restore_by_shortcut(cmd_shift(18)).await.unwrap().unwrap();
        assert_eq!(report.layout, "Work");

        handle.set_shortcut("Work", None).await.unwrap();
        assert!(handle.restore_by_shortcut(cmd_shift(18)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_window_list_writes_nothing() {
        let Fixture { desktop, handle } = fixture();
        desktop.set_enumeration_available(false);

        assert!(handle.save().await.unwrap().is_none());
        assert!(handle.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_unknown_layout() {
        let Fixture { handle, .. } = fixture();
        let err = handle.restore("Nope").await.unwrap_err();
        assert!(matches!(err, SnapError::LayoutNotFound(ref n) if n == "Nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_every_mutation() {
        let Fixture { handle, .. } = fixture();
        let mut changes = handle.subscribe();

        handle.save().await.unwrap();
        handle.save().await.unwrap();
        handle.clear_all().await.unwrap();

        assert_eq!(changes.recv().await.unwrap().cause, ChangeCause::Upserted("Layout 1".to_string()));
        assert_eq!(changes.recv().await.unwrap().cause, ChangeCause::Upserted("Layout 2".to_string()));
        let cleared = changes.recv().await.unwrap();
        assert_eq!(cleared.cause, ChangeCause::Cleared);
        assert!(cleared.layouts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_serialized() {
        let Fixture { handle, .. } = fixture();

        let saves: Vec<_> = (0..5)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.save().await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let mut names: Vec<_> = handle.list().into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, ["Layout 1", "Layout 2", "Layout 3", "Layout 4", "Layout 5"]);
    }
}
