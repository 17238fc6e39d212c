use crate::config::Config;
use crate::error::Result;
use crate::events::{AxWindow, AxWindowRef, OnScreenWindow, RunningApp};
use std::sync::Arc;

/// Оконный сервер: перечисление окон на экране
#[async_trait::async_trait]
pub trait WindowServer: Send + Sync {
    /// Есть ли доступ к записи экрана (без него заголовки чужих окон не видны)
    async fn has_screen_capture_access(&self) -> bool;

    /// Показать системный запрос доступа к записи экрана
    async fn request_screen_capture_access(&self);

    /// Окна на экране в порядке от верхнего к нижнему; `None`, если список недоступен
    async fn on_screen_windows(&self) -> Option<Vec<OnScreenWindow>>;
}

/// Реестр запущенных приложений
#[async_trait::async_trait]
pub trait AppRegistry: Send + Sync {
    async fn running_apps(&self) -> Result<Vec<RunningApp>>;

    /// Запросить запуск приложения; сам запуск асинхронный и наблюдается только опросом
    async fn launch(&self, bundle_identifier: &str) -> Result<()>;

    async fn activate(&self, pid: i32) -> Result<()>;
}

/// Поверхность управления окнами через Accessibility API
#[async_trait::async_trait]
pub trait Accessibility: Send + Sync {
    /// Проверка доверия; `prompt` показывает системный запрос
    async fn is_trusted(&self, prompt: bool) -> bool;

    async fn windows(&self, pid: i32) -> Result<Vec<AxWindow>>;

    async fn set_position(&self, window: &AxWindowRef, x: f64, y: f64) -> Result<()>;

    async fn set_size(&self, window: &AxWindowRef, width: f64, height: f64) -> Result<()>;

    /// Поднять окно наверх внутри приложения
    async fn raise(&self, window: &AxWindowRef) -> Result<()>;
}

/// Набор внешних возможностей платформы, от которых зависит ядро
#[derive(Clone)]
pub struct Platform {
    pub windows: Arc<dyn WindowServer>,
    pub apps: Arc<dyn AppRegistry>,
    pub accessibility: Arc<dyn Accessibility>,
}

impl Platform {
    /// Один бэкенд, реализующий все три возможности
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: WindowServer + AppRegistry + Accessibility + 'static,
    {
        Self {
            windows: backend.clone(),
            apps: backend.clone(),
            accessibility: backend,
        }
    }
}

/// Factory function to create an appropriate platform backend based on the dry_run flag
pub fn create_platform(config: Arc<Config>, dry_run: bool) -> Result<Platform> {
    if dry_run {
        Ok(Platform::from_backend(Arc::new(
            super::dry_run::DryRunDesktop::demo(&config.capture.self_name),
        )))
    } else {
        Ok(Platform::from_backend(Arc::new(
            super::osascript::OsascriptBackend::new()?,
        )))
    }
}
