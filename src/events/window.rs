use serde::{Deserialize, Serialize};
use std::fmt;

/// Прямоугольник окна в экранных координатах (точки, начало в левом верхнем углу)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowBounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Позиция совпадает с целевой в пределах допуска
    pub fn position_within(&self, target: &WindowBounds, tolerance: f64) -> bool {
        (self.x - target.x).abs() <= tolerance && (self.y - target.y).abs() <= tolerance
    }

    /// Размер совпадает с целевым в пределах допуска
    pub fn size_within(&self, target: &WindowBounds, tolerance: f64) -> bool {
        (self.width - target.width).abs() <= tolerance
            && (self.height - target.height).abs() <= tolerance
    }

    pub fn within(&self, target: &WindowBounds, tolerance: f64) -> bool {
        self.position_within(target, tolerance) && self.size_within(target, tolerance)
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@({},{})",
            self.width, self.height, self.x, self.y
        )
    }
}

/// Сохранённое описание одного окна внутри раскладки
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDescriptor {
    /// Отображаемое имя приложения-владельца, основной ключ сопоставления
    pub owner_name: String,
    /// Стабильный идентификатор приложения для перезапуска
    pub bundle_identifier: Option<String>,
    /// Заголовок окна на момент захвата
    pub window_title: String,
    pub bounds: WindowBounds,
    /// Идентификатор окна на момент захвата, между сессиями не переиспользуется
    pub capture_window_id: u32,
}

impl WindowDescriptor {
    pub fn new(owner_name: impl Into<String>, window_title: impl Into<String>, bounds: WindowBounds) -> Self {
        Self {
            owner_name: owner_name.into(),
            bundle_identifier: None,
            window_title: window_title.into(),
            bounds,
            capture_window_id: 0,
        }
    }

    pub fn with_bundle(mut self, bundle_identifier: impl Into<String>) -> Self {
        self.bundle_identifier = Some(bundle_identifier.into());
        self
    }

    pub fn with_window_id(mut self, window_id: u32) -> Self {
        self.capture_window_id = window_id;
        self
    }
}

impl fmt::Display for WindowDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.window_title.is_empty() {
            write!(f, "{} {}", self.owner_name, self.bounds)
        } else {
            write!(f, "\"{}\" ({}) {}", self.window_title, self.owner_name, self.bounds)
        }
    }
}

/// Окно на экране в том виде, в котором его отдаёт оконный сервер
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnScreenWindow {
    pub owner_name: String,
    /// Без доступа к записи экрана заголовки чужих окон не приходят
    pub title: Option<String>,
    pub bounds: WindowBounds,
    pub window_id: u32,
    pub owner_pid: i32,
}

/// Запущенное приложение из реестра процессов
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunningApp {
    pub name: String,
    pub bundle_identifier: Option<String>,
    pub pid: i32,
}

/// Ссылка на окно в Accessibility API: процесс и непрозрачный токен бэкенда
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxWindowRef {
    pub pid: i32,
    pub token: u64,
}

/// Окно приложения, каким его видит Accessibility API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxWindow {
    pub handle: AxWindowRef,
    pub title: String,
    pub bounds: WindowBounds,
}

impl fmt::Display for AxWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" [pid {}] {}", self.title, self.handle.pid, self.bounds)
    }
}
