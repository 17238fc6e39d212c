use super::keyboard::Shortcut;
use super::window::WindowDescriptor;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Сохранённая раскладка: именованный снимок положения окон
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRecord {
    pub name: String,
    /// Порядок захвата, он же порядок наложения окон (первое - самое верхнее)
    pub windows: Vec<WindowDescriptor>,
    pub saved_at: DateTime<Utc>,
    pub shortcut: Option<Shortcut>,
    pub favorite: bool,
}

impl LayoutRecord {
    pub fn new(name: impl Into<String>, windows: Vec<WindowDescriptor>) -> Self {
        Self {
            name: name.into(),
            windows,
            saved_at: Utc::now(),
            shortcut: None,
            favorite: false,
        }
    }

    pub fn with_saved_at(mut self, saved_at: DateTime<Utc>) -> Self {
        self.saved_at = saved_at;
        self
    }

    pub fn with_shortcut(mut self, shortcut: Shortcut) -> Self {
        self.shortcut = Some(shortcut);
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    /// Новый снимок окон поверх существующей записи: сочетание и избранное сохраняются
    pub fn replaced_with(&self, windows: Vec<WindowDescriptor>) -> Self {
        Self {
            name: self.name.clone(),
            windows,
            saved_at: Utc::now(),
            shortcut: self.shortcut,
            favorite: self.favorite,
        }
    }
}

impl fmt::Display for LayoutRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} окон", self.name, self.windows.len())?;
        if let Some(shortcut) = &self.shortcut {
            write!(f, ", {}", shortcut)?;
        }
        if self.favorite {
            write!(f, ", ★")?;
        }
        write!(f, ")")
    }
}

/// Что привело к публикации таблицы
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeCause {
    Loaded,
    Upserted(String),
    Deleted(String),
    Renamed { from: String, to: String },
    ShortcutChanged(String),
    FavoriteChanged(String),
    Cleared,
}

/// Полная таблица раскладок после очередного изменения
#[derive(Debug, Clone)]
pub struct LayoutsChanged {
    pub layouts: Arc<Vec<LayoutRecord>>,
    pub cause: ChangeCause,
}

impl LayoutsChanged {
    pub fn new(layouts: Vec<LayoutRecord>, cause: ChangeCause) -> Self {
        Self {
            layouts: Arc::new(layouts),
            cause,
        }
    }
}

impl fmt::Display for LayoutsChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} раскладок", self.cause, self.layouts.len())
    }
}
