use crate::events::{LayoutRecord, LayoutsChanged, Shortcut};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Сочетание клавиш → имя раскладки, перестраивается по каждой рассылке хранилища
#[derive(Default)]
pub struct ShortcutRegistry {
    bindings: DashMap<Shortcut, String>,
}

impl ShortcutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layouts(layouts: &[LayoutRecord]) -> Self {
        let registry = Self::new();
        registry.rebuild(layouts);
        registry
    }

    /// Привести таблицу в соответствие с полным списком раскладок
    pub fn rebuild(&self, layouts: &[LayoutRecord]) {
        let mut seen = HashSet::new();
        for record in layouts {
            let Some(shortcut) = record.shortcut else {
                continue;
            };
            if !seen.insert(shortcut) {
                warn!(
                    "Сочетание {} повторно назначено раскладке '{}', игнорируется",
                    shortcut, record.name
                );
                continue;
            }
            self.bindings.insert(shortcut, record.name.clone());
        }
        self.bindings.retain(|shortcut, _| seen.contains(shortcut));
        debug!("Зарегистрировано сочетаний: {}", self.bindings.len());
    }

    pub fn apply(&self, event: &LayoutsChanged) {
        self.rebuild(&event.layouts);
    }

    pub fn resolve(&self, shortcut: &Shortcut) -> Option<String> {
        self.bindings.get(shortcut).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Все привязки, отсортированные по имени раскладки
    pub fn bindings(&self) -> Vec<(Shortcut, String)> {
        let mut bindings: Vec<_> = self
            .bindings
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        bindings.sort_by(|a, b| a.1.cmp(&b.1));
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeCause, KeyCode, Modifiers};

    fn shortcut(key: u16) -> Shortcut {
        Shortcut::new(KeyCode::new(key), Modifiers::new().with_command(true).with_option(true))
    }

    #[test]
    fn test_rebuild_tracks_table() {
        let registry = ShortcutRegistry::from_layouts(&[
            LayoutRecord::new("A", vec![]).with_shortcut(shortcut(0)),
            LayoutRecord::new("B", vec![]),
        ]);
        assert_eq!(registry.resolve(&shortcut(0)).as_deref(), Some("A"));
        assert_eq!(registry.len(), 1);

        registry.apply(&LayoutsChanged::new(
            vec![LayoutRecord::new("B", vec![]).with_shortcut(shortcut(1))],
            ChangeCause::ShortcutChanged("B".to_string()),
        ));

        assert!(registry.resolve(&shortcut(0)).is_none());
        assert_eq!(registry.resolve(&shortcut(1)).as_deref(), Some("B"));
        assert_eq!(registry.bindings(), vec![(shortcut(1), "B".to_string())]);
    }

    #[test]
    fn test_parsed_and_recorded_shortcuts_resolve_alike() {
        let registry = ShortcutRegistry::from_layouts(&[LayoutRecord::new("A", vec![]).with_shortcut(shortcut(0))]);
        let parsed: Shortcut = "⌘⌥A".parse().unwrap();
        assert_eq!(registry.resolve(&parsed).as_deref(), Some("A"));
    }

    #[test]
    fn test_duplicate_shortcut_keeps_first_owner() {
        let registry = ShortcutRegistry::from_layouts(&[
            LayoutRecord::new("A", vec![]).with_shortcut(shortcut(0)),
            LayoutRecord::new("B", vec![]).with_shortcut(shortcut(0)),
        ]);
        assert_eq!(registry.resolve(&shortcut(0)).as_deref(), Some("A"));
        assert_eq!(registry.len(), 1);
    }
}
