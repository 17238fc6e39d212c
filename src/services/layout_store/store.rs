use super::backend::KeyValueStore;
use super::codec::{decode_table, encode_table};
use crate::error::{Result, SnapError};
use crate::events::{ChangeCause, LayoutRecord, LayoutsChanged, Shortcut};
use crate::debug_if_enabled;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

const EVENTS_CAPACITY: usize = 16;

type Table = BTreeMap<String, LayoutRecord>;

/// Таблица раскладок в памяти, зеркалируемая в key-value хранилище при каждой мутации.
///
/// Мутация сначала записывается в хранилище и только потом подменяет кэш,
/// поэтому неудачная запись не меняет видимого состояния. После каждой успешной
/// мутации подписчики получают полную таблицу.
pub struct LayoutStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
    table: RwLock<Arc<Table>>,
    events: broadcast::Sender<LayoutsChanged>,
}

impl LayoutStore {
    /// Загрузить таблицу; нечитаемое хранилище даёт пустую таблицу
    pub fn open(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let table = match backend.get(&key) {
            Ok(Some(value)) => decode_table(value),
            Ok(None) => Table::new(),
            Err(e) => {
                warn!("Не удалось прочитать раскладки ('{}'): {}", key, e);
                Table::new()
            }
        };
        info!("Загружено раскладок: {}", table.len());

        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            backend,
            key,
            table: RwLock::new(Arc::new(table)),
            events,
        }
    }

    /// Все записи; порядок не гарантируется, для меню есть `menu_order`
    pub fn list(&self) -> Vec<LayoutRecord> {
        self.table.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<LayoutRecord> {
        self.table.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LayoutsChanged> {
        self.events.subscribe()
    }

    /// Текущая таблица как событие, для первичной синхронизации подписчиков
    pub fn snapshot(&self) -> LayoutsChanged {
        LayoutsChanged::new(self.list(), ChangeCause::Loaded)
    }

    /// Создать или заменить запись по имени
    pub fn upsert(&self, record: LayoutRecord) -> Result<()> {
        if let Some(shortcut) = record.shortcut {
            shortcut.validate()?;
        }

        self.mutate(ChangeCause::Upserted(record.name.clone()), |table| {
            if let Some(shortcut) = record.shortcut {
                ensure_shortcut_free(table, &shortcut, &record.name)?;
            }
            table.insert(record.name.clone(), record);
            Ok(true)
        })?;
        Ok(())
    }

    /// Удалить запись; отсутствие записи не ошибка
    pub fn delete(&self, name: &str) -> Result<bool> {
        self.mutate(ChangeCause::Deleted(name.to_string()), |table| {
            Ok(table.remove(name).is_some())
        })
    }

    /// Переименовать запись со всеми её полями.
    /// При конфликте имён или отсутствии исходной записи состояние не меняется.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to = to.trim();
        if to.is_empty() {
            return Err(SnapError::NameConflict(String::new()));
        }
        if from == to {
            return if self.contains(from) {
                Ok(())
            } else {
                SnapError::layout_not_found(from)
            };
        }

        let cause = ChangeCause::Renamed {
            from: from.to_string(),
            to: to.to_string(),
        };
        self.mutate(cause, |table| {
            if table.contains_key(to) {
                return Err(SnapError::NameConflict(to.to_string()));
            }
            let Some(mut record) = table.remove(from) else {
                return SnapError::layout_not_found(from);
            };
            record.name = to.to_string();
            table.insert(to.to_string(), record);
            Ok(true)
        })?;
        Ok(())
    }

    /// Назначить или снять сочетание; для отсутствующей записи ничего не делает
    pub fn set_shortcut(&self, name: &str, shortcut: Option<Shortcut>) -> Result<bool> {
        if let Some(shortcut) = shortcut {
            shortcut.validate()?;
        }

        self.mutate(ChangeCause::ShortcutChanged(name.to_string()), |table| {
            if !table.contains_key(name) {
                return Ok(false);
            }
            if let Some(shortcut) = shortcut {
                ensure_shortcut_free(table, &shortcut, name)?;
            }
            let Some(record) = table.get_mut(name) else {
                return Ok(false);
            };
            if record.shortcut == shortcut {
                return Ok(false);
            }
            record.shortcut = shortcut;
            Ok(true)
        })
    }

    pub fn set_favorite(&self, name: &str, favorite: bool) -> Result<bool> {
        self.mutate(ChangeCause::FavoriteChanged(name.to_string()), |table| {
            match table.get_mut(name) {
                Some(record) if record.favorite != favorite => {
                    record.favorite = favorite;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    /// Переключить избранное; возвращает новое значение или None, если записи нет
    pub fn toggle_favorite(&self, name: &str) -> Result<Option<bool>> {
        let Some(current) = self.get(name).map(|r| r.favorite) else {
            return Ok(None);
        };
        self.set_favorite(name, !current)?;
        Ok(Some(!current))
    }

    pub fn clear_all(&self) -> Result<()> {
        self.mutate(ChangeCause::Cleared, |table| {
            table.clear();
            Ok(true)
        })?;
        Ok(())
    }

    /// Порядок меню: сначала избранные, внутри групп от старых к новым
    pub fn menu_order(&self) -> Vec<LayoutRecord> {
        let mut records = self.list();
        records.sort_by(|a, b| {
            b.favorite
                .cmp(&a.favorite)
                .then(a.saved_at.cmp(&b.saved_at))
                .then_with(|| a.name.cmp(&b.name))
        });
        records
    }

    /// Только избранные, самые свежие первыми
    pub fn favorites(&self) -> Vec<LayoutRecord> {
        let mut records: Vec<_> = self.list().into_iter().filter(|r| r.favorite).collect();
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at).then_with(|| a.name.cmp(&b.name)));
        records
    }

    pub fn find_by_shortcut(&self, shortcut: &Shortcut) -> Option<LayoutRecord> {
        self.table
            .read()
            .values()
            .find(|r| r.shortcut.as_ref() == Some(shortcut))
            .cloned()
    }

    /// Имя по умолчанию `Layout N`, где N = число записей + 1.
    /// Занятое имя пропускается, чтобы сохранение не перезаписало чужую раскладку.
    pub fn next_default_name(&self) -> String {
        let table = self.table.read();
        let mut n = table.len() + 1;
        loop {
            let candidate = format!("Layout {}", n);
            if !table.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Применить изменение к копии таблицы, записать её и только затем опубликовать.
    /// `apply` возвращает false, если менять нечего.
    fn mutate<F>(&self, cause: ChangeCause, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut Table) -> Result<bool>,
    {
        let mut guard = self.table.write();
        let mut next = Table::clone(&guard);
        if !apply(&mut next)? {
            return Ok(false);
        }

        let encoded = encode_table(&next)?;
        if next.is_empty() {
            self.backend.remove(&self.key)?;
        } else {
            self.backend.set(&self.key, encoded)?;
        }

        *guard = Arc::new(next);
        let layouts: Vec<LayoutRecord> = guard.values().cloned().collect();
        drop(guard);

        debug_if_enabled!("Таблица раскладок изменена: {:?}", cause);
        // Ошибка отправки означает лишь отсутствие подписчиков
        let _ = self.events.send(LayoutsChanged::new(layouts, cause));
        Ok(true)
    }
}

fn ensure_shortcut_free(table: &Table, shortcut: &Shortcut, owner: &str) -> Result<()> {
    match table
        .values()
        .find(|r| r.name != owner && r.shortcut.as_ref() == Some(shortcut))
    {
        Some(existing) => Err(SnapError::ShortcutConflict {
            shortcut: shortcut.display_string(),
            owner: existing.name.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyCode, Modifiers, WindowBounds, WindowDescriptor};
    use crate::services::layout_store::{JsonFileStore, MemoryStore};
    use chrono::{Duration, Utc};

    fn memory_store() -> (Arc<MemoryStore>, LayoutStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = LayoutStore::open(backend.clone(), "layouts");
        (backend, store)
    }

    fn record(name: &str) -> LayoutRecord {
        LayoutRecord::new(
            name,
            vec![WindowDescriptor::new("Editor", "main.rs", WindowBounds::new(0.0, 25.0, 800.0, 600.0))],
        )
    }

    fn cmd(key: u16) -> Shortcut {
        Shortcut::new(KeyCode::new(key), Modifiers::new().with_command(true))
    }

    #[test]
    fn test_upsert_get_delete() {
        let (_, store) = memory_store();
        store.upsert(record("Work")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Work").unwrap().windows.len(), 1);
        assert!(store.get("Home").is_none());

        assert!(store.delete("Work").unwrap());
        assert!(!store.delete("Work").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_table_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layouts.json");

        let store = LayoutStore::open(Arc::new(JsonFileStore::new(&path)), "layouts");
        store.upsert(record("Work").with_shortcut(cmd(18)).with_favorite(true)).unwrap();
        store.upsert(record("Home")).unwrap();

        let reopened = LayoutStore::open(Arc::new(JsonFileStore::new(&path)), "layouts");
        assert_eq!(reopened.list(), store.list());
    }

    #[test]
    fn test_failed_write_leaves_cache_untouched() {
        let (backend, store) = memory_store();
        store.upsert(record("Work")).unwrap();
        let mut rx = store.subscribe();

        backend.set_fail_writes(true);
        assert!(store.upsert(record("Home")).is_err());
        assert!(store.delete("Work").is_err());

        assert_eq!(store.len(), 1);
        assert!(store.contains("Work"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rename_onto_existing_name_changes_nothing() {
        let (_, store) = memory_store();
        store.upsert(record("A").with_shortcut(cmd(0))).unwrap();
        store.upsert(record("B")).unwrap();
        let before = store.list();

        let err = store.rename("A", "B").unwrap_err();
        assert!(matches!(err, SnapError::NameConflict(ref n) if n == "B"));
        assert_eq!(store.list(), before);

        let err = store.rename("Missing", "C").unwrap_err();
        assert!(matches!(err, SnapError::LayoutNotFound(_)));
        assert_eq!(store.list(), before);
    }

    #[test]
    fn test_rename_preserves_fields() {
        let (_, store) = memory_store();
        let original = record("A").with_shortcut(cmd(0)).with_favorite(true);
        store.upsert(original.clone()).unwrap();

        store.rename("A", "Renamed").unwrap();

        assert!(store.get("A").is_none());
        let renamed = store.get("Renamed").unwrap();
        assert_eq!(renamed.windows, original.windows);
        assert_eq!(renamed.saved_at, original.saved_at);
        assert_eq!(renamed.shortcut, original.shortcut);
        assert!(renamed.favorite);
    }

    #[test]
    fn test_shortcuts_are_unique() {
        let (_, store) = memory_store();
        store.upsert(record("A").with_shortcut(cmd(18))).unwrap();
        store.upsert(record("B")).unwrap();

        let err = store.set_shortcut("B", Some(cmd(18))).unwrap_err();
        assert!(matches!(err, SnapError::ShortcutConflict { ref owner, .. } if owner == "A"));
        assert!(store.upsert(record("C").with_shortcut(cmd(18))).is_err());

        // Повторное назначение той же записи разрешено
        assert!(!store.set_shortcut("A", Some(cmd(18))).unwrap());
        assert!(store.set_shortcut("B", Some(cmd(19))).unwrap());

        let shortcuts: Vec<_> = store.list().into_iter().filter_map(|r| r.shortcut).collect();
        assert_eq!(shortcuts.len(), 2);
        assert_ne!(shortcuts[0], shortcuts[1]);
    }

    #[test]
    fn test_shortcut_requires_modifier() {
        let (_, store) = memory_store();
        store.upsert(record("A")).unwrap();
        let bare = Shortcut::new(KeyCode::new(18), Modifiers::new());
        assert!(matches!(
            store.set_shortcut("A", Some(bare)).unwrap_err(),
            SnapError::InvalidShortcut(_)
        ));
    }

    #[test]
    fn test_set_shortcut_on_missing_record_is_noop() {
        let (_, store) = memory_store();
        let mut rx = store.subscribe();
        assert!(!store.set_shortcut("Missing", Some(cmd(18))).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_find_by_shortcut_and_clear() {
        let (_, store) = memory_store();
        store.upsert(record("A").with_shortcut(cmd(18))).unwrap();

        assert_eq!(store.find_by_shortcut(&cmd(18)).unwrap().name, "A");
        store.set_shortcut("A", None).unwrap();
        assert!(store.find_by_shortcut(&cmd(18)).is_none());
    }

    #[test]
    fn test_menu_and_favorites_ordering() {
        let (_, store) = memory_store();
        let now = Utc::now();
        store.upsert(record("Old").with_saved_at(now - Duration::hours(3))).unwrap();
        store.upsert(record("FavOld").with_saved_at(now - Duration::hours(2)).with_favorite(true)).unwrap();
        store.upsert(record("FavNew").with_saved_at(now - Duration::hours(1)).with_favorite(true)).unwrap();
        store.upsert(record("New").with_saved_at(now)).unwrap();

        let menu: Vec<_> = store.menu_order().into_iter().map(|r| r.name).collect();
        assert_eq!(menu, ["FavOld", "FavNew", "Old", "New"]);

        let favorites: Vec<_> = store.favorites().into_iter().map(|r| r.name).collect();
        assert_eq!(favorites, ["FavNew", "FavOld"]);
    }

    #[test]
    fn test_toggle_favorite() {
        let (_, store) = memory_store();
        store.upsert(record("A")).unwrap();

        assert_eq!(store.toggle_favorite("A").unwrap(), Some(true));
        assert!(store.get("A").unwrap().favorite);
        assert_eq!(store.toggle_favorite("A").unwrap(), Some(false));
        assert_eq!(store.toggle_favorite("Missing").unwrap(), None);
    }

    #[test]
    fn test_default_name_skips_taken_names() {
        let (_, store) = memory_store();
        assert_eq!(store.next_default_name(), "Layout 1");

        store.upsert(record("Layout 2")).unwrap();
        assert_eq!(store.next_default_name(), "Layout 3");

        store.upsert(record("Layout 3")).unwrap();
        assert_eq!(store.next_default_name(), "Layout 4");
    }

    #[test]
    fn test_every_mutation_broadcasts_full_table() {
        let (_, store) = memory_store();
        let mut rx = store.subscribe();

        store.upsert(record("A")).unwrap();
        store.upsert(record("B")).unwrap();
        store.rename("B", "C").unwrap();
        store.clear_all().unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.cause, ChangeCause::Upserted("A".to_string()));
        assert_eq!(first.layouts.len(), 1);

        let second = rx.try_recv().unwrap();
        assert_eq!(second.layouts.len(), 2);

        let third = rx.try_recv().unwrap();
        assert!(matches!(third.cause, ChangeCause::Renamed { .. }));
        let names: Vec<_> = third.layouts.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["A", "C"]);

        let fourth = rx.try_recv().unwrap();
        assert_eq!(fourth.cause, ChangeCause::Cleared);
        assert!(fourth.layouts.is_empty());
    }

    #[test]
    fn test_corrupt_backend_opens_empty() {
        let backend = Arc::new(MemoryStore::with_value("layouts", serde_json::json!([1, 2, 3])));
        let store = LayoutStore::open(backend, "layouts");
        assert!(store.is_empty());
    }

    #[test]
    fn test_legacy_duplicate_shortcuts_are_released_on_open() {
        let backend = Arc::new(MemoryStore::with_value(
            "layouts",
            serde_json::json!({
                "A": {"data": [], "date": "2024-01-01T00:00:00Z", "shortcut": {"keyCode": 18, "modifiers": 1 << 20}},
                "B": {"data": [], "date": "2024-02-01T00:00:00Z", "shortcut": "⌘1"}
            }),
        ));
        let store = LayoutStore::open(backend, "layouts");

        let owners: Vec<_> = store.list().into_iter().filter(|r| r.shortcut.is_some()).collect();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, "A");

        // Обе записи снова можно перезаписать
        for name in ["A", "B"] {
            let current = store.get(name).unwrap();
            store.upsert(current.replaced_with(record(name).windows)).unwrap();
        }
        assert_eq!(store.find_by_shortcut(&cmd(18)).unwrap().name, "A");
    }
}
