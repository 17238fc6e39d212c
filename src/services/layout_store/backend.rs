use crate::error::{Result, SnapError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Простое долговременное key-value хранилище: одно сериализованное значение на ключ
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Хранилище в JSON-файле; каждая запись переписывает файл атомарно (tmp + rename)
pub struct JsonFileStore {
    path: PathBuf,
    // Сериализует read-modify-write внутри процесса
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            other => Err(SnapError::Internal(format!(
                "ожидался JSON-объект в {:?}, получено: {}",
                self.path,
                type_name(&other)
            ))),
        }
    }

    // Повреждённый файл не должен блокировать новые записи
    fn read_map_for_write(&self) -> Map<String, Value> {
        match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                warn!("Хранилище {:?} повреждено и будет перезаписано: {}", self.path, e);
                Map::new()
            }
        }
    }

    fn write_map_atomically(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, map)?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        fs::rename(&tmp, &self.path)?;
        debug!("Хранилище записано в {:?}", self.path);
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map_for_write();
        map.insert(key.to_string(), value);
        self.write_map_atomically(&map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map_for_write();
        if map.remove(key).is_some() {
            self.write_map_atomically(&map)?;
        }
        Ok(())
    }
}

/// Хранилище в памяти для dry-run режима и тестов
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: Value) -> Self {
        let store = Self::new();
        store.values.lock().insert(key.to_string(), value);
        store
    }

    /// Все последующие записи будут завершаться ошибкой
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SnapError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "запись в хранилище отключена",
            )));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_writable()?;
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.values.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("layouts.json"));

        assert!(store.get("layouts").unwrap().is_none());
        store.set("layouts", json!({"Work": {"favorite": true}})).unwrap();
        store.set("other", json!(1)).unwrap();

        let reopened = JsonFileStore::new(store.path().to_path_buf());
        assert_eq!(reopened.get("layouts").unwrap(), Some(json!({"Work": {"favorite": true}})));
        assert_eq!(reopened.get("other").unwrap(), Some(json!(1)));

        reopened.remove("other").unwrap();
        assert!(store.get("other").unwrap().is_none());
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_reported_on_read_and_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layouts.json");
        fs::write(&path, b"{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.get("layouts").is_err());

        store.set("layouts", json!({})).unwrap();
        assert_eq!(store.get("layouts").unwrap(), Some(json!({})));
    }

    #[test]
    fn test_memory_store_write_failures() {
        let store = MemoryStore::with_value("k", json!("v"));
        store.set_fail_writes(true);
        assert!(store.set("k", json!("w")).is_err());
        assert_eq!(store.get("k").unwrap(), Some(json!("v")));
    }
}
