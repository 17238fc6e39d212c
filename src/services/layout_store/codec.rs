//! Формат хранения таблицы раскладок.
//!
//! Пишется один канонический формат; при чтении принимаются исторические варианты:
//! окна либо JSON-массивом, либо base64-строкой с JSON внутри; дата либо RFC 3339,
//! либо числом секунд unix; сочетание либо парой `{keyCode, modifiers}` с сырой
//! маской флагов, либо строкой глифов вида `⌘⇧K`.

use crate::snap_error;
use crate::error::Result;
use crate::events::{LayoutRecord, Shortcut, WindowBounds, WindowDescriptor};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBounds {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "Width")]
    width: f64,
    #[serde(rename = "Height")]
    height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDescriptor {
    owner: String,
    #[serde(default)]
    name: String,
    bounds: StoredBounds,
    #[serde(default)]
    id: u32,
    #[serde(default, rename = "bundleId", skip_serializing_if = "Option::is_none")]
    bundle_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredPayload {
    Structured(Vec<Value>),
    Encoded(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredShortcut {
    Structured {
        #[serde(rename = "keyCode")]
        key_code: u16,
        modifiers: u64,
    },
    Symbolic(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredDate {
    Rfc3339(DateTime<Utc>),
    UnixSeconds(f64),
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    data: StoredPayload,
    #[serde(default)]
    date: Option<StoredDate>,
    #[serde(default)]
    shortcut: Option<StoredShortcut>,
    #[serde(default)]
    favorite: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CanonicalRecord {
    data: Vec<StoredDescriptor>,
    date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shortcut: Option<StoredShortcut>,
    favorite: bool,
}

impl From<&WindowDescriptor> for StoredDescriptor {
    fn from(d: &WindowDescriptor) -> Self {
        Self {
            owner: d.owner_name.clone(),
            name: d.window_title.clone(),
            bounds: StoredBounds {
                x: d.bounds.x,
                y: d.bounds.y,
                width: d.bounds.width,
                height: d.bounds.height,
            },
            id: d.capture_window_id,
            bundle_id: d.bundle_identifier.clone(),
        }
    }
}

impl From<StoredDescriptor> for WindowDescriptor {
    fn from(d: StoredDescriptor) -> Self {
        Self {
            owner_name: d.owner,
            bundle_identifier: d.bundle_id.filter(|b| !b.is_empty()),
            window_title: d.name,
            bounds: WindowBounds::new(d.bounds.x, d.bounds.y, d.bounds.width, d.bounds.height),
            capture_window_id: d.id,
        }
    }
}

/// Раскодировать список окон; битые элементы пропускаются
fn decode_descriptors(name: &str, payload: StoredPayload) -> Result<Vec<WindowDescriptor>> {
    let values = match payload {
        StoredPayload::Structured(values) => values,
        StoredPayload::Encoded(encoded) => {
            let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
                snap_error!(internal, "раскладка '{}': некорректный base64: {}", name, e)
            })?;
            serde_json::from_slice::<Vec<Value>>(&bytes)?
        }
    };

    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value::<StoredDescriptor>(value) {
            Ok(stored) => Some(stored.into()),
            Err(e) => {
                warn!("Раскладка '{}': окно #{} пропущено: {}", name, i + 1, e);
                None
            }
        })
        .collect())
}

fn decode_date(date: Option<StoredDate>) -> DateTime<Utc> {
    match date {
        Some(StoredDate::Rfc3339(date)) => date,
        Some(StoredDate::UnixSeconds(secs)) => {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9) as u32;
            DateTime::from_timestamp(whole as i64, nanos).unwrap_or_default()
        }
        None => DateTime::<Utc>::default(),
    }
}

fn decode_shortcut(name: &str, shortcut: Option<StoredShortcut>) -> Option<Shortcut> {
    match shortcut? {
        StoredShortcut::Structured { key_code, modifiers } => {
            Some(Shortcut::from_event(key_code, modifiers))
        }
        StoredShortcut::Symbolic(text) if text.trim().is_empty() => None,
        StoredShortcut::Symbolic(text) => match text.parse::<Shortcut>() {
            Ok(shortcut) => Some(shortcut),
            Err(e) => {
                warn!("Раскладка '{}': сочетание '{}' не распознано: {}", name, text, e);
                None
            }
        },
    }
}

/// Раскодировать одну запись таблицы
pub fn decode_record(name: &str, value: Value) -> Result<LayoutRecord> {
    let stored: StoredRecord = serde_json::from_value(value)?;
    Ok(LayoutRecord {
        name: name.to_string(),
        windows: decode_descriptors(name, stored.data)?,
        saved_at: decode_date(stored.date),
        shortcut: decode_shortcut(name, stored.shortcut),
        favorite: stored.favorite.unwrap_or(false),
    })
}

/// Раскодировать всю таблицу; нечитаемые записи считаются отсутствующими
pub fn decode_table(value: Value) -> BTreeMap<String, LayoutRecord> {
    let Value::Object(entries) = value else {
        warn!("Таблица раскладок имеет неверный формат и будет проигнорирована");
        return BTreeMap::new();
    };

    let mut table = entries
        .into_iter()
        .filter_map(|(name, value)| match decode_record(&name, value) {
            Ok(record) => Some((name, record)),
            Err(e) => {
                warn!("Раскладка '{}' повреждена и пропущена: {}", name, e);
                None
            }
        })
        .collect();
    release_duplicate_shortcuts(&mut table);
    table
}

// Старые версии могли назначить одно сочетание нескольким раскладкам.
// Сочетание остаётся у самой старой записи, при равных датах у первой по имени.
fn release_duplicate_shortcuts(table: &mut BTreeMap<String, LayoutRecord>) {
    let mut by_age: Vec<&mut LayoutRecord> = table.values_mut().filter(|r| r.shortcut.is_some()).collect();
    by_age.sort_by(|a, b| a.saved_at.cmp(&b.saved_at).then_with(|| a.name.cmp(&b.name)));

    let mut owners: HashMap<Shortcut, String> = HashMap::new();
    for record in by_age {
        let Some(shortcut) = record.shortcut else {
            continue;
        };
        match owners.get(&shortcut) {
            Some(owner) => {
                warn!(
                    "Сочетание {} уже назначено раскладке '{}', снято с '{}'",
                    shortcut, owner, record.name
                );
                record.shortcut = None;
            }
            None => {
                owners.insert(shortcut, record.name.clone());
            }
        }
    }
}

fn encode_record(record: &LayoutRecord) -> Result<Value> {
    let canonical = CanonicalRecord {
        data: record.windows.iter().map(StoredDescriptor::from).collect(),
        date: record.saved_at,
        shortcut: record.shortcut.map(|s| StoredShortcut::Structured {
            key_code: s.key.value(),
            modifiers: s.modifiers.to_flags(),
        }),
        favorite: record.favorite,
    };
    Ok(serde_json::to_value(canonical)?)
}

/// Закодировать таблицу в канонический формат
pub fn encode_table(table: &BTreeMap<String, LayoutRecord>) -> Result<Value> {
    let mut map = Map::new();
    for (name, record) in table {
        map.insert(name.clone(), encode_record(record)?);
    }
    Ok(Value::Object(map))
}
