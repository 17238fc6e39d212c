use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub restore: RestoreConfig,
    // Оптимизационный индекс - не сериализуется, строится после загрузки
    #[serde(skip)]
    excluded_lower: HashSet<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// Полные директивы EnvFilter; если пусто, используется `level` для крейта snap
    pub filter: String,
}

impl LoggingConfig {
    /// Директивы фильтра: `--log-level`, затем `filter`, затем `level`
    pub fn directives(&self, level_override: Option<&str>) -> String {
        match level_override {
            Some(level) => level.to_string(),
            None if !self.filter.trim().is_empty() => self.filter.clone(),
            None => format!("snap={}", self.level),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// JSON-файл, в котором живёт key-value хранилище
    pub path: PathBuf,
    /// Ключ, под которым лежит вся таблица раскладок
    pub key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Сколько ждать после запроса доступа к записи экрана
    pub permission_grace_ms: u64,
    /// Имя собственного процесса, его окна никогда не сохраняются
    pub self_name: String,
    #[serde(default)]
    pub extra_excluded_owners: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestoreConfig {
    pub launch_timeout_ms: u64,
    pub launch_poll_initial_ms: u64,
    pub launch_poll_max_ms: u64,
    /// Пауза между дескрипторами, чтобы оконный сервер успел применить изменения
    pub settle_delay_ms: u64,
    /// Допуск (в точках), в пределах которого окно считается уже на месте
    pub position_tolerance: f64,
}

impl RestoreConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn launch_poll_initial(&self) -> Duration {
        Duration::from_millis(self.launch_poll_initial_ms)
    }

    pub fn launch_poll_max(&self) -> Duration {
        Duration::from_millis(self.launch_poll_max_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl CaptureConfig {
    pub fn permission_grace(&self) -> Duration {
        Duration::from_millis(self.permission_grace_ms)
    }
}

fn default_storage_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snap")
        .join("layouts.json")
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
                filter: String::new(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                key: "layouts".to_string(),
            },
            capture: CaptureConfig {
                permission_grace_ms: 2000,
                self_name: "snap".to_string(),
                extra_excluded_owners: Vec::new(),
            },
            restore: RestoreConfig {
                launch_timeout_ms: 5000,
                launch_poll_initial_ms: 100,
                launch_poll_max_ms: 1000,
                settle_delay_ms: 50,
                position_tolerance: 2.0,
            },
            excluded_lower: HashSet::new(),
        };
        config.build_optimization_indexes();
        config
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SNAP_").split("__"));

        let mut config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;
        config.build_optimization_indexes();

        Ok(config)
    }

    /// Строит индекс дополнительных исключений для быстрого поиска
    pub fn build_optimization_indexes(&mut self) {
        self.excluded_lower = self
            .capture
            .extra_excluded_owners
            .iter()
            .chain(std::iter::once(&self.capture.self_name))
            .map(|owner| owner.to_lowercase())
            .collect();
    }

    /// Владельцы, исключённые конфигурацией (включая собственный процесс), в нижнем регистре
    pub fn excluded_owners_lower(&self) -> &HashSet<String> {
        &self.excluded_lower
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        if self.storage.key.trim().is_empty() {
            anyhow::bail!("storage.key не может быть пустым");
        }

        if self.capture.self_name.trim().is_empty() {
            anyhow::bail!("capture.self_name не может быть пустым");
        }

        // Валидация настроек восстановления
        if self.restore.launch_timeout_ms == 0 {
            anyhow::bail!("launch_timeout_ms должно быть больше 0");
        }

        if self.restore.launch_poll_initial_ms == 0 {
            anyhow::bail!("launch_poll_initial_ms должно быть больше 0");
        }

        if self.restore.launch_poll_max_ms < self.restore.launch_poll_initial_ms {
            anyhow::bail!("launch_poll_max_ms не может быть меньше launch_poll_initial_ms");
        }

        if !self.restore.position_tolerance.is_finite() || self.restore.position_tolerance < 0.0 {
            anyhow::bail!(
                "Неверный position_tolerance: {}",
                self.restore.position_tolerance
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.excluded_owners_lower().contains("snap"));
    }

    #[test]
    fn test_load_merges_toml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[restore]
launch_timeout_ms = 8000

[capture]
extra_excluded_owners = ["Bartender 5"]
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.restore.launch_timeout_ms, 8000);
        // Остальные поля секции берутся из значений по умолчанию
        assert_eq!(config.restore.settle_delay_ms, 50);
        assert_eq!(config.storage.key, "layouts");
        assert!(config.excluded_owners_lower().contains("bartender 5"));
        assert!(config.excluded_owners_lower().contains("snap"));
    }

    #[test]
    fn test_logging_level_applies_without_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.directives(None), "snap=debug");
        assert_eq!(config.logging.directives(Some("trace")), "trace");

        let mut logging = config.logging.clone();
        logging.filter = "snap=warn,tokio=info".to_string();
        assert_eq!(logging.directives(None), "snap=warn,tokio=info");

        assert_eq!(Config::default().logging.directives(None), "snap=info");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.restore.launch_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.restore.launch_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.restore.position_tolerance = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.restore.launch_poll_max_ms = 10;
        assert!(config.validate().is_err());
    }
}
