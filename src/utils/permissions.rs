use crate::services::window_system::Platform;
use std::fmt;
use tracing::{info, warn};

/// Состояние системных разрешений, от которых зависят захват и восстановление
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionReport {
    pub accessibility: bool,
    pub screen_capture: bool,
}

impl PermissionReport {
    pub fn all_granted(&self) -> bool {
        self.accessibility && self.screen_capture
    }
}

impl fmt::Display for PermissionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |granted: bool| if granted { "есть" } else { "нет" };
        write!(
            f,
            "Accessibility: {}, запись экрана: {}",
            mark(self.accessibility),
            mark(self.screen_capture)
        )
    }
}

/// Проверить разрешения без системных запросов; отсутствие прав только логируется
pub async fn check_permissions(platform: &Platform) -> PermissionReport {
    info!("Проверка прав доступа...");

    let report = PermissionReport {
        accessibility: platform.accessibility.is_trusted(false).await,
        screen_capture: platform.windows.has_screen_capture_access().await,
    };

    if !report.accessibility {
        warn!("⚠️  Нет доверия Accessibility API: восстановление раскладок невозможно");
        warn!("   Системные настройки → Конфиденциальность и безопасность → Универсальный доступ");
    }
    if !report.screen_capture {
        warn!("⚠️  Нет доступа к записи экрана: заголовки окон скрыты, захват будет неполным");
        warn!("   Системные настройки → Конфиденциальность и безопасность → Запись экрана");
    }
    if report.all_granted() {
        info!("Проверка прав доступа завершена успешно");
    }

    report
}
