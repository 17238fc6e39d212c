use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка сериализации: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Недостаточно прав доступа: {0}")]
    PermissionDenied(String),

    #[error("Цель не найдена: {0}")]
    TargetNotFound(String),

    #[error("Раскладка с именем '{0}' уже существует")]
    NameConflict(String),

    #[error("Раскладка '{0}' не найдена")]
    LayoutNotFound(String),

    #[error("Сочетание {shortcut} уже назначено раскладке '{owner}'")]
    ShortcutConflict { shortcut: String, owner: String },

    #[error("Неверное сочетание клавиш: {0}")]
    InvalidShortcut(String),

    #[error("Ошибка Accessibility API: {0}")]
    Accessibility(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl SnapError {
    pub fn layout_not_found<T>(name: impl Into<String>) -> Result<T> {
        Err(SnapError::LayoutNotFound(name.into()))
    }

    /// Ошибки, после которых следующий вызов может пройти успешно
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnapError::TargetNotFound(_)
                | SnapError::Accessibility(_)
                | SnapError::ServiceUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! snap_error {
    (permission, $($arg:tt)*) => {
        $crate::error::SnapError::PermissionDenied(format!($($arg)*))
    };
    (target_not_found, $($arg:tt)*) => {
        $crate::error::SnapError::TargetNotFound(format!($($arg)*))
    };
    (invalid_shortcut, $($arg:tt)*) => {
        $crate::error::SnapError::InvalidShortcut(format!($($arg)*))
    };
    (accessibility, $($arg:tt)*) => {
        $crate::error::SnapError::Accessibility(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::SnapError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::SnapError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_macro_builds_variants() {
        let err = snap_error!(accessibility, "окно {} недоступно", 42);
        assert!(matches!(err, SnapError::Accessibility(ref m) if m == "окно 42 недоступно"));
        assert!(err.is_recoverable());

        let err = snap_error!(permission, "нет доверия");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_shortcut_conflict_message() {
        let err = SnapError::ShortcutConflict {
            shortcut: "⌘⇧1".to_string(),
            owner: "Work".to_string(),
        };
        assert!(err.to_string().contains("⌘⇧1"));
        assert!(err.to_string().contains("Work"));
    }
}
