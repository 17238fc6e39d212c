use crate::config::Config;
use once_cell::sync::Lazy;
use std::collections::HashSet;

// Системные процессы, окна которых бессмысленно сохранять и восстанавливать
static SYSTEM_OWNERS: Lazy<HashSet<String>> = Lazy::new(|| {
    [
        "Window Server",
        "Dock",
        "Finder",
        "SystemUIServer",
        "loginwindow",
        "Control Centre",
        "Control Center",
        "Notification Centre",
        "Notification Center",
        "System Settings",
        "System Preferences",
        "Menu Bar",
        "Wallpaper",
    ]
    .iter()
    .map(|owner| owner.to_lowercase())
    .collect()
});

/// Окна этого владельца никогда не захватываются и не восстанавливаются
pub fn is_excluded(owner_name: &str, config: &Config) -> bool {
    let owner = owner_name.trim().to_lowercase();
    SYSTEM_OWNERS.contains(&owner) || config.excluded_owners_lower().contains(&owner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_owners_and_self_are_excluded() {
        let config = Config::default();
        for owner in ["Window Server", "Dock", "Finder", "Control Centre", "Notification Center", "Wallpaper", "snap"] {
            assert!(is_excluded(owner, &config), "{} должен быть исключён", owner);
        }
        assert!(is_excluded("DOCK", &config));
        assert!(!is_excluded("Terminal", &config));
    }

    #[test]
    fn test_configured_extra_owners() {
        let mut config = Config::default();
        config.capture.extra_excluded_owners = vec!["Slack".to_string()];
        config.build_optimization_indexes();

        assert!(is_excluded("slack", &config));
        assert!(!is_excluded("Mail", &config));
    }
}
