//! System-window filtering
//!
//! Desktop shells, docks, status bars, IME helpers and window servers are
//! excluded from the per-window pipeline by app-name and title substrings.

/// Apps that never produce meaningful window streams
const SKIP_APPS: &[&str] = &[
    // Linux desktop environments
    "gnome-shell",
    "plasma",
    "xfdesktop",
    "polybar",
    "i3bar",
    "plank",
    "xdg-desktop-portal",
    "ibus-",
    "fcitx",
    // macOS
    "window server",
    "systemuiserver",
    "controlcenter",
    "notificationcenter",
    "loginwindow",
    "spotlight",
    "dock",
    // Windows
    "searchhost",
    "startmenuexperiencehost",
    "shellexperiencehost",
    "textinputhost",
    "program manager",
    "taskbar",
];

/// Window titles that mark system chrome
const SKIP_TITLES: &[&str] = &[
    "desktop",
    "panel",
    "top bar",
    "status bar",
    "dock",
    "dashboard",
    "activities",
    "system tray",
    "notification area",
    "menu bar",
    "control center",
    "mission control",
    "windows input experience",
    "program manager",
];

/// Substring denylist over app names and window titles.
#[derive(Debug, Clone)]
pub struct WindowFilters {
    skip_apps: Vec<String>,
    skip_titles: Vec<String>,
}

impl Default for WindowFilters {
    fn default() -> Self {
        Self {
            skip_apps: SKIP_APPS.iter().map(|s| s.to_string()).collect(),
            skip_titles: SKIP_TITLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WindowFilters {
    pub fn new(skip_apps: Vec<String>, skip_titles: Vec<String>) -> Self {
        Self {
            skip_apps: skip_apps.into_iter().map(|s| s.to_lowercase()).collect(),
            skip_titles: skip_titles.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Whether a window should be excluded from capture.
    pub fn should_skip(&self, app_name: &str, title: &str) -> bool {
        let title_trimmed = title.trim();
        if title_trimmed.is_empty() {
            return true;
        }

        let app_lower = app_name.to_lowercase();
        let title_lower = title_trimmed.to_lowercase();

        self.skip_apps.iter().any(|s| app_lower.contains(s))
            || self.skip_titles.iter().any(|s| title_lower.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_empty_titles() {
        let filters = WindowFilters::default();
        assert!(filters.should_skip("firefox", ""));
        assert!(filters.should_skip("firefox", "   "));
    }

    #[test]
    fn skips_system_apps() {
        let filters = WindowFilters::default();
        assert!(filters.should_skip("gnome-shell", "Activities overview"));
        assert!(filters.should_skip("SearchHost", "Search"));
        assert!(filters.should_skip("Dock", "Dock"));
    }

    #[test]
    fn skips_system_titles() {
        let filters = WindowFilters::default();
        assert!(filters.should_skip("someapp", "Notification Area"));
        assert!(filters.should_skip("explorer", "Program Manager"));
    }

    #[test]
    fn keeps_regular_windows() {
        let filters = WindowFilters::default();
        assert!(!filters.should_skip("firefox", "Rust - The Book"));
        assert!(!filters.should_skip("Code", "main.rs - retrace"));
    }
}
