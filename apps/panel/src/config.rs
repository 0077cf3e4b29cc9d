use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use client_core::{PanelOptions, ViewSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub origin: String,
    pub session_dir: PathBuf,
    pub session_id: String,
    pub log_filter: String,
    pub dashboard_poll_secs: u64,
    pub instances_refresh_secs: u64,
    pub dispatch_fallback_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8000".into(),
            session_dir: default_session_dir(),
            session_id: "default".into(),
            log_filter: "info".into(),
            dashboard_poll_secs: 3,
            instances_refresh_secs: 5,
            dispatch_fallback_ms: 3000,
        }
    }
}

impl Settings {
    pub fn panel_options(&self) -> PanelOptions {
        PanelOptions {
            views: ViewSettings {
                dashboard_poll: Duration::from_secs(self.dashboard_poll_secs.max(1)),
                instances_refresh_secs: self.instances_refresh_secs.max(1),
                ..ViewSettings::default()
            },
            reconcile_fallback: Duration::from_millis(self.dispatch_fallback_ms),
            ..PanelOptions::default()
        }
    }
}

fn default_session_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleet-panel")
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new("panel.toml"), |key| std::env::var(key).ok())
}

/// `panel.toml` first, then environment overrides. Unparseable numbers
/// keep the previous value.
pub fn load_settings_from(file: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("origin") {
                settings.origin = v.clone();
            }
            if let Some(v) = file_cfg.get("session_dir") {
                settings.session_dir = PathBuf::from(v);
            }
            if let Some(v) = file_cfg.get("session_id") {
                settings.session_id = v.clone();
            }
            if let Some(v) = file_cfg.get("log_filter") {
                settings.log_filter = v.clone();
            }
            set_number(&mut settings.dashboard_poll_secs, file_cfg.get("dashboard_poll_secs"));
            set_number(
                &mut settings.instances_refresh_secs,
                file_cfg.get("instances_refresh_secs"),
            );
            set_number(
                &mut settings.dispatch_fallback_ms,
                file_cfg.get("dispatch_fallback_ms"),
            );
        }
    }

    if let Some(v) = env("PANEL_ORIGIN") {
        settings.origin = v;
    }
    if let Some(v) = env("APP__ORIGIN") {
        settings.origin = v;
    }

    if let Some(v) = env("APP__SESSION_DIR") {
        settings.session_dir = PathBuf::from(v);
    }
    if let Some(v) = env("APP__SESSION_ID") {
        settings.session_id = v;
    }
    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    set_number(
        &mut settings.dashboard_poll_secs,
        env("APP__DASHBOARD_POLL_SECS").as_ref(),
    );
    set_number(
        &mut settings.instances_refresh_secs,
        env("APP__INSTANCES_REFRESH_SECS").as_ref(),
    );
    set_number(
        &mut settings.dispatch_fallback_ms,
        env("APP__DISPATCH_FALLBACK_MS").as_ref(),
    );

    settings
}

fn set_number(slot: &mut u64, raw: Option<&String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse::<u64>().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
