use crate::report::LatLng;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REPORTS_TABLE: &str = "reports";
const DEFAULT_PHOTO_BUCKET: &str = "images";
const DEFAULT_MAP_CENTER: LatLng = LatLng::new(52.237, 21.017);
const DEFAULT_MAP_ZOOM: u8 = 6;

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    supabase_url: Option<String>,
    #[serde(default)]
    supabase_anon_key: Option<String>,
    #[serde(default)]
    reports_table: Option<String>,
    #[serde(default)]
    photo_bucket: Option<String>,
}

fn setup_config_path() -> Option<PathBuf> {
    env_optional("ECOMAP_SETUP_CONFIG_PATH").map(PathBuf::from)
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "ecomap failed to read setup config; using env only"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "ecomap failed to parse setup config; using env only"
            );
            None
        }
    }
}

/// Process-wide settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub reports_table: String,
    pub photo_bucket: String,
    pub map_center: LatLng,
    pub map_zoom: u8,
    pub realtime_heartbeat_secs: u64,
    pub realtime_reconnect_ms: u64,
    pub http_timeout_secs: u64,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = setup_config_path()
            .and_then(|path| load_setup_config_overrides(&path))
            .unwrap_or_default();
        Self::from_parts(overrides)
    }

    fn from_parts(overrides: SetupConfigOverrides) -> Result<Self> {
        let supabase_url = env_optional("ECOMAP_SUPABASE_URL")
            .or_else(|| non_empty(overrides.supabase_url.as_deref()))
            .context("ECOMAP_SUPABASE_URL is required (or supabase_url in the setup config)")?;
        let supabase_url = normalize_base_url(&supabase_url);
        url::Url::parse(&supabase_url).context("invalid ECOMAP_SUPABASE_URL")?;

        let supabase_anon_key = env_optional("ECOMAP_SUPABASE_ANON_KEY")
            .or_else(|| non_empty(overrides.supabase_anon_key.as_deref()))
            .context(
                "ECOMAP_SUPABASE_ANON_KEY is required (or supabase_anon_key in the setup config)",
            )?;

        let reports_table = env_optional("ECOMAP_REPORTS_TABLE")
            .or_else(|| non_empty(overrides.reports_table.as_deref()))
            .unwrap_or_else(|| DEFAULT_REPORTS_TABLE.to_string());
        let photo_bucket = env_optional("ECOMAP_PHOTO_BUCKET")
            .or_else(|| non_empty(overrides.photo_bucket.as_deref()))
            .unwrap_or_else(|| DEFAULT_PHOTO_BUCKET.to_string());

        let map_center = LatLng::new(
            env_parse("ECOMAP_MAP_CENTER_LAT")?.unwrap_or(DEFAULT_MAP_CENTER.lat),
            env_parse("ECOMAP_MAP_CENTER_LNG")?.unwrap_or(DEFAULT_MAP_CENTER.lng),
        );
        let map_zoom = env_parse("ECOMAP_MAP_ZOOM")?.unwrap_or(DEFAULT_MAP_ZOOM);
        let realtime_heartbeat_secs = env_parse("ECOMAP_REALTIME_HEARTBEAT_SECS")?
            .filter(|v: &u64| *v != 0)
            .unwrap_or(25);
        let realtime_reconnect_ms = env_parse("ECOMAP_REALTIME_RECONNECT_MS")?.unwrap_or(2000);
        let http_timeout_secs = env_parse("ECOMAP_HTTP_TIMEOUT_SECS")?
            .filter(|v: &u64| *v != 0)
            .unwrap_or(30);

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            reports_table,
            photo_bucket,
            map_center,
            map_zoom,
            realtime_heartbeat_secs,
            realtime_reconnect_ms,
            http_timeout_secs,
            email: env_optional("ECOMAP_EMAIL"),
            password: env_optional("ECOMAP_PASSWORD"),
        })
    }

    pub fn realtime_heartbeat(&self) -> Duration {
        Duration::from_secs(self.realtime_heartbeat_secs)
    }

    pub fn realtime_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.realtime_reconnect_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.email.as_deref()?, self.password.as_deref()?))
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid {key}")),
        None => Ok(None),
    }
}
