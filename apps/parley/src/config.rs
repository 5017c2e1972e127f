use std::env;
use std::path::PathBuf;
use std::time::Duration;

use time::UtcOffset;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/";
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

/// Parley client configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// REST base, including the `/api/` prefix
    pub api_url: String,
    /// Live channel base; derived from `api_url` when unset
    pub ws_url: Option<String>,
    pub token: String,
    pub user_id: String,
    /// Directory for persisted drafts; platform data dir when unset
    pub draft_dir: Option<PathBuf>,
    pub page_size: usize,
    pub reconnect_delay: Duration,
    pub display_offset: UtcOffset,
}

impl ChatConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let api_url = env::var("PARLEY_API_URL").unwrap_or(defaults.api_url);
        let ws_url = env::var("PARLEY_WS_URL").ok().filter(|v| !v.is_empty());
        let token = env::var("PARLEY_TOKEN").unwrap_or_default();
        let user_id = env::var("PARLEY_USER_ID").unwrap_or_default();
        let draft_dir = env::var("PARLEY_DRAFT_DIR").ok().map(PathBuf::from);
        let page_size = env::var("PARLEY_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let reconnect_delay = env::var("PARLEY_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_delay);
        let display_offset = env::var("PARLEY_DISPLAY_UTC_OFFSET")
            .ok()
            .and_then(|v| parse_utc_offset(&v))
            .unwrap_or(UtcOffset::UTC);

        Self {
            api_url,
            ws_url,
            token,
            user_id,
            draft_dir,
            page_size,
            reconnect_delay,
            display_offset,
        }
    }

    /// Base URL for the live channel. `http(s)://host/api/` becomes
    /// `ws(s)://host`.
    pub fn live_base_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.trim_end_matches('/').to_string();
        }
        let base = self.api_url.trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        }
    }

    /// Draft directory, falling back to the platform data directory.
    pub fn resolved_draft_dir(&self) -> Option<PathBuf> {
        self.draft_dir.clone().or_else(|| {
            directories::ProjectDirs::from("dev", "parley", "parley")
                .map(|dirs| dirs.data_dir().join("drafts"))
        })
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            token: String::new(),
            user_id: String::new(),
            draft_dir: None,
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            display_offset: UtcOffset::UTC,
        }
    }
}

/// Accepts `+05:00`, `-03:30`, `+5` or `UTC`.
pub fn parse_utc_offset(raw: &str) -> Option<UtcOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") {
        return Some(UtcOffset::UTC);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1i8, &raw[1..]),
        b'-' => (-1i8, &raw[1..]),
        _ => (1i8, raw),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i8>().ok()?, m.parse::<i8>().ok()?),
        None => (rest.parse::<i8>().ok()?, 0),
    };
    UtcOffset::from_hms(hours.checked_mul(sign)?, minutes.checked_mul(sign)?, 0).ok()
}
