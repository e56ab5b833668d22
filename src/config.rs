use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration — loaded from environment variables
// ---------------------------------------------------------------------------

/// Server configuration loaded at startup.
///
/// Every field can be set via an environment variable prefixed with
/// `ONECAST_`. Defaults are suitable for local development against a media
/// engine on localhost.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Network ─────────────────────────────────────────────────────────
    /// Address to bind the HTTP listener to.
    pub bind_addr: String,

    // ── Media engine ────────────────────────────────────────────────────
    /// Base URL of the media engine's control API.
    pub gateway_url: String,
    /// Public URL of this server's candidate webhook, handed to the engine
    /// at endpoint creation so it knows where to push discovered candidates.
    pub callback_url: String,

    // ── Limits ───────────────────────────────────────────────────────────
    /// Maximum number of viewers per room.
    pub max_viewers_per_room: usize,

    // ── CORS ─────────────────────────────────────────────────────────────
    pub allowed_origins: String,

    // ── Logging ──────────────────────────────────────────────────────────
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        // Best-effort .env loading — ignore errors.
        let _ = dotenvy::dotenv();

        let bind_addr = env_or("ONECAST_BIND_ADDR", "0.0.0.0:8443");
        let gateway_url = env_or("ONECAST_GATEWAY_URL", "http://localhost:8888");

        let callback_url = match std::env::var("ONECAST_CALLBACK_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => {
                let derived = format!("http://{bind_addr}/hooks/candidates");
                warn!("ONECAST_CALLBACK_URL not set — deriving {derived} from the bind address");
                derived
            }
        };

        let max_viewers_per_room = env_or("ONECAST_MAX_VIEWERS_PER_ROOM", "1000")
            .parse::<usize>()
            .unwrap_or(1000);

        let allowed_origins = env_or("ONECAST_ALLOWED_ORIGINS", "*");
        let log_level = env_or("ONECAST_LOG_LEVEL", "info");

        let config = Config {
            bind_addr,
            gateway_url,
            callback_url,
            max_viewers_per_room,
            allowed_origins,
            log_level,
        };

        config.log_summary();
        config
    }

    fn log_summary(&self) {
        info!("──── onecast configuration ────");
        info!("  bind_addr            : {}", self.bind_addr);
        info!("  gateway_url          : {}", self.gateway_url);
        info!("  callback_url         : {}", self.callback_url);
        info!("  max_viewers_per_room : {}", self.max_viewers_per_room);
        info!(
            "  cors_origins         : {}",
            if self.allowed_origins == "*" {
                "* (permissive)"
            } else {
                &self.allowed_origins
            }
        );
        info!("  log_level            : {}", self.log_level);
        info!("───────────────────────────────");
    }
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
