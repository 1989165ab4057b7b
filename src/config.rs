use serde::Deserialize;

pub const DEFAULT_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Deployment environment name. Prefixes every realtime channel
    /// (`{environment}.user.{id}`). Set via APP_ENV. Default: "local".
    pub environment: String,
    /// Push gateway endpoint receiving the JSON message batch.
    pub push_url: String,
    /// Timeout in seconds for one push batch request.
    pub push_timeout_secs: u64,
    /// When false, push dispatch is logged and skipped.
    pub push_enabled: bool,
    /// Extra CORS origin for the web client. Localhost origins are always allowed.
    pub cors_origin: Option<String>,
    /// Interval of the orphaned-notification prune job. 0 = disabled.
    pub orphan_prune_secs: u64,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "local".into());
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/taskboard".into());

    if environment == "production" && std::env::var("DATABASE_URL").is_err() {
        anyhow::bail!("DATABASE_URL must be set when APP_ENV=production");
    }

    if environment.contains('.') {
        anyhow::bail!(
            "APP_ENV '{}' must not contain '.', it is used as a realtime channel prefix",
            environment
        );
    }

    Ok(Config {
        port: std::env::var("TASKBOARD_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url,
        environment,
        push_url: std::env::var("TASKBOARD_PUSH_URL").unwrap_or_else(|_| DEFAULT_PUSH_URL.into()),
        push_timeout_secs: std::env::var("TASKBOARD_PUSH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        push_enabled: std::env::var("TASKBOARD_PUSH_ENABLED")
            .map(|v| !matches!(v.trim(), "0" | "false" | "no" | "off"))
            .unwrap_or(true),
        cors_origin: std::env::var("TASKBOARD_CORS_ORIGIN")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        orphan_prune_secs: std::env::var("TASKBOARD_ORPHAN_PRUNE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
    })
}
