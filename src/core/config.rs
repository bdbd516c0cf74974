use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub email: EmailConfig,
    pub outbox: OutboxConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    /// When false, notifications are logged instead of sent.
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub poll_secs: u64,
    pub max_attempts: i32,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let email_username = env_or("EMAIL_USERNAME", "");
        let email = EmailConfig {
            smtp_server: env_or("EMAIL_SMTP_SERVER", "localhost"),
            smtp_port: env_parse("EMAIL_SMTP_PORT", 587),
            password: env_or("EMAIL_PASSWORD", ""),
            from: env_or("EMAIL_FROM", "governance@localhost"),
            enabled: !email_username.is_empty(),
            username: email_username,
        };

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parse("SERVER_PORT", 8080),
            },
            database_url,
            email,
            outbox: OutboxConfig {
                poll_secs: env_parse("OUTBOX_POLL_SECS", 15),
                max_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", 5),
            },
        })
    }
}
