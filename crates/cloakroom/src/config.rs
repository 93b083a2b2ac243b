//! Process configuration, read once from the environment at startup.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: u32 = 200;
/// Upper bound for `CLOAKROOM_POOL_SIZE`; every hanger is a table row.
pub const MAX_POOL_SIZE: u32 = 100_000;
pub const DEFAULT_PORT: u16 = 8443;
pub const DEFAULT_DATABASE: &str = "cloakroom.db";
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BOT_TOKEN is not set")]
    MissingToken,
    #[error("WEBHOOK_URL is required when WEBHOOK_MODE is enabled")]
    MissingWebhookUrl,
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Bot credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Polling { timeout: Duration },
    Webhook(WebhookSettings),
}

#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    /// Public base URL; the bot registers `{public_url}/{token}`.
    pub public_url: String,
    pub port: u16,
    pub secret: Option<String>,
}

impl fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("public_url", &self.public_url)
            .field("port", &self.port)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Database {
    File(PathBuf),
    /// Nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub token: BotToken,
    pub transport: TransportMode,
    pub pool_size: u32,
    pub database: Database,
    pub ticket_font: Option<PathBuf>,
    pub api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let token = get("BOT_TOKEN").ok_or(ConfigError::MissingToken)?;

        let webhook = match get("WEBHOOK_MODE") {
            Some(value) => parse_bool("WEBHOOK_MODE", &value)?,
            None => false,
        };
        let transport = if webhook {
            let public_url = get("WEBHOOK_URL").ok_or(ConfigError::MissingWebhookUrl)?;
            TransportMode::Webhook(WebhookSettings {
                public_url: public_url.trim_end_matches('/').to_string(),
                port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
                secret: get("WEBHOOK_SECRET"),
            })
        } else {
            let seconds = parse_or(
                "CLOAKROOM_POLL_TIMEOUT",
                get("CLOAKROOM_POLL_TIMEOUT"),
                DEFAULT_POLL_TIMEOUT.as_secs(),
            )?;
            TransportMode::Polling {
                timeout: Duration::from_secs(seconds),
            }
        };

        let pool_size = parse_or("CLOAKROOM_POOL_SIZE", get("CLOAKROOM_POOL_SIZE"), DEFAULT_POOL_SIZE)?;
        if !(1..=MAX_POOL_SIZE).contains(&pool_size) {
            return Err(ConfigError::Invalid {
                var: "CLOAKROOM_POOL_SIZE",
                value: pool_size.to_string(),
                reason: format!("pool must hold between 1 and {MAX_POOL_SIZE} hangers"),
            });
        }

        let database = match get("CLOAKROOM_DB").as_deref() {
            Some(":memory:") => Database::Memory,
            Some(path) => Database::File(PathBuf::from(path)),
            None => Database::File(PathBuf::from(DEFAULT_DATABASE)),
        };

        Ok(Self {
            token: BotToken::new(token),
            transport,
            pool_size,
            database,
            ticket_font: get("CLOAKROOM_TICKET_FONT").map(PathBuf::from),
            api_url: get("TELEGRAM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        })
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_with_only_token() {
        let config = config(&[("BOT_TOKEN", "123:abc")]).unwrap();

        assert_eq!(config.token.expose(), "123:abc");
        assert_eq!(
            config.transport,
            TransportMode::Polling {
                timeout: DEFAULT_POLL_TIMEOUT
            }
        );
        assert_eq!(config.pool_size, 200);
        assert_eq!(config.database, Database::File(PathBuf::from("cloakroom.db")));
        assert_eq!(config.ticket_font, None);
        assert_eq!(config.api_url, "https://api.telegram.org");
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingToken)));
        assert!(matches!(
            config(&[("BOT_TOKEN", "  ")]),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn webhook_mode() {
        let config = config(&[
            ("BOT_TOKEN", "t"),
            ("WEBHOOK_MODE", "True"),
            ("WEBHOOK_URL", "https://bot.example.com/"),
            ("WEBHOOK_SECRET", "s3cret"),
            ("PORT", "9000"),
        ])
        .unwrap();

        assert_eq!(
            config.transport,
            TransportMode::Webhook(WebhookSettings {
                public_url: "https://bot.example.com".to_string(),
                port: 9000,
                secret: Some("s3cret".to_string()),
            })
        );
    }

    #[test]
    fn webhook_mode_needs_url() {
        assert!(matches!(
            config(&[("BOT_TOKEN", "t"), ("WEBHOOK_MODE", "true")]),
            Err(ConfigError::MissingWebhookUrl)
        ));
    }

    #[test]
    fn webhook_mode_false_ignores_url() {
        let config = config(&[
            ("BOT_TOKEN", "t"),
            ("WEBHOOK_MODE", "false"),
            ("WEBHOOK_URL", "https://bot.example.com"),
        ])
        .unwrap();
        assert!(matches!(config.transport, TransportMode::Polling { .. }));
    }

    #[test]
    fn memory_database() {
        let config = config(&[("BOT_TOKEN", "t"), ("CLOAKROOM_DB", ":memory:")]).unwrap();
        assert_eq!(config.database, Database::Memory);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[("BOT_TOKEN", "t"), ("CLOAKROOM_POOL_SIZE", "many")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid CLOAKROOM_POOL_SIZE=\"many\""));

        let err = config(&[("BOT_TOKEN", "t"), ("CLOAKROOM_POOL_SIZE", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "CLOAKROOM_POOL_SIZE",
                ..
            }
        ));

        let err = config(&[("BOT_TOKEN", "t"), ("WEBHOOK_MODE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "WEBHOOK_MODE", .. }));
    }

    #[test]
    fn pool_size_is_bounded() {
        for size in ["100001", "4000000000"] {
            let err = config(&[("BOT_TOKEN", "t"), ("CLOAKROOM_POOL_SIZE", size)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: "CLOAKROOM_POOL_SIZE", .. }),
                "{size} accepted"
            );
        }

        let config = config(&[("BOT_TOKEN", "t"), ("CLOAKROOM_POOL_SIZE", "100000")]).unwrap();
        assert_eq!(config.pool_size, MAX_POOL_SIZE);
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = config(&[
            ("BOT_TOKEN", "123:very-secret"),
            ("WEBHOOK_MODE", "1"),
            ("WEBHOOK_URL", "https://bot.example.com"),
            ("WEBHOOK_SECRET", "hush"),
        ])
        .unwrap();

        let printed = format!("{config:?}");
        assert!(!printed.contains("very-secret"));
        assert!(!printed.contains("hush"));
        assert!(printed.contains("https://bot.example.com"));
    }
}
