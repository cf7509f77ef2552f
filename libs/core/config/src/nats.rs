use crate::{env_optional, env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 180;

/// NATS connection settings
///
/// Blank variables count as unset. The auth type is optional: without it the
/// first populated credential decides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NatsConfig {
    /// Comma separated endpoints (`NATS_URL`)
    pub url: String,
    pub connection_name: Option<String>,

    pub auth_type: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub nkey_seed: Option<String>,
    pub jwt: Option<String>,
    pub jwt_seed: Option<String>,
    pub creds_file: Option<String>,

    pub tls_ca: Option<String>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,

    pub js_api_prefix: Option<String>,
    pub js_domain: Option<String>,
    pub js_timeout_ms: Option<u64>,

    /// Grace period before an unreferenced pooled connection is drained
    pub idle_timeout: Duration,
}

impl FromEnv for NatsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let idle_secs =
            env_parse::<u64>("NATS_IDLE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);

        Ok(Self {
            url: env_or_default("NATS_URL", DEFAULT_NATS_URL),
            connection_name: env_optional("NATS_CONNECTION_NAME"),
            auth_type: env_optional("NATS_AUTH_TYPE"),
            user: env_optional("NATS_USER"),
            password: env_optional("NATS_PASSWORD"),
            token: env_optional("NATS_TOKEN"),
            nkey_seed: env_optional("NATS_NKEY_SEED"),
            jwt: env_optional("NATS_JWT"),
            jwt_seed: env_optional("NATS_JWT_SEED"),
            creds_file: env_optional("NATS_CREDS_FILE"),
            tls_ca: env_optional("NATS_TLS_CA"),
            tls_cert: env_optional("NATS_TLS_CERT"),
            tls_key: env_optional("NATS_TLS_KEY"),
            js_api_prefix: env_optional("NATS_JS_API_PREFIX"),
            js_domain: env_optional("NATS_JS_DOMAIN"),
            js_timeout_ms: env_parse("NATS_JS_TIMEOUT_MS")?,
            idle_timeout: Duration::from_secs(idle_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 17] = [
        "NATS_URL",
        "NATS_CONNECTION_NAME",
        "NATS_AUTH_TYPE",
        "NATS_USER",
        "NATS_PASSWORD",
        "NATS_TOKEN",
        "NATS_NKEY_SEED",
        "NATS_JWT",
        "NATS_JWT_SEED",
        "NATS_CREDS_FILE",
        "NATS_TLS_CA",
        "NATS_TLS_CERT",
        "NATS_TLS_KEY",
        "NATS_JS_API_PREFIX",
        "NATS_JS_DOMAIN",
        "NATS_JS_TIMEOUT_MS",
        "NATS_IDLE_TIMEOUT_SECS",
    ];

    #[test]
    fn test_nats_config_defaults() {
        temp_env::with_vars_unset(ALL_VARS, || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config.url, DEFAULT_NATS_URL);
            assert_eq!(config.connection_name, None);
            assert_eq!(config.auth_type, None);
            assert_eq!(config.js_timeout_ms, None);
            assert_eq!(config.idle_timeout, Duration::from_secs(180));
        });
    }

    #[test]
    fn test_nats_config_from_env() {
        temp_env::with_vars(
            [
                ("NATS_URL", Some("nats://a:4222,nats://b:4222")),
                ("NATS_CONNECTION_NAME", Some("billing")),
                ("NATS_USER", Some("relay")),
                ("NATS_PASSWORD", Some("secret")),
                ("NATS_TOKEN", Some("  ")),
                ("NATS_JS_DOMAIN", Some("hub")),
                ("NATS_JS_TIMEOUT_MS", Some("2500")),
                ("NATS_IDLE_TIMEOUT_SECS", Some("30")),
            ],
            || {
                let config = NatsConfig::from_env().unwrap();
                assert_eq!(config.url, "nats://a:4222,nats://b:4222");
                assert_eq!(config.connection_name.as_deref(), Some("billing"));
                assert_eq!(config.user.as_deref(), Some("relay"));
                assert_eq!(config.password.as_deref(), Some("secret"));
                assert_eq!(config.token, None);
                assert_eq!(config.js_domain.as_deref(), Some("hub"));
                assert_eq!(config.js_timeout_ms, Some(2500));
                assert_eq!(config.idle_timeout, Duration::from_secs(30));
            },
        );
    }

    #[test]
    fn test_nats_config_invalid_number() {
        temp_env::with_var("NATS_IDLE_TIMEOUT_SECS", Some("soon"), || {
            let err = NatsConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("NATS_IDLE_TIMEOUT_SECS"));
        });
    }
}
