//! Maps environment configuration onto the bridge's credential record.

use core_config::NatsConfig;
use nats_bridge::{PoolConfig, StoredCredentials};

/// Credential record equivalent to the `NATS_*` environment.
pub fn stored_credentials(config: &NatsConfig) -> StoredCredentials {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    StoredCredentials {
        servers: config.url.clone(),
        name: text(&config.connection_name),
        auth_type: text(&config.auth_type),
        user: text(&config.user),
        pass: text(&config.password),
        token: text(&config.token),
        seed: text(&config.nkey_seed),
        jwt: text(&config.jwt),
        jwt_seed: text(&config.jwt_seed),
        creds: String::new(),
        creds_file: text(&config.creds_file),
        tls_ca: text(&config.tls_ca),
        tls_cert: text(&config.tls_cert),
        tls_key: text(&config.tls_key),
        js_api_prefix: text(&config.js_api_prefix),
        js_domain: text(&config.js_domain),
        js_timeout: config.js_timeout_ms,
    }
}

pub fn pool_config(config: &NatsConfig) -> PoolConfig {
    PoolConfig::default().with_idle_timeout(config.idle_timeout)
}
