//! Credential resolution: stored secrets to immutable connection parameters.

use crate::error::BridgeError;
use async_nats::{ConnectOptions, ServerAddr};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default NATS endpoint when none is configured.
pub const DEFAULT_SERVER: &str = "nats://localhost:4222";

/// Authentication mechanism selected for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No credentials
    Anonymous,
    /// Username with optional password
    UserPassword { user: String, password: Option<String> },
    /// Bearer token
    Token(String),
    /// NKey seed (`SU...`)
    NKey { seed: String },
    /// User JWT, signed with the user's nkey seed when present
    Jwt { jwt: String, seed: Option<String> },
    /// Contents of a `.creds` document
    Credentials(String),
    /// Path to a `.creds` file
    CredentialsFile(PathBuf),
}

/// TLS material. Paths are handed to the client as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsParams {
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsParams {
    fn is_configured(&self) -> bool {
        self.ca.is_some() || self.cert.is_some() || self.key.is_some()
    }
}

/// JetStream context options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JetStreamParams {
    pub api_prefix: Option<String>,
    pub domain: Option<String>,
    pub timeout: Option<Duration>,
}

/// Immutable parameters for opening a broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub servers: Vec<String>,
    /// Explicit connection name; doubles as the pool key when set.
    pub name: Option<String>,
    pub tls: TlsParams,
    pub auth: AuthMethod,
    pub jetstream: JetStreamParams,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_SERVER.to_string()],
            name: None,
            tls: TlsParams::default(),
            auth: AuthMethod::Anonymous,
            jetstream: JetStreamParams::default(),
        }
    }
}

impl ConnectParams {
    /// Parse the configured endpoints.
    pub fn server_addrs(&self) -> Result<Vec<ServerAddr>, BridgeError> {
        if self.servers.is_empty() {
            return Err(BridgeError::configuration("no NATS servers configured"));
        }
        self.servers
            .iter()
            .map(|server| {
                server.parse::<ServerAddr>().map_err(|e| {
                    BridgeError::configuration(format!("invalid server '{}': {}", server, e))
                })
            })
            .collect()
    }

    /// Build client options for the selected auth mechanism and TLS material.
    pub async fn connect_options(&self) -> Result<ConnectOptions, BridgeError> {
        let mut options = match &self.auth {
            AuthMethod::Anonymous => ConnectOptions::new(),
            AuthMethod::UserPassword { user, password } => ConnectOptions::with_user_and_password(
                user.clone(),
                password.clone().unwrap_or_default(),
            ),
            AuthMethod::Token(token) => ConnectOptions::with_token(token.clone()),
            AuthMethod::NKey { seed } => ConnectOptions::with_nkey(seed.clone()),
            AuthMethod::Jwt {
                jwt,
                seed: Some(seed),
            } => ConnectOptions::with_credentials(&creds_document(jwt, seed))
                .map_err(|e| BridgeError::configuration(format!("invalid JWT or seed: {}", e)))?,
            // bearer JWT: the server does not check the nonce signature
            AuthMethod::Jwt { jwt, seed: None } => {
                ConnectOptions::with_jwt(jwt.trim().to_string(), |_nonce| async {
                    Ok::<_, async_nats::AuthError>(Vec::new())
                })
            }
            AuthMethod::Credentials(contents) => ConnectOptions::with_credentials(contents)
                .map_err(|e| BridgeError::configuration(format!("invalid credentials: {}", e)))?,
            AuthMethod::CredentialsFile(path) => ConnectOptions::with_credentials_file(path.clone())
                .await
                .map_err(|e| {
                    BridgeError::configuration(format!(
                        "cannot read credentials file {}: {}",
                        path.display(),
                        e
                    ))
                })?,
        };

        if let Some(name) = &self.name {
            options = options.name(name);
        }

        if self.tls.is_configured() {
            options = options.require_tls(true);
        }
        if let Some(ca) = &self.tls.ca {
            options = options.add_root_certificates(ca.clone());
        }
        match (&self.tls.cert, &self.tls.key) {
            (Some(cert), Some(key)) => {
                options = options.add_client_certificate(cert.clone(), key.clone());
            }
            (None, None) => {}
            _ => {
                return Err(BridgeError::configuration(
                    "TLS client certificate and key must be given together",
                ));
            }
        }

        Ok(options)
    }
}

/// Assemble a `.creds` document from a user JWT and its seed.
fn creds_document(jwt: &str, seed: &str) -> String {
    format!(
        "-----BEGIN NATS USER JWT-----\n{}\n------END NATS USER JWT------\n\n\
         -----BEGIN USER NKEY SEED-----\n{}\n------END USER NKEY SEED------\n",
        jwt.trim(),
        seed.trim()
    )
}

/// Secrets as stored by the workflow engine's credential screen.
///
/// Field names follow the engine's camelCase record. Empty strings count as unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredCredentials {
    /// Comma separated list of endpoints
    pub servers: String,
    pub name: String,
    pub auth_type: String,
    pub user: String,
    pub pass: String,
    pub token: String,
    pub seed: String,
    pub jwt: String,
    pub jwt_seed: String,
    pub creds: String,
    pub creds_file: String,
    pub tls_ca: String,
    pub tls_cert: String,
    pub tls_key: String,
    pub js_api_prefix: String,
    pub js_domain: String,
    /// JetStream request timeout in milliseconds
    pub js_timeout: Option<u64>,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl StoredCredentials {
    /// Pick the auth type when the record predates the explicit selector.
    fn inferred_auth_type(&self) -> &'static str {
        if non_empty(&self.user).is_some() {
            "user"
        } else if non_empty(&self.token).is_some() {
            "token"
        } else if non_empty(&self.seed).is_some() {
            "nkey"
        } else if non_empty(&self.jwt).is_some() {
            "jwt"
        } else if non_empty(&self.creds).is_some() || non_empty(&self.creds_file).is_some() {
            "creds"
        } else if non_empty(&self.tls_cert).is_some() || non_empty(&self.tls_key).is_some() {
            "tls"
        } else {
            "none"
        }
    }

    /// Resolve into connection parameters.
    pub fn resolve(&self) -> Result<ConnectParams, BridgeError> {
        let auth_type = match non_empty(&self.auth_type) {
            Some(explicit) => explicit,
            None => self.inferred_auth_type().to_string(),
        };

        let required = |value: &str, field: &str| {
            non_empty(value).ok_or_else(|| {
                BridgeError::configuration(format!(
                    "auth type '{}' requires '{}'",
                    auth_type, field
                ))
            })
        };

        let auth = match auth_type.as_str() {
            "none" | "tls" => AuthMethod::Anonymous,
            "user" => AuthMethod::UserPassword {
                user: required(&self.user, "user")?,
                password: non_empty(&self.pass),
            },
            "token" => AuthMethod::Token(required(&self.token, "token")?),
            "nkey" => AuthMethod::NKey {
                seed: required(&self.seed, "seed")?,
            },
            "jwt" => AuthMethod::Jwt {
                jwt: required(&self.jwt, "jwt")?,
                seed: non_empty(&self.jwt_seed),
            },
            "creds" => match (non_empty(&self.creds), non_empty(&self.creds_file)) {
                (Some(contents), _) => AuthMethod::Credentials(contents),
                (None, Some(path)) => AuthMethod::CredentialsFile(PathBuf::from(path)),
                (None, None) => {
                    return Err(BridgeError::configuration(
                        "auth type 'creds' requires 'creds' or 'credsFile'",
                    ));
                }
            },
            other => {
                return Err(BridgeError::configuration(format!(
                    "unknown auth type '{}'",
                    other
                )));
            }
        };

        let servers: Vec<String> = self
            .servers
            .split(',')
            .filter_map(non_empty)
            .collect();

        let params = ConnectParams {
            servers: if servers.is_empty() {
                vec![DEFAULT_SERVER.to_string()]
            } else {
                servers
            },
            name: non_empty(&self.name),
            tls: TlsParams {
                ca: non_empty(&self.tls_ca).map(PathBuf::from),
                cert: non_empty(&self.tls_cert).map(PathBuf::from),
                key: non_empty(&self.tls_key).map(PathBuf::from),
            },
            auth,
            jetstream: JetStreamParams {
                api_prefix: non_empty(&self.js_api_prefix),
                domain: non_empty(&self.js_domain),
                timeout: self.js_timeout.filter(|ms| *ms > 0).map(Duration::from_millis),
            },
        };

        debug!(
            servers = ?params.servers,
            name = ?params.name,
            auth = %auth_type,
            "Resolved NATS connection parameters"
        );

        Ok(params)
    }
}

/// Open a throwaway connection, round-trip once, and close it.
///
/// Returns the measured round-trip time.
pub async fn check_connectivity(params: &ConnectParams) -> Result<Duration, BridgeError> {
    let servers = params.server_addrs()?;
    let client = params
        .connect_options()
        .await?
        .connect(servers.as_slice())
        .await
        .map_err(BridgeError::connection)?;

    let start = Instant::now();
    client.flush().await.map_err(BridgeError::connection)?;
    let rtt = start.elapsed();

    client.drain().await.map_err(BridgeError::cleanup)?;

    info!(rtt_ms = rtt.as_millis() as u64, "NATS credentials verified");
    Ok(rtt)
}
