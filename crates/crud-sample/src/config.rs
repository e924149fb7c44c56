//! Command line and environment configuration of the sample server.

use clap::Parser;
use crud_framework::user::TokenRegistry;
use crud_framework::{CrudError, ResourceConfig, User};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid resource configuration: {0}")]
    Invalid(#[from] CrudError),

    #[error("invalid token mapping '{0}', expected TOKEN=USERNAME[:ROLE,...]")]
    Token(String),
}

#[derive(Parser, Debug, Clone)]
#[command(name = "crud-sample")]
#[command(about = "Serves the sample aggregate over REST and GraphQL")]
pub struct SampleArgs {
    /// Address the HTTP server listens on
    #[arg(long, env = "CRUD_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// JSON resource configuration file; flags below override its values
    #[arg(long, env = "CRUD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URI of the REST resource
    #[arg(long, env = "CRUD_BASE_URI")]
    pub base_uri: Option<String>,

    /// API version used in RSocket routes
    #[arg(long, env = "CRUD_API_VERSION")]
    pub api_version: Option<String>,

    /// Capacity of the repository mailbox
    #[arg(long, env = "CRUD_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Path of the GraphQL endpoint
    #[arg(long, default_value = "/graphql")]
    pub graphql_path: String,

    /// Bearer token accepted by the server, as TOKEN=USERNAME[:ROLE,...]; repeatable
    #[arg(long = "token")]
    pub tokens: Vec<String>,
}

impl SampleArgs {
    /// Resolves the resource configuration: defaults, then the config file, then flags.
    pub fn resource_config(&self) -> Result<ResourceConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                ResourceConfig::from_json(&raw)?
            }
            None => ResourceConfig::for_domain("sample"),
        };

        if let Some(version) = &self.api_version {
            config.version = version.clone();
            if self.config.is_none() {
                config.base_uri = format!("/api/{version}/{}", config.domain_name);
            }
        }
        if let Some(base_uri) = &self.base_uri {
            config.base_uri = base_uri.clone();
        }
        if let Some(buffer_size) = self.buffer_size {
            config.buffer_size = buffer_size;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn token_registry(&self) -> Result<TokenRegistry, ConfigError> {
        self.tokens
            .iter()
            .try_fold(TokenRegistry::new(), |registry, mapping| {
                let (token, user) = parse_token(mapping)?;
                Ok(registry.with_token(token, user))
            })
    }
}

fn parse_token(mapping: &str) -> Result<(String, User), ConfigError> {
    let invalid = || ConfigError::Token(mapping.to_string());
    let (token, identity) = mapping.split_once('=').ok_or_else(invalid)?;
    let (username, roles) = identity.split_once(':').unwrap_or((identity, ""));
    if token.is_empty() || username.is_empty() {
        return Err(invalid());
    }
    let user = roles
        .split(',')
        .filter(|role| !role.is_empty())
        .fold(User::new(username), User::with_role);
    Ok((token.to_string(), user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crud_framework::UserResolver;

    fn args(argv: &[&str]) -> SampleArgs {
        SampleArgs::try_parse_from(std::iter::once("crud-sample").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_serve_the_sample_domain() {
        let config = args(&[]).resource_config().unwrap();
        assert_eq!(config.domain_name, "sample");
        assert_eq!(config.base_uri, "/api/v1/sample");
    }

    #[test]
    fn flags_override_the_defaults() {
        let config = args(&["--api-version", "v2", "--buffer-size", "8"])
            .resource_config()
            .unwrap();
        assert_eq!(config.version, "v2");
        assert_eq!(config.base_uri, "/api/v2/sample");
        assert_eq!(config.buffer_size, 8);

        let custom = args(&["--base-uri", "/samples"]).resource_config().unwrap();
        assert_eq!(custom.base_uri, "/samples");
    }

    #[test]
    fn overrides_are_validated() {
        let result = args(&["--base-uri", "samples"]).resource_config();
        assert!(matches!(result, Err(ConfigError::Invalid(CrudError::BadRequest(_)))));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let result = args(&["--config", "/nonexistent/crud.json"]).resource_config();
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn tokens_map_to_users_with_roles() {
        let registry = args(&["--token", "t1=alice:admin,ops", "--token", "t2=bob"])
            .token_registry()
            .unwrap();
        let alice = registry.from_token(Some("Bearer t1")).unwrap().unwrap();
        assert_eq!(alice.username, "alice");
        assert!(alice.has_role("admin") && alice.has_role("ops"));
        assert_eq!(registry.from_token(Some("t2")).unwrap().unwrap().roles.len(), 0);

        let broken = args(&["--token", "nobody"]).token_registry();
        assert!(matches!(broken, Err(ConfigError::Token(_))));
    }
}
