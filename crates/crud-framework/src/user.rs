//! The acting user, resolved per request by each transport.

use crate::error::CrudError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A decoded JWT principal as handed over by an authenticating transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jwt {
    pub subject: String,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Jwt {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: Map::new(),
        }
    }

    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }
}

impl From<&Jwt> for User {
    fn from(jwt: &Jwt) -> Self {
        let username = jwt
            .claims
            .get("preferred_username")
            .and_then(Value::as_str)
            .unwrap_or(&jwt.subject)
            .to_string();
        let roles = jwt
            .claims
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: Some(jwt.subject.clone()),
            username,
            roles,
        }
    }
}

/// Resolves the acting user from transport credentials.
pub trait UserResolver: Send + Sync + 'static {
    /// Resolves an `Authorization`-style value (`Bearer <token>`).
    fn from_token(&self, authorization: Option<&str>) -> Result<Option<User>, CrudError>;

    /// The principal wins over the user carried in a message envelope.
    fn from_principal(
        &self,
        principal: Option<&Jwt>,
        envelope_user: Option<User>,
    ) -> Result<Option<User>, CrudError> {
        Ok(principal.map(User::from).or(envelope_user))
    }
}

/// Treats every request as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousResolver;

impl UserResolver for AnonymousResolver {
    fn from_token(&self, _authorization: Option<&str>) -> Result<Option<User>, CrudError> {
        Ok(None)
    }
}

/// Static bearer-token table. Missing credentials are anonymous, unknown tokens are rejected.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, User>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user: User) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }
}

impl UserResolver for TokenRegistry {
    fn from_token(&self, authorization: Option<&str>) -> Result<Option<User>, CrudError> {
        let Some(value) = authorization else {
            return Ok(None);
        };
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        self.tokens
            .get(token)
            .cloned()
            .map(Some)
            .ok_or_else(|| CrudError::BadRequest("unknown bearer token".to_string()))
    }
}
