//! Bearer tokens for ITSM calls.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TokenError(pub String);

/// Supplies the bearer token sent with every ITSM request.
///
/// Called before each attempt, so an implementation may refresh tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, TokenError>;
}

/// A pre-issued token taken from configuration.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: Option<SecretString>,
}

impl StaticTokenSource {
    pub fn new(token: Option<SecretString>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, TokenError> {
        match &self.token {
            Some(token) if !token.expose_secret().is_empty() => {
                Ok(token.expose_secret().to_string())
            }
            _ => Err(TokenError("no ITSM auth token configured".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_static_token_is_an_error() {
        let source = StaticTokenSource::new(None);
        assert!(source.token().await.is_err());

        let source = StaticTokenSource::new(Some(SecretString::from("")));
        assert!(source.token().await.is_err());

        let source = StaticTokenSource::new(Some(SecretString::from("t0k")));
        assert_eq!(source.token().await.unwrap(), "t0k");
    }
}
