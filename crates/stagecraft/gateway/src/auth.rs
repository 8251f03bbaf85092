//! Credential providers.

use std::fmt;

use async_trait::async_trait;

use crate::error::AuthError;

/// Bearer token presented to the control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Source of credentials. `refresh` is called at most once per gateway call,
/// after a 401.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential, AuthError>;

    async fn refresh(&self) -> Result<Credential, AuthError>;
}

/// Fixed token; refresh hands back the same value.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Credential,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Credential::new(token),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn credential(&self) -> Result<Credential, AuthError> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<Credential, AuthError> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every request, so an
/// external process can rotate it.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    fn read(&self) -> Result<Credential, AuthError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(Credential::new(token.trim())),
            _ => Err(AuthError::Unavailable(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

#[async_trait]
impl AuthProvider for EnvTokenProvider {
    async fn credential(&self) -> Result<Credential, AuthError> {
        self.read()
    }

    async fn refresh(&self) -> Result<Credential, AuthError> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("super-secret");
        assert_eq!(format!("{cred:?}"), "Credential(***)");
    }

    #[tokio::test]
    async fn test_env_provider_missing_var() {
        let provider = EnvTokenProvider::new("STAGECRAFT_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(provider.credential().await.is_err());
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.credential().await.unwrap().secret(), "abc");
        assert_eq!(provider.refresh().await.unwrap().secret(), "abc");
    }
}
