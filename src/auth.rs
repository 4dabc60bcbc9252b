//! Bearer-token check against a single configured API key.
//!
//! A missing credential and a wrong credential are reported separately.
//! With no key configured every request is rejected.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    Missing,
    #[error("Invalid authentication token")]
    Invalid,
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing",
            AuthError::Invalid => "invalid",
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    api_key: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl AuthConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check the raw `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<(), AuthError> {
        let presented = header.map(str::trim).filter(|v| !v.is_empty());
        let Some(presented) = presented else {
            return Err(AuthError::Missing);
        };
        // Auth schemes are case-insensitive. `presented` is trimmed, so a
        // bare scheme leaves an empty token.
        let (scheme, token) = presented
            .split_once(char::is_whitespace)
            .unwrap_or((presented, ""));
        if !scheme.eq_ignore_ascii_case("Bearer") {
            return Err(AuthError::Invalid);
        }
        let token = token.trim_start();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        match self.api_key {
            Some(ref expected) if token == expected => Ok(()),
            Some(_) => Err(AuthError::Invalid),
            None => {
                tracing::error!("no API key configured -- rejecting request");
                Err(AuthError::Invalid)
            }
        }
    }
}
