//! Credential accessors.
//!
//! The pipeline never stores credentials. It asks a `TokenSource` for the
//! current bearer token each time an endpoint needs one.

/// Supplies the bearer token for authenticated calls.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// No credential; authenticated endpoints fail with `MissingAuthToken`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenSource for NoToken {
    fn token(&self) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// A fixed bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads an environment variable on every call, so a token exported after
/// start-up is picked up without rebuilding the client.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Reads `var` on every call.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new("SPACETRADERS_TOKEN")
    }
}

impl TokenSource for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_is_redacted_in_debug() {
        let token = StaticToken::new("secret");
        assert_eq!(token.token().as_deref(), Some("secret"));
        assert!(!format!("{token:?}").contains("secret"));
    }

    #[test]
    fn env_token_is_read_each_time() {
        let source = EnvToken::new("SPACETRADERS_AUTH_TEST_TOKEN");
        temp_env::with_var_unset("SPACETRADERS_AUTH_TEST_TOKEN", || {
            assert_eq!(source.token(), None);
        });
        temp_env::with_var("SPACETRADERS_AUTH_TEST_TOKEN", Some("abc"), || {
            assert_eq!(source.token().as_deref(), Some("abc"));
        });
        temp_env::with_var("SPACETRADERS_AUTH_TEST_TOKEN", Some(""), || {
            assert_eq!(source.token(), None);
        });
    }

    #[test]
    fn closures_are_token_sources() {
        let source = || Some("from-closure".to_string());
        assert_eq!(TokenSource::token(&source).as_deref(), Some("from-closure"));
        assert_eq!(NoToken.token(), None);
    }
}
