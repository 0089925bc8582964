//! Which requests must carry a CSRF token.

use http::Method;

/// Exemptions from CSRF validation.
#[derive(Debug, Clone)]
pub struct CsrfPolicy {
    /// Bootstrap endpoints that accept unsafe verbs without a token
    exempt_paths: Vec<String>,
}

impl CsrfPolicy {
    pub fn new(exempt_paths: Vec<String>) -> Self {
        Self { exempt_paths }
    }

    /// Unsafe verbs need a token unless the path is exempt.
    pub fn requires_token(&self, method: &Method, path: &str) -> bool {
        if method.is_safe() {
            return false;
        }
        !self.exempt_paths.iter().any(|p| p == path)
    }
}
