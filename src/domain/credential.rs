use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// An opaque bearer token for the remote discussion API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Returns `None` for blank tokens.
    pub fn new(token: impl AsRef<str>) -> Option<Self> {
        let token = token.as_ref().trim();
        (!token.is_empty()).then(|| Self(Arc::from(token)))
    }

    /// Parse an `Authorization` header value (`Bearer <token>` or `token <token>`).
    pub fn from_authorization(value: &str) -> Option<Self> {
        let value = value.trim();
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token") {
            Self::new(token)
        } else {
            None
        }
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Stable, non-reversible identity used in cache keys.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_schemes() {
        let bearer = Credential::from_authorization("Bearer gho_abc").expect("bearer");
        assert_eq!(bearer.secret(), "gho_abc");

        let token = Credential::from_authorization("token gho_abc").expect("token scheme");
        assert_eq!(token, bearer);

        assert!(Credential::from_authorization("Basic dXNlcjpwYXNz").is_none());
        assert!(Credential::from_authorization("Bearer    ").is_none());
        assert!(Credential::from_authorization("gho_abc").is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_hides_the_secret() {
        let a = Credential::new("gho_secret").expect("credential");
        let b = Credential::new("gho_secret").expect("credential");
        let c = Credential::new("gho_other").expect("credential");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
        assert!(!a.fingerprint().as_str().contains("secret"));
    }

    #[test]
    fn debug_output_is_redacted() {
        let credential = Credential::new("gho_secret").expect("credential");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
    }
}
