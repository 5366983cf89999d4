use base64::engine::general_purpose;
use base64::Engine;
use hyper::header::PROXY_AUTHORIZATION;
use hyper::HeaderMap;

/// Compare two byte strings without leaking where they first differ.
///
/// Proxy credentials travel on every request, so the comparison must not
/// give a timing oracle on the matching prefix length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// One credential check applied to the proxy auth header value
#[derive(Debug, Clone)]
enum AuthCheck {
    /// Header value is the raw token
    Bearer(String),
    /// Header value is `"Basic "` followed by the base64 of `user:pass`;
    /// the stored string is the expected encoded form
    Basic(String),
}

impl AuthCheck {
    fn verify(&self, supplied: &str) -> bool {
        match self {
            AuthCheck::Bearer(token) => constant_time_eq(supplied.as_bytes(), token.as_bytes()),
            AuthCheck::Basic(encoded) => {
                const PREFIX: &str = "Basic ";
                if supplied.len() < PREFIX.len() {
                    return false;
                }
                if !supplied[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
                    return false;
                }
                // Compared against the precomputed encoded credential, so a
                // payload that is not even valid base64 is just a mismatch.
                constant_time_eq(supplied[PREFIX.len()..].as_bytes(), encoded.as_bytes())
            }
        }
    }
}

/// Ordered list of credential checks run in front of the dispatcher.
///
/// An empty list is open-proxy mode: every request passes. Whatever the
/// outcome, the `Proxy-Authorization` header is stripped so credentials
/// never travel upstream.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    checks: Vec<AuthCheck>,
}

impl Authenticator {
    /// Build the check list from configured credentials.
    ///
    /// An empty token disables the bearer check; basic auth needs both a
    /// user and a password.
    pub fn new(token: Option<String>, basic: Option<(String, String)>) -> Self {
        let mut checks = Vec::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            checks.push(AuthCheck::Bearer(token));
        }
        if let Some((user, pass)) = basic {
            let encoded = general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            checks.push(AuthCheck::Basic(encoded));
        }
        Self { checks }
    }

    /// True when no credential check is configured
    pub fn is_open(&self) -> bool {
        self.checks.is_empty()
    }

    /// Strip the credential header and verify it against every configured
    /// check. Returns false when any check rejects the supplied value.
    pub fn authenticate(&self, headers: &mut HeaderMap) -> bool {
        let supplied = headers.remove(PROXY_AUTHORIZATION);
        if self.checks.is_empty() {
            return true;
        }

        let supplied = match supplied.as_ref().and_then(|value| value.to_str().ok()) {
            Some(value) => value,
            None => return false,
        };

        self.checks.iter().all(|check| check.verify(supplied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn bearer(token: &str) -> Authenticator {
        Authenticator::new(Some(token.to_string()), None)
    }

    fn basic(user: &str, pass: &str) -> Authenticator {
        Authenticator::new(None, Some((user.to_string(), pass.to_string())))
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(constant_time_eq(b"\x00\xff", b"\x00\xff"));

        assert!(!constant_time_eq(b"hello", b"hellp"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
    }

    #[test]
    fn bearer_accepts_exact_token() {
        let auth = bearer("sekrit");
        assert!(auth.authenticate(&mut headers_with("sekrit")));
    }

    #[test]
    fn bearer_rejects_everything_else() {
        let auth = bearer("sekrit");

        assert!(!auth.authenticate(&mut headers_with("wrong")));
        assert!(!auth.authenticate(&mut headers_with("")));
        assert!(!auth.authenticate(&mut headers_with(&"sekrit".repeat(100))));
        assert!(!auth.authenticate(&mut HeaderMap::new()));
    }

    #[test]
    fn empty_token_disables_bearer() {
        let auth = Authenticator::new(Some(String::new()), None);
        assert!(auth.is_open());
        assert!(auth.authenticate(&mut HeaderMap::new()));
    }

    #[test]
    fn basic_accepts_encoded_pair() {
        let auth = basic("user", "pass");
        let encoded = general_purpose::STANDARD.encode("user:pass");

        assert!(auth.authenticate(&mut headers_with(&format!("Basic {encoded}"))));
        // Scheme prefix is case-insensitive
        assert!(auth.authenticate(&mut headers_with(&format!("basic {encoded}"))));
    }

    #[test]
    fn basic_rejects_single_byte_mutation() {
        let auth = basic("user", "pass");
        let encoded = general_purpose::STANDARD.encode("user:pass");

        for i in 0..encoded.len() {
            let mut mutated = encoded.clone().into_bytes();
            mutated[i] ^= 0x01;
            let mutated = String::from_utf8_lossy(&mutated).to_string();
            assert!(
                !auth.authenticate(&mut headers_with(&format!("Basic {mutated}"))),
                "mutation at byte {i} was accepted"
            );
        }
    }

    #[test]
    fn basic_rejects_malformed_values() {
        let auth = basic("user", "pass");

        assert!(!auth.authenticate(&mut headers_with("Basic")));
        assert!(!auth.authenticate(&mut headers_with("Basic ")));
        assert!(!auth.authenticate(&mut headers_with("Bearer abc")));
        assert!(!auth.authenticate(&mut headers_with("Basic not base64!!")));
        assert!(!auth.authenticate(&mut HeaderMap::new()));
    }

    #[test]
    fn header_is_stripped_on_every_outcome() {
        let encoded = general_purpose::STANDARD.encode("user:pass");

        let mut headers = headers_with(&format!("Basic {encoded}"));
        assert!(basic("user", "pass").authenticate(&mut headers));
        assert!(!headers.contains_key(PROXY_AUTHORIZATION));

        let mut headers = headers_with("nope");
        assert!(!bearer("sekrit").authenticate(&mut headers));
        assert!(!headers.contains_key(PROXY_AUTHORIZATION));

        // Open mode still strips so credentials never go upstream
        let mut headers = headers_with("stray");
        assert!(Authenticator::default().authenticate(&mut headers));
        assert!(!headers.contains_key(PROXY_AUTHORIZATION));
    }

    #[test]
    fn stacked_checks_must_all_pass() {
        let auth = Authenticator::new(
            Some("sekrit".to_string()),
            Some(("user".to_string(), "pass".to_string())),
        );

        // A value satisfying only one of the two configured checks fails
        assert!(!auth.authenticate(&mut headers_with("sekrit")));
        let encoded = general_purpose::STANDARD.encode("user:pass");
        assert!(!auth.authenticate(&mut headers_with(&format!("Basic {encoded}"))));
    }
}
