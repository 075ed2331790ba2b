use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";
pub const HASH_ITERATIONS: u32 = 20_000;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token is missing")]
    MissingToken,
    #[error("token is invalid or expired")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("expected an {expected} token")]
    WrongTokenKind { expected: &'static str },
    #[error("stored password hash is malformed")]
    MalformedHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn code(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    fn issue(&self, user_id: &str, username: &str, kind: TokenKind) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            kind,
            iat: now,
            exp: now + ttl,
            jti: Uuid::new_v4().simple().to_string(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn issue_pair(&self, user_id: &str, username: &str) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(user_id, username, TokenKind::Access)?,
            refresh: self.issue(user_id, username, TokenKind::Refresh)?,
        })
    }

    pub fn refresh_access(&self, refresh_token: &str) -> Result<String, AuthError> {
        let claims = self.verify(refresh_token, TokenKind::Refresh)?;
        self.issue(&claims.sub, &claims.username, TokenKind::Access)
    }

    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        if data.claims.kind != expected {
            return Err(AuthError::WrongTokenKind {
                expected: expected.code(),
            });
        }
        Ok(data.claims)
    }
}

pub fn generate_secret() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn digest(salt: &str, password: &str, iterations: u32) -> Vec<u8> {
    let mut out = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize()
        .to_vec();
    for _ in 1..iterations {
        out = Sha256::new()
            .chain_update(&out)
            .chain_update(salt.as_bytes())
            .finalize()
            .to_vec();
    }
    out
}

pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let d = digest(&salt, password, HASH_ITERATIONS);
    format!(
        "{}${}${}${}",
        HASH_SCHEME,
        HASH_ITERATIONS,
        salt,
        hex::encode(d)
    )
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, iterations, salt, expected_hex] = parts.as_slice() else {
        return Err(AuthError::MalformedHash);
    };
    if *scheme != HASH_SCHEME {
        return Err(AuthError::MalformedHash);
    }
    let iterations: u32 = iterations.parse().map_err(|_| AuthError::MalformedHash)?;
    if iterations == 0 {
        return Err(AuthError::MalformedHash);
    }
    let expected = hex::decode(expected_hex).map_err(|_| AuthError::MalformedHash)?;
    let actual = digest(salt, password, iterations);
    if expected.len() != actual.len() {
        return Ok(false);
    }
    let diff = expected
        .iter()
        .zip(actual.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    Ok(diff == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_and_is_salted() {
        let a = hash_password("correct horse");
        let b = hash_password("correct horse");
        assert_ne!(a, b);
        assert!(a.starts_with("sha256$"));
        assert!(verify_password("correct horse", &a).expect("verify"));
        assert!(!verify_password("battery staple", &a).expect("verify"));
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            verify_password("x", "plaintext"),
            Err(AuthError::MalformedHash)
        ));
        assert!(matches!(
            verify_password("x", "sha256$0$salt$00"),
            Err(AuthError::MalformedHash)
        ));
    }

    #[test]
    fn access_and_refresh_tokens_are_not_interchangeable() {
        let issuer = TokenIssuer::new("test-secret", 300, 3600);
        let pair = issuer.issue_pair("u1", "ana").expect("issue pair");

        let claims = issuer.verify(&pair.access, TokenKind::Access).expect("access");
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "ana");

        assert!(matches!(
            issuer.verify(&pair.refresh, TokenKind::Access),
            Err(AuthError::WrongTokenKind { .. })
        ));
        assert!(matches!(
            issuer.verify(&pair.access, TokenKind::Refresh),
            Err(AuthError::WrongTokenKind { .. })
        ));

        let access = issuer.refresh_access(&pair.refresh).expect("refresh");
        let bearer = format!("Bearer {}", access);
        assert!(issuer.verify(&bearer, TokenKind::Access).is_ok());
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let issuer = TokenIssuer::new("one", 300, 3600);
        let other = TokenIssuer::new("two", 300, 3600);
        let pair = issuer.issue_pair("u1", "ana").expect("issue pair");
        assert!(matches!(
            other.verify(&pair.access, TokenKind::Access),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            other.verify("   ", TokenKind::Access),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issuer = TokenIssuer::new("s", -10, -10);
        let pair = issuer.issue_pair("u1", "ana").expect("issue pair");
        assert!(issuer.verify(&pair.access, TokenKind::Access).is_err());
    }
}
