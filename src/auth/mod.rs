//! Token service - HMAC-SHA256 signed access and reconnect tokens
//!
//! Tokens are standard HS256 JWTs over a shared symmetric secret. The service
//! never consults session state; replay protection belongs to the session
//! manager, which only honors a reconnect while the session still exists.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

use crate::util::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Subject (player ID)
    sub: String,
    /// Display name, carried on access tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    /// Issued at (Unix timestamp)
    iat: u64,
    /// Expiration time (Unix timestamp)
    exp: u64,
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

/// Issues and validates signed tokens
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Mint an access token carrying the player's username
    pub fn generate_access_token(&self, player_id: Uuid, username: &str, ttl: Duration) -> String {
        let now = unix_secs();
        self.sign(&Claims {
            sub: player_id.to_string(),
            username: Some(username.to_string()),
            iat: now,
            exp: now + ttl.as_secs(),
        })
    }

    /// Mint a reconnect token proving ownership of a player id
    pub fn generate_reconnect_token(&self, player_id: Uuid, ttl: Duration) -> String {
        let now = unix_secs();
        self.sign(&Claims {
            sub: player_id.to_string(),
            username: None,
            iat: now,
            exp: now + ttl.as_secs(),
        })
    }

    /// Verify a reconnect token and extract its subject
    pub fn parse_reconnect_token(&self, token: &str) -> Result<Uuid, AuthError> {
        let claims = self.verify(token)?;
        Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)
    }

    fn sign(&self, claims: &Claims) -> String {
        let header = URL_SAFE_NO_PAD.encode(JWT_HEADER);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims serialize"));
        let message = format!("{}.{}", header, payload);

        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(message.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", message, signature)
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::InvalidToken);
        }

        let message = format!("{}.{}", parts[0], parts[1]);

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidToken)?;
        mac.update(message.as_bytes());

        let expected_signature = mac.finalize().into_bytes();
        let provided_signature = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| AuthError::InvalidToken)?;

        if expected_signature.as_slice() != provided_signature.as_slice() {
            return Err(AuthError::InvalidToken);
        }

        let payload_json = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|_| AuthError::InvalidToken)?;

        let claims: Claims =
            serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

        if claims.exp < unix_secs() {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }
}
