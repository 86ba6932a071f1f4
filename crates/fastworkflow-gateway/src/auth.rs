use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const JWT_ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 60;
pub const JWT_REFRESH_TOKEN_EXPIRE_DAYS: i64 = 30;
pub const JWT_ISSUER: &str = "fastworkflow-api";
pub const JWT_AUDIENCE: &str = "fastworkflow-client";

const PRIVATE_KEY_FILE: &str = "private_key.pem";
const PUBLIC_KEY_FILE: &str = "public_key.pem";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token invalid: {0}")]
    Invalid(String),

    #[error("token has expired")]
    Expired,

    #[error("invalid token type: expected {expected}, got {got}")]
    WrongType { expected: String, got: String },

    #[error("key setup failed: {0}")]
    KeySetup(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Channel identifier.
    pub sub: String,
    /// Optional user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    /// The effective user id of this token: the `uid` claim when present,
    /// else the subject.
    pub fn user_id(&self) -> &str {
        self.uid.as_deref().unwrap_or(&self.sub)
    }
}

/// Token layer: RS256 by default with a generated keypair persisted under
/// the keys directory; an unsigned trusted-network mode decodes without
/// signature verification but still enforces expiration and token type.
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expect_signed: bool,
}

impl JwtManager {
    pub fn new(keys_dir: &Path, expect_signed: bool) -> Result<Self, AuthError> {
        if !expect_signed {
            warn!(
                "JWT signature verification DISABLED. Tokens are accepted without \
                 cryptographic validation. Only use in trusted internal networks."
            );
            return Ok(Self {
                encoding: EncodingKey::from_secret(b""),
                decoding: DecodingKey::from_secret(b""),
                expect_signed: false,
            });
        }

        let (private_pem, public_pem) = load_or_generate_keys(keys_dir)?;
        Ok(Self {
            encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| AuthError::KeySetup(e.to_string()))?,
            decoding: DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| AuthError::KeySetup(e.to_string()))?,
            expect_signed: true,
        })
    }

    pub fn create_access_token(
        &self,
        channel_id: &str,
        user_id: Option<&str>,
        expires_days: Option<i64>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let expire = match expires_days {
            Some(days) => now + Duration::days(days),
            None => now + Duration::minutes(JWT_ACCESS_TOKEN_EXPIRE_MINUTES),
        };
        self.encode(Claims {
            sub: channel_id.to_string(),
            uid: user_id.map(String::from),
            iat: now.timestamp(),
            exp: expire.timestamp(),
            jti: format!("{channel_id}_{}", now.timestamp()),
            token_type: "access".to_string(),
            iss: JWT_ISSUER.to_string(),
            aud: JWT_AUDIENCE.to_string(),
        })
    }

    pub fn create_refresh_token(
        &self,
        channel_id: &str,
        user_id: Option<&str>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let expire = now + Duration::days(JWT_REFRESH_TOKEN_EXPIRE_DAYS);
        self.encode(Claims {
            sub: channel_id.to_string(),
            uid: user_id.map(String::from),
            iat: now.timestamp(),
            exp: expire.timestamp(),
            jti: format!("{channel_id}_{}_refresh", now.timestamp()),
            token_type: "refresh".to_string(),
            iss: JWT_ISSUER.to_string(),
            aud: JWT_AUDIENCE.to_string(),
        })
    }

    fn encode(&self, claims: Claims) -> Result<String, AuthError> {
        let header = if self.expect_signed {
            Header::new(Algorithm::RS256)
        } else {
            Header::new(Algorithm::HS256)
        };
        jsonwebtoken::encode(&header, &claims, &self.encoding)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }

    /// Verify and decode a token, enforcing type and expiration. Unsigned
    /// mode skips only the signature check.
    pub fn verify(&self, token: &str, expected_type: &str) -> Result<Claims, AuthError> {
        let mut validation = if self.expect_signed {
            Validation::new(Algorithm::RS256)
        } else {
            let mut v = Validation::new(Algorithm::HS256);
            v.algorithms = vec![Algorithm::HS256, Algorithm::RS256];
            v.insecure_disable_signature_validation();
            v
        };
        validation.set_issuer(&[JWT_ISSUER]);
        validation.set_audience(&[JWT_AUDIENCE]);
        validation.validate_exp = true;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            },
        )?;

        if data.claims.token_type != expected_type {
            return Err(AuthError::WrongType {
                expected: expected_type.to_string(),
                got: data.claims.token_type,
            });
        }
        Ok(data.claims)
    }
}

/// Load the RSA keypair from disk, generating and persisting a new 2048-bit
/// pair when none exists.
fn load_or_generate_keys(keys_dir: &Path) -> Result<(String, String), AuthError> {
    let private_path = keys_dir.join(PRIVATE_KEY_FILE);
    let public_path = keys_dir.join(PUBLIC_KEY_FILE);

    if private_path.exists() && public_path.exists() {
        info!("loading existing RSA keys from disk");
        let private_pem = std::fs::read_to_string(&private_path)
            .map_err(|e| AuthError::KeySetup(e.to_string()))?;
        let public_pem = std::fs::read_to_string(&public_path)
            .map_err(|e| AuthError::KeySetup(e.to_string()))?;
        return Ok((private_pem, public_pem));
    }

    info!("no existing RSA keys found, generating a 2048-bit keypair");
    let mut rng = rand::rngs::OsRng;
    let private_key =
        RsaPrivateKey::new(&mut rng, 2048).map_err(|e| AuthError::KeySetup(e.to_string()))?;
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AuthError::KeySetup(e.to_string()))?
        .to_string();
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AuthError::KeySetup(e.to_string()))?;

    std::fs::create_dir_all(keys_dir).map_err(|e| AuthError::KeySetup(e.to_string()))?;
    std::fs::write(&private_path, &private_pem).map_err(|e| AuthError::KeySetup(e.to_string()))?;
    std::fs::write(&public_path, &public_pem).map_err(|e| AuthError::KeySetup(e.to_string()))?;
    restrict_permissions(&private_path);
    Ok((private_pem, public_pem))
}

#[cfg(unix)]
fn restrict_permissions(path: &PathBuf) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &PathBuf) {}
