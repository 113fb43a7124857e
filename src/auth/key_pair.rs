use base64::{Engine, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Lifetime of the login JWT, in seconds.
const JWT_LIFETIME_SECONDS: i64 = 600;

pub(super) fn generate_jwt_from_key_pair(
    pem: &str,
    password: Option<&[u8]>,
    username: &str,
    account: &str,
    timestamp: i64,
) -> Result<String> {
    let private = try_parse_private_key(pem, password)?;
    let fingerprint = public_key_fingerprint(&private)?;
    let claims = jwt_claims(account, username, &fingerprint, timestamp);

    let key = EncodingKey::from_rsa_pem(private.to_pkcs8_pem(LineEnding::LF)?.as_bytes())?;
    let jwt = jsonwebtoken::encode(
        &Header {
            alg: Algorithm::RS256,
            ..Default::default()
        },
        &claims,
        &key,
    )?;
    Ok(jwt)
}

fn public_key_fingerprint(private: &RsaPrivateKey) -> Result<String> {
    let der = private.to_public_key().to_public_key_der()?;
    let mut hasher = Sha256::new();
    hasher.update(der);
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Snowflake expects the account locator without region and both names upper-cased.
fn jwt_claims(account: &str, username: &str, fingerprint: &str, timestamp: i64) -> Value {
    let account = account
        .split('.')
        .next()
        .map(|s| s.to_ascii_uppercase())
        .unwrap_or_default();
    let username = username.to_ascii_uppercase();
    json!({
        "iss": format!("{account}.{username}.SHA256:{fingerprint}"),
        "sub": format!("{account}.{username}"),
        "iat": timestamp,
        "exp": timestamp + JWT_LIFETIME_SECONDS
    })
}

fn try_parse_private_key(pem: &str, password: Option<&[u8]>) -> Result<RsaPrivateKey> {
    if let Some(password) = password {
        if let Ok(private) = RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password) {
            return Ok(private);
        }
    }

    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::Decode(format!("Failed to parse private key: {}", e)))
}
