use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SecurityConfig;
use crate::models::{Role, User};

/// Claims carried by a locally minted session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub email: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user: &User, expiry_hours: u64) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            exp: (now + Duration::hours(expiry_hours as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// Claims extracted from a federated identity token. Only the fields this
/// service consumes; everything else the provider sends is ignored.
#[derive(Debug, Serialize, Deserialize)]
pub struct FederatedClaims {
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("signing secret not configured")]
    SecretMissing,

    #[error("federated identity key not configured")]
    FederatedKeyMissing,
}

pub fn mint_token(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::SecretMissing);
    }
    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| AuthError::Signing(e.to_string()))
}

/// Verify signature and expiry of a locally minted token.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::SecretMissing);
    }
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data =
        decode::<Claims>(token, &decoding_key, &Validation::default()).map_err(classify)?;
    Ok(token_data.claims)
}

/// Verify a federated identity token against the configured provider key.
/// RS256 with the provider's published public key in deployments; HS256 with
/// a shared secret for development and tests.
pub fn verify_federated_token(
    token: &str,
    security: &SecurityConfig,
) -> Result<FederatedClaims, AuthError> {
    let (key, algorithm) = if let Some(pem) = &security.federated_public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|_| AuthError::Invalid)?;
        (key, Algorithm::RS256)
    } else if let Some(secret) = &security.federated_shared_secret {
        (
            DecodingKey::from_secret(secret.as_bytes()),
            Algorithm::HS256,
        )
    } else {
        return Err(AuthError::FederatedKeyMissing);
    };

    let validation = Validation::new(algorithm);
    let token_data = decode::<FederatedClaims>(token, &key, &validation).map_err(classify)?;
    Ok(token_data.claims)
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid,
    }
}

/// Exact suffix match on the part after '@', case-insensitive.
pub fn email_in_domain(email: &str, domain: &str) -> bool {
    match email.rsplit_once('@') {
        Some((_, d)) => d.eq_ignore_ascii_case(domain),
        None => false,
    }
}

/// Split a federated full-name claim: first whitespace token becomes the
/// given names, the remainder the family names.
pub fn split_full_name(full: &str) -> (String, String) {
    let mut parts = full.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    (first, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use chrono::Utc;

    fn sample_user() -> User {
        User {
            id: 7,
            first_names: "Ana".into(),
            last_names: "Martinez".into(),
            email: "ana@uml.edu.ni".into(),
            role: Role::Student,
            career_id: None,
            level: None,
            mobile_phone: None,
            home_phone: None,
            id_card: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_roundtrip() {
        let user = sample_user();
        let claims = Claims::new(&user, 1);
        let token = mint_token(&claims, "secret").unwrap();
        let decoded = verify_token(&token, "secret").unwrap();
        assert_eq!(decoded.sub, 7);
        assert_eq!(decoded.role, Role::Student);
    }

    #[test]
    fn expired_token_is_classified() {
        let user = sample_user();
        let mut claims = Claims::new(&user, 1);
        claims.exp = (Utc::now() - Duration::hours(2)).timestamp();
        let token = mint_token(&claims, "secret").unwrap();
        assert!(matches!(
            verify_token(&token, "secret"),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let user = sample_user();
        let token = mint_token(&Claims::new(&user, 1), "secret").unwrap();
        assert!(matches!(
            verify_token(&token, "other"),
            Err(AuthError::Invalid)
        ));
    }

    #[test]
    fn federated_token_verifies_with_shared_secret() {
        let security = AppConfig::development().security;
        let claims = FederatedClaims {
            email: "carlos@uml.edu.ni".into(),
            name: "Carlos Perez Ubeda".into(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let secret = security.federated_shared_secret.clone().unwrap();
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let decoded = verify_federated_token(&token, &security).unwrap();
        assert_eq!(decoded.email, "carlos@uml.edu.ni");
    }

    #[test]
    fn federated_verification_rejects_bad_signature() {
        let security = AppConfig::development().security;
        let claims = FederatedClaims {
            email: "carlos@uml.edu.ni".into(),
            name: String::new(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"not-the-configured-secret"),
        )
        .unwrap();

        assert!(verify_federated_token(&token, &security).is_err());
    }

    #[test]
    fn domain_match_is_exact_and_case_insensitive() {
        assert!(email_in_domain("a@uml.edu.ni", "uml.edu.ni"));
        assert!(email_in_domain("a@UML.EDU.NI", "uml.edu.ni"));
        assert!(!email_in_domain("a@gmail.com", "uml.edu.ni"));
        assert!(!email_in_domain("a@sub.uml.edu.ni", "uml.edu.ni"));
        assert!(!email_in_domain("not-an-email", "uml.edu.ni"));
    }

    #[test]
    fn full_name_split() {
        assert_eq!(
            split_full_name("Maria Fernanda Lopez"),
            ("Maria".to_string(), "Fernanda Lopez".to_string())
        );
        assert_eq!(split_full_name("Solo"), ("Solo".to_string(), String::new()));
        assert_eq!(split_full_name(""), (String::new(), String::new()));
    }
}
