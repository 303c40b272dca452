//! Bearer-token validation shared by the gateway and the orchestrator.
//!
//! The gate is a trait so processors can be exercised without a live
//! identity provider; the production implementation verifies RS256
//! tokens against a JWKS document.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Decoded identity carried by a validated token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenData {
    pub username: String,
    pub roles: Vec<String>,
}

impl TokenData {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Outcome of validating a bearer token.
///
/// Callers treat any denial as unauthorized-for-processing; the status
/// code distinguishes token problems (401) from gate failures (500).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthVerdict {
    Allowed(TokenData),
    Denied { status: u16, detail: String },
}

impl AuthVerdict {
    pub fn denied(status: u16, detail: impl Into<String>) -> Self {
        Self::Denied {
            status,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Allowed(_) => 200,
            Self::Denied { status, .. } => *status,
        }
    }
}

/// Role required to submit work to a named agent.
pub fn required_role(agent_name: &str) -> String {
    format!("{agent_name}-user")
}

/// Validates bearer tokens into an identity or a denial.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn validate(&self, token: &str) -> AuthVerdict;
}

// ============================================================================
// JWKS-backed gate
// ============================================================================

/// Subset of a JWKS key entry needed to verify RS256 signatures.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Claims extracted from a verified token.
#[derive(Debug, Deserialize)]
struct Claims {
    preferred_username: Option<String>,

    #[serde(default)]
    realm_access: RoleSet,

    #[serde(default)]
    resource_access: HashMap<String, RoleSet>,
}

#[derive(Debug, Default, Deserialize)]
struct RoleSet {
    #[serde(default)]
    roles: Vec<String>,
}

/// Gate that fetches a JWKS document and verifies RS256 bearer tokens.
pub struct JwksGate {
    client: reqwest::Client,
    jwks_url: String,
}

impl JwksGate {
    pub fn new(client: reqwest::Client, jwks_url: impl Into<String>) -> Self {
        Self {
            client,
            jwks_url: jwks_url.into(),
        }
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, reqwest::Error> {
        self.client
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await
    }

    fn verify(&self, token: &str, jwks: &JwkSet) -> AuthVerdict {
        let header = match jsonwebtoken::decode_header(token) {
            Ok(header) => header,
            Err(e) => return AuthVerdict::denied(401, format!("Invalid token: {e}")),
        };

        let Some(kid) = header.kid else {
            return AuthVerdict::denied(401, "Token missing 'kid' header");
        };

        let Some(key) = jwks.keys.iter().find(|k| k.kid.as_deref() == Some(&kid)) else {
            return AuthVerdict::denied(401, "Matching key not found in JWKS");
        };

        if key.kty != "RSA" {
            return AuthVerdict::denied(401, format!("Unsupported key type '{}'", key.kty));
        }

        let (Some(n), Some(e)) = (key.n.as_deref(), key.e.as_deref()) else {
            return AuthVerdict::denied(500, "JWKS key missing RSA components");
        };

        let decoding_key = match jsonwebtoken::DecodingKey::from_rsa_components(n, e) {
            Ok(key) => key,
            Err(e) => return AuthVerdict::denied(500, format!("Server error: {e}")),
        };

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        validation.validate_aud = false;

        let claims = match jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => return AuthVerdict::denied(401, format!("Invalid token: {e}")),
        };

        let Some(username) = claims.preferred_username else {
            return AuthVerdict::denied(401, "Token missing 'preferred_username'");
        };

        // Realm roles plus every client's roles, deduplicated.
        let mut seen = HashSet::new();
        let mut roles: Vec<String> = Vec::new();
        for role in claims
            .realm_access
            .roles
            .into_iter()
            .chain(claims.resource_access.into_values().flat_map(|r| r.roles))
        {
            if seen.insert(role.clone()) {
                roles.push(role);
            }
        }

        if roles.is_empty() {
            return AuthVerdict::denied(401, "Token has no roles");
        }

        AuthVerdict::Allowed(TokenData { username, roles })
    }
}

#[async_trait]
impl AuthGate for JwksGate {
    async fn validate(&self, token: &str) -> AuthVerdict {
        let jwks = match self.fetch_jwks().await {
            Ok(jwks) => jwks,
            Err(e) => {
                tracing::warn!(error = %e, "JWKS fetch failed");
                return AuthVerdict::denied(500, format!("Server error: {e}"));
            }
        };
        self.verify(token, &jwks)
    }
}
