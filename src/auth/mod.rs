//! # OIDC authentication
//!
//! Verifies bearer tokens against the configured issuer and maps claims
//! to a normalized [`Identity`]. The JWKS is resolved through the
//! issuer's discovery document at construction time and cached with a
//! TTL; an unknown `kid` triggers one refresh before giving up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::identity::local_part;
use crate::domain::Identity;
use crate::service::{Authenticator, Logger};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// OIDC verifier behavior. Empty claim names fall back to the documented
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,
    /// Skip audience validation. Only for IdPs that issue tokens without
    /// a usable `aud`.
    pub skip_client_id_check: bool,
    pub username_claim: String,
    pub email_claim: String,
    pub roles_claim: String,
    pub groups_claim: String,
    pub http_timeout: Duration,
    pub jwks_ttl: Duration,
}

/// Verifies ID tokens and maps claims to a [`Identity`].
pub struct OidcAuthenticator {
    issuer: String,
    client_id: String,
    skip_client_id_check: bool,
    username_claim: String,
    email_claim: String,
    roles_claim: String,
    groups_claim: String,
    client: reqwest::Client,
    jwks_url: String,
    jwks_ttl: Duration,
    jwks_cache: Mutex<Option<CachedJwks>>,
    log: Arc<dyn Logger>,
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

impl OidcAuthenticator {
    /// Fetches the issuer's discovery metadata and prepares a verifier.
    pub async fn discover(cfg: OidcConfig, log: Arc<dyn Logger>) -> Result<Self> {
        if cfg.issuer_url.is_empty() {
            bail!("issuer URL required");
        }
        if cfg.client_id.is_empty() && !cfg.skip_client_id_check {
            bail!("client id required unless skip_client_id_check is set");
        }
        let timeout = if cfg.http_timeout.is_zero() {
            DEFAULT_HTTP_TIMEOUT
        } else {
            cfg.http_timeout
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;

        let issuer = cfg.issuer_url.trim_end_matches('/').to_string();
        let discovery_url = format!("{}/.well-known/openid-configuration", issuer);
        let doc: DiscoveryDocument = client
            .get(&discovery_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetch discovery document {}", discovery_url))?
            .json()
            .await
            .context("parse discovery document")?;

        Ok(OidcAuthenticator {
            issuer: cfg.issuer_url.clone(),
            client_id: cfg.client_id,
            skip_client_id_check: cfg.skip_client_id_check,
            username_claim: first_non_empty(cfg.username_claim, "preferred_username"),
            email_claim: first_non_empty(cfg.email_claim, "email"),
            roles_claim: first_non_empty(cfg.roles_claim, "roles"),
            groups_claim: first_non_empty(cfg.groups_claim, "groups"),
            client,
            jwks_url: doc.jwks_uri,
            jwks_ttl: if cfg.jwks_ttl.is_zero() {
                DEFAULT_JWKS_TTL
            } else {
                cfg.jwks_ttl
            },
            jwks_cache: Mutex::new(None),
            log,
        })
    }

    async fn cached_jwks(&self) -> Result<JwkSet> {
        {
            let cache = self.jwks_cache.lock().await;
            if let Some(entry) = cache.as_ref() {
                if entry.expires_at > Instant::now() {
                    return Ok(entry.jwks.clone());
                }
            }
        }
        self.refresh_jwks().await
    }

    async fn refresh_jwks(&self) -> Result<JwkSet> {
        let jwks: JwkSet = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetch jwks {}", self.jwks_url))?
            .json()
            .await
            .context("parse jwks")?;
        let mut cache = self.jwks_cache.lock().await;
        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            expires_at: Instant::now() + self.jwks_ttl,
        });
        Ok(jwks)
    }

    async fn decoding_key_for(&self, kid: Option<&str>) -> Result<DecodingKey> {
        let jwks = self.cached_jwks().await?;
        if let Some(jwk) = find_jwk(&jwks, kid) {
            return DecodingKey::from_jwk(jwk).context("build decoding key");
        }
        // The signing key may have rotated since the cache was filled.
        let jwks = self.refresh_jwks().await?;
        let jwk = find_jwk(&jwks, kid).ok_or_else(|| anyhow!("no matching key in issuer jwks"))?;
        DecodingKey::from_jwk(jwk).context("build decoding key")
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    /// Verifies the bearer token and returns a normalized identity.
    /// Accepts both a raw token and an `Authorization`-style
    /// `Bearer <token>` value.
    async fn authenticate(&self, bearer: &str) -> Result<Identity> {
        let token = strip_bearer(bearer);
        if token.is_empty() {
            bail!("empty bearer token");
        }

        let header = decode_header(token).context("decode token header")?;
        if !matches!(
            header.alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::ES256
                | Algorithm::ES384
                | Algorithm::EdDSA
        ) {
            bail!("unsupported token algorithm");
        }
        let key = self.decoding_key_for(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        if self.skip_client_id_check {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[self.client_id.as_str()]);
        }
        let claims = decode::<Value>(token, &key, &validation)
            .context("verify token")?
            .claims;

        let subject = string_claim(&claims, "sub");
        if subject.is_empty() {
            bail!("token missing subject");
        }
        let email = string_claim(&claims, &self.email_claim);
        let mut username = string_claim(&claims, &self.username_claim);
        if username.is_empty() && !email.is_empty() {
            username = local_part(&email).to_string();
        }
        if username.is_empty() {
            username = subject.clone();
        }

        // Keep only a small set of extra claims; never the whole token.
        let mut extra_claims = BTreeMap::new();
        for name in ["iss", "aud", "email_verified"] {
            if let Some(value) = claims.get(name) {
                extra_claims.insert(name.to_string(), value.clone());
            }
        }

        let id = Identity {
            subject,
            username: username.to_lowercase(),
            email: email.to_lowercase(),
            roles: string_list_claim(&claims, &self.roles_claim),
            groups: string_list_claim(&claims, &self.groups_claim),
            extra_claims,
        };
        self.log.debug(
            "oidc authenticated",
            &[
                ("sub".to_string(), id.subject.clone()),
                ("username".to_string(), id.username.clone()),
            ],
        );
        Ok(id)
    }
}

/// Strips an optional case-insensitive `Bearer ` prefix and surrounding
/// whitespace.
pub(crate) fn strip_bearer(bearer: &str) -> &str {
    let token = bearer.trim();
    match token.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => token[7..].trim(),
        _ => token,
    }
}

fn first_non_empty(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn find_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks
            .keys
            .iter()
            .find(|key| key.common.key_id.as_deref() == Some(kid)),
        None => jwks.keys.first(),
    }
}

fn string_claim(claims: &Value, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Extracts a list-of-strings claim. Non-string elements are silently
/// dropped; a bare string claim counts as a one-element list.
fn string_list_claim(claims: &Value, name: &str) -> Vec<String> {
    match claims.get(name) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}
