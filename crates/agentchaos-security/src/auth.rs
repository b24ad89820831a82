//! Authentication for the chaos control plane
//!
//! Three identity sources: scope-based API keys from configuration, a single
//! legacy admin token, and JWTs (HS256/RS256) validated for issuer, audience,
//! and expiry. With no source configured authentication is disabled entirely
//! (with a one-time warning).

use agentchaos_core::{ErrorCode, Flow, FlowResponse};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, warn};

/// Access scopes for chaos control traffic. `Admin` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Read,
    Admin,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "READ",
            Scope::Admin => "ADMIN",
        }
    }

    fn parse(value: &str) -> Option<Scope> {
        match value.to_ascii_uppercase().as_str() {
            "READ" => Some(Scope::Read),
            "ADMIN" => Some(Scope::Admin),
            _ => None,
        }
    }
}

/// Result of an authentication decision.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub allowed: bool,
    pub user_id: String,
    pub scopes: Vec<Scope>,
    /// Error code to surface through metrics when the decision failed.
    pub error_code: Option<ErrorCode>,
}

impl AuthContext {
    fn denied(user_id: impl Into<String>, scopes: Vec<Scope>) -> Self {
        Self {
            allowed: false,
            user_id: user_id.into(),
            scopes,
            error_code: None,
        }
    }

    fn allowed(user_id: impl Into<String>, scopes: Vec<Scope>) -> Self {
        Self {
            allowed: true,
            user_id: user_id.into(),
            scopes,
            error_code: None,
        }
    }
}

/// Static auth configuration, usually assembled from the environment.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub admin_token: Option<String>,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub jwt_strict: bool,
    pub read_keys: Vec<String>,
    pub admin_keys: Vec<String>,
}

impl AuthConfig {
    /// Read from the standard `CHAOS_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            admin_token: std::env::var("CHAOS_ADMIN_TOKEN").ok().filter(|s| !s.is_empty()),
            jwt_secret: std::env::var("CHAOS_JWT_SECRET").ok().filter(|s| !s.is_empty()),
            jwt_issuer: std::env::var("CHAOS_JWT_ISSUER").ok().filter(|s| !s.is_empty()),
            jwt_audience: std::env::var("CHAOS_JWT_AUDIENCE").ok().filter(|s| !s.is_empty()),
            jwt_strict: std::env::var("CHAOS_JWT_STRICT")
                .map(|v| v.to_ascii_lowercase() != "false")
                .unwrap_or(true),
            read_keys: split_keys(
                std::env::var("READ_KEY").ok().or_else(|| std::env::var("CHAOS_READ_KEYS").ok()),
            ),
            admin_keys: split_keys(
                std::env::var("ADMIN_KEY").ok().or_else(|| std::env::var("CHAOS_ADMIN_KEYS").ok()),
            ),
        }
    }
}

fn split_keys(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

fn has_scope(scopes: &[Scope], required: Scope) -> bool {
    scopes.contains(&required)
}

fn looks_like_jwt(token: &str) -> bool {
    token.matches('.').count() == 2
}

/// Anonymized identity for a raw token: `token:<sha256 prefix>`.
fn token_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("token:{}", hex::encode(&digest[..6]))
}

/// Authentication middleware for chaos control traffic.
pub struct ChaosAuth {
    config: AuthConfig,
    api_key_scopes: HashMap<String, Vec<Scope>>,
    enabled: bool,
}

impl ChaosAuth {
    pub fn new(config: AuthConfig) -> Self {
        let mut api_key_scopes = HashMap::new();
        for key in &config.read_keys {
            api_key_scopes.insert(key.clone(), vec![Scope::Read]);
        }
        for key in &config.admin_keys {
            api_key_scopes.insert(key.clone(), vec![Scope::Admin, Scope::Read]);
        }

        let enabled =
            config.admin_token.is_some() || !api_key_scopes.is_empty() || config.jwt_secret.is_some();
        if enabled {
            info!("Chaos authentication enabled");
        } else {
            warn!(
                "No auth configured (CHAOS_ADMIN_TOKEN / READ_KEY / ADMIN_KEY / CHAOS_JWT_SECRET). \
                 Authentication is DISABLED. This is a security risk in production!"
            );
        }

        Self {
            config,
            api_key_scopes,
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Authenticate a flow and return the decision with identity details.
    pub fn authenticate(&self, flow: &Flow, required_scope: Scope) -> AuthContext {
        if !self.enabled {
            return AuthContext::allowed("auth_disabled", vec![Scope::Read, Scope::Admin]);
        }

        let Some(token) = extract_token(flow) else {
            warn!("Unauthorized access attempt: missing token");
            return AuthContext::denied("missing_token", vec![]);
        };

        // API key authentication
        if let Some(scopes) = self.api_key_scopes.get(&token) {
            let ctx = if has_scope(scopes, required_scope) {
                AuthContext::allowed(token_id(&token), scopes.clone())
            } else {
                AuthContext::denied(token_id(&token), scopes.clone())
            };
            return ctx;
        }

        // Legacy admin token
        if self.config.admin_token.as_deref() == Some(token.as_str()) {
            let scopes = vec![Scope::Admin, Scope::Read];
            return if has_scope(&scopes, required_scope) {
                AuthContext::allowed(token_id(&token), scopes)
            } else {
                AuthContext::denied(token_id(&token), scopes)
            };
        }

        // JWT authentication
        if looks_like_jwt(&token) {
            return match self.validate_jwt(&token) {
                Ok((scopes, user_id)) => {
                    if has_scope(&scopes, required_scope) {
                        AuthContext::allowed(user_id, scopes)
                    } else {
                        AuthContext::denied(user_id, scopes)
                    }
                }
                Err(code) => {
                    let mut ctx = AuthContext::denied("invalid_jwt", vec![]);
                    ctx.error_code = Some(code);
                    ctx
                }
            };
        }

        warn!("Unauthorized access attempt: invalid token");
        AuthContext::denied(token_id(&token), vec![])
    }

    /// Boolean shorthand for [`ChaosAuth::authenticate`].
    pub fn validate(&self, flow: &Flow, required_scope: Scope) -> bool {
        self.authenticate(flow, required_scope).allowed
    }

    /// Validate a JWT for signature, issuer, audience, and expiry.
    ///
    /// Returns the scopes (from a `scopes` array or a space-separated `scope`
    /// claim) and the identity `jwt:<sub|user_id|uid>`.
    fn validate_jwt(&self, token: &str) -> Result<(Vec<Scope>, String), ErrorCode> {
        let Some(secret) = &self.config.jwt_secret else {
            warn!("JWT provided but CHAOS_JWT_SECRET not set");
            return Err(ErrorCode::JwtUnavailable);
        };
        let (Some(issuer), Some(audience)) = (&self.config.jwt_issuer, &self.config.jwt_audience)
        else {
            warn!("JWT issuer/audience not configured; rejecting JWT");
            return Err(ErrorCode::JwtUnavailable);
        };

        let header = decode_header(token).map_err(|e| {
            warn!("Invalid JWT header: {e}");
            ErrorCode::JwtInvalid
        })?;

        let (algorithm, key) = match header.alg {
            Algorithm::HS256 => (Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes())),
            Algorithm::RS256 => (
                Algorithm::RS256,
                DecodingKey::from_rsa_pem(secret.as_bytes()).map_err(|e| {
                    warn!("Invalid RS256 key material: {e}");
                    ErrorCode::JwtInvalid
                })?,
            ),
            other => {
                warn!("Unsupported JWT algorithm: {other:?}");
                return Err(ErrorCode::JwtInvalid);
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.validate_exp = true;

        let data = decode::<serde_json::Value>(token, &key, &validation).map_err(|e| {
            warn!("Invalid JWT: {e}");
            ErrorCode::JwtInvalid
        })?;

        let claims = data.claims;
        let scopes = extract_scopes(&claims);
        let subject = claims
            .get("sub")
            .or_else(|| claims.get("user_id"))
            .or_else(|| claims.get("uid"))
            .and_then(|v| v.as_str())
            .unwrap_or("jwt_user");
        Ok((scopes, format!("jwt:{subject}")))
    }

    /// Build the 401 response returned when authentication fails.
    pub fn unauthorized_response(required_scope: Scope) -> FlowResponse {
        let body = serde_json::json!({
            "error": "Unauthorized",
            "message": format!(
                "Invalid or missing credentials. Required scope: {}. \
                 Provide Authorization: Bearer <token> or X-Chaos-Token.",
                required_scope.as_str()
            ),
        });
        FlowResponse::make(
            401,
            body.to_string().into_bytes(),
            &[("Content-Type", "application/json")],
        )
    }
}

fn extract_token(flow: &Flow) -> Option<String> {
    if let Some(auth_header) = flow.request.header("authorization") {
        if auth_header.to_ascii_lowercase().starts_with("bearer ") {
            return Some(auth_header[7..].trim().to_owned());
        }
    }
    flow.request.header("x-chaos-token").map(str::to_owned)
}

fn extract_scopes(claims: &serde_json::Value) -> Vec<Scope> {
    if let Some(list) = claims.get("scopes").and_then(|v| v.as_array()) {
        return list
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(Scope::parse)
            .collect();
    }
    if let Some(joined) = claims.get("scope").and_then(|v| v.as_str()) {
        return joined.split_whitespace().filter_map(Scope::parse).collect();
    }
    Vec::new()
}
