//! Token mint and validation.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Header, Validation};
use thiserror::Error;
use uuid::Uuid;

use aigos_identity::types::RuntimeIdentity;

use crate::claims::{aigos_claims, ControlStatus, TokenClaims, DEFAULT_TTL_SECS, TOKEN_TYP};
use crate::keys::{KeyRing, SigningKey};

/// Validation failures, each with a stable machine code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a well-formed governance JWT")]
    InvalidFormat,
    #[error("token signature failed verification")]
    InvalidSignature,
    #[error("token is expired")]
    Expired,
    #[error("token is not yet valid")]
    NotYetValid,
    #[error("token issuer is not trusted")]
    InvalidIssuer,
    #[error("token audience does not match this agent")]
    InvalidAudience,
    #[error("token is missing required claims")]
    MissingClaims,
    #[error("token claims are malformed: {0}")]
    InvalidClaims(String),
    #[error("no trusted key with kid '{0}'")]
    KeyNotFound(String),
    #[error("peer agent is paused")]
    PausedAgent,
    #[error("peer agent has a termination pending")]
    TerminationPending,
    #[error("peer violates local governance policy: {0}")]
    PolicyViolation(String),
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Expired => "EXPIRED",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::InvalidIssuer => "INVALID_ISSUER",
            Self::InvalidAudience => "INVALID_AUDIENCE",
            Self::MissingClaims => "MISSING_CLAIMS",
            Self::InvalidClaims(_) => "INVALID_CLAIMS",
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::PausedAgent => "PAUSED_AGENT",
            Self::TerminationPending => "TERMINATION_PENDING",
            Self::PolicyViolation(_) => "POLICY_VIOLATION",
        }
    }
}

/// A freshly minted token with its metadata.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub payload: TokenClaims,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Wire-shaped validation result: valid flag plus payload or error detail.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub payload: Option<Box<TokenClaims>>,
    pub error_code: Option<&'static str>,
    pub error_message: Option<String>,
}

impl From<Result<TokenClaims, TokenError>> for ValidationOutcome {
    fn from(result: Result<TokenClaims, TokenError>) -> Self {
        match result {
            Ok(payload) => Self {
                valid: true,
                payload: Some(Box::new(payload)),
                error_code: None,
                error_message: None,
            },
            Err(e) => Self {
                valid: false,
                payload: None,
                error_code: Some(e.code()),
                error_message: Some(e.to_string()),
            },
        }
    }
}

/// Token service settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Issuer string stamped into minted tokens.
    pub issuer: String,
    /// Audience inbound tokens must name (our domain or instance id).
    pub audience: String,
    /// Issuers accepted on validation; empty accepts any.
    pub trusted_issuers: Vec<String>,
    pub ttl: Duration,
    pub clock_tolerance: Duration,
}

impl TokenConfig {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            trusted_issuers: Vec::new(),
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            clock_tolerance: Duration::seconds(60),
        }
    }
}

/// Mints and validates governance tokens.
pub struct TokenService {
    config: TokenConfig,
    signing: SigningKey,
    ring: KeyRing,
}

impl TokenService {
    pub fn new(config: TokenConfig, signing: SigningKey, ring: KeyRing) -> Self {
        Self { config, signing, ring }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    /// Mint a token for `audience` from `identity` and the live control
    /// snapshot. TTL falls back to the configured default.
    pub fn generate(
        &self,
        identity: &RuntimeIdentity,
        audience: &str,
        ttl: Option<Duration>,
        control: ControlStatus,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = ttl.unwrap_or(self.config.ttl);
        let jti = Uuid::new_v4().to_string();
        let claims = TokenClaims {
            iss: self.config.issuer.clone(),
            sub: identity.instance_id,
            aud: audience.to_string(),
            exp: now + ttl.num_seconds(),
            iat: now,
            nbf: now,
            jti: jti.clone(),
            aigos: aigos_claims(identity, control),
        };

        let mut header = Header::new(self.signing.alg);
        header.typ = Some(TOKEN_TYP.to_string());
        header.kid = Some(self.signing.kid.clone());

        let token = encode(&header, &claims, &self.signing.encoding)
            .map_err(|_| TokenError::InvalidClaims("encoding failed".to_string()))?;

        tracing::debug!(
            jti = %jti,
            audience,
            instance_id = %identity.instance_id,
            "Governance token minted"
        );
        Ok(IssuedToken {
            token,
            payload: claims,
            jti,
            iat: now,
            exp: now + ttl.num_seconds(),
        })
    }

    /// Validate a compact token: header `typ`, trusted `kid`, signature,
    /// standard claims with clock tolerance, AIGOS claims well-formed, peer
    /// control posture.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::InvalidFormat)?;
        if header.typ.as_deref() != Some(TOKEN_TYP) {
            return Err(TokenError::InvalidFormat);
        }
        let kid = header.kid.ok_or(TokenError::MissingClaims)?;
        let (alg, key) = self
            .ring
            .get(&kid)
            .ok_or_else(|| TokenError::KeyNotFound(kid.clone()))?;

        let mut validation = Validation::new(alg);
        validation.leeway = self.config.clock_tolerance.num_seconds().max(0) as u64;
        validation.validate_nbf = true;
        validation.set_audience(&[&self.config.audience]);
        if !self.config.trusted_issuers.is_empty() {
            validation.set_issuer(&self.config.trusted_issuers);
        }
        // jti/aigos presence is enforced by deserialization into TokenClaims.
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);

        let data =
            decode::<TokenClaims>(token, &key, &validation).map_err(map_jwt_error)?;
        let claims = data.claims;

        self.check_aigos_claims(&claims)?;
        Ok(claims)
    }

    /// Outcome-shaped wrapper over [`validate`] for wire responses.
    pub fn validate_outcome(&self, token: &str) -> ValidationOutcome {
        self.validate(token).into()
    }

    fn check_aigos_claims(&self, claims: &TokenClaims) -> Result<(), TokenError> {
        if !(claims.iat <= claims.nbf && claims.nbf <= claims.exp) {
            return Err(TokenError::InvalidClaims(
                "iat/nbf/exp are not monotone".to_string(),
            ));
        }
        let aigos = &claims.aigos;
        if aigos.identity.asset_id.is_empty() {
            return Err(TokenError::MissingClaims);
        }
        if !aigos.governance.golden_thread_hash.starts_with("sha256:") {
            return Err(TokenError::InvalidClaims(
                "golden thread hash is not a sha256 digest".to_string(),
            ));
        }
        if !aigos.capabilities.hash.starts_with("sha256:") {
            return Err(TokenError::InvalidClaims(
                "capability hash is not a sha256 digest".to_string(),
            ));
        }
        if aigos.control.paused {
            return Err(TokenError::PausedAgent);
        }
        if aigos.control.termination_pending {
            return Err(TokenError::TerminationPending);
        }
        Ok(())
    }
}

fn map_jwt_error(error: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match error.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        ErrorKind::InvalidAudience => TokenError::InvalidAudience,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::MissingRequiredClaim(_) => TokenError::MissingClaims,
        ErrorKind::Json(e) => TokenError::InvalidClaims(e.to_string()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
            TokenError::InvalidFormat
        }
        _ => TokenError::InvalidSignature,
    }
}
