//! Mutual handshake orchestration.
//!
//! Inbound: extract the caller's token from `X-AIGOS-Token`, validate it,
//! run the inbound policy, and mint a response token targeted back at the
//! caller. Outbound: derive the audience from the target URL, pre-flight
//! the outbound policy, stamp the protocol headers, and optionally
//! validate the response token. Every step is recorded in the ledger.

use serde_json::json;
use std::collections::HashMap;

use aigos_identity::types::RuntimeIdentity;
use aigos_ledger::{Criticality, EventBuilder, EventSink};

use crate::claims::{ControlStatus, TokenClaims, PROTOCOL_VERSION};
use crate::policy::{InboundPolicy, OutboundPolicy};
use crate::token::{IssuedToken, TokenError, TokenService};

/// Header carrying the governance token.
pub const HDR_TOKEN: &str = "X-AIGOS-Token";
/// Header naming the protocol revision.
pub const HDR_PROTOCOL: &str = "X-AIGOS-Protocol-Version";
/// Header carrying the request id (the token's `jti`).
pub const HDR_REQUEST_ID: &str = "X-AIGOS-Request-ID";

/// Handshake failure with its wire code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandshakeError {}

impl From<TokenError> for HandshakeError {
    fn from(e: TokenError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Accepted inbound handshake: the validated peer (absent only when the
/// policy permits token-less callers) plus our response token.
#[derive(Debug)]
pub struct InboundHandshake {
    pub peer: Option<TokenClaims>,
    pub response_token: IssuedToken,
}

/// Prepared outbound call: headers to attach and the minted token.
#[derive(Debug)]
pub struct OutboundRequest {
    pub domain: String,
    pub headers: Vec<(&'static str, String)>,
    pub token: Option<IssuedToken>,
}

/// Supplies the live control snapshot stamped into minted tokens.
pub trait ControlProbe: Send + Sync {
    fn status(&self) -> ControlStatus;
}

/// Fixed control posture; for agents without a live kill-switch wire-up
/// and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticControl(pub ControlStatus);

impl ControlProbe for StaticControl {
    fn status(&self) -> ControlStatus {
        self.0
    }
}

/// Orchestrates both handshake directions for one agent.
pub struct HandshakeService {
    identity: RuntimeIdentity,
    tokens: TokenService,
    inbound_policy: InboundPolicy,
    outbound_policy: OutboundPolicy,
    control: std::sync::Arc<dyn ControlProbe>,
    sink: std::sync::Arc<dyn EventSink>,
}

impl HandshakeService {
    pub fn new(
        identity: RuntimeIdentity,
        tokens: TokenService,
        inbound_policy: InboundPolicy,
        outbound_policy: OutboundPolicy,
        control: std::sync::Arc<dyn ControlProbe>,
        sink: std::sync::Arc<dyn EventSink>,
    ) -> Self {
        Self {
            identity,
            tokens,
            inbound_policy,
            outbound_policy,
            control,
            sink,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Handle an inbound call's headers. On success the caller is
    /// identified and a fresh response token targeted at it is minted.
    pub async fn inbound(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<InboundHandshake, HandshakeError> {
        self.emit("handshake.started", Criticality::Normal, json!({"direction": "inbound"}));

        let token = header_value(headers, HDR_TOKEN);
        let Some(token) = token else {
            if self.inbound_policy.require_token {
                let error = HandshakeError {
                    code: "MISSING_CLAIMS",
                    message: "caller presented no governance token".to_string(),
                };
                self.emit_failed("inbound", None, &error);
                return Err(error);
            }
            // Token-less handshake permitted: answer with our token anyway.
            let response_token = self.mint_for("anonymous")?;
            self.emit(
                "handshake.completed",
                Criticality::Normal,
                json!({"direction": "inbound", "peer": null}),
            );
            return Ok(InboundHandshake {
                peer: None,
                response_token,
            });
        };

        let peer = match self.tokens.validate(token) {
            Ok(peer) => {
                self.emit(
                    "token.validated",
                    Criticality::Normal,
                    json!({"direction": "inbound", "peerInstanceId": peer.sub, "jti": peer.jti}),
                );
                peer
            }
            Err(e) => {
                self.emit(
                    "token.validation_failed",
                    Criticality::High,
                    json!({"direction": "inbound", "code": e.code()}),
                );
                let error: HandshakeError = e.into();
                self.emit_failed("inbound", None, &error);
                return Err(error);
            }
        };

        self.emit(
            "policy.checked",
            Criticality::Normal,
            json!({"direction": "inbound", "peerInstanceId": peer.sub}),
        );
        if let Err(rejection) = self.inbound_policy.evaluate(&peer).await {
            self.emit(
                "policy.violated",
                Criticality::High,
                json!({
                    "direction": "inbound",
                    "peerInstanceId": peer.sub,
                    "rule": rejection.rule,
                    "reason": rejection.reason,
                }),
            );
            let error = HandshakeError {
                code: "POLICY_VIOLATION",
                message: format!("{}: {}", rejection.rule, rejection.reason),
            };
            self.emit_failed("inbound", Some(&peer), &error);
            return Err(error);
        }

        // Answer with a token addressed to the caller instance.
        let response_token = self.mint_for(&peer.sub.to_string())?;
        self.emit(
            "handshake.completed",
            Criticality::Normal,
            json!({
                "direction": "inbound",
                "peerInstanceId": peer.sub,
                "peerAssetId": peer.aigos.identity.asset_id,
                "responseJti": response_token.jti,
            }),
        );
        Ok(InboundHandshake {
            peer: Some(peer),
            response_token,
        })
    }

    /// Prepare an outbound call to `target_url`: pre-flight the policy and
    /// produce the headers to attach.
    pub fn outbound(&self, target_url: &str) -> Result<OutboundRequest, HandshakeError> {
        let domain = domain_of(target_url).ok_or_else(|| HandshakeError {
            code: "INVALID_FORMAT",
            message: format!("cannot extract domain from '{target_url}'"),
        })?;
        self.emit(
            "handshake.started",
            Criticality::Normal,
            json!({"direction": "outbound", "domain": domain}),
        );

        if let Err(rejection) = self.outbound_policy.pre_flight(&domain) {
            self.emit(
                "policy.violated",
                Criticality::High,
                json!({
                    "direction": "outbound",
                    "domain": domain,
                    "rule": rejection.rule,
                    "reason": rejection.reason,
                }),
            );
            let error = HandshakeError {
                code: "POLICY_VIOLATION",
                message: format!("{}: {}", rejection.rule, rejection.reason),
            };
            self.emit_failed("outbound", None, &error);
            return Err(error);
        }

        let mut headers: Vec<(&'static str, String)> =
            vec![(HDR_PROTOCOL, PROTOCOL_VERSION.to_string())];
        let token = if self.outbound_policy.include_token {
            let issued = self.mint_for(&domain)?;
            headers.push((HDR_TOKEN, issued.token.clone()));
            headers.push((HDR_REQUEST_ID, issued.jti.clone()));
            Some(issued)
        } else {
            None
        };

        self.emit(
            "handshake.completed",
            Criticality::Normal,
            json!({
                "direction": "outbound",
                "domain": domain,
                "jti": token.as_ref().map(|t| t.jti.clone()),
            }),
        );
        Ok(OutboundRequest { domain, headers, token })
    }

    /// Validate and policy-check the response token of an outbound call.
    /// Returns `None` when response validation is configured off.
    pub async fn complete_outbound(
        &self,
        response_headers: &HashMap<String, String>,
    ) -> Result<Option<TokenClaims>, HandshakeError> {
        if !self.outbound_policy.validate_response_tokens {
            return Ok(None);
        }
        let token = header_value(response_headers, HDR_TOKEN).ok_or_else(|| {
            let error = HandshakeError {
                code: "MISSING_CLAIMS",
                message: "target returned no governance token".to_string(),
            };
            self.emit_failed("outbound", None, &error);
            error
        })?;

        let peer = self.tokens.validate(token).map_err(|e| {
            self.emit(
                "token.validation_failed",
                Criticality::High,
                json!({"direction": "outbound", "code": e.code()}),
            );
            let error: HandshakeError = e.into();
            self.emit_failed("outbound", None, &error);
            error
        })?;

        if let Err(rejection) = self.outbound_policy.evaluate_response(&peer).await {
            let error = HandshakeError {
                code: "POLICY_VIOLATION",
                message: format!("{}: {}", rejection.rule, rejection.reason),
            };
            self.emit_failed("outbound", Some(&peer), &error);
            return Err(error);
        }
        Ok(Some(peer))
    }

    fn mint_for(&self, audience: &str) -> Result<IssuedToken, HandshakeError> {
        let issued = self
            .tokens
            .generate(&self.identity, audience, None, self.control.status())?;
        self.emit(
            "token.generated",
            Criticality::Normal,
            json!({"audience": audience, "jti": issued.jti}),
        );
        Ok(issued)
    }

    fn emit(&self, event_type: &str, criticality: Criticality, data: serde_json::Value) {
        let mut data = data;
        if let Some(map) = data.as_object_mut() {
            map.insert("instanceId".to_string(), json!(self.identity.instance_id));
        }
        self.sink.submit(
            EventBuilder::new(
                event_type,
                "token",
                self.identity.org_id().to_string(),
                self.identity.asset_id.clone(),
            )
            .source("aigos-a2a")
            .criticality(criticality)
            .data(data)
            .build(),
        );
    }

    fn emit_failed(&self, direction: &str, peer: Option<&TokenClaims>, error: &HandshakeError) {
        tracing::warn!(
            direction,
            code = error.code,
            message = %error.message,
            "Handshake failed"
        );
        self.emit(
            "handshake.failed",
            Criticality::High,
            json!({
                "direction": direction,
                "code": error.code,
                "peerInstanceId": peer.map(|p| p.sub),
            }),
        );
    }
}

/// Case-insensitive header lookup.
fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Extract the host from a URL without pulling in a URL parser: strip the
/// scheme, cut at the first `/`, drop any port or userinfo.
fn domain_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host_port = rest.split(['/', '?', '#']).next()?;
    let host_port = host_port.rsplit('@').next()?;
    let host = host_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
