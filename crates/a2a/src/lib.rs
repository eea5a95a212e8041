//! AIGOS-A2A: Agent-to-Agent Governance Tokens
//!
//! JWT-shaped tokens (`typ: AIGOS-GOV+jwt`) carrying identity, governance,
//! control, capability and lineage claims, plus the mutual handshake that
//! exchanges them: callers stamp `X-AIGOS-Token` on outbound requests,
//! callees validate it, run peer policy, and answer with a token of their
//! own. Signing keys rotate through a `kid`-indexed ring.

pub mod claims;
pub mod handshake;
pub mod keys;
pub mod policy;
pub mod token;

pub use claims::{
    aigos_claims, capability_hash, AigosClaims, CapabilityClaims, ControlClaims, ControlStatus,
    GovernanceClaims, IdentityClaims, LineageClaims, TokenClaims, DEFAULT_TTL_SECS,
    PROTOCOL_VERSION, TOKEN_TYP,
};
pub use handshake::{
    ControlProbe, HandshakeError, HandshakeService, InboundHandshake, OutboundRequest,
    StaticControl, HDR_PROTOCOL, HDR_REQUEST_ID, HDR_TOKEN,
};
pub use keys::{KeyError, KeyRing, SigningKey};
pub use policy::{InboundPolicy, OutboundPolicy, PeerCheck, PolicyRejection};
pub use token::{IssuedToken, TokenConfig, TokenError, TokenService, ValidationOutcome};
