//! Single sign-on gating.

pub mod sso;

pub use sso::{
    BotFrameworkTokenClient, GateDecision, SsoGate, TOKEN_SERVICE_URL, TokenFuture,
    UserTokenClient, token_display_name,
};
