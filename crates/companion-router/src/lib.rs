//! Multi-provider LLM request router.
//!
//! Selects among ranked language-model providers per role, puts failing
//! providers on exponentially growing cooldowns and fails over to the next
//! candidate until one answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  route(role)  ┌──────────────────────────────┐
//! │ RequestRouter│──────────────>│ RouterContext                │
//! │ (failover)   │               │  ProviderRegistry (ranked)   │
//! └──────┬───────┘               │  CooldownTracker  (DashMap)  │
//!        │                       └──────────────────────────────┘
//!        │ call(profile, payload, timeout)
//!  ┌─────┴───────┐
//!  │ ChatAdapter │  HttpChatAdapter: OpenAI-compatible / Gemini
//!  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`profile`] -- Provider profiles and roles.
//! - [`adapter`] -- The uniform chat-completion contract and payload types.
//! - [`http`] -- `reqwest` implementation of the contract.
//! - [`cooldown`] -- Backoff policy and per-provider failure state.
//! - [`registry`] -- Ranked profiles per role.
//! - [`router`] -- Sequential and racing failover.
//! - [`status`] -- Diagnostic snapshot.
//! - [`error`] -- Router error types.

pub mod adapter;
pub mod cooldown;
pub mod error;
pub mod http;
pub mod profile;
pub mod registry;
pub mod router;
pub mod status;

pub use adapter::{
    CallErrorKind, ChatAdapter, ChatMessage, ChatPayload, ChatReply, ImageAttachment, MessageRole,
    ProviderCallError,
};
pub use cooldown::{BackoffPolicy, CooldownState, CooldownTracker};
pub use error::{Result, RouterError};
pub use http::HttpChatAdapter;
pub use profile::{ProviderProfile, ProviderRole, WireFormat};
pub use registry::ProviderRegistry;
pub use router::{
    AttemptOutcome, RequestRouter, RouterConfig, RouterContext, RoutedReply, RoutingAttempt,
    RoutingStrategy,
};
pub use status::{ProviderStatus, RoleStatus};
