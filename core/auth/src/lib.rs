//! Token acquisition for Integrator.
//!
//! Loads the public-client identity from the secrets file and produces
//! bearer tokens, preferring a silently cached session and falling back to
//! an interactive login.
//!
//! # Components
//! - [`Credentials`]: validated secrets
//! - [`IdentityClient`]: account cache + silent/interactive token requests
//! - [`PublicClient`]: OAuth2 implementation (device code or browser PKCE)
//! - [`TokenProvider`]: the silent-then-interactive sequence

pub mod credentials;
pub mod identity;
pub mod loopback;
pub mod provider;
pub mod public_client;

pub use credentials::{Credentials, DEFAULT_GRAPH_BASE_URL};
pub use identity::{Account, IdentityClient, TokenResult};
pub use provider::{TokenAcquisition, TokenOptions, TokenProvider};
pub use public_client::{DeviceCodeHandler, DeviceCodePrompt, InteractiveMode, PublicClient};
