//! Host agent session channels
//!
//! Caller side of the session crypto core. A [`SessionChannel`] runs the key
//! handshake for one session and seals/opens payloads for the transport,
//! closing the session when incoming envelopes keep failing authentication.
//!
//! # Architecture
//!
//! ```text
//! session setup ──HandshakeKeys──► SessionChannel::establish
//!                                        │
//!                                        ▼
//!                                  BlockCipher ──unwrap──► KmsClient
//!                                        │
//! transport ◄──── seal / open ───────────┘
//! ```
//!
//! [`run_loopback`] drives an agent/client pair against the in-memory key
//! service; the `hostagent-session` binary wraps it as a smoke test.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod error;
pub mod loopback;

pub use channel::{ChannelConfig, DEFAULT_MAX_AUTH_FAILURES, HandshakeKeys, SessionChannel};
pub use error::ChannelError;
pub use loopback::{LoopbackConfig, LoopbackReport, run_loopback};
