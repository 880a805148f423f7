//! posproctor-client — one diagnostic exchange against one commander.
//!
//! [`CommanderClient`] authenticates, fetches the forecourt and payment
//! diagnostics documents, and folds them into a
//! [`DiagnosticResult`](posproctor_core::DiagnosticResult). Every failure
//! is a [`QueryFailure`] that [`classify`] maps onto the canonical
//! [`ErrorKind`](posproctor_core::ErrorKind).
//!
//! # Architecture
//!
//! ```text
//! CommanderClient::query(target, timeout)
//!   └── tokio::time::timeout (hard ceiling on the whole exchange)
//!       ├── TokenCache hit? ── else GET cmd=validate → session cookie
//!       ├── GET cmd=vforecourtdiagnostics → parse::forecourt()
//!       └── GET cmd=vpaymentdiagnostics   → parse::payment() (best effort)
//!
//! Transport: TCP (+ rustls) → hyper http1, one connection per request
//! ```
//!
//! No retries: one poll per target per cycle keeps cycle duration bounded.

pub mod classify;
pub mod client;
pub mod parse;
pub mod token;
pub mod transport;

pub use classify::{QueryFailure, classify};
pub use client::{CommanderClient, DiagnosticClient};
pub use token::TokenCache;
pub use transport::{Endpoint, TlsConfig, Transport};
