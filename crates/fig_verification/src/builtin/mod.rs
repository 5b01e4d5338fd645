//! Built-in verifiers
//!
//! Connectivity checks that are registered in every registry built with
//! [`VerifierRegistry::with_builtins`](crate::VerifierRegistry::with_builtins).

mod rest;
mod tcp;

pub use rest::Rest200OkVerifier;
pub use tcp::TcpConnectVerifier;
