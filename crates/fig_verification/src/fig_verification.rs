//! Fig Verification - Verification runtimes
//!
//! A verification checks that a client's settings work, e.g. that a
//! configured endpoint answers. Two kinds exist:
//!
//! - Dynamic: an ES module snippet exporting `verify(settings)`, compiled and
//!   run in a fresh QuickJS runtime on every call (`DynamicVerifier`)
//! - Plugin: a native `Verifier` looked up by name (`PluginVerifier`)
//!
//! `SettingVerifier` dispatches between the two and always returns a
//! `VerificationResult`.

pub mod builtin;
mod compiler;
mod dispatcher;
mod dynamic;
mod plugin;
mod registry;
mod verifier;

pub use compiler::{
    CompileError, CompiledModule, ENTRY_POINT, ExecuteError, InstantiateError, SnippetCompiler,
    VerificationEntry,
};
pub use dispatcher::{SettingVerifier, VerificationConfig};
pub use dynamic::{CANCELLED_MESSAGE, DynamicVerificationError, DynamicVerifier, timed_out_message};
pub use plugin::{PluginError, PluginVerifier, resolve_arguments};
pub use registry::{RegistryError, VerifierRegistry};
pub use verifier::{VerificationOutcome, Verifier, VerifierError, VerifierInfo, string_arg};
