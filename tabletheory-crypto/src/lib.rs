//! Envelope encryption for per-attribute secrets: data-key generation over
//! a pluggable KMS seam, update-expression rewriting so encrypted SET
//! assignments never leave the process in plaintext, and a query-time guard
//! that refuses to compile a predicate over an encrypted attribute.

mod guard;
mod kms;
mod rewriter;
mod service;

pub use guard::guard_predicates;
pub use kms::{GeneratedDataKey, KmsClient};
pub use rewriter::UpdateRewriter;
pub use service::EncryptionService;
