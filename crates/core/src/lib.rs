//! Core domain logic for Paraphe: per-document two-party signature
//! orchestration for a medical practice.
//!
//! Each legal document of a case (authorization, informed consent, fee
//! quote) moves through a monotonic state machine
//! (`draft -> sent -> partially_signed -> completed`) fed by two completion
//! channels: a remote e-signature provider reconciled through webhooks, and
//! an in-person cabinet capture on a supervised device. Both channels funnel
//! through [`orchestrator::SignatureOrchestrator::apply_signature_event`],
//! which owns the
//! transition logic, the artifact pipeline, and the provider-side purge.
//!
//! Module map:
//!
//! - [`model`] - persisted records and their invariants
//! - [`store`] - JSON-file persistence with serialized read-modify-write
//! - [`cases`] - case directory lookup (external collaborator boundary)
//! - [`notify`] - outbound invitation boundary
//! - [`orchestrator`] - initiation and the signature state machine
//! - [`artifacts`] - artifact download, storage, and final PDF assembly
//! - [`cabinet`] - in-person capture sessions
//! - [`webhook`] - provider event reconciliation
//! - [`sweep`] - read-only integrity audit

pub mod artifacts;
pub mod cabinet;
pub mod cases;
pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod store;
pub mod sweep;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SignConfig;
pub use error::{SignatureError, SignatureResult};
