//! Outbound invitation boundary.
//!
//! Email/SMS delivery is an external collaborator; the core only announces
//! that a signer should receive their hosted signing link. Production
//! wiring uses [`LogNotifier`]; tests use a recording implementation.

use crate::cases::ContactDetails;
use crate::model::{DocumentKind, SignerRole};
use uuid::Uuid;

/// One invitation to sign, ready for delivery.
#[derive(Debug, Clone)]
pub struct SignatureInvitation {
    pub case_id: Uuid,
    pub document_id: Uuid,
    pub kind: DocumentKind,
    pub role: SignerRole,
    pub recipient: ContactDetails,
    pub link: String,
}

pub trait SignatureNotifier: Send + Sync {
    fn notify(&self, invitation: &SignatureInvitation);
}

/// Logs the invitation instead of delivering it.
pub struct LogNotifier;

impl SignatureNotifier for LogNotifier {
    fn notify(&self, invitation: &SignatureInvitation) {
        tracing::info!(
            document_id = %invitation.document_id,
            kind = invitation.kind.code(),
            role = invitation.role.code(),
            recipient = %invitation.recipient.display_name(),
            "signature invitation ready for delivery"
        );
    }
}

#[cfg(test)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<SignatureInvitation>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SignatureInvitation> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SignatureNotifier for RecordingNotifier {
    fn notify(&self, invitation: &SignatureInvitation) {
        self.sent.lock().unwrap().push(invitation.clone());
    }
}
