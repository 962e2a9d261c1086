use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::state::KycDocument;
use crate::types::{BorrowerId, DocumentStatus, DocumentType, KycDecision, KycStatus};

/// documents that together make a borrower verified
pub const REQUIRED_DOCUMENTS: [DocumentType; 3] = [
    DocumentType::NationalId,
    DocumentType::DriversLicense,
    DocumentType::Selfie,
];

/// borrower-level kyc status implied by their current documents
pub fn derive_kyc_status(documents: &[KycDocument]) -> KycStatus {
    if documents.is_empty() {
        return KycStatus::NotStarted;
    }
    let all_approved = REQUIRED_DOCUMENTS.iter().all(|required| {
        documents
            .iter()
            .any(|d| d.doc_type == *required && d.status == DocumentStatus::Approved)
    });
    if all_approved {
        return KycStatus::Verified;
    }
    let any_pending = documents.iter().any(|d| d.status == DocumentStatus::Pending);
    let any_rejected = documents.iter().any(|d| d.status == DocumentStatus::Rejected);
    if any_rejected && !any_pending {
        KycStatus::Rejected
    } else {
        KycStatus::Pending
    }
}

pub fn new_document(borrower_id: BorrowerId, doc_type: DocumentType, now: DateTime<Utc>) -> KycDocument {
    KycDocument {
        id: Uuid::new_v4(),
        borrower_id,
        doc_type,
        status: DocumentStatus::Pending,
        submitted_at: now,
        reviewed_at: None,
        rejection_reason: None,
    }
}

/// apply an admin decision to a pending document
pub fn review(document: &mut KycDocument, decision: &KycDecision, now: DateTime<Utc>) -> Result<()> {
    if document.status != DocumentStatus::Pending {
        return Err(EngineError::InvalidTransition {
            entity: "kyc document",
            current: document.status.to_string(),
            attempted: "review".to_string(),
        });
    }
    match decision {
        KycDecision::Approve => {
            document.status = DocumentStatus::Approved;
            document.rejection_reason = None;
        }
        KycDecision::Reject { reason } => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(EngineError::validation("a rejection reason is required"));
            }
            document.status = DocumentStatus::Rejected;
            document.rejection_reason = Some(reason.to_string());
        }
    }
    document.reviewed_at = Some(now);
    Ok(())
}
