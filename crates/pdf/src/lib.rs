//! Paraphe PDF assembly
//!
//! This crate contains every PDF manipulation the signature core needs:
//!
//! - [`merge`] - combine the base legal document, the evidence PDF and the
//!   signed overlay into one final compliance PDF
//! - [`stamp_signature`] - embed a handwritten signature image onto the last
//!   page of a document together with an audit strip (cabinet capture)
//! - [`render_report`] - produce a simple one-page text PDF, used for the
//!   cabinet audit/evidence document and the PHI-free derivative document
//!   sent to the e-signature provider
//! - [`has_pdf_magic`] - the integrity check applied by the verification
//!   sweep to every stored PDF byte stream
//!
//! Template rendering of the legal document *content* is out of scope; this
//! crate only works on document-level byte streams.

mod assemble;
mod report;
mod stamp;

pub use assemble::merge;
pub use report::render_report;
pub use stamp::{stamp_signature, SignatureStamp};

/// Errors that can occur during PDF assembly.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("failed to write PDF: {0}")]
    Io(#[from] std::io::Error),

    #[error("no documents given to merge")]
    NothingToMerge,

    #[error("malformed PDF: {0}")]
    Malformed(String),

    #[error("failed to embed signature image: {0}")]
    Image(String),
}

/// Whether a byte stream starts with the PDF magic header.
///
/// Every stored PDF artifact must satisfy this; the verification sweep flags
/// stored final documents that do not.
#[must_use]
pub fn has_pdf_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_check_accepts_pdf_header() {
        assert!(has_pdf_magic(b"%PDF-1.5 rest of file"));
    }

    #[test]
    fn magic_check_rejects_other_bytes() {
        assert!(!has_pdf_magic(b"PK\x03\x04 zip archive"));
        assert!(!has_pdf_magic(b""));
        assert!(!has_pdf_magic(b"  %PDF"));
    }
}
