//! Single-page text PDF rendering.
//!
//! Used for two document classes that the core generates itself:
//! the cabinet audit/evidence PDF (signing circumstances, hashes) and the
//! PHI-free derivative document uploaded to the e-signature provider.

use crate::PdfError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// Renders a one-page A4 PDF with a title and a list of body lines.
///
/// The layout is deliberately plain: a heading followed by one line per
/// entry. Lines that would run off the page are still emitted; callers keep
/// their reports short.
///
/// # Errors
///
/// Returns [`PdfError`] if content encoding or serialisation fails.
pub fn render_report(title: &str, lines: &[String]) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    // Resources sit on the page, not the page tree, so pages survive a merge
    // into another document unchanged.
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 14.into()]),
        Operation::new("TL", vec![18.into()]),
        Operation::new("Td", vec![56.into(), 780.into()]),
        Operation::new("Tj", vec![Object::string_literal(title)]),
        Operation::new("Tf", vec!["F1".into(), 10.into()]),
        Operation::new("TL", vec![13.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("T*", vec![]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(line.as_str())],
        ));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::has_pdf_magic;

    #[test]
    fn renders_valid_single_page_pdf() {
        let lines = vec![
            "Document: informed consent (catalog v1)".to_string(),
            "Signer: parent1".to_string(),
            "Content hash: 0123456789abcdef".to_string(),
        ];
        let bytes = render_report("Signature audit record", &lines).unwrap();

        assert!(has_pdf_magic(&bytes));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn renders_with_no_body_lines() {
        let bytes = render_report("Acknowledgement of signature", &[]).unwrap();
        assert!(has_pdf_magic(&bytes));
        assert!(Document::load_mem(&bytes).is_ok());
    }

    #[test]
    fn escapes_awkward_characters() {
        let lines = vec!["path (with) parens \\ and backslash".to_string()];
        let bytes = render_report("Audit", &lines).unwrap();
        assert!(Document::load_mem(&bytes).is_ok());
    }
}
