//! Signature image stamping for cabinet capture.
//!
//! Embeds a raster signature image onto the last page of the base document
//! and draws an audit strip beneath it (signer label, timestamp, requester
//! IP, truncated session token). The result is the locally signed PDF that
//! replaces the provider-signed document for in-person completions.

use crate::PdfError;
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, xobject, Dictionary, Document, Object, ObjectId, Stream};

/// Facts drawn on the audit strip next to the embedded signature.
#[derive(Debug, Clone)]
pub struct SignatureStamp {
    /// Signer description, e.g. "parent1 - Jeanne Martin"
    pub signer_label: String,
    /// Capture timestamp
    pub signed_at: DateTime<Utc>,
    /// IP of the supervised device that submitted the image
    pub requester_ip: String,
    /// Truncated session token, enough to correlate with the session record
    pub session_reference: String,
}

/// Embeds a PNG signature image onto the last page of `base_pdf` and draws
/// the audit strip. Returns the stamped document bytes; `base_pdf` is not
/// modified.
///
/// # Errors
///
/// Returns [`PdfError`] if the base fails to parse, has no pages, or the
/// image cannot be decoded and embedded.
pub fn stamp_signature(
    base_pdf: &[u8],
    png: &[u8],
    stamp: &SignatureStamp,
) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::load_mem(base_pdf)?;

    let pages = doc.get_pages();
    let page_id = *pages
        .values()
        .next_back()
        .ok_or_else(|| PdfError::Malformed("document has no pages".to_string()))?;

    let image = xobject::image_from(png.to_vec()).map_err(|e| PdfError::Image(e.to_string()))?;
    doc.insert_image(page_id, image, (390.0, 96.0), (150.0, 56.0))
        .map_err(|e| PdfError::Image(e.to_string()))?;

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    ensure_page_font(&mut doc, page_id, "FStamp", font_id)?;

    let lines = [
        format!(
            "Signed in person by {} on {}",
            stamp.signer_label,
            stamp.signed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!(
            "Device IP {} / session {}",
            stamp.requester_ip, stamp.session_reference
        ),
    ];

    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["FStamp".into(), 8.into()]),
        Operation::new("TL", vec![10.into()]),
        Operation::new("Td", vec![56.into(), 80.into()]),
    ];
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(line.as_str())],
        ));
    }
    operations.push(Operation::new("ET", vec![]));
    operations.push(Operation::new("Q", vec![]));

    append_page_content(&mut doc, page_id, Content { operations })?;

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Appends a content stream to a page, preserving existing content.
fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Content,
) -> Result<(), PdfError> {
    let encoded = content.encode()?;
    let stream_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page = page_dict_mut(doc, page_id)?;

    enum Shape {
        Array,
        Single(ObjectId),
        Missing,
    }
    let shape = match page.get(b"Contents") {
        Ok(Object::Array(_)) => Shape::Array,
        Ok(Object::Reference(id)) => Shape::Single(*id),
        _ => Shape::Missing,
    };

    match shape {
        Shape::Array => {
            if let Ok(Object::Array(items)) = page.get_mut(b"Contents") {
                items.push(Object::Reference(stream_id));
            }
        }
        Shape::Single(existing) => {
            page.set(
                "Contents",
                vec![Object::Reference(existing), Object::Reference(stream_id)],
            );
        }
        Shape::Missing => {
            page.set("Contents", stream_id);
        }
    }

    Ok(())
}

/// Makes `font_id` available on the page's resources under `key`.
///
/// Resources and the nested font dictionary may each be inline, referenced,
/// or absent; all combinations occur in documents from template renderers
/// and providers.
fn ensure_page_font(
    doc: &mut Document,
    page_id: ObjectId,
    key: &str,
    font_id: ObjectId,
) -> Result<(), PdfError> {
    let resources_ref = {
        let page = page_dict_mut(doc, page_id)?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => {
                page.set("Resources", Object::Dictionary(Dictionary::new()));
                None
            }
        }
    };

    // Locate the font dictionary (may itself be a reference).
    let font_ref = {
        let resources = resources_dict_mut(doc, page_id, resources_ref)?;
        match resources.get(b"Font") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => {
                resources.set("Font", Object::Dictionary(Dictionary::new()));
                None
            }
        }
    };

    if let Some(font_dict_id) = font_ref {
        let fonts = doc
            .get_object_mut(font_dict_id)
            .and_then(Object::as_dict_mut)?;
        fonts.set(key, font_id);
    } else {
        let resources = resources_dict_mut(doc, page_id, resources_ref)?;
        if let Ok(Object::Dictionary(fonts)) = resources.get_mut(b"Font") {
            fonts.set(key, font_id);
        }
    }

    Ok(())
}

/// Mutable access to the page's resources, whether inline or referenced.
fn resources_dict_mut(
    doc: &mut Document,
    page_id: ObjectId,
    resources_ref: Option<ObjectId>,
) -> Result<&mut Dictionary, PdfError> {
    match resources_ref {
        Some(id) => Ok(doc.get_object_mut(id).and_then(Object::as_dict_mut)?),
        None => {
            let page = page_dict_mut(doc, page_id)?;
            match page.get_mut(b"Resources") {
                Ok(Object::Dictionary(resources)) => Ok(resources),
                _ => Err(PdfError::Malformed(
                    "page resources are not a dictionary".to_string(),
                )),
            }
        }
    }
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, PdfError> {
    Ok(doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?)
}
