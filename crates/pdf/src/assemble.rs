//! Multi-document PDF merge.
//!
//! The final compliance artifact is assembled by concatenating, in order,
//! the base rendered legal document, the evidence/audit PDF and the signed
//! overlay. Inputs are whole PDF documents; pages are carried over in input
//! order under a single rebuilt page tree.

use crate::PdfError;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;

/// Merges complete PDF documents into one, preserving page order.
///
/// Outline and bookmark structures are dropped; only pages and the objects
/// they reference survive. The caller decides which parts to include;
/// skipping an absent part is the caller's best-effort policy, an empty
/// input list is an error here.
///
/// # Errors
///
/// Returns [`PdfError`] if no parts are given, any part fails to parse, or
/// the inputs contain no pages.
pub fn merge(parts: &[Vec<u8>]) -> Result<Vec<u8>, PdfError> {
    if parts.is_empty() {
        return Err(PdfError::NothingToMerge);
    }

    let mut documents = Vec::with_capacity(parts.len());
    for part in parts {
        documents.push(Document::load_mem(part)?);
    }

    let mut max_id = 1;
    let mut documents_pages: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut documents_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut document = Document::with_version("1.5");

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for object_id in doc.get_pages().into_values() {
            if let Ok(object) = doc.get_object(object_id) {
                documents_pages.insert(object_id, object.to_owned());
            }
        }
        documents_objects.extend(doc.objects);
    }

    let mut catalog_object: Option<(ObjectId, Object)> = None;
    let mut pages_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in documents_objects.iter() {
        match dict_type(object) {
            Some(b"Catalog") => {
                catalog_object = Some((
                    if let Some((id, _)) = catalog_object {
                        id
                    } else {
                        *object_id
                    },
                    object.clone(),
                ));
            }
            Some(b"Pages") => {
                if let Ok(dictionary) = object.as_dict() {
                    let mut dictionary = dictionary.clone();
                    if let Some((_, ref object)) = pages_object {
                        if let Ok(old_dictionary) = object.as_dict() {
                            dictionary.extend(old_dictionary);
                        }
                    }
                    pages_object = Some((
                        if let Some((id, _)) = pages_object {
                            id
                        } else {
                            *object_id
                        },
                        Object::Dictionary(dictionary),
                    ));
                }
            }
            // Pages are re-parented below; navigation structures are dropped.
            Some(b"Page") | Some(b"Outlines") | Some(b"Outline") => {}
            _ => {
                document.objects.insert(*object_id, object.clone());
            }
        }
    }

    let (pages_id, pages_dict) =
        pages_object.ok_or_else(|| PdfError::Malformed("no page tree found".to_string()))?;
    let (catalog_id, catalog_dict) =
        catalog_object.ok_or_else(|| PdfError::Malformed("no catalog found".to_string()))?;

    if documents_pages.is_empty() {
        return Err(PdfError::Malformed("inputs contain no pages".to_string()));
    }

    for (object_id, object) in documents_pages.iter() {
        if let Ok(dictionary) = object.as_dict() {
            let mut dictionary = dictionary.clone();
            dictionary.set("Parent", pages_id);
            document
                .objects
                .insert(*object_id, Object::Dictionary(dictionary));
        }
    }

    if let Ok(dictionary) = pages_dict.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Count", documents_pages.len() as i64);
        dictionary.set(
            "Kids",
            documents_pages
                .keys()
                .map(|id| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        document
            .objects
            .insert(pages_id, Object::Dictionary(dictionary));
    }

    if let Ok(dictionary) = catalog_dict.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Pages", pages_id);
        dictionary.remove(b"Outlines");
        document
            .objects
            .insert(catalog_id, Object::Dictionary(dictionary));
    }

    document.trailer.set("Root", catalog_id);
    document.max_id = document.objects.len() as u32;
    document.renumber_objects();
    document.compress();

    let mut out = Vec::new();
    document.save_to(&mut out)?;
    Ok(out)
}

/// The `/Type` name of a dictionary object, if it has one.
fn dict_type(object: &Object) -> Option<&[u8]> {
    match object.as_dict().ok()?.get(b"Type") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}
