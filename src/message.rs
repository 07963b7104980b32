//! SINLI message model — parses a document body into routing fields.
//!
//! A SINLI document is an XML tree whose root holds three sibling
//! sections: `ARCHIVO` (file metadata), `ORIGEN` and `DESTINO` (each
//! carrying a `CODIGO_SINLI` routing code). The root tag name is the
//! document type tag and is not inspected here; the type is read from
//! `ARCHIVO/CODIGO`.

use quick_xml::Reader;
use quick_xml::events::Event;
use sha2::{Digest, Sha256};

use crate::error::MessageError;

/// One routable SINLI document.
///
/// Fully derived from its body at construction; there are no mutators.
/// Build a new value instead of editing an existing one.
#[derive(Debug, Clone)]
pub struct SinliMessage {
    /// Raw XML text of the document.
    pub body: String,
    /// Routing code of the sender (`ORIGEN/CODIGO_SINLI`).
    pub source_code: String,
    /// Routing code of the recipient (`DESTINO/CODIGO_SINLI`).
    pub destination_code: String,
    /// Free-text description (`ARCHIVO/DESCRIPCION`), may be empty.
    pub description: String,
    /// Document type tag (`ARCHIVO/CODIGO`), e.g. `REMFAA`.
    pub document_type: String,
    /// Name used when the message is materialized as a file or attachment.
    pub filename: String,
}

impl SinliMessage {
    /// Parse a document body into a message.
    ///
    /// When `filename` is `None` a deterministic name is generated from
    /// the routing fields and a fingerprint of the body.
    pub fn parse(body: impl Into<String>, filename: Option<String>) -> Result<Self, MessageError> {
        let body = body.into();
        let fields = extract_fields(&body)?;

        let source_code = require(fields.source_code, "ORIGEN/CODIGO_SINLI")?;
        let destination_code = require(fields.destination_code, "DESTINO/CODIGO_SINLI")?;
        let document_type = require(fields.document_type, "ARCHIVO/CODIGO")?;
        let description = fields.description.unwrap_or_default();

        let filename = filename.unwrap_or_else(|| {
            format!(
                "{}_{}_{}_{}.xml",
                source_code,
                destination_code,
                document_type,
                fingerprint(&body)
            )
        });

        Ok(Self {
            body,
            source_code,
            destination_code,
            description,
            document_type,
            filename,
        })
    }
}

/// Raw field values as found in the document, before validation.
#[derive(Debug, Default)]
struct RawFields {
    source_code: Option<String>,
    destination_code: Option<String>,
    description: Option<String>,
    document_type: Option<String>,
}

fn require(value: Option<String>, field: &str) -> Result<String, MessageError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(MessageError::MalformedDocument {
            reason: format!("missing field {field}"),
        }),
    }
}

/// Walk the XML event stream tracking the element path.
///
/// Sections are direct children of the root, fields direct children of
/// sections; anything deeper or unknown is ignored.
fn extract_fields(body: &str) -> Result<RawFields, MessageError> {
    let malformed = |reason: String| MessageError::MalformedDocument { reason };

    let mut reader = Reader::from_str(body);
    let mut path: Vec<String> = Vec::new();
    let mut fields = RawFields::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(e)) => {
                if path.len() != 3 {
                    continue;
                }
                let text = e
                    .unescape()
                    .map_err(|e| malformed(format!("bad text content: {e}")))?;
                // Whitespace-only text is document formatting; anything
                // else is the field value, kept byte-for-byte.
                if text.trim().is_empty() {
                    continue;
                }
                store_field(&mut fields, &path[1], &path[2], &text);
            }
            Ok(Event::CData(e)) => {
                if path.len() != 3 {
                    continue;
                }
                let bytes = e.into_inner();
                let text = String::from_utf8_lossy(&bytes);
                if !text.trim().is_empty() {
                    store_field(&mut fields, &path[1], &path[2], &text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(e.to_string())),
        }
    }

    if !path.is_empty() {
        return Err(malformed(format!("unclosed element {}", path.join("/"))));
    }

    Ok(fields)
}

fn store_field(fields: &mut RawFields, section: &str, field: &str, text: &str) {
    let slot = match (section, field) {
        ("ORIGEN", "CODIGO_SINLI") => &mut fields.source_code,
        ("DESTINO", "CODIGO_SINLI") => &mut fields.destination_code,
        ("ARCHIVO", "DESCRIPCION") => &mut fields.description,
        ("ARCHIVO", "CODIGO") => &mut fields.document_type,
        _ => return,
    };
    *slot = Some(text.to_string());
}

/// Content-stable fingerprint used in generated filenames.
///
/// Same body always yields the same value, within and across runs, so
/// re-delivering an identical document overwrites rather than duplicates.
fn fingerprint(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
