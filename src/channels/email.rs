//! Email channel — POP3 for inbound, SMTP via lettre for outbound.
//!
//! Inbound mail is recognized as a SINLI message when its subject carries
//! the marker token and it holds exactly one XML MIME part. Outbound
//! recipients are resolved through a routing table mapping SINLI codes to
//! email addresses.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as OutboundMail, SmtpTransport, Transport};
use mail_parser::{Message as ParsedMail, MessageParser, MessagePart, MimeHeaders};
use tracing::{debug, error, info};

use crate::channels::Channel;
use crate::channels::pop3::Pop3Client;
use crate::config::EmailSettings;
use crate::error::{ChannelError, ConfigError, MessageError};
use crate::message::SinliMessage;

/// Token that must appear in the subject of a SINLI mail (any case).
const SUBJECT_MARKER: &str = "sinliarg";

/// Body text used when the message carries no description.
const EMPTY_DESCRIPTION_BODY: &str = "Mensaje SINLI adjunto";

/// Connect/IO timeout for outbound SMTP sessions.
const SMTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for inbound POP3 sessions.
const POP3_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport backed by a POP3 mailbox (inbound) and an SMTP relay
/// (outbound).
pub struct EmailChannel {
    settings: EmailSettings,
    /// Routing code → email address, loaded lazily on first delivery.
    routing: Option<HashMap<String, String>>,
    /// Raw mail bytes cached by UIDL uid during the current run.
    messages: HashMap<String, Vec<u8>>,
}

impl EmailChannel {
    /// Create a channel from validated settings.
    ///
    /// The routing table itself is loaded lazily, but its file must
    /// already exist so a misconfigured path aborts the run before any
    /// message is touched.
    pub fn new(settings: EmailSettings) -> Result<Self, ConfigError> {
        if !settings.routing_table.is_file() {
            return Err(ConfigError::MissingRequired {
                key: "email.routing_table".into(),
                hint: format!("no file at {}", settings.routing_table.display()),
            });
        }
        Ok(Self {
            settings,
            routing: None,
            messages: HashMap::new(),
        })
    }

    /// Open and authenticate an inbound mailbox session.
    fn pop_session(&self) -> Result<Pop3Client, ChannelError> {
        let pop = &self.settings.pop;
        let mut client = Pop3Client::connect(&pop.host, pop.port, POP3_READ_TIMEOUT)?;
        if let Some(user) = &pop.username {
            client.login(user, pop.password.as_deref().unwrap_or(""))?;
        }
        Ok(client)
    }

    /// Resolve the delivery address for a destination code, loading the
    /// routing table on first use.
    fn resolve_destination(&mut self, code: &str) -> Result<String, ChannelError> {
        if self.routing.is_none() {
            let table = load_routing_table(&self.settings.routing_table)
                .map_err(ChannelError::Configuration)?;
            info!(entries = table.len(), "Routing table loaded");
            self.routing = Some(table);
        }
        self.routing
            .as_ref()
            .and_then(|table| table.get(code))
            .cloned()
            .ok_or_else(|| ChannelError::UnknownDestination { code: code.into() })
    }

    /// Cache `raw` under `uid` when it is a SINLI mail. Returns whether
    /// it was cached.
    fn ingest(&mut self, uid: &str, raw: Vec<u8>) -> bool {
        let parser = MessageParser::default();
        let matched = match parser.parse(&raw) {
            Some(mail) => {
                debug!(uid, subject = mail.subject().unwrap_or("(none)"), "Read mail");
                is_sinli_mail(&mail)
            }
            None => {
                error!(uid, "Mail could not be parsed, skipping");
                false
            }
        };
        if matched {
            debug!(uid, "SINLI mail recognized");
            self.messages.insert(uid.to_string(), raw);
        }
        matched
    }

    fn parse_address(&self, address: &str, what: &str) -> Result<Mailbox, ChannelError> {
        address
            .parse()
            .map_err(|e| delivery_failed(format!("invalid {what} address {address}: {e}")))
    }
}

impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn enumerate_pending(&mut self) -> Result<Vec<String>, ChannelError> {
        self.messages.clear();
        let mut session = self.pop_session()?;
        let listing = session.uidl()?;
        debug!(count = listing.len(), "Mailbox listed");

        let mut ids = Vec::new();
        for (number, uid) in listing {
            match session.retr(&number) {
                Ok(raw) => {
                    if self.ingest(&uid, raw) {
                        ids.push(uid);
                    }
                }
                Err(e) => error!(uid, error = %e, "Failed to retrieve mail, skipping"),
            }
        }
        session.quit()?;
        info!(count = ids.len(), "Pending SINLI mails found");
        Ok(ids)
    }

    fn fetch(&mut self, id: &str) -> Result<SinliMessage, ChannelError> {
        let raw = self
            .messages
            .get(id)
            .ok_or_else(|| ChannelError::NotFound { id: id.into() })?;

        let parser = MessageParser::default();
        let mail = parser.parse(raw).ok_or_else(|| MessageError::MalformedDocument {
            reason: format!("cached mail {id} is not parseable"),
        })?;
        let part = mail
            .parts
            .iter()
            .find(|p| is_xml_part(p))
            .ok_or_else(|| MessageError::MalformedDocument {
                reason: format!("mail {id} has no XML part"),
            })?;

        let filename = MimeHeaders::attachment_name(part).map(|s| s.to_string());
        let payload = String::from_utf8_lossy(part.contents());
        // Some senders prepend a transport registration line; keep only
        // the document starting at its prologue.
        let body = trim_preamble(&payload);
        Ok(SinliMessage::parse(body, filename)?)
    }

    fn deliver(&mut self, message: &SinliMessage) -> Result<(), ChannelError> {
        let address = self.resolve_destination(&message.destination_code)?;
        debug!(code = %message.destination_code, to = %address, "Destination resolved");

        let body_text = if message.description.is_empty() {
            EMPTY_DESCRIPTION_BODY.to_string()
        } else {
            message.description.clone()
        };
        let xml_type = ContentType::parse("application/xml")
            .map_err(|e| delivery_failed(format!("attachment content type: {e}")))?;

        let mail = OutboundMail::builder()
            .from(self.parse_address(&self.settings.sender, "sender")?)
            .to(self.parse_address(&address, "destination")?)
            .subject(subject_for(message))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body_text))
                    .singlepart(
                        Attachment::new(message.filename.clone())
                            .body(message.body.clone(), xml_type),
                    ),
            )
            .map_err(|e| delivery_failed(format!("failed to build mail: {e}")))?;

        let smtp = &self.settings.smtp;
        let mut builder = SmtpTransport::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .timeout(Some(SMTP_TIMEOUT));
        if let Some(user) = &smtp.username {
            builder = builder.credentials(Credentials::new(
                user.clone(),
                smtp.password.clone().unwrap_or_default(),
            ));
        }

        builder
            .build()
            .send(&mail)
            .map_err(|e| delivery_failed(format!("SMTP send failed: {e}")))?;
        info!(to = %address, filename = %message.filename, "Mail submitted");
        Ok(())
    }

    fn acknowledge(&mut self, id: &str) -> Result<(), ChannelError> {
        // Re-lists the mailbox instead of reusing the enumeration; valid
        // under the single-runner assumption (no concurrent consumer of
        // the same mailbox).
        let mut session = self.pop_session()?;
        let mut found = false;
        for (number, uid) in session.uidl()? {
            if uid == id {
                info!(id, "Deleting mail from POP server");
                session.dele(&number)?;
                found = true;
                break;
            }
        }
        session.quit()?;
        if !found {
            error!(id, "Mail to acknowledge not found on server");
        }
        Ok(())
    }

    fn release(&mut self) {
        self.messages.clear();
    }
}

/// Fixed-form subject line for outbound SINLI mail.
fn subject_for(message: &SinliMessage) -> String {
    format!(
        "SINLIARG: Tipo: {}, De: {}, Para: {}",
        message.document_type, message.source_code, message.destination_code
    )
}

/// A mail carries a SINLI message iff its subject contains the marker
/// token (case-insensitive) and exactly one part has an XML media type.
fn is_sinli_mail(mail: &ParsedMail) -> bool {
    let subject_matches = mail
        .subject()
        .is_some_and(|s| s.to_lowercase().contains(SUBJECT_MARKER));
    subject_matches && mail.parts.iter().filter(|p| is_xml_part(p)).count() == 1
}

fn is_xml_part(part: &MessagePart) -> bool {
    match MimeHeaders::content_type(part) {
        Some(ct) => {
            let subtype_is_xml = ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("xml"));
            subtype_is_xml
                && (ct.ctype().eq_ignore_ascii_case("text")
                    || ct.ctype().eq_ignore_ascii_case("application"))
        }
        None => false,
    }
}

/// Drop any transport preamble before the XML prologue.
fn trim_preamble(text: &str) -> &str {
    if text.starts_with("<?") {
        return text;
    }
    match text.find("<?") {
        Some(pos) => &text[pos..],
        None => text,
    }
}

/// Load the code → address table from a two-column CSV with no header.
/// Duplicate codes keep the last row.
fn load_routing_table(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut table = HashMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (code, address) = line.split_once(',').ok_or_else(|| {
            ConfigError::ParseError(format!(
                "{} line {}: expected code,address",
                path.display(),
                index + 1
            ))
        })?;
        table.insert(code.trim().to_string(), address.trim().to_string());
    }
    Ok(table)
}

fn delivery_failed(reason: String) -> ChannelError {
    ChannelError::DeliveryFailed {
        channel: "email".into(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::config::MailServerSettings;

    const XML_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<REMFAA>
  <ARCHIVO>
    <DESCRIPCION>Factura/Remito 0001-00336393</DESCRIPCION>
    <CODIGO>REMFAA</CODIGO>
  </ARCHIVO>
  <ORIGEN><CODIGO_SINLI>L0002349</CODIGO_SINLI></ORIGEN>
  <DESTINO><CODIGO_SINLI>L0001562</CODIGO_SINLI></DESTINO>
</REMFAA>"#;

    fn raw_mail(subject: &str, xml_parts: usize) -> Vec<u8> {
        let mut mail = format!(
            "From: sender@example.com\r\n\
             To: relay@example.com\r\n\
             Subject: {subject}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
             \r\n\
             --sep\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Mensaje adjunto\r\n"
        );
        for _ in 0..xml_parts {
            mail.push_str(
                "--sep\r\n\
                 Content-Type: text/xml; charset=utf-8\r\n\
                 Content-Disposition: attachment; filename=\"mensaje.xml\"\r\n\
                 \r\n",
            );
            mail.push_str(&XML_DOC.replace('\n', "\r\n"));
            mail.push_str("\r\n");
        }
        mail.push_str("--sep--\r\n");
        mail.into_bytes()
    }

    fn routing_file(rows: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{rows}").unwrap();
        file
    }

    fn channel_with_table(rows: &str) -> (EmailChannel, tempfile::NamedTempFile) {
        let table = routing_file(rows);
        let settings = EmailSettings {
            smtp: MailServerSettings {
                host: "smtp.invalid".into(),
                port: 25,
                username: None,
                password: None,
            },
            pop: MailServerSettings {
                host: "pop.invalid".into(),
                port: 110,
                username: Some("u".into()),
                password: Some("p".into()),
            },
            sender: "relay@example.com".into(),
            routing_table: table.path().to_path_buf(),
        };
        (EmailChannel::new(settings).unwrap(), table)
    }

    // ── Routing table ───────────────────────────────────────────────

    #[test]
    fn routing_table_parses_rows() {
        let file = routing_file(
            "L0001562,sinli@example.com\nL0001563,sinliarg@libreria.example.com\n",
        );
        let table = load_routing_table(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["L0001562"], "sinli@example.com");
        assert!(!table.contains_key("Z0000000"));
    }

    #[test]
    fn routing_table_duplicate_keeps_last() {
        let file = routing_file("L0000001,first@example.com\nL0000001,last@example.com\n");
        let table = load_routing_table(file.path()).unwrap();
        assert_eq!(table["L0000001"], "last@example.com");
    }

    #[test]
    fn routing_table_missing_comma_is_an_error() {
        let file = routing_file("L0000001 no-comma-here\n");
        assert!(load_routing_table(file.path()).is_err());
    }

    #[test]
    fn missing_routing_table_fails_construction() {
        let settings = EmailSettings {
            smtp: MailServerSettings {
                host: "smtp.invalid".into(),
                port: 25,
                username: None,
                password: None,
            },
            pop: MailServerSettings {
                host: "pop.invalid".into(),
                port: 110,
                username: None,
                password: None,
            },
            sender: "relay@example.com".into(),
            routing_table: "/no/such/table.csv".into(),
        };
        assert!(EmailChannel::new(settings).is_err());
    }

    // ── SINLI mail recognition ──────────────────────────────────────

    #[test]
    fn recognizes_marked_mail_with_one_xml_part() {
        let raw = raw_mail("SINLIARG: Tipo: REMFAA, De: L0002349, Para: L0001562", 1);
        let parser = MessageParser::default();
        let mail = parser.parse(&raw).unwrap();
        assert!(is_sinli_mail(&mail));
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        let raw = raw_mail("aviso sinliarg adjunto", 1);
        let parser = MessageParser::default();
        let mail = parser.parse(&raw).unwrap();
        assert!(is_sinli_mail(&mail));
    }

    #[test]
    fn rejects_mail_without_marker() {
        let raw = raw_mail("IGNORE ME", 1);
        let parser = MessageParser::default();
        let mail = parser.parse(&raw).unwrap();
        assert!(!is_sinli_mail(&mail));
    }

    #[test]
    fn rejects_mail_with_two_xml_parts() {
        let raw = raw_mail("SINLIARG doble", 2);
        let parser = MessageParser::default();
        let mail = parser.parse(&raw).unwrap();
        assert!(!is_sinli_mail(&mail));
    }

    #[test]
    fn rejects_mail_without_xml_part() {
        let raw = raw_mail("SINLIARG sin adjunto", 0);
        let parser = MessageParser::default();
        let mail = parser.parse(&raw).unwrap();
        assert!(!is_sinli_mail(&mail));
    }

    // ── Cached enumeration + fetch ──────────────────────────────────

    #[test]
    fn ingest_caches_only_sinli_mail() {
        let (mut ch, _table) = channel_with_table("");
        assert!(ch.ingest("uid-1", raw_mail("SINLIARG mensaje", 1)));
        assert!(!ch.ingest("uid-2", raw_mail("IGNORE ME", 1)));
        assert!(!ch.ingest("uid-3", Vec::new()));
        assert_eq!(ch.messages.len(), 1);
    }

    #[test]
    fn fetch_returns_decoded_xml_payload() {
        let (mut ch, _table) = channel_with_table("");
        ch.ingest("uid-1", raw_mail("SINLIARG mensaje", 1));

        let msg = ch.fetch("uid-1").unwrap();
        assert_eq!(msg.body.replace("\r\n", "\n"), XML_DOC);
        assert_eq!(msg.source_code, "L0002349");
        assert_eq!(msg.destination_code, "L0001562");
        assert_eq!(msg.filename, "mensaje.xml");
    }

    #[test]
    fn fetch_unknown_uid_is_not_found() {
        let (mut ch, _table) = channel_with_table("");
        let err = ch.fetch("never-enumerated").unwrap_err();
        assert!(matches!(err, ChannelError::NotFound { .. }));
    }

    #[test]
    fn release_drops_the_cache() {
        let (mut ch, _table) = channel_with_table("");
        ch.ingest("uid-1", raw_mail("SINLIARG mensaje", 1));
        ch.release();
        ch.release();
        assert!(matches!(
            ch.fetch("uid-1").unwrap_err(),
            ChannelError::NotFound { .. }
        ));
    }

    // ── Preamble trimming ───────────────────────────────────────────

    #[test]
    fn preamble_before_prologue_is_trimmed() {
        assert_eq!(trim_preamble("REGISTRO SINLI\n<?xml?><a/>"), "<?xml?><a/>");
        assert_eq!(trim_preamble("<?xml?><a/>"), "<?xml?><a/>");
        assert_eq!(trim_preamble("no prologue at all"), "no prologue at all");
    }

    // ── Delivery ────────────────────────────────────────────────────

    #[test]
    fn deliver_resolves_routing_table_address() {
        let (mut ch, _table) = channel_with_table("L0001562,sinli@example.com\n");
        assert_eq!(
            ch.resolve_destination("L0001562").unwrap(),
            "sinli@example.com"
        );
    }

    #[test]
    fn deliver_unknown_destination_fails_before_smtp() {
        let (mut ch, _table) = channel_with_table("L0001562,sinli@example.com\n");
        let msg = SinliMessage::parse(
            XML_DOC.replace("L0001562", "E9999999"),
            Some("m.xml".into()),
        )
        .unwrap();
        // smtp.invalid is unreachable; an UnknownDestination error proves
        // delivery stopped at resolution, before any SMTP traffic.
        let err = ch.deliver(&msg).unwrap_err();
        assert!(matches!(err, ChannelError::UnknownDestination { .. }));
    }

    // ── Outbound subject/body ───────────────────────────────────────

    #[test]
    fn subject_follows_fixed_form() {
        let msg = SinliMessage::parse(XML_DOC, None).unwrap();
        assert_eq!(
            subject_for(&msg),
            "SINLIARG: Tipo: REMFAA, De: L0002349, Para: L0001562"
        );
    }
}
