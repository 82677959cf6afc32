//! Authority client abstraction and response interpretation
//!
//! The emission pipeline talks to the tax authority through the
//! [`AuthorityClient`] trait. Production uses the SOAP implementation in
//! [`crate::webservice`]; tests script verdicts through a stub. Either way
//! the pipeline only sees the typed outcomes defined here, never raw XML.
//!
//! Response parsing is tolerant by design: the authority's envelopes vary
//! slightly between states and service versions, so instead of binding to a
//! schema the parser walks the XML once and collects the handful of fields
//! the pipeline acts on (`cStat`, `xMotivo`, `nRec`, `nProt`, timestamps),
//! keeping track of whether they occurred inside a processing protocol
//! (`infProt`) or an event return (`retEvento`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fisco_core::Environment;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::certificate::MerchantCertificate;
use crate::error::{EngineError, EngineResult};

/// Authority status codes the pipeline branches on.
///
/// Codes are compared as strings; the authority zero-pads some of them and
/// the exact digits are what the protocol defines.
pub mod status {
    /// Status service: service is in operation.
    pub const SERVICE_AVAILABLE: &str = "107";
    /// Document authorized for use.
    pub const AUTHORIZED: &str = "100";
    /// Document exists and was cancelled.
    pub const DOCUMENT_CANCELLED: &str = "101";
    /// Batch received; result must be fetched by receipt number.
    pub const BATCH_RECEIVED: &str = "103";
    /// Batch processed; result is embedded in the response.
    pub const BATCH_PROCESSED: &str = "104";
    /// Batch still processing; poll again.
    pub const PROCESSING: &str = "105";
    /// Event registered and linked to the document.
    pub const EVENT_REGISTERED: &str = "135";
}

// =============================================================================
// Client Trait
// =============================================================================

/// Where and as whom a webservice call is made.
///
/// Carried per call because one engine serves establishments in different
/// states, environments, and with different certificates.
pub struct AuthorityContext<'a> {
    pub environment: Environment,
    pub state_code: i64,
    pub certificate: &'a MerchantCertificate,
}

/// The five authority operations the pipeline uses.
///
/// Implementations perform exactly one round trip per call; polling loops
/// and fallback decisions belong to the engine, not the client.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Probes the status service.
    async fn check_status(&self, ctx: &AuthorityContext<'_>) -> EngineResult<ServiceStatus>;

    /// Submits a signed document batch for authorization.
    async fn submit(
        &self,
        ctx: &AuthorityContext<'_>,
        signed_xml: &str,
    ) -> EngineResult<SubmissionOutcome>;

    /// Fetches the result of a previously batched submission.
    async fn query_receipt(
        &self,
        ctx: &AuthorityContext<'_>,
        receipt_number: &str,
    ) -> EngineResult<ReceiptOutcome>;

    /// Queries the current standing of a document by access key.
    async fn query_key(
        &self,
        ctx: &AuthorityContext<'_>,
        access_key: &str,
    ) -> EngineResult<DocumentStanding>;

    /// Registers a signed cancellation event.
    async fn cancel(
        &self,
        ctx: &AuthorityContext<'_>,
        signed_event_xml: &str,
    ) -> EngineResult<CancelOutcome>;
}

// =============================================================================
// Outcome Types
// =============================================================================

/// Answer of the status service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub status_code: String,
    pub reason: String,
}

impl ServiceStatus {
    pub fn is_available(&self) -> bool {
        self.status_code == status::SERVICE_AVAILABLE
    }
}

/// A granted authorization protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityVerdict {
    pub protocol_number: String,
    pub status_code: String,
    pub reason: String,
    pub authorized_at: DateTime<Utc>,
}

/// A definitive refusal of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityRejection {
    pub status_code: String,
    pub reason: String,
}

/// Result of one submission round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Authorized(AuthorityVerdict),
    Rejected(AuthorityRejection),
    /// Queued for asynchronous processing; fetch the verdict with the
    /// receipt number.
    Batched { receipt_number: String },
}

/// Result of one receipt query round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Authorized(AuthorityVerdict),
    Rejected(AuthorityRejection),
    /// Batch not processed yet.
    Processing,
}

/// Current standing of a document in the authority's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStanding {
    pub status_code: String,
    pub reason: String,
    pub protocol_number: Option<String>,
}

impl DocumentStanding {
    pub fn is_authorized(&self) -> bool {
        self.status_code == status::AUTHORIZED
    }

    pub fn is_cancelled(&self) -> bool {
        self.status_code == status::DOCUMENT_CANCELLED
    }
}

/// Result of a cancellation event registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Registered {
        protocol_number: String,
        registered_at: DateTime<Utc>,
    },
    Refused {
        status_code: String,
        reason: String,
    },
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Fields collected in one pass over a response envelope.
#[derive(Debug, Default)]
struct ResponseFields {
    /// First `cStat`/`xMotivo` outside protocol and event blocks.
    status_code: Option<String>,
    reason: Option<String>,
    receipt_number: Option<String>,
    /// Fields inside `protNFe/infProt`.
    protocol_status: Option<String>,
    protocol_reason: Option<String>,
    protocol_number: Option<String>,
    protocol_received_at: Option<String>,
    /// Fields inside `retEvento`.
    event_status: Option<String>,
    event_reason: Option<String>,
    event_protocol: Option<String>,
    event_registered_at: Option<String>,
}

fn parse_fields(xml: &str) -> EngineResult<ResponseFields> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = ResponseFields::default();
    let mut current: Option<String> = None;
    let mut prot_depth = 0u32;
    let mut ret_event_depth = 0u32;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(start) => {
                let name = decode_local_name(start.local_name().as_ref())?;
                match name.as_str() {
                    "infProt" => prot_depth += 1,
                    "retEvento" => ret_event_depth += 1,
                    _ => {}
                }
                current = Some(name);
            }
            Event::End(end) => {
                let name = decode_local_name(end.local_name().as_ref())?;
                match name.as_str() {
                    "infProt" => prot_depth = prot_depth.saturating_sub(1),
                    "retEvento" => ret_event_depth = ret_event_depth.saturating_sub(1),
                    _ => {}
                }
                current = None;
            }
            Event::Text(text) => {
                let Some(name) = current.as_deref() else { continue };
                let value = text.unescape()?.into_owned();
                let in_prot = prot_depth > 0;
                let in_event = ret_event_depth > 0;
                match name {
                    "cStat" if in_prot => set_once(&mut fields.protocol_status, value),
                    "cStat" if in_event => set_once(&mut fields.event_status, value),
                    "cStat" => set_once(&mut fields.status_code, value),
                    "xMotivo" if in_prot => set_once(&mut fields.protocol_reason, value),
                    "xMotivo" if in_event => set_once(&mut fields.event_reason, value),
                    "xMotivo" => set_once(&mut fields.reason, value),
                    "nRec" => set_once(&mut fields.receipt_number, value),
                    "nProt" if in_prot => set_once(&mut fields.protocol_number, value),
                    "nProt" if in_event => set_once(&mut fields.event_protocol, value),
                    "dhRecbto" if in_prot => set_once(&mut fields.protocol_received_at, value),
                    "dhRegEvento" if in_event => set_once(&mut fields.event_registered_at, value),
                    _ => {}
                }
            }
            _ => {}
        }
    }
    Ok(fields)
}

fn decode_local_name(raw: &[u8]) -> EngineResult<String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|e| EngineError::XmlMalformed(format!("non-UTF-8 element name: {}", e)))
}

/// Keeps the first occurrence; later elements with the same name are
/// ignored so an envelope's own fields win over nested repetitions.
fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// Authority timestamps come as RFC 3339 with a zone offset. A missing or
/// unparseable timestamp falls back to the local clock rather than voiding
/// an otherwise usable verdict.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    match raw.map(DateTime::parse_from_rfc3339) {
        Some(Ok(parsed)) => parsed.with_timezone(&Utc),
        Some(Err(e)) => {
            warn!(raw = ?raw, error = %e, "Unparseable authority timestamp, using local clock");
            Utc::now()
        }
        None => Utc::now(),
    }
}

fn verdict(fields: &ResponseFields) -> EngineResult<AuthorityVerdict> {
    Ok(AuthorityVerdict {
        protocol_number: fields
            .protocol_number
            .clone()
            .ok_or(EngineError::MissingResponseField("nProt"))?,
        status_code: fields.protocol_status.clone().unwrap_or_default(),
        reason: fields.protocol_reason.clone().unwrap_or_default(),
        authorized_at: parse_timestamp(fields.protocol_received_at.as_deref()),
    })
}

/// Interprets a status service response.
pub(crate) fn parse_status_response(xml: &str) -> EngineResult<ServiceStatus> {
    let fields = parse_fields(xml)?;
    Ok(ServiceStatus {
        status_code: fields
            .status_code
            .ok_or(EngineError::MissingResponseField("cStat"))?,
        reason: fields.reason.unwrap_or_default(),
    })
}

/// Interprets an authorization response.
///
/// A processing protocol embedded in the response decides the verdict
/// directly. Without one, `103` means the batch was queued and everything
/// except the batch bookkeeping codes is a rejection.
pub(crate) fn parse_submission_response(xml: &str) -> EngineResult<SubmissionOutcome> {
    let fields = parse_fields(xml)?;

    if let Some(code) = fields.protocol_status.as_deref() {
        if code == status::AUTHORIZED {
            return Ok(SubmissionOutcome::Authorized(verdict(&fields)?));
        }
        return Ok(SubmissionOutcome::Rejected(AuthorityRejection {
            status_code: code.to_string(),
            reason: fields.protocol_reason.unwrap_or_default(),
        }));
    }

    let code = fields
        .status_code
        .ok_or(EngineError::MissingResponseField("cStat"))?;
    match code.as_str() {
        status::BATCH_RECEIVED => Ok(SubmissionOutcome::Batched {
            receipt_number: fields
                .receipt_number
                .ok_or(EngineError::MissingResponseField("nRec"))?,
        }),
        status::BATCH_PROCESSED | status::PROCESSING => Err(EngineError::UnexpectedStatus {
            status_code: code,
            reason: fields.reason.unwrap_or_default(),
        }),
        _ => Ok(SubmissionOutcome::Rejected(AuthorityRejection {
            status_code: code,
            reason: fields.reason.unwrap_or_default(),
        })),
    }
}

/// Interprets a receipt query response.
pub(crate) fn parse_receipt_response(xml: &str) -> EngineResult<ReceiptOutcome> {
    let fields = parse_fields(xml)?;

    if let Some(code) = fields.protocol_status.as_deref() {
        if code == status::AUTHORIZED {
            return Ok(ReceiptOutcome::Authorized(verdict(&fields)?));
        }
        return Ok(ReceiptOutcome::Rejected(AuthorityRejection {
            status_code: code.to_string(),
            reason: fields.protocol_reason.unwrap_or_default(),
        }));
    }

    let code = fields
        .status_code
        .ok_or(EngineError::MissingResponseField("cStat"))?;
    match code.as_str() {
        status::PROCESSING => Ok(ReceiptOutcome::Processing),
        _ => Err(EngineError::UnexpectedStatus {
            status_code: code,
            reason: fields.reason.unwrap_or_default(),
        }),
    }
}

/// Interprets a standing query response.
pub(crate) fn parse_standing_response(xml: &str) -> EngineResult<DocumentStanding> {
    let fields = parse_fields(xml)?;
    Ok(DocumentStanding {
        status_code: fields
            .status_code
            .ok_or(EngineError::MissingResponseField("cStat"))?,
        reason: fields.reason.unwrap_or_default(),
        protocol_number: fields.protocol_number,
    })
}

/// Interprets a cancellation event response.
pub(crate) fn parse_cancel_response(xml: &str) -> EngineResult<CancelOutcome> {
    let fields = parse_fields(xml)?;

    if let Some(code) = fields.event_status.as_deref() {
        if code == status::EVENT_REGISTERED {
            return Ok(CancelOutcome::Registered {
                protocol_number: fields
                    .event_protocol
                    .ok_or(EngineError::MissingResponseField("nProt"))?,
                registered_at: parse_timestamp(fields.event_registered_at.as_deref()),
            });
        }
        return Ok(CancelOutcome::Refused {
            status_code: code.to_string(),
            reason: fields.event_reason.unwrap_or_default(),
        });
    }

    // Batch-level refusal without an event return (schema error and such).
    let code = fields
        .status_code
        .ok_or(EngineError::MissingResponseField("cStat"))?;
    Ok(CancelOutcome::Refused {
        status_code: code,
        reason: fields.reason.unwrap_or_default(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_OPEN: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
        "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\">",
        "<soap:Body><nfeResultMsg xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/X\">"
    );
    const SOAP_CLOSE: &str = "</nfeResultMsg></soap:Body></soap:Envelope>";

    fn envelope(body: &str) -> String {
        format!("{SOAP_OPEN}{body}{SOAP_CLOSE}")
    }

    #[test]
    fn status_response_available() {
        let xml = envelope(
            "<retConsStatServ versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <tpAmb>2</tpAmb><cStat>107</cStat><xMotivo>Servico em Operacao</xMotivo>\
             <cUF>35</cUF><dhRecbto>2026-08-22T10:00:00-03:00</dhRecbto>\
             </retConsStatServ>",
        );
        let status = parse_status_response(&xml).expect("parses");
        assert!(status.is_available());
        assert_eq!(status.reason, "Servico em Operacao");
    }

    #[test]
    fn status_response_paralyzed() {
        let xml = envelope(
            "<retConsStatServ><cStat>108</cStat>\
             <xMotivo>Servico Paralisado Momentaneamente</xMotivo></retConsStatServ>",
        );
        let status = parse_status_response(&xml).expect("parses");
        assert!(!status.is_available());
        assert_eq!(status.status_code, "108");
    }

    #[test]
    fn submission_with_embedded_protocol_is_authorized() {
        let xml = envelope(
            "<retEnviNFe versao=\"4.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe versao=\"4.00\"><infProt>\
             <tpAmb>2</tpAmb><chNFe>35260812345678000195650010000000421123456783</chNFe>\
             <dhRecbto>2026-08-22T14:30:05-03:00</dhRecbto>\
             <nProt>135260000000123</nProt>\
             <cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>\
             </infProt></protNFe></retEnviNFe>",
        );
        match parse_submission_response(&xml).expect("parses") {
            SubmissionOutcome::Authorized(v) => {
                assert_eq!(v.protocol_number, "135260000000123");
                assert_eq!(v.status_code, "100");
                assert_eq!(v.reason, "Autorizado o uso da NF-e");
                assert_eq!(v.authorized_at.to_rfc3339(), "2026-08-22T17:30:05+00:00");
            }
            other => panic!("expected authorized, got {other:?}"),
        }
    }

    #[test]
    fn submission_protocol_rejection_wins_over_batch_status() {
        let xml = envelope(
            "<retEnviNFe><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe><infProt><cStat>302</cStat>\
             <xMotivo>Rejeicao: Irregularidade fiscal do emitente</xMotivo>\
             </infProt></protNFe></retEnviNFe>",
        );
        match parse_submission_response(&xml).expect("parses") {
            SubmissionOutcome::Rejected(r) => {
                assert_eq!(r.status_code, "302");
                assert!(r.reason.contains("Irregularidade"));
            }
            other => panic!("expected rejected, got {other:?}"),
        }
    }

    #[test]
    fn submission_batched_returns_receipt() {
        let xml = envelope(
            "<retEnviNFe><cStat>103</cStat><xMotivo>Lote recebido com sucesso</xMotivo>\
             <infRec><nRec>351000012345678</nRec><tMed>1</tMed></infRec></retEnviNFe>",
        );
        assert_eq!(
            parse_submission_response(&xml).expect("parses"),
            SubmissionOutcome::Batched {
                receipt_number: "351000012345678".to_string()
            }
        );
    }

    #[test]
    fn submission_batched_without_receipt_is_an_error() {
        let xml = envelope("<retEnviNFe><cStat>103</cStat><xMotivo>Lote recebido</xMotivo></retEnviNFe>");
        assert!(matches!(
            parse_submission_response(&xml),
            Err(EngineError::MissingResponseField("nRec"))
        ));
    }

    #[test]
    fn submission_top_level_rejection() {
        let xml = envelope(
            "<retEnviNFe><cStat>539</cStat>\
             <xMotivo>Rejeicao: Duplicidade de NF-e</xMotivo></retEnviNFe>",
        );
        match parse_submission_response(&xml).expect("parses") {
            SubmissionOutcome::Rejected(r) => assert_eq!(r.status_code, "539"),
            other => panic!("expected rejected, got {other:?}"),
        }
    }

    #[test]
    fn receipt_still_processing() {
        let xml = envelope(
            "<retConsReciNFe><cStat>105</cStat><xMotivo>Lote em processamento</xMotivo></retConsReciNFe>",
        );
        assert_eq!(
            parse_receipt_response(&xml).expect("parses"),
            ReceiptOutcome::Processing
        );
    }

    #[test]
    fn receipt_resolves_to_authorization() {
        let xml = envelope(
            "<retConsReciNFe><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe><infProt><dhRecbto>2026-08-22T09:00:00-03:00</dhRecbto>\
             <nProt>135260000000456</nProt><cStat>100</cStat>\
             <xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe></retConsReciNFe>",
        );
        match parse_receipt_response(&xml).expect("parses") {
            ReceiptOutcome::Authorized(v) => assert_eq!(v.protocol_number, "135260000000456"),
            other => panic!("expected authorized, got {other:?}"),
        }
    }

    #[test]
    fn receipt_resolves_to_rejection() {
        let xml = envelope(
            "<retConsReciNFe><cStat>104</cStat><xMotivo>Lote processado</xMotivo>\
             <protNFe><infProt><cStat>775</cStat>\
             <xMotivo>Rejeicao: Total do desconto difere do somatorio dos itens</xMotivo>\
             </infProt></protNFe></retConsReciNFe>",
        );
        match parse_receipt_response(&xml).expect("parses") {
            ReceiptOutcome::Rejected(r) => assert_eq!(r.status_code, "775"),
            other => panic!("expected rejected, got {other:?}"),
        }
    }

    #[test]
    fn standing_of_authorized_document() {
        let xml = envelope(
            "<retConsSitNFe><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>\
             <protNFe><infProt><nProt>135260000000789</nProt><cStat>100</cStat>\
             <xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe></retConsSitNFe>",
        );
        let standing = parse_standing_response(&xml).expect("parses");
        assert!(standing.is_authorized());
        assert!(!standing.is_cancelled());
        assert_eq!(standing.protocol_number.as_deref(), Some("135260000000789"));
    }

    #[test]
    fn standing_of_cancelled_document() {
        let xml = envelope(
            "<retConsSitNFe><cStat>101</cStat>\
             <xMotivo>Cancelamento de NF-e homologado</xMotivo></retConsSitNFe>",
        );
        let standing = parse_standing_response(&xml).expect("parses");
        assert!(standing.is_cancelled());
    }

    #[test]
    fn cancel_event_registered() {
        let xml = envelope(
            "<retEnvEvento versao=\"1.00\" xmlns=\"http://www.portalfiscal.inf.br/nfe\">\
             <idLote>1</idLote><tpAmb>2</tpAmb><cStat>128</cStat>\
             <xMotivo>Lote de evento processado</xMotivo>\
             <retEvento versao=\"1.00\"><infEvento>\
             <tpAmb>2</tpAmb><cStat>135</cStat>\
             <xMotivo>Evento registrado e vinculado a NF-e</xMotivo>\
             <chNFe>35260812345678000195650010000000421123456783</chNFe>\
             <dhRegEvento>2026-08-22T14:45:00-03:00</dhRegEvento>\
             <nProt>135260000000999</nProt>\
             </infEvento></retEvento></retEnvEvento>",
        );
        match parse_cancel_response(&xml).expect("parses") {
            CancelOutcome::Registered {
                protocol_number,
                registered_at,
            } => {
                assert_eq!(protocol_number, "135260000000999");
                assert_eq!(registered_at.to_rfc3339(), "2026-08-22T17:45:00+00:00");
            }
            other => panic!("expected registered, got {other:?}"),
        }
    }

    #[test]
    fn cancel_event_refused() {
        let xml = envelope(
            "<retEnvEvento><cStat>128</cStat><xMotivo>Lote de evento processado</xMotivo>\
             <retEvento><infEvento><cStat>573</cStat>\
             <xMotivo>Rejeicao: Duplicidade de evento</xMotivo>\
             </infEvento></retEvento></retEnvEvento>",
        );
        match parse_cancel_response(&xml).expect("parses") {
            CancelOutcome::Refused { status_code, .. } => assert_eq!(status_code, "573"),
            other => panic!("expected refused, got {other:?}"),
        }
    }

    #[test]
    fn cancel_batch_refused_without_event_return() {
        let xml = envelope(
            "<retEnvEvento><cStat>215</cStat>\
             <xMotivo>Rejeicao: Falha no schema XML</xMotivo></retEnvEvento>",
        );
        match parse_cancel_response(&xml).expect("parses") {
            CancelOutcome::Refused { status_code, .. } => assert_eq!(status_code, "215"),
            other => panic!("expected refused, got {other:?}"),
        }
    }

    #[test]
    fn missing_status_code_is_reported() {
        let xml = envelope("<retConsStatServ><tpAmb>2</tpAmb></retConsStatServ>");
        assert!(matches!(
            parse_status_response(&xml),
            Err(EngineError::MissingResponseField("cStat"))
        ));
    }

    #[test]
    fn malformed_xml_is_reported() {
        let result = parse_status_response("<retConsStatServ><cStat>107</retConsStatServ>");
        assert!(matches!(result, Err(EngineError::XmlMalformed(_))));
    }
}
