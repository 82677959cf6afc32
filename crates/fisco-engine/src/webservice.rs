//! SOAP 1.2 client for the authority webservices
//!
//! One round trip per [`AuthorityClient`] method: build the service
//! payload, wrap it in a SOAP envelope, POST it over mutual TLS, and hand
//! the response body to the parsers in [`crate::authority`].
//!
//! ## TLS identity
//!
//! The authority authenticates merchants by their client certificate, so
//! the HTTP client is built per certificate, not per engine. Built clients
//! are cached by certificate identity; establishments sharing a certificate
//! share a connection pool.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Identity};
use tokio::sync::RwLock;
use tracing::debug;

use crate::authority::{
    self, AuthorityClient, AuthorityContext, CancelOutcome, DocumentStanding, ReceiptOutcome,
    ServiceStatus, SubmissionOutcome,
};
use crate::certificate::MerchantCertificate;
use crate::config::EngineConfig;
use crate::document_xml::{EVENT_VERSION, LAYOUT_VERSION, NFE_NAMESPACE};
use crate::endpoints::{self, AuthorityService};
use crate::error::{EngineError, EngineResult};
use crate::xml::XmlElement;

const SOAP_ENVELOPE_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";
const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Production [`AuthorityClient`] over HTTPS with client certificates.
pub struct SefazWebservice {
    timeout: Duration,
    clients: RwLock<HashMap<String, Client>>,
}

impl SefazWebservice {
    pub fn new(config: &EngineConfig) -> Self {
        SefazWebservice {
            timeout: config.authority.timeout(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the HTTP client for a certificate, building it on first use.
    async fn client_for(&self, certificate: &MerchantCertificate) -> EngineResult<Client> {
        let key = format!("{}|{}", certificate.subject(), certificate.not_after());

        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }

        let identity = Identity::from_pem(certificate.identity_pem())
            .map_err(|e| EngineError::CertificateLoad(format!("TLS identity rejected: {}", e)))?;
        let client = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(self.timeout)
            .build()?;

        self.clients.write().await.insert(key, client.clone());
        Ok(client)
    }

    async fn call(
        &self,
        ctx: &AuthorityContext<'_>,
        service: AuthorityService,
        payload: &str,
    ) -> EngineResult<String> {
        let url = endpoints::resolve_url(ctx.state_code, ctx.environment, service);
        let client = self.client_for(ctx.certificate).await?;

        debug!(url, service = ?service, "Calling authority webservice");
        let response = client
            .post(url)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(soap_envelope(service, payload))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EngineError::Transport(format!("HTTP {} from {}", status, url)));
        }
        Ok(body)
    }

    #[cfg(test)]
    async fn cached_client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[async_trait]
impl AuthorityClient for SefazWebservice {
    async fn check_status(&self, ctx: &AuthorityContext<'_>) -> EngineResult<ServiceStatus> {
        let payload = status_payload(ctx);
        let body = self.call(ctx, AuthorityService::Status, &payload).await?;
        authority::parse_status_response(&body)
    }

    async fn submit(
        &self,
        ctx: &AuthorityContext<'_>,
        signed_xml: &str,
    ) -> EngineResult<SubmissionOutcome> {
        let payload = submission_payload(signed_xml, batch_id());
        let body = self
            .call(ctx, AuthorityService::Authorization, &payload)
            .await?;
        authority::parse_submission_response(&body)
    }

    async fn query_receipt(
        &self,
        ctx: &AuthorityContext<'_>,
        receipt_number: &str,
    ) -> EngineResult<ReceiptOutcome> {
        let payload = receipt_payload(ctx, receipt_number);
        let body = self
            .call(ctx, AuthorityService::ReceiptQuery, &payload)
            .await?;
        authority::parse_receipt_response(&body)
    }

    async fn query_key(
        &self,
        ctx: &AuthorityContext<'_>,
        access_key: &str,
    ) -> EngineResult<DocumentStanding> {
        let payload = standing_payload(ctx, access_key);
        let body = self.call(ctx, AuthorityService::KeyQuery, &payload).await?;
        authority::parse_standing_response(&body)
    }

    async fn cancel(
        &self,
        ctx: &AuthorityContext<'_>,
        signed_event_xml: &str,
    ) -> EngineResult<CancelOutcome> {
        let payload = event_payload(signed_event_xml, batch_id());
        let body = self.call(ctx, AuthorityService::Event, &payload).await?;
        authority::parse_cancel_response(&body)
    }
}

// =============================================================================
// Payload Construction
// =============================================================================

/// Batch identifiers only need to be numeric and unique per submission.
fn batch_id() -> i64 {
    Utc::now().timestamp_millis()
}

fn soap_envelope(service: AuthorityService, payload: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soap12:Envelope xmlns:soap12=\"{SOAP_ENVELOPE_NAMESPACE}\">\
         <soap12:Body>\
         <nfeDadosMsg xmlns=\"{}\">{payload}</nfeDadosMsg>\
         </soap12:Body>\
         </soap12:Envelope>",
        service.wsdl_namespace()
    )
}

fn status_payload(ctx: &AuthorityContext<'_>) -> String {
    XmlElement::new("consStatServ")
        .default_namespace(NFE_NAMESPACE)
        .attr("versao", LAYOUT_VERSION)
        .child(XmlElement::leaf("tpAmb", ctx.environment.code().to_string()))
        .child(XmlElement::leaf("cUF", ctx.state_code.to_string()))
        .child(XmlElement::leaf("xServ", "STATUS"))
        .canonicalize()
}

/// The signed document XML is spliced in verbatim; running it through the
/// tree builder again would re-escape its content.
fn submission_payload(signed_xml: &str, batch: i64) -> String {
    format!(
        "<enviNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{LAYOUT_VERSION}\">\
         <idLote>{batch}</idLote><indSinc>1</indSinc>{signed_xml}</enviNFe>"
    )
}

fn receipt_payload(ctx: &AuthorityContext<'_>, receipt_number: &str) -> String {
    XmlElement::new("consReciNFe")
        .default_namespace(NFE_NAMESPACE)
        .attr("versao", LAYOUT_VERSION)
        .child(XmlElement::leaf("tpAmb", ctx.environment.code().to_string()))
        .child(XmlElement::leaf("nRec", receipt_number))
        .canonicalize()
}

fn standing_payload(ctx: &AuthorityContext<'_>, access_key: &str) -> String {
    XmlElement::new("consSitNFe")
        .default_namespace(NFE_NAMESPACE)
        .attr("versao", LAYOUT_VERSION)
        .child(XmlElement::leaf("tpAmb", ctx.environment.code().to_string()))
        .child(XmlElement::leaf("xServ", "CONSULTAR"))
        .child(XmlElement::leaf("chNFe", access_key))
        .canonicalize()
}

fn event_payload(signed_event_xml: &str, batch: i64) -> String {
    format!(
        "<envEvento xmlns=\"{NFE_NAMESPACE}\" versao=\"{EVENT_VERSION}\">\
         <idLote>{batch}</idLote>{signed_event_xml}</envEvento>"
    )
}

// =============================================================================
// Tests
// =============================================================================
