//! Document and event XML rendering
//!
//! Renders persisted documents into the layout 4.00 consumer document XML
//! the authority validates, and cancellation requests into the event layout.
//! Rendering is a pure projection: the tree is built from the document, its
//! items, and the establishment configuration, and anything derived from the
//! access key (`cNF`, `cDV`, `tpEmis`) is read back out of the key itself so
//! the XML can never disagree with it.
//!
//! Everything serializes through [`crate::xml`], so the rendered form is
//! already the canonical form the signature digests cover.

use chrono::{DateTime, SecondsFormat, Utc};
use fisco_core::access_key::AccessKey;
use fisco_core::{
    CoreError, DocumentItem, EstablishmentConfig, FiscalDocument, MODEL_NFCE,
};

use crate::error::{EngineError, EngineResult};
use crate::xml::XmlElement;

/// Namespace of every fiscal document and event.
pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";
/// Document layout version.
pub const LAYOUT_VERSION: &str = "4.00";
/// Event layout version.
pub const EVENT_VERSION: &str = "1.00";
/// Event type code for cancellation.
pub const CANCEL_EVENT_TYPE: &str = "110111";

/// Software identification stamped into `verProc`.
const PROCESS_VERSION: &str = concat!("fisco ", env!("CARGO_PKG_VERSION"));

const ZERO_AMOUNT: &str = "0.00";

/// `Id` attribute of a document's `infNFe` element.
pub fn document_id_attr(access_key: &str) -> String {
    format!("NFe{access_key}")
}

/// `Id` attribute of a cancellation event (`ID` + event type + key +
/// 2-digit sequence).
pub fn cancel_event_id(access_key: &str) -> String {
    format!("ID{CANCEL_EVENT_TYPE}{access_key}01")
}

// =============================================================================
// Document Rendering
// =============================================================================

/// Renders a stamped document into its `<NFe>` tree, unsigned.
///
/// The caller signs the inner `infNFe` and appends the signature block as
/// its sibling before submission.
pub fn render_document(
    config: &EstablishmentConfig,
    document: &FiscalDocument,
    items: &[DocumentItem],
) -> EngineResult<XmlElement> {
    let key = AccessKey::parse(&document.access_key).map_err(CoreError::from)?;

    let mut inf_nfe = XmlElement::new("infNFe")
        .default_namespace(NFE_NAMESPACE)
        .attr("Id", document_id_attr(&document.access_key))
        .attr("versao", LAYOUT_VERSION)
        .child(render_ide(config, document, &key))
        .child(render_emit(config));

    if let Some(dest) = render_dest(document) {
        inf_nfe = inf_nfe.child(dest);
    }
    for item in items {
        inf_nfe = inf_nfe.child(render_item(item));
    }
    inf_nfe = inf_nfe
        .child(render_total(document))
        .child(XmlElement::new("transp").child(XmlElement::leaf("modFrete", "9")))
        .child(render_pag(document));

    Ok(XmlElement::new("NFe")
        .default_namespace(NFE_NAMESPACE)
        .child(inf_nfe))
}

fn render_ide(
    config: &EstablishmentConfig,
    document: &FiscalDocument,
    key: &AccessKey,
) -> XmlElement {
    let mut ide = XmlElement::new("ide")
        .child(XmlElement::leaf("cUF", config.state_code.to_string()))
        .child(XmlElement::leaf("cNF", key.random_code()))
        .child(XmlElement::leaf("natOp", "VENDA AO CONSUMIDOR"))
        .child(XmlElement::leaf("mod", MODEL_NFCE.to_string()))
        .child(XmlElement::leaf("serie", document.series.to_string()))
        .child(XmlElement::leaf("nNF", document.number.to_string()))
        .child(XmlElement::leaf("dhEmi", wire_timestamp(document.issued_at)))
        .child(XmlElement::leaf("tpNF", "1"))
        .child(XmlElement::leaf("idDest", "1"))
        .child(XmlElement::leaf("cMunFG", config.municipality_code.to_string()))
        .child(XmlElement::leaf("tpImp", "4"))
        .child(XmlElement::leaf("tpEmis", key.emission_type_code().to_string()))
        .child(XmlElement::leaf("cDV", key.check_digit().to_string()))
        .child(XmlElement::leaf("tpAmb", document.environment.code().to_string()))
        .child(XmlElement::leaf("finNFe", "1"))
        .child(XmlElement::leaf("indFinal", "1"))
        .child(XmlElement::leaf("indPres", "1"))
        .child(XmlElement::leaf("procEmi", "0"))
        .child(XmlElement::leaf("verProc", PROCESS_VERSION));

    // A contingency key obliges the justification pair.
    if key.is_contingency() {
        ide = ide
            .child(XmlElement::leaf("dhCont", wire_timestamp(document.issued_at)))
            .child(XmlElement::leaf(
                "xJust",
                "Emissao em contingencia por indisponibilidade do servico de autorizacao",
            ));
    }
    ide
}

fn render_emit(config: &EstablishmentConfig) -> XmlElement {
    let mut emit = XmlElement::new("emit")
        .child(XmlElement::leaf("CNPJ", &config.tax_id))
        .child(XmlElement::leaf("xNome", &config.legal_name));
    if let Some(trade_name) = &config.trade_name {
        emit = emit.child(XmlElement::leaf("xFant", trade_name));
    }
    emit.child(
        XmlElement::new("enderEmit")
            .child(XmlElement::leaf("xLgr", &config.address_street))
            .child(XmlElement::leaf("nro", &config.address_number))
            .child(XmlElement::leaf("xBairro", &config.address_district))
            .child(XmlElement::leaf("cMun", config.municipality_code.to_string()))
            .child(XmlElement::leaf("xMun", &config.address_city))
            .child(XmlElement::leaf("UF", &config.address_state))
            .child(XmlElement::leaf("CEP", &config.address_zip)),
    )
    .child(XmlElement::leaf("IE", &config.state_registration))
    .child(XmlElement::leaf("CRT", config.tax_regime.to_string()))
}

/// Consumer block. Anonymous sales render no `dest` at all.
fn render_dest(document: &FiscalDocument) -> Option<XmlElement> {
    let customer = document.customer.as_ref()?;
    let mut dest = XmlElement::new("dest");
    let mut identified = false;

    if let Some(tax_id) = &customer.tax_id {
        let tag = if tax_id.len() == 11 { "CPF" } else { "CNPJ" };
        dest = dest.child(XmlElement::leaf(tag, tax_id));
        identified = true;
    }
    if let Some(name) = &customer.name {
        dest = dest.child(XmlElement::leaf("xNome", name));
        identified = true;
    }
    if !identified {
        return None;
    }
    Some(dest.child(XmlElement::leaf("indIEDest", "9")))
}

fn render_item(item: &DocumentItem) -> XmlElement {
    let quantity = fisco_core::money::Quantity::from_hundredths(item.quantity_hundredths);
    XmlElement::new("det")
        .attr("nItem", item.line_number.to_string())
        .child(
            XmlElement::new("prod")
                .child(XmlElement::leaf("cProd", &item.code))
                .child(XmlElement::leaf("cEAN", "SEM GTIN"))
                .child(XmlElement::leaf("xProd", &item.description))
                .child(XmlElement::leaf("NCM", &item.ncm))
                .child(XmlElement::leaf("CFOP", &item.cfop))
                .child(XmlElement::leaf("uCom", "UN"))
                .child(XmlElement::leaf("qCom", quantity.to_decimal_string()))
                .child(XmlElement::leaf("vUnCom", item.unit_price().to_decimal_string()))
                .child(XmlElement::leaf("vProd", item.line_total().to_decimal_string()))
                .child(XmlElement::leaf("cEANTrib", "SEM GTIN"))
                .child(XmlElement::leaf("uTrib", "UN"))
                .child(XmlElement::leaf("qTrib", quantity.to_decimal_string()))
                .child(XmlElement::leaf("vUnTrib", item.unit_price().to_decimal_string()))
                .child(XmlElement::leaf("indTot", "1")),
        )
        .child(
            XmlElement::new("imposto")
                .child(XmlElement::leaf(
                    "vTotTrib",
                    fisco_core::money::Money::from_cents(item.tax_cents).to_decimal_string(),
                ))
                // Simples Nacional classification; the disclosed burden is
                // carried by vTotTrib, not by ICMS values.
                .child(
                    XmlElement::new("ICMS").child(
                        XmlElement::new("ICMSSN102")
                            .child(XmlElement::leaf("orig", "0"))
                            .child(XmlElement::leaf("CSOSN", "102")),
                    ),
                ),
        )
}

fn render_total(document: &FiscalDocument) -> XmlElement {
    XmlElement::new("total").child(
        XmlElement::new("ICMSTot")
            .child(XmlElement::leaf("vBC", ZERO_AMOUNT))
            .child(XmlElement::leaf("vICMS", ZERO_AMOUNT))
            .child(XmlElement::leaf("vICMSDeson", ZERO_AMOUNT))
            .child(XmlElement::leaf("vFCP", ZERO_AMOUNT))
            .child(XmlElement::leaf("vBCST", ZERO_AMOUNT))
            .child(XmlElement::leaf("vST", ZERO_AMOUNT))
            .child(XmlElement::leaf("vFCPST", ZERO_AMOUNT))
            .child(XmlElement::leaf("vFCPSTRet", ZERO_AMOUNT))
            .child(XmlElement::leaf("vProd", document.total_products().to_decimal_string()))
            .child(XmlElement::leaf("vFrete", ZERO_AMOUNT))
            .child(XmlElement::leaf("vSeg", ZERO_AMOUNT))
            .child(XmlElement::leaf("vDesc", document.total_discount().to_decimal_string()))
            .child(XmlElement::leaf("vII", ZERO_AMOUNT))
            .child(XmlElement::leaf("vIPI", ZERO_AMOUNT))
            .child(XmlElement::leaf("vIPIDevol", ZERO_AMOUNT))
            .child(XmlElement::leaf("vPIS", ZERO_AMOUNT))
            .child(XmlElement::leaf("vCOFINS", ZERO_AMOUNT))
            .child(XmlElement::leaf("vOutro", ZERO_AMOUNT))
            .child(XmlElement::leaf("vNF", document.total_amount().to_decimal_string()))
            .child(XmlElement::leaf("vTotTrib", document.total_tax().to_decimal_string())),
    )
}

fn render_pag(document: &FiscalDocument) -> XmlElement {
    let payment = &document.payment;
    let mut pag = XmlElement::new("pag").child(
        XmlElement::new("detPag")
            .child(XmlElement::leaf("indPag", "0"))
            .child(XmlElement::leaf("tPag", payment.method.code()))
            .child(XmlElement::leaf("vPag", payment.amount().to_decimal_string())),
    );
    if payment.change_cents > 0 {
        pag = pag.child(XmlElement::leaf("vTroco", payment.change().to_decimal_string()));
    }
    pag
}

// =============================================================================
// Cancellation Event Rendering
// =============================================================================

/// Renders the `<evento>` tree of a cancellation request, unsigned.
///
/// The caller signs the inner `infEvento` and appends the signature as its
/// sibling, the same enveloped shape documents use.
pub fn render_cancel_event(
    config: &EstablishmentConfig,
    document: &FiscalDocument,
    reason: &str,
    event_at: DateTime<Utc>,
) -> EngineResult<XmlElement> {
    let protocol = document.protocol_number.as_deref().ok_or_else(|| {
        EngineError::Internal(format!(
            "document {} has no authorization protocol to cancel",
            document.id
        ))
    })?;

    let inf_evento = XmlElement::new("infEvento")
        .attr("Id", cancel_event_id(&document.access_key))
        .child(XmlElement::leaf("cOrgao", config.state_code.to_string()))
        .child(XmlElement::leaf("tpAmb", document.environment.code().to_string()))
        .child(XmlElement::leaf("CNPJ", &config.tax_id))
        .child(XmlElement::leaf("chNFe", &document.access_key))
        .child(XmlElement::leaf("dhEvento", wire_timestamp(event_at)))
        .child(XmlElement::leaf("tpEvento", CANCEL_EVENT_TYPE))
        .child(XmlElement::leaf("nSeqEvento", "1"))
        .child(XmlElement::leaf("verEvento", EVENT_VERSION))
        .child(
            XmlElement::new("detEvento")
                .attr("versao", EVENT_VERSION)
                .child(XmlElement::leaf("descEvento", "Cancelamento"))
                .child(XmlElement::leaf("nProt", protocol))
                .child(XmlElement::leaf("xJust", reason)),
        );

    Ok(XmlElement::new("evento")
        .default_namespace(NFE_NAMESPACE)
        .attr("versao", EVENT_VERSION)
        .child(inf_evento))
}

/// Timestamps go on the wire as RFC 3339 with an explicit offset.
fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

// =============================================================================
// Tests
// =============================================================================
