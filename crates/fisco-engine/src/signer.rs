//! Enveloped XML signatures
//!
//! Documents and events are signed with the scheme the authority validates:
//! an enveloped XML-DSig block using SHA-1 digests and RSA PKCS#1 v1.5, with
//! the merchant certificate embedded in `KeyInfo`. SHA-1 is long broken for
//! collision resistance, but the layout mandates it; the algorithm choice
//! lives in this module only.
//!
//! The signed element must carry an `Id` attribute. Its canonical bytes are
//! digested, the digest goes into `SignedInfo`, and the canonical bytes of
//! `SignedInfo` are what the RSA key actually signs. The resulting
//! `<Signature>` element is appended by the caller as a sibling of the
//! signed element, which is what "enveloped" means in this layout.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha1::{Digest, Sha1};

use crate::certificate::MerchantCertificate;
use crate::error::{EngineError, EngineResult};
use crate::xml::XmlElement;

/// XML-DSig namespace, declared on every `Signature` element.
pub const SIGNATURE_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

const C14N_ALGORITHM: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const SIGNATURE_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const DIGEST_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
const ENVELOPED_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Signs XML elements with a merchant's RSA key.
pub struct XmlSigner {
    signing_key: SigningKey<Sha1>,
    certificate_base64: String,
}

impl XmlSigner {
    pub fn new(certificate: &MerchantCertificate) -> Self {
        XmlSigner {
            signing_key: SigningKey::<Sha1>::new(certificate.private_key().clone()),
            certificate_base64: BASE64.encode(certificate.certificate_der()),
        }
    }

    /// Produces the `<Signature>` element covering `element`.
    ///
    /// The element must carry an `Id` attribute; the signature references it
    /// as `URI="#<Id>"`. The caller appends the returned block next to the
    /// signed element.
    pub fn sign_element(&self, element: &XmlElement) -> EngineResult<XmlElement> {
        let reference_id = element.attribute("Id").ok_or_else(|| {
            EngineError::Signing(format!(
                "element <{}> has no Id attribute to reference",
                element.name()
            ))
        })?;

        let digest = BASE64.encode(Sha1::digest(element.canonicalize().as_bytes()));
        let signed_info = build_signed_info(reference_id, &digest);

        // What gets signed is the canonical SignedInfo, namespace included.
        let signature = self.signing_key.sign(signed_info.canonicalize().as_bytes());
        let signature_value = BASE64.encode(signature.to_bytes());

        Ok(XmlElement::new("Signature")
            .default_namespace(SIGNATURE_NAMESPACE)
            .child(signed_info)
            .child(XmlElement::leaf("SignatureValue", signature_value))
            .child(
                XmlElement::new("KeyInfo").child(
                    XmlElement::new("X509Data").child(XmlElement::leaf(
                        "X509Certificate",
                        self.certificate_base64.clone(),
                    )),
                ),
            ))
    }
}

fn build_signed_info(reference_id: &str, digest: &str) -> XmlElement {
    XmlElement::new("SignedInfo")
        .default_namespace(SIGNATURE_NAMESPACE)
        .child(XmlElement::new("CanonicalizationMethod").attr("Algorithm", C14N_ALGORITHM))
        .child(XmlElement::new("SignatureMethod").attr("Algorithm", SIGNATURE_ALGORITHM))
        .child(
            XmlElement::new("Reference")
                .attr("URI", format!("#{}", reference_id))
                .child(
                    XmlElement::new("Transforms")
                        .child(XmlElement::new("Transform").attr("Algorithm", ENVELOPED_TRANSFORM))
                        .child(XmlElement::new("Transform").attr("Algorithm", C14N_ALGORITHM)),
                )
                .child(XmlElement::new("DigestMethod").attr("Algorithm", DIGEST_ALGORITHM))
                .child(XmlElement::leaf("DigestValue", digest)),
        )
}

// =============================================================================
// Tests
// =============================================================================
