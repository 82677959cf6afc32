//! Authority webservice endpoint resolution
//!
//! Each operation maps to a distinct webservice, and each state runs (or
//! delegates) a deployment of those services per environment. São Paulo
//! operates its own farm; states without a dedicated deployment here are
//! routed to the shared SVRS farm.

use fisco_core::Environment;

/// São Paulo's state code, the one dedicated farm this engine knows.
const STATE_SAO_PAULO: i64 = 35;

/// The five webservices the emission pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityService {
    /// Availability probe (`nfeStatusServicoNF`).
    Status,
    /// Batch submission (`nfeAutorizacaoLote`).
    Authorization,
    /// Async batch result by receipt number (`nfeRetAutorizacaoLote`).
    ReceiptQuery,
    /// Current standing of a document by access key (`nfeConsultaNF`).
    KeyQuery,
    /// Event registration, used for cancellation (`nfeRecepcaoEvento`).
    Event,
}

impl AuthorityService {
    /// WSDL namespace for the `nfeDadosMsg` wrapper of this service.
    pub fn wsdl_namespace(&self) -> &'static str {
        match self {
            AuthorityService::Status => {
                "http://www.portalfiscal.inf.br/nfe/wsdl/NFeStatusServico4"
            }
            AuthorityService::Authorization => {
                "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4"
            }
            AuthorityService::ReceiptQuery => {
                "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRetAutorizacao4"
            }
            AuthorityService::KeyQuery => {
                "http://www.portalfiscal.inf.br/nfe/wsdl/NFeConsultaProtocolo4"
            }
            AuthorityService::Event => {
                "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRecepcaoEvento4"
            }
        }
    }
}

/// Resolves the URL for a service in a given state and environment.
pub fn resolve_url(
    state_code: i64,
    environment: Environment,
    service: AuthorityService,
) -> &'static str {
    if state_code == STATE_SAO_PAULO {
        sao_paulo_url(environment, service)
    } else {
        svrs_url(environment, service)
    }
}

fn sao_paulo_url(environment: Environment, service: AuthorityService) -> &'static str {
    match (environment, service) {
        (Environment::Production, AuthorityService::Status) => {
            "https://nfce.fazenda.sp.gov.br/ws/NFeStatusServico4.asmx"
        }
        (Environment::Production, AuthorityService::Authorization) => {
            "https://nfce.fazenda.sp.gov.br/ws/NFeAutorizacao4.asmx"
        }
        (Environment::Production, AuthorityService::ReceiptQuery) => {
            "https://nfce.fazenda.sp.gov.br/ws/NFeRetAutorizacao4.asmx"
        }
        (Environment::Production, AuthorityService::KeyQuery) => {
            "https://nfce.fazenda.sp.gov.br/ws/NFeConsultaProtocolo4.asmx"
        }
        (Environment::Production, AuthorityService::Event) => {
            "https://nfce.fazenda.sp.gov.br/ws/NFeRecepcaoEvento4.asmx"
        }
        (Environment::Homologation, AuthorityService::Status) => {
            "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeStatusServico4.asmx"
        }
        (Environment::Homologation, AuthorityService::Authorization) => {
            "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeAutorizacao4.asmx"
        }
        (Environment::Homologation, AuthorityService::ReceiptQuery) => {
            "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeRetAutorizacao4.asmx"
        }
        (Environment::Homologation, AuthorityService::KeyQuery) => {
            "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeConsultaProtocolo4.asmx"
        }
        (Environment::Homologation, AuthorityService::Event) => {
            "https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeRecepcaoEvento4.asmx"
        }
    }
}

fn svrs_url(environment: Environment, service: AuthorityService) -> &'static str {
    match (environment, service) {
        (Environment::Production, AuthorityService::Status) => {
            "https://nfce.svrs.rs.gov.br/ws/NfeStatusServico/NfeStatusServico4.asmx"
        }
        (Environment::Production, AuthorityService::Authorization) => {
            "https://nfce.svrs.rs.gov.br/ws/NfeAutorizacao/NFeAutorizacao4.asmx"
        }
        (Environment::Production, AuthorityService::ReceiptQuery) => {
            "https://nfce.svrs.rs.gov.br/ws/NfeRetAutorizacao/NFeRetAutorizacao4.asmx"
        }
        (Environment::Production, AuthorityService::KeyQuery) => {
            "https://nfce.svrs.rs.gov.br/ws/NfeConsulta/NfeConsulta4.asmx"
        }
        (Environment::Production, AuthorityService::Event) => {
            "https://nfce.svrs.rs.gov.br/ws/recepcaoevento/recepcaoevento4.asmx"
        }
        (Environment::Homologation, AuthorityService::Status) => {
            "https://nfce-homologacao.svrs.rs.gov.br/ws/NfeStatusServico/NfeStatusServico4.asmx"
        }
        (Environment::Homologation, AuthorityService::Authorization) => {
            "https://nfce-homologacao.svrs.rs.gov.br/ws/NfeAutorizacao/NFeAutorizacao4.asmx"
        }
        (Environment::Homologation, AuthorityService::ReceiptQuery) => {
            "https://nfce-homologacao.svrs.rs.gov.br/ws/NfeRetAutorizacao/NFeRetAutorizacao4.asmx"
        }
        (Environment::Homologation, AuthorityService::KeyQuery) => {
            "https://nfce-homologacao.svrs.rs.gov.br/ws/NfeConsulta/NfeConsulta4.asmx"
        }
        (Environment::Homologation, AuthorityService::Event) => {
            "https://nfce-homologacao.svrs.rs.gov.br/ws/recepcaoevento/recepcaoevento4.asmx"
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sao_paulo_has_dedicated_farm() {
        let url = resolve_url(35, Environment::Production, AuthorityService::Authorization);
        assert!(url.contains("fazenda.sp.gov.br"));
        assert!(url.ends_with("NFeAutorizacao4.asmx"));
    }

    #[test]
    fn other_states_route_to_svrs() {
        for state in [33, 43, 53] {
            let url = resolve_url(state, Environment::Production, AuthorityService::Status);
            assert!(url.contains("svrs.rs.gov.br"), "state {state} got {url}");
        }
    }

    #[test]
    fn homologation_uses_separate_hosts() {
        let production = resolve_url(35, Environment::Production, AuthorityService::Event);
        let homologation = resolve_url(35, Environment::Homologation, AuthorityService::Event);
        assert_ne!(production, homologation);
        assert!(homologation.contains("homologacao"));

        let svrs_homolog = resolve_url(43, Environment::Homologation, AuthorityService::KeyQuery);
        assert!(svrs_homolog.contains("nfce-homologacao.svrs.rs.gov.br"));
    }

    #[test]
    fn each_service_resolves_to_a_distinct_url() {
        let services = [
            AuthorityService::Status,
            AuthorityService::Authorization,
            AuthorityService::ReceiptQuery,
            AuthorityService::KeyQuery,
            AuthorityService::Event,
        ];
        for (i, a) in services.iter().enumerate() {
            for b in &services[i + 1..] {
                assert_ne!(
                    resolve_url(35, Environment::Production, *a),
                    resolve_url(35, Environment::Production, *b)
                );
                assert_ne!(a.wsdl_namespace(), b.wsdl_namespace());
            }
        }
    }
}
