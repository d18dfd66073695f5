//! Extracts a client identity from the peer TLS certificate.
//!
//! Candidate identities are visited in a strict priority order (email
//! addresses, DNS SANs, URIs, the RDN sequence with appended domain
//! components, and finally the certificate subject) and driven through a
//! caller-supplied predicate. The first candidate the predicate accepts
//! wins; this lets the caller both recognize the identity (a users-table
//! lookup) and record it on the connection in one pass.
//!
//! Only the first peer certificate is consulted; additional certificates
//! are ignored with a log line.

use tracing::debug;

use x509_parser::extensions::GeneralName;

use crate::connection::ClientAuthentication;
use crate::error::{AuthError, AuthResult};

/// Domain-component attribute type (RFC 4519 `dc`).
const DOMAIN_COMPONENT_OID: &str = "0.9.2342.19200300.100.1.25";

/// Visit candidate identities from the client certificate in priority
/// order, stopping at the first one the predicate accepts.
///
/// Returns `false` when there is no TLS state, no peer certificate, no
/// usable identity, or no candidate was accepted.
pub fn check_client_tls_cert_subject(
    client: &dyn ClientAuthentication,
    predicate: impl FnMut(&str) -> bool,
) -> bool {
    match try_cert_identities(client, predicate) {
        Ok(()) => true,
        Err(err) => {
            debug!(error = %err, "certificate identity extraction failed");
            false
        }
    }
}

fn try_cert_identities(
    client: &dyn ClientAuthentication,
    mut predicate: impl FnMut(&str) -> bool,
) -> AuthResult<()> {
    let Some(tls_state) = client.tls_state() else {
        debug!("user required in cert, no TLS connection state");
        return Err(AuthError::TlsIdentityAbsent);
    };
    if tls_state.peer_certificates.is_empty() {
        debug!("user required in cert, no peer certificates found");
        return Err(AuthError::TlsIdentityAbsent);
    }
    if tls_state.peer_certificates.len() > 1 {
        debug!("multiple peer certificates found, selecting first");
    }

    let der = &tls_state.peer_certificates[0];
    let (_, cert) = match x509_parser::parse_x509_certificate(der.as_ref()) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(error = %err, "failed to parse peer certificate");
            return Err(AuthError::TlsIdentityAbsent);
        }
    };

    let mut emails: Vec<&str> = Vec::new();
    let mut dns_names: Vec<&str> = Vec::new();
    let mut uris: Vec<&str> = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::RFC822Name(email) => emails.push(*email),
                GeneralName::DNSName(dns) => dns_names.push(*dns),
                GeneralName::URI(uri) => uris.push(*uri),
                _ => {}
            }
        }
    }

    let subject = cert.subject().to_string();
    let has_emails = !emails.is_empty();
    let has_sans = !dns_names.is_empty();
    let has_uris = !uris.is_empty();
    if !has_emails && subject.is_empty() && !has_uris {
        debug!("user required in cert, none found");
        return Err(AuthError::TlsIdentityAbsent);
    }

    if has_emails {
        for email in &emails {
            if predicate(email) {
                debug!(identity = %email, "using email found in cert for auth");
                return Ok(());
            }
        }
        // Unmatched emails intentionally fall through to the DNS SANs.
        for dns in &dns_names {
            if predicate(dns) {
                debug!(identity = %dns, "using SAN found in cert for auth");
                return Ok(());
            }
        }
    } else if has_sans {
        for dns in &dns_names {
            if predicate(dns) {
                debug!(identity = %dns, "using SAN found in cert for auth");
                return Ok(());
            }
        }
    } else if has_uris {
        for uri in &uris {
            if predicate(uri) {
                debug!(identity = %uri, "using URI found in cert for auth");
                return Ok(());
            }
        }
    }

    // Try the full RDN sequence with the domain components appended,
    // roughly following the ordering from RFC 2253.
    let dcs = domain_components(&cert);
    if !dcs.is_empty() {
        let identity = format!("{},{}", subject, dcs.join(","));
        if predicate(&identity) {
            debug!(identity = %identity, "using RDN sequence for auth");
            return Ok(());
        }
    }

    // Last resort: the subject of the certificate.
    debug!(identity = %subject, "using certificate subject for auth");
    if predicate(&subject) {
        Ok(())
    } else {
        Err(AuthError::TlsIdentityUnmapped)
    }
}

/// Collect `DC=` components from the certificate subject, in order.
fn domain_components(cert: &x509_parser::certificate::X509Certificate<'_>) -> Vec<String> {
    let mut dcs = Vec::new();
    for attr in cert.subject().iter_attributes() {
        if attr.attr_type().to_id_string() != DOMAIN_COMPONENT_OID {
            continue;
        }
        if let Ok(value) = attr.as_str() {
            dcs.push(format!("DC={value}"));
        }
    }
    dcs
}
