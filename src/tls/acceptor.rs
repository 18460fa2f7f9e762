//! TLS acceptor and per-connection certificate binding

use openssl::ssl::{NameType, SniError, Ssl, SslAcceptor, SslAlert, SslContext, SslMethod, SslRef, SslVerifyMode};

use crate::certmgr::LeafCertificate;
use crate::common::{DevproxyError, Result};

/// Build the base TLS acceptor template.
///
/// No certificate is attached here: the certificate is resolved per
/// connection from the SNI hostname (sniffed ahead of the handshake) and
/// bound in [`connection_ssl`]. devproxy never requires client certificates,
/// so peer verification is disabled.
///
/// A servername callback rejects any ClientHello with no `server_name`
/// extension at all with a fatal `unrecognized_name` alert, before OpenSSL
/// would otherwise fall through to whatever certificate the `Ssl` happens to
/// carry. Connections with SNI are let through here; routing to the right
/// leaf certificate is still decided by the pre-handshake sniff, not by this
/// callback.
pub fn build_base_acceptor() -> Result<SslAcceptor> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_servername_callback(|ssl: &mut SslRef, alert: &mut SslAlert| match ssl.servername(NameType::HOST_NAME) {
        Some(_) => Ok(()),
        None => {
            *alert = SslAlert::UNRECOGNIZED_NAME;
            Err(SniError::ALERT_FATAL)
        }
    });
    Ok(builder.build())
}

/// Create a per-connection [`Ssl`] bound to `leaf`'s certificate and key.
pub fn connection_ssl(acceptor: &SslAcceptor, leaf: &LeafCertificate) -> Result<Ssl> {
    let context: &SslContext = acceptor.context();
    let mut ssl = Ssl::new(context).map_err(DevproxyError::Ssl)?;
    ssl.set_certificate(&leaf.cert)?;
    ssl.set_private_key(&leaf.key)?;
    Ok(ssl)
}

/// Create a per-connection [`Ssl`] with no certificate bound, used when the
/// ClientHello's SNI couldn't be resolved to a route ahead of the handshake.
/// The base context's servername callback rejects a genuinely SNI-less
/// ClientHello with `unrecognized_name` before certificate selection would
/// ever be reached.
pub fn bare_ssl(acceptor: &SslAcceptor) -> Result<Ssl> {
    let context: &SslContext = acceptor.context();
    Ssl::new(context).map_err(DevproxyError::Ssl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use std::sync::Arc;
    use std::time::SystemTime;

    #[test]
    fn test_connection_ssl_binds_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(&dir.path().join("ca.crt"), &dir.path().join("ca.key")).unwrap();
        let (cert, key) = ca.issue_leaf("app.localhost", &["app.localhost".to_string()], 90).unwrap();
        let leaf = LeafCertificate { cert, key, not_after: SystemTime::now() };

        let acceptor = build_base_acceptor().unwrap();
        let ssl = connection_ssl(&acceptor, &leaf);
        assert!(ssl.is_ok());
        let _ = Arc::new(leaf);
    }
}
