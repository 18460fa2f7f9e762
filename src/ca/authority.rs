//! CA key/certificate generation, persistence, and leaf signing

use std::path::Path;

use log::info;
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509NameBuilder, X509};

use crate::common::fs::{read_file, write_private_file};
use crate::common::{DevproxyError, Result};

/// A local certificate authority: one long-lived root used to sign
/// short-lived leaf certificates for routes discovered from Docker labels.
pub struct CertificateAuthority {
    cert: X509,
    key: PKey<Private>,
}

impl CertificateAuthority {
    /// Load the CA from `cert_path`/`key_path` if both exist, otherwise
    /// generate a new root and persist it there.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self> {
        if cert_path.exists() && key_path.exists() {
            info!("loading existing CA from {}", cert_path.display());
            Self::load(cert_path, key_path)
        } else {
            info!("no CA found at {}, generating a new one", cert_path.display());
            Self::generate(cert_path, key_path)
        }
    }

    fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert = X509::from_pem(&read_file(cert_path)?)
            .map_err(|e| DevproxyError::Certificate(format!("failed to parse CA certificate: {}", e)))?;
        let key = PKey::private_key_from_pem(&read_file(key_path)?)
            .map_err(|e| DevproxyError::Certificate(format!("failed to parse CA private key: {}", e)))?;

        ensure_not_expired(&cert, &cert_path.display().to_string())?;

        Ok(Self { cert, key })
    }

    fn generate(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let group = EcGroup::from_curve_name(Nid::SECP384R1)?;
        let ec_key = EcKey::generate(&group)?;
        let key = PKey::from_ec_key(ec_key)?;

        let name = build_name("devproxy Development CA")?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&ca_serial()?)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&Asn1Time::days_from_now(0)?)?;
        builder.set_not_after(&Asn1Time::days_from_now(3650)?)?;

        builder.append_extension(BasicConstraints::new().critical().ca().pathlen(0).build()?)?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
        let subject_key_id = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(subject_key_id)?;

        builder.sign(&key, MessageDigest::sha384())?;
        let cert = builder.build();

        write_private_file(key_path, &key.private_key_to_pem_pkcs8()?)?;
        std::fs::write(cert_path, cert.to_pem()?).map_err(DevproxyError::Io)?;

        info!("generated new CA, trust root at {}", cert_path.display());
        Ok(Self { cert, key })
    }

    /// The CA certificate, e.g. for browsers to trust or for serving a
    /// `/ca.crt` convenience download.
    pub fn cert(&self) -> &X509 {
        &self.cert
    }

    /// PEM-encoded CA certificate
    pub fn cert_pem(&self) -> Result<Vec<u8>> {
        self.cert.to_pem().map_err(DevproxyError::Ssl)
    }

    /// Issue a leaf certificate over a freshly generated P-256 key.
    ///
    /// `sans` must include `common_name`; the caller (the certificate
    /// manager) is responsible for deciding wildcard vs. exact-host SANs.
    pub fn issue_leaf(
        &self,
        common_name: &str,
        sans: &[String],
        validity_days: u32,
    ) -> Result<(X509, PKey<Private>)> {
        ensure_not_expired(&self.cert, "CA certificate")?;

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let ec_key = EcKey::generate(&group)?;
        let leaf_key = PKey::from_ec_key(ec_key)?;

        let subject = build_name(common_name)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&random_serial()?)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(self.cert.subject_name())?;
        builder.set_pubkey(&leaf_key)?;
        builder.set_not_before(&Asn1Time::days_from_now(0)?)?;
        builder.set_not_after(&Asn1Time::days_from_now(validity_days)?)?;

        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(KeyUsage::new().critical().digital_signature().key_encipherment().build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;

        let mut san = SubjectAlternativeName::new();
        for name in sans {
            san.dns(name);
        }
        let san_ext = san.build(&builder.x509v3_context(Some(&self.cert), None))?;
        builder.append_extension(san_ext)?;

        let ctx = builder.x509v3_context(Some(&self.cert), None);
        let akid = AuthorityKeyIdentifier::new().keyid(true).build(&ctx)?;
        builder.append_extension(akid)?;

        builder.sign(&self.key, MessageDigest::sha256())?;
        let cert = builder.build();

        Ok((cert, leaf_key))
    }
}

fn build_name(common_name: &str) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, "devproxy")?;
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(builder.build())
}

fn random_serial() -> Result<Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer().map_err(DevproxyError::Ssl)
}

/// The CA's own certificate carries a fixed serial: there is only ever one
/// of it on disk at a time, and a fixed value keeps `load_or_generate` runs
/// reproducible.
fn ca_serial() -> Result<Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.set_word(1)?;
    serial.to_asn1_integer().map_err(DevproxyError::Ssl)
}

fn ensure_not_expired(cert: &X509, context: &str) -> Result<()> {
    let now = Asn1Time::days_from_now(0)?;
    let diff = cert.not_after().diff(&now)?;
    if diff.days < 0 || (diff.days == 0 && diff.secs <= 0) {
        return Err(DevproxyError::Certificate(format!("{} is expired", context)));
    }
    Ok(())
}
