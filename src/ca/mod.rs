//! Certificate Authority
//!
//! devproxy runs its own local CA so that browsers trusting the generated
//! root can get a green padlock for every `*.localhost`-style route without
//! a public CA ever being involved. The CA key uses P-384; issued leaves use
//! P-256, matching what every modern browser and TLS library expects of a
//! server certificate.

mod authority;

pub use authority::CertificateAuthority;
