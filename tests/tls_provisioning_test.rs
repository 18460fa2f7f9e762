//! End-to-end certificate provisioning: a freshly generated local CA issues
//! a leaf through the certificate manager, and that leaf binds onto a real
//! per-connection `Ssl` via the same acceptor the HTTPS entrypoint uses.

use std::sync::Arc;

use devproxy::ca::CertificateAuthority;
use devproxy::certmgr::CertificateManager;
use devproxy::tls::{build_base_acceptor, connection_ssl};

fn new_manager() -> (tempfile::TempDir, CertificateManager) {
    let dir = tempfile::tempdir().unwrap();
    let ca = CertificateAuthority::load_or_generate(&dir.path().join("ca.crt"), &dir.path().join("ca.key")).unwrap();
    let manager = CertificateManager::new(Arc::new(ca), dir.path().join("certs"), 90, 30);
    (dir, manager)
}

#[tokio::test]
async fn test_issued_leaf_binds_to_a_connection_acceptor() {
    let (_dir, manager) = new_manager();
    let leaf = manager.get_or_issue("app.myproject.localhost").await.unwrap();

    let acceptor = build_base_acceptor().unwrap();
    let ssl = connection_ssl(&acceptor, &leaf);
    assert!(ssl.is_ok());
}

#[tokio::test]
async fn test_three_label_host_gets_parent_wildcard_san() {
    let (_dir, manager) = new_manager();
    let leaf = manager.get_or_issue("app.myproject.localhost").await.unwrap();

    let sans: Vec<String> = leaf
        .cert
        .subject_alt_names()
        .unwrap()
        .iter()
        .filter_map(|name| name.dnsname().map(|s| s.to_string()))
        .collect();

    assert!(sans.contains(&"app.myproject.localhost".to_string()));
    assert!(sans.contains(&"*.myproject.localhost".to_string()));
}

#[tokio::test]
async fn test_leaf_is_issued_by_the_local_ca() {
    let dir = tempfile::tempdir().unwrap();
    let ca = CertificateAuthority::load_or_generate(&dir.path().join("ca.crt"), &dir.path().join("ca.key")).unwrap();
    let ca = Arc::new(ca);
    let manager = CertificateManager::new(Arc::clone(&ca), dir.path().join("certs"), 90, 30);

    let leaf = manager.get_or_issue("api.localhost").await.unwrap();
    assert_eq!(
        leaf.cert.issuer_name().to_der().unwrap(),
        ca.cert().subject_name().to_der().unwrap()
    );
}
