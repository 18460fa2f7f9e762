//! On-demand leaf certificate issuance, caching, and renewal

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify};

use crate::ca::CertificateAuthority;
use crate::common::fs::write_private_file;
use crate::common::net::normalize_host;
use crate::common::{DevproxyError, Result};

/// A cached leaf certificate and its private key
pub struct LeafCertificate {
    /// The signed leaf certificate
    pub cert: X509,
    /// The leaf's private key
    pub key: PKey<Private>,
    /// When this leaf expires
    pub not_after: SystemTime,
}

/// Issues, caches, and renews leaf certificates keyed by SNI hostname
pub struct CertificateManager {
    ca: Arc<CertificateAuthority>,
    cache: RwLock<HashMap<String, Arc<LeafCertificate>>>,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
    certs_dir: PathBuf,
    validity_days: u32,
    renewal_threshold_days: u32,
}

impl CertificateManager {
    /// Create a new certificate manager backed by `ca`
    pub fn new(ca: Arc<CertificateAuthority>, certs_dir: PathBuf, validity_days: u32, renewal_threshold_days: u32) -> Self {
        Self {
            ca,
            cache: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            certs_dir,
            validity_days,
            renewal_threshold_days,
        }
    }

    /// Get a leaf certificate for `host`, issuing (and persisting) a new one
    /// if none is cached or the cached one is within its renewal window.
    ///
    /// Concurrent calls for the same host are coalesced: only one signs a
    /// new certificate, the rest wait on it and reuse the result.
    pub async fn get_or_issue(&self, host: &str) -> Result<Arc<LeafCertificate>> {
        let key = normalize_host(host)?;

        loop {
            if let Some(leaf) = self.cached(&key) {
                return Ok(leaf);
            }

            let mut inflight = self.inflight.lock().await;
            if let Some(notify) = inflight.get(&key).cloned() {
                drop(inflight);
                notify.notified().await;
                continue;
            }

            let notify = Arc::new(Notify::new());
            inflight.insert(key.clone(), Arc::clone(&notify));
            drop(inflight);

            let result = self.issue_and_cache(&key).await;

            self.inflight.lock().await.remove(&key);
            notify.notify_waiters();

            return result;
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<LeafCertificate>> {
        let cache = self.cache.read();
        let leaf = cache.get(key)?;
        if self.needs_renewal(leaf) {
            return None;
        }
        Some(Arc::clone(leaf))
    }

    fn needs_renewal(&self, leaf: &LeafCertificate) -> bool {
        let threshold = Duration::from_secs(self.renewal_threshold_days as u64 * 24 * 3600);
        match leaf.not_after.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining < threshold,
            Err(_) => true, // already expired
        }
    }

    async fn issue_and_cache(&self, host: &str) -> Result<Arc<LeafCertificate>> {
        let sans = sans_for(host);
        debug!("issuing leaf certificate for {} (sans: {:?})", host, sans);

        let (cert, key) = self.ca.issue_leaf(host, &sans, self.validity_days)?;
        if let Err(e) = self.persist(host, &cert, &key) {
            warn!("failed to persist leaf certificate for {} to disk, serving from memory only: {}", host, e);
        }

        let not_after = SystemTime::now() + Duration::from_secs(self.validity_days as u64 * 24 * 3600);
        let leaf = Arc::new(LeafCertificate { cert, key, not_after });

        self.cache.write().insert(host.to_string(), Arc::clone(&leaf));
        info!("issued leaf certificate for {}", host);

        Ok(leaf)
    }

    fn persist(&self, host: &str, cert: &X509, key: &PKey<Private>) -> Result<()> {
        let host_dir = self.certs_dir.join(host);
        std::fs::create_dir_all(&host_dir).map_err(DevproxyError::Io)?;
        std::fs::write(host_dir.join("cert.pem"), cert.to_pem()?).map_err(DevproxyError::Io)?;
        write_private_file(&host_dir.join("key.pem"), &key.private_key_to_pem_pkcs8()?)?;
        Ok(())
    }
}

/// Determine the SAN list for a leaf certificate.
///
/// Hosts with three or more labels also get a wildcard SAN for their
/// immediate parent (`app.project.localhost` -> adds `*.project.localhost`)
/// so that sibling routes under the same compose project share one leaf
/// instead of triggering a fresh CA signature per container.
fn sans_for(host: &str) -> Vec<String> {
    let mut sans = vec![host.to_string()];
    if host.starts_with("*.") {
        return sans;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 3 {
        sans.push(format!("*.{}", labels[1..].join(".")));
    }

    sans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, CertificateManager) {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(&dir.path().join("ca.crt"), &dir.path().join("ca.key")).unwrap();
        let mgr = CertificateManager::new(Arc::new(ca), dir.path().join("certs"), 90, 30);
        (dir, mgr)
    }

    #[tokio::test]
    async fn test_issues_and_caches() {
        let (_dir, mgr) = manager();
        let first = mgr.get_or_issue("app.localhost").await.unwrap();
        let second = mgr.get_or_issue("app.localhost").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_persists_to_disk() {
        let (dir, mgr) = manager();
        mgr.get_or_issue("app.localhost").await.unwrap();
        assert!(dir.path().join("certs").join("app.localhost").join("cert.pem").exists());
        assert!(dir.path().join("certs").join("app.localhost").join("key.pem").exists());
    }

    #[tokio::test]
    async fn test_issues_in_memory_even_when_persist_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(&dir.path().join("ca.crt"), &dir.path().join("ca.key")).unwrap();
        // certs_dir path is occupied by a plain file, so create_dir_all underneath it must fail
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let mgr = CertificateManager::new(Arc::new(ca), blocked.join("certs"), 90, 30);

        let leaf = mgr.get_or_issue("app.localhost").await.unwrap();
        assert!(leaf.cert.subject_name().entries().count() > 0);
    }

    #[test]
    fn test_sans_for_adds_parent_wildcard() {
        let sans = sans_for("app.myproject.localhost");
        assert_eq!(sans, vec!["app.myproject.localhost", "*.myproject.localhost"]);
    }

    #[test]
    fn test_sans_for_two_labels_has_no_wildcard() {
        let sans = sans_for("app.localhost");
        assert_eq!(sans, vec!["app.localhost"]);
    }
}
