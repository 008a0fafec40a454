//! Custodial certificate source.
//!
//! Imported certificates live in an external store that the controller only
//! reads from. [`DirectoryCustodialStore`] backs the contract with a
//! directory tree:
//!
//! ```text
//! custodial/
//! └── shop-example/              # certificate name
//!     ├── 2024-01/               # version
//!     │   ├── cert.pem           # certificate chain
//!     │   ├── key.pem            # private key
//!     │   └── meta.json          # {"created": "...", "enabled": true}
//!     └── 2024-07/
//!         └── ...
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, trace};

use super::inspect::{parse_certificate, CertificateInfo};
use super::CertError;

/// A certificate fetched from a custodial store
#[derive(Debug, Clone)]
pub struct CustodialCertificate {
    pub name: String,
    /// Version that was resolved (the latest one when none was pinned)
    pub version: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub info: CertificateInfo,
}

/// Read-only access to externally managed certificates.
///
/// Implementations reject disabled, not-yet-valid and expired entries.
#[async_trait]
pub trait CustodialStore: Send + Sync {
    /// Fetch `name` at `version`, or the latest version when unset.
    async fn get_certificate(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<CustodialCertificate, CertError>;

    async fn certificate_exists(&self, name: &str) -> Result<bool, CertError>;
}

/// Version metadata stored alongside the certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    pub created: DateTime<Utc>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Directory-backed custodial store
#[derive(Debug, Clone)]
pub struct DirectoryCustodialStore {
    root: PathBuf,
}

impl DirectoryCustodialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn name_path(&self, name: &str) -> Result<PathBuf, CertError> {
        if !is_safe_component(name) {
            return Err(CertError::CustodialNotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    async fn read_meta(&self, version_path: &Path) -> Result<Option<VersionMeta>, CertError> {
        let meta_path = version_path.join("meta.json");
        match fs::read_to_string(&meta_path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Version with the most recent `created` timestamp.
    async fn latest_version(&self, name: &str) -> Result<Option<String>, CertError> {
        let name_path = self.name_path(name)?;
        let mut entries = match fs::read_dir(&name_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<(DateTime<Utc>, String)> = None;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let version = entry.file_name().to_string_lossy().into_owned();
            let Some(meta) = self.read_meta(&entry.path()).await? else {
                trace!(name = %name, version = %version, "Skipping version without metadata");
                continue;
            };
            if latest.as_ref().map_or(true, |(created, _)| meta.created > *created) {
                latest = Some((meta.created, version));
            }
        }

        Ok(latest.map(|(_, version)| version))
    }

    /// Write a version; used by tooling and tests.
    pub async fn put_certificate(
        &self,
        name: &str,
        version: &str,
        cert_pem: &str,
        key_pem: &str,
        meta: &VersionMeta,
    ) -> Result<(), CertError> {
        if !is_safe_component(version) {
            return Err(CertError::CustodialNotFound(format!("{}/{}", name, version)));
        }
        let path = self.name_path(name)?.join(version);
        fs::create_dir_all(&path).await?;

        fs::write(path.join("cert.pem"), cert_pem).await?;
        fs::write(path.join("key.pem"), key_pem).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path.join("key.pem"), std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        fs::write(path.join("meta.json"), serde_json::to_string_pretty(meta)?).await?;

        debug!(name = %name, version = %version, "Stored custodial certificate");
        Ok(())
    }
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

#[async_trait]
impl CustodialStore for DirectoryCustodialStore {
    async fn get_certificate(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<CustodialCertificate, CertError> {
        let version = match version {
            Some(v) if is_safe_component(v) => v.to_string(),
            Some(v) => return Err(CertError::CustodialNotFound(format!("{}/{}", name, v))),
            None => self
                .latest_version(name)
                .await?
                .ok_or_else(|| CertError::CustodialNotFound(name.to_string()))?,
        };

        let path = self.name_path(name)?.join(&version);
        let meta = self
            .read_meta(&path)
            .await?
            .ok_or_else(|| CertError::CustodialNotFound(format!("{}/{}", name, version)))?;

        if !meta.enabled {
            return Err(CertError::CustodialDisabled {
                name: name.to_string(),
                version,
            });
        }

        let cert_pem = fs::read_to_string(path.join("cert.pem")).await?;
        let key_pem = fs::read_to_string(path.join("key.pem")).await?;
        let info = parse_certificate(&cert_pem)?;

        let now = Utc::now();
        if info.not_before > now {
            return Err(CertError::CustodialNotYetValid {
                name: name.to_string(),
                version,
            });
        }
        if info.not_after <= now {
            return Err(CertError::CustodialExpired {
                name: name.to_string(),
                version,
            });
        }

        debug!(
            name = %name,
            version = %version,
            not_after = %info.not_after,
            "Loaded custodial certificate"
        );

        Ok(CustodialCertificate {
            name: name.to_string(),
            version,
            cert_pem,
            key_pem,
            info,
        })
    }

    async fn certificate_exists(&self, name: &str) -> Result<bool, CertError> {
        Ok(self.latest_version(name).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::generate_self_signed;
    use chrono::Duration;

    async fn put(
        store: &DirectoryCustodialStore,
        version: &str,
        created: DateTime<Utc>,
        enabled: bool,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) {
        let record =
            generate_self_signed(&["shop.example".to_string()], not_before, not_after).unwrap();
        store
            .put_certificate(
                "shop",
                version,
                &record.cert_pem,
                &record.key_pem,
                &VersionMeta { created, enabled },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_latest_version_by_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCustodialStore::new(dir.path());
        let now = Utc::now();

        put(&store, "b", now - Duration::days(10), true, now - Duration::days(10), now + Duration::days(50)).await;
        put(&store, "a", now - Duration::days(1), true, now - Duration::days(1), now + Duration::days(90)).await;

        let cert = store.get_certificate("shop", None).await.unwrap();
        assert_eq!(cert.version, "a");
        assert_eq!(cert.info.domains, vec!["shop.example"]);

        let pinned = store.get_certificate("shop", Some("b")).await.unwrap();
        assert_eq!(pinned.version, "b");
        assert!(store.certificate_exists("shop").await.unwrap());
        assert!(!store.certificate_exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_unusable_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCustodialStore::new(dir.path());
        let now = Utc::now();

        put(&store, "disabled", now, false, now - Duration::days(1), now + Duration::days(30)).await;
        put(&store, "future", now, true, now + Duration::days(1), now + Duration::days(30)).await;
        put(&store, "expired", now, true, now - Duration::days(30), now - Duration::days(1)).await;

        assert!(matches!(
            store.get_certificate("shop", Some("disabled")).await,
            Err(CertError::CustodialDisabled { .. })
        ));
        assert!(matches!(
            store.get_certificate("shop", Some("future")).await,
            Err(CertError::CustodialNotYetValid { .. })
        ));
        assert!(matches!(
            store.get_certificate("shop", Some("expired")).await,
            Err(CertError::CustodialExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_and_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCustodialStore::new(dir.path());

        assert!(matches!(
            store.get_certificate("missing", None).await,
            Err(CertError::CustodialNotFound(_))
        ));
        assert!(matches!(
            store.get_certificate("../etc", None).await,
            Err(CertError::CustodialNotFound(_))
        ));
        assert!(matches!(
            store.get_certificate("shop", Some("..")).await,
            Err(CertError::CustodialNotFound(_))
        ));
    }
}
