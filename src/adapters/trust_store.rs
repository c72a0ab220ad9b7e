//! Certificate trust stores and viewer integration settings.
//!
//! Stores are laid out on disk as
//! `{root}/{current-user|local-machine}/{ca|root}/{SHA1-THUMBPRINT}.der`.
//! The local-machine scope is writable only when the process is elevated,
//! which for this layout means the directory is writable by the process.

use crate::domain::crypto::CertificateInfo;
use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    CurrentUser,
    LocalMachine,
}

impl StoreLocation {
    pub const ALL: [StoreLocation; 2] = [StoreLocation::CurrentUser, StoreLocation::LocalMachine];

    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            StoreLocation::CurrentUser => "current-user",
            StoreLocation::LocalMachine => "local-machine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    /// Intermediate certification authorities.
    CertificateAuthority,
    Root,
}

impl StoreName {
    pub const ALL: [StoreName; 2] = [StoreName::CertificateAuthority, StoreName::Root];

    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            StoreName::CertificateAuthority => "ca",
            StoreName::Root => "root",
        }
    }

    /// Root for self-issued certificates, CA otherwise.
    #[must_use]
    pub fn for_certificate(cert: &CertificateInfo) -> Self {
        if cert.is_self_issued() {
            StoreName::Root
        } else {
            StoreName::CertificateAuthority
        }
    }
}

/// Persistent certificate store.
pub trait CertificateStore: Send + Sync {
    /// Every readable certificate in the store. Unreadable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the store exists but cannot be listed.
    fn certificates(&self, location: StoreLocation, name: StoreName)
        -> SigningResult<Vec<CertificateInfo>>;

    /// # Errors
    ///
    /// Returns error if the store cannot be queried.
    fn contains(&self, location: StoreLocation, name: StoreName, thumbprint: &str)
        -> SigningResult<bool>;

    /// Add a certificate. Returns `false` when it was already present.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened for writing.
    fn add(&self, location: StoreLocation, name: StoreName, cert: &CertificateInfo)
        -> SigningResult<bool>;

    /// Whether machine-wide stores may be written.
    fn is_elevated(&self) -> bool;

    /// Roots of both scopes, used as trust anchors for path building.
    fn trusted_roots(&self) -> Vec<CertificateInfo> {
        StoreLocation::ALL
            .iter()
            .flat_map(|loc| self.certificates(*loc, StoreName::Root).unwrap_or_default())
            .collect()
    }

    /// Every certificate of every store.
    fn all_certificates(&self) -> Vec<CertificateInfo> {
        let mut out = Vec::new();
        for location in StoreLocation::ALL {
            for name in StoreName::ALL {
                out.extend(self.certificates(location, name).unwrap_or_default());
            }
        }
        out
    }
}

/// Directory-backed store.
#[derive(Debug, Clone)]
pub struct FileTrustStore {
    root: PathBuf,
    elevated: Option<bool>,
}

impl FileTrustStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            elevated: None,
        }
    }

    /// Force the elevation state instead of probing the file system.
    #[must_use]
    pub fn with_elevated(mut self, elevated: bool) -> Self {
        self.elevated = Some(elevated);
        self
    }

    /// `{data_dir}/esign-agent/trust`, or `./esign-agent-trust`.
    #[must_use]
    pub fn default_root() -> PathBuf {
        dirs::data_dir().map_or_else(
            || PathBuf::from("esign-agent-trust"),
            |dir| dir.join("esign-agent").join("trust"),
        )
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, location: StoreLocation, name: StoreName) -> PathBuf {
        self.root.join(location.dir_name()).join(name.dir_name())
    }

    fn check_writable(&self) -> bool {
        let dir = self.root.join(StoreLocation::LocalMachine.dir_name());
        if fs::create_dir_all(&dir).is_err() {
            return false;
        }
        let marker = dir.join(".write-test");
        let writable = fs::write(&marker, b"").is_ok();
        let _ = fs::remove_file(&marker);
        writable
    }
}

impl CertificateStore for FileTrustStore {
    fn certificates(
        &self,
        location: StoreLocation,
        name: StoreName,
    ) -> SigningResult<Vec<CertificateInfo>> {
        let dir = self.store_dir(location, name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut certs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match fs::read(&path)
                .map_err(SigningError::from)
                .and_then(|bytes| CertificateInfo::from_der_or_pem(&bytes))
            {
                Ok(cert) => certs.push(cert),
                Err(e) => log::debug!("skipping {}: {e}", path.display()),
            }
        }
        Ok(certs)
    }

    fn contains(
        &self,
        location: StoreLocation,
        name: StoreName,
        thumbprint: &str,
    ) -> SigningResult<bool> {
        let file = self
            .store_dir(location, name)
            .join(format!("{}.der", thumbprint.to_ascii_uppercase()));
        Ok(file.is_file())
    }

    fn add(
        &self,
        location: StoreLocation,
        name: StoreName,
        cert: &CertificateInfo,
    ) -> SigningResult<bool> {
        if self.contains(location, name, cert.thumbprint())? {
            return Ok(false);
        }
        let dir = self.store_dir(location, name);
        fs::create_dir_all(&dir).map_err(|e| {
            SigningError::IoError(format!(
                "{}/{} cannot be opened: {e}",
                location.dir_name(),
                name.dir_name()
            ))
        })?;
        fs::write(dir.join(format!("{}.der", cert.thumbprint())), cert.der())?;
        log::info!(
            "Installed {} into {}/{}",
            cert.subject(),
            location.dir_name(),
            name.dir_name()
        );
        Ok(true)
    }

    fn is_elevated(&self) -> bool {
        self.elevated.unwrap_or_else(|| self.check_writable())
    }
}

/// Settings a PDF viewer needs to trust certificates from the system store.
pub trait ViewerIntegration: Send + Sync {
    /// Write the settings; returns how many values changed.
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be persisted.
    fn ensure(&self) -> SigningResult<usize>;

    /// True when at least one viewer product is configured.
    fn is_ready(&self) -> bool;
}

/// Trust mask meaning "system store plus trusted roots".
pub const STORE_TRUST_MASK: u32 = 0x62;
pub const VIEWER_PRODUCTS: [&str; 2] = ["Adobe Acrobat DC", "Acrobat Reader DC"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerProductSettings {
    pub store_trust_mask: u32,
    pub cert_store_import_enable: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ViewerSettingsFile {
    #[serde(default)]
    products: BTreeMap<String, ViewerProductSettings>,
}

/// Viewer settings persisted as TOML.
#[derive(Debug, Clone)]
pub struct FileViewerIntegration {
    path: PathBuf,
}

impl FileViewerIntegration {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("esign-agent-viewer.toml"),
            |dir| dir.join("esign-agent").join("viewer.toml"),
        )
    }

    fn read(&self) -> SigningResult<ViewerSettingsFile> {
        if !self.path.exists() {
            return Ok(ViewerSettingsFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        toml::from_str(&content).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to parse viewer settings {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl ViewerIntegration for FileViewerIntegration {
    fn ensure(&self) -> SigningResult<usize> {
        let mut file = self.read()?;
        let mut written = 0;
        for product in VIEWER_PRODUCTS {
            let entry = file.products.entry(product.to_string()).or_default();
            if entry.store_trust_mask != STORE_TRUST_MASK {
                entry.store_trust_mask = STORE_TRUST_MASK;
                written += 1;
            }
            if entry.cert_store_import_enable != 1 {
                entry.cert_store_import_enable = 1;
                written += 1;
            }
        }
        if written > 0 {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = toml::to_string_pretty(&file).map_err(|e| {
                SigningError::ConfigurationError(format!("Failed to serialize viewer settings: {e}"))
            })?;
            fs::write(&self.path, content)?;
        }
        Ok(written)
    }

    fn is_ready(&self) -> bool {
        self.read().is_ok_and(|file| {
            file.products.values().any(|p| {
                p.store_trust_mask == STORE_TRUST_MASK && p.cert_store_import_enable == 1
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn viewer_integration_writes_once() {
        let dir = TempDir::new().unwrap();
        let viewer = FileViewerIntegration::new(dir.path().join("viewer.toml"));
        assert!(!viewer.is_ready());
        assert_eq!(viewer.ensure().unwrap(), 4);
        assert!(viewer.is_ready());
        assert_eq!(viewer.ensure().unwrap(), 0);
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileTrustStore::new(dir.path()).with_elevated(false);
        assert!(store
            .certificates(StoreLocation::CurrentUser, StoreName::Root)
            .unwrap()
            .is_empty());
        assert!(!store
            .contains(StoreLocation::CurrentUser, StoreName::Root, "AB")
            .unwrap());
        assert!(!store.is_elevated());
    }

    #[test]
    fn elevation_detected_on_writable_root() {
        let dir = TempDir::new().unwrap();
        assert!(FileTrustStore::new(dir.path()).is_elevated());
    }
}
