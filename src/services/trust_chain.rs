//! Trust chain discovery and installation.
//!
//! Chain building is best effort: every source that fails is logged, the
//! failure is recorded as a warning and the builder moves on. Nothing here
//! aborts a signing operation.

use crate::adapters::net::NetworkFetcher;
use crate::adapters::trust_store::{CertificateStore, StoreLocation, StoreName, ViewerIntegration};
use crate::domain::constants::MAX_CHAIN_REPAIR_ROUNDS;
use crate::domain::crypto::{dn_equals, CertificateInfo};
use crate::infra::error::SigningResult;
use openssl::pkcs7::Pkcs7;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Certificates collected for a chain, unique by SHA-1 thumbprint, in
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    certs: Vec<CertificateInfo>,
    seen: HashSet<String>,
}

impl CandidateSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a certificate with the same thumbprint is present.
    pub fn insert(&mut self, cert: CertificateInfo) -> bool {
        if !self.seen.insert(cert.thumbprint().to_string()) {
            return false;
        }
        self.certs.push(cert);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CertificateInfo> {
        self.certs.iter()
    }

    #[must_use]
    pub fn contains(&self, thumbprint: &str) -> bool {
        self.seen.contains(thumbprint)
    }

    fn has_issuer_of(&self, cert: &CertificateInfo) -> bool {
        self.certs.iter().any(|c| dn_equals(c.subject(), cert.issuer()))
    }

    /// Issuer path starting at `leaf`, leaf first, followed by every other
    /// candidate in insertion order.
    #[must_use]
    pub fn into_ordered_chain(self, leaf: &CertificateInfo) -> Vec<CertificateInfo> {
        let mut remaining = self.certs;
        remaining.retain(|c| c.thumbprint() != leaf.thumbprint());
        let mut ordered = vec![leaf.clone()];
        loop {
            let Some(current) = ordered.last() else { break };
            if current.is_self_issued() {
                break;
            }
            let Some(pos) = remaining.iter().position(|c| issuer_matches(current, c)) else {
                break;
            };
            ordered.push(remaining.remove(pos));
        }
        ordered.extend(remaining);
        ordered
    }
}

/// Whether `parent` could have issued `child`: DN match, refined by
/// AKI/SKI when both are present.
#[must_use]
pub fn issuer_matches(child: &CertificateInfo, parent: &CertificateInfo) -> bool {
    if !dn_equals(parent.subject(), child.issuer()) {
        return false;
    }
    match (child.authority_key_id(), parent.subject_key_id()) {
        (Some(aki), Some(ski)) if !aki.is_empty() && !ski.is_empty() => aki == ski,
        _ => true,
    }
}

/// Certificates from an AIA payload: a PKCS#7 bundle (DER or PEM), a PEM
/// sequence, or a single DER certificate.
#[must_use]
pub fn parse_certificate_bundle(payload: &[u8]) -> Vec<CertificateInfo> {
    let pkcs7 = Pkcs7::from_der(payload).or_else(|_| Pkcs7::from_pem(payload));
    if let Ok(pkcs7) = pkcs7 {
        let certs: Vec<CertificateInfo> = pkcs7
            .signed()
            .and_then(|signed| signed.certificates())
            .map(|stack| {
                stack
                    .iter()
                    .filter_map(|x| x.to_der().ok())
                    .filter_map(|der| CertificateInfo::from_der(&der).ok())
                    .collect()
            })
            .unwrap_or_default();
        if !certs.is_empty() {
            return certs;
        }
    }
    if payload.starts_with(b"-----BEGIN") {
        if let Ok(stack) = X509::stack_from_pem(payload) {
            let certs: Vec<CertificateInfo> = stack
                .iter()
                .filter_map(|x| x.to_der().ok())
                .filter_map(|der| CertificateInfo::from_der(&der).ok())
                .collect();
            if !certs.is_empty() {
                return certs;
            }
        }
    }
    CertificateInfo::from_der_or_pem(payload).into_iter().collect()
}

fn to_openssl(cert: &CertificateInfo) -> Option<X509> {
    X509::from_der(cert.der()).ok()
}

fn build_store(roots: &[CertificateInfo], partial: bool) -> SigningResult<X509Store> {
    let mut builder = X509StoreBuilder::new()?;
    for root in roots {
        if let Some(x509) = to_openssl(root) {
            if let Err(e) = builder.add_cert(x509) {
                log::debug!("root {} not added: {e}", root.subject());
            }
        }
    }
    if partial {
        builder.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;
    }
    Ok(builder.build())
}

fn untrusted_stack<'a>(certs: impl Iterator<Item = &'a CertificateInfo>) -> SigningResult<Stack<X509>> {
    let mut stack = Stack::new()?;
    for cert in certs {
        if let Some(x509) = to_openssl(cert) {
            stack.push(x509)?;
        }
    }
    Ok(stack)
}

/// Outcome of verifying a certificate path with OpenSSL.
#[derive(Debug, Clone)]
pub struct PathVerification {
    pub valid: bool,
    /// `OK` or the verifier's error string.
    pub status: String,
    /// Path found by the verifier, leaf first.
    pub chain: Vec<CertificateInfo>,
}

/// Verify `leaf` against `roots` with `intermediates` as untrusted helpers.
pub fn verify_path(
    leaf: &CertificateInfo,
    roots: &[CertificateInfo],
    intermediates: &[CertificateInfo],
    partial: bool,
) -> SigningResult<PathVerification> {
    let store = build_store(roots, partial)?;
    let chain = untrusted_stack(intermediates.iter())?;
    let leaf_x509 = X509::from_der(leaf.der())?;
    let mut ctx = X509StoreContext::new()?;
    let result = ctx.init(&store, &leaf_x509, &chain, |c| {
        let valid = c.verify_cert()?;
        let status = if valid {
            "OK".to_string()
        } else {
            c.error().error_string().to_string()
        };
        let found = c
            .chain()
            .map(|stack| {
                stack
                    .iter()
                    .filter_map(|x| x.to_der().ok())
                    .filter_map(|der| CertificateInfo::from_der(&der).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok((valid, status, found))
    })?;
    let (valid, status, chain) = result;
    Ok(PathVerification {
        valid,
        status,
        chain,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessLevel {
    Ready,
    Partial,
    NotReady,
}

impl fmt::Display for ReadinessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReadinessLevel::Ready => "Ready",
            ReadinessLevel::Partial => "Partial",
            ReadinessLevel::NotReady => "Not Ready",
        };
        f.write_str(text)
    }
}

/// Advisory readiness of the local machine to show the signature as trusted.
#[must_use]
pub fn evaluate_readiness(
    validation_ok: bool,
    current_user_chain_ready: bool,
    viewer_ready: bool,
) -> ReadinessLevel {
    if validation_ok && current_user_chain_ready && viewer_ready {
        ReadinessLevel::Ready
    } else if validation_ok || current_user_chain_ready || viewer_ready {
        ReadinessLevel::Partial
    } else {
        ReadinessLevel::NotReady
    }
}

/// Counts and status gathered while installing a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallCounts {
    pub added_root_count: usize,
    pub added_intermediate_count: usize,
    pub existing_root_count: usize,
    pub existing_intermediate_count: usize,
}

/// Result of a trust setup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustSetupReport {
    pub success: bool,
    pub message: String,
    pub signer_subject: String,
    pub signer_thumbprint: String,
    pub validation_succeeded: bool,
    pub validation_status: String,
    pub candidate_root_count: usize,
    pub candidate_intermediate_count: usize,
    #[serde(flatten)]
    pub counts: InstallCounts,
    pub viewer_values_written: usize,
    pub current_user_chain_ready: bool,
    pub local_machine_chain_ready: bool,
    pub viewer_integration_ready: bool,
    pub readiness_level: ReadinessLevel,
    pub warnings: Vec<String>,
}

impl TrustSetupReport {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            signer_subject: String::new(),
            signer_thumbprint: String::new(),
            validation_succeeded: false,
            validation_status: String::new(),
            candidate_root_count: 0,
            candidate_intermediate_count: 0,
            counts: InstallCounts::default(),
            viewer_values_written: 0,
            current_user_chain_ready: false,
            local_machine_chain_ready: false,
            viewer_integration_ready: false,
            readiness_level: ReadinessLevel::NotReady,
            warnings: Vec::new(),
        }
    }

    fn summarize(&mut self) {
        let ok = |b: bool| if b { "OK" } else { "missing" };
        self.message = format!(
            "Trust chain check complete. Candidate roots: {}, intermediates: {}. \
             Roots added: {} (existing: {}), intermediates added: {} (existing: {}). \
             Validation: {} ({}). Viewer settings written: {}. \
             Readiness: {} (current-user chain={}, local-machine chain={}, viewer={}).",
            self.candidate_root_count,
            self.candidate_intermediate_count,
            self.counts.added_root_count,
            self.counts.existing_root_count,
            self.counts.added_intermediate_count,
            self.counts.existing_intermediate_count,
            if self.validation_succeeded { "passed" } else { "failed" },
            self.validation_status,
            self.viewer_values_written,
            self.readiness_level,
            ok(self.current_user_chain_ready),
            ok(self.local_machine_chain_ready),
            ok(self.viewer_integration_ready),
        );
    }
}

pub struct TrustChainBuilder {
    store: Arc<dyn CertificateStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    viewer: Arc<dyn ViewerIntegration>,
    max_rounds: usize,
}

impl TrustChainBuilder {
    #[must_use]
    pub fn new(
        store: Arc<dyn CertificateStore>,
        fetcher: Arc<dyn NetworkFetcher>,
        viewer: Arc<dyn ViewerIntegration>,
    ) -> Self {
        Self {
            store,
            fetcher,
            viewer,
            max_rounds: MAX_CHAIN_REPAIR_ROUNDS,
        }
    }

    #[must_use]
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    /// Collect the leaf, the token certificates, whatever OpenSSL can chain
    /// from the stores, and issuers found by the repair loop.
    pub async fn build_candidates(
        &self,
        leaf: &CertificateInfo,
        token_certs: &[CertificateInfo],
        warnings: &mut Vec<String>,
    ) -> CandidateSet {
        let mut set = CandidateSet::new();
        set.insert(leaf.clone());
        for cert in token_certs {
            set.insert(cert.clone());
        }

        let store_certs = self.store.all_certificates();
        let roots = self.store.trusted_roots();
        let helpers: Vec<CertificateInfo> = set.iter().chain(store_certs.iter()).cloned().collect();
        match verify_path(leaf, &roots, &helpers, true) {
            Ok(path) => {
                for cert in path.chain {
                    set.insert(cert);
                }
            }
            Err(e) => log::debug!("native chain build failed: {e}"),
        }

        for round in 0..self.max_rounds {
            let mut added = false;
            let snapshot: Vec<CertificateInfo> = set.iter().cloned().collect();
            for cert in &snapshot {
                if cert.is_self_issued() || set.has_issuer_of(cert) {
                    continue;
                }
                for issuer in store_certs.iter().filter(|c| issuer_matches(cert, c)) {
                    added |= set.insert(issuer.clone());
                }
                for issuer in self.fetch_issuers(cert, warnings).await {
                    added |= set.insert(issuer);
                }
            }
            log::debug!("chain repair round {} -> {} candidate(s)", round + 1, set.len());
            if !added {
                break;
            }
        }
        set
    }

    async fn fetch_issuers(
        &self,
        cert: &CertificateInfo,
        warnings: &mut Vec<String>,
    ) -> Vec<CertificateInfo> {
        let mut out = Vec::new();
        for url in cert.ca_issuer_urls() {
            match self.fetcher.get(&url).await {
                Ok(payload) => out.extend(
                    parse_certificate_bundle(&payload)
                        .into_iter()
                        .filter(|issuer| issuer_matches(cert, issuer)),
                ),
                Err(e) => {
                    log::warn!("AIA download failed ({url}): {e}");
                    warnings.push(format!("AIA download failed ({url}): {e}"));
                }
            }
        }
        out
    }

    /// Ordered chain for embedding, leaf first.
    pub async fn resolve_chain(
        &self,
        leaf: &CertificateInfo,
        token_certs: &[CertificateInfo],
    ) -> Vec<CertificateInfo> {
        let mut warnings = Vec::new();
        let set = self.build_candidates(leaf, token_certs, &mut warnings).await;
        for warning in &warnings {
            log::debug!("chain: {warning}");
        }
        set.into_ordered_chain(leaf)
    }

    fn chain_members<'a>(
        set: &'a CandidateSet,
        leaf: &'a CertificateInfo,
    ) -> impl Iterator<Item = &'a CertificateInfo> {
        set.iter().filter(move |c| c.thumbprint() != leaf.thumbprint())
    }

    /// True when every non-leaf candidate is present at `location`.
    #[must_use]
    pub fn chain_present(
        &self,
        set: &CandidateSet,
        leaf: &CertificateInfo,
        location: StoreLocation,
    ) -> bool {
        Self::chain_members(set, leaf).all(|cert| {
            self.store
                .contains(location, StoreName::for_certificate(cert), cert.thumbprint())
                .unwrap_or(false)
        })
    }

    fn count_existing(&self, set: &CandidateSet, leaf: &CertificateInfo, counts: &mut InstallCounts) {
        for cert in Self::chain_members(set, leaf) {
            let name = StoreName::for_certificate(cert);
            if self
                .store
                .contains(StoreLocation::CurrentUser, name, cert.thumbprint())
                .unwrap_or(false)
            {
                match name {
                    StoreName::Root => counts.existing_root_count += 1,
                    StoreName::CertificateAuthority => counts.existing_intermediate_count += 1,
                }
            }
        }
    }

    fn install_at(
        &self,
        set: &CandidateSet,
        leaf: &CertificateInfo,
        location: StoreLocation,
        counts: &mut InstallCounts,
        warnings: &mut Vec<String>,
    ) {
        let track = location == StoreLocation::CurrentUser;
        for cert in Self::chain_members(set, leaf) {
            let name = StoreName::for_certificate(cert);
            match self.store.add(location, name, cert) {
                Ok(true) if track => match name {
                    StoreName::Root => counts.added_root_count += 1,
                    StoreName::CertificateAuthority => counts.added_intermediate_count += 1,
                },
                Ok(false) if track => match name {
                    StoreName::Root => counts.existing_root_count += 1,
                    StoreName::CertificateAuthority => counts.existing_intermediate_count += 1,
                },
                Ok(_) => {}
                Err(e) => warnings.push(format!(
                    "{}/{} {}: {e}",
                    location.dir_name(),
                    name.dir_name(),
                    cert.subject()
                )),
            }
        }
    }

    /// Install every non-leaf candidate. Machine-wide stores are written
    /// only when the process is elevated.
    pub fn install(
        &self,
        set: &CandidateSet,
        leaf: &CertificateInfo,
        try_local_machine: bool,
        counts: &mut InstallCounts,
        warnings: &mut Vec<String>,
    ) {
        self.install_at(set, leaf, StoreLocation::CurrentUser, counts, warnings);
        if !try_local_machine {
            return;
        }
        if !self.store.is_elevated() {
            if !self.chain_present(set, leaf, StoreLocation::LocalMachine) {
                warnings.push("Local-machine store installation skipped (not elevated).".into());
            }
            return;
        }
        let mut ignored = InstallCounts::default();
        self.install_at(set, leaf, StoreLocation::LocalMachine, &mut ignored, warnings);
    }

    /// Full trust setup for a signer.
    pub async fn setup(
        &self,
        leaf: &CertificateInfo,
        token_certs: &[CertificateInfo],
        apply_changes: bool,
        try_local_machine: bool,
    ) -> TrustSetupReport {
        let mut report = TrustSetupReport::failed("");
        report.signer_subject = leaf.subject().to_string();
        report.signer_thumbprint = leaf.thumbprint().to_string();

        let set = self
            .build_candidates(leaf, token_certs, &mut report.warnings)
            .await;
        for cert in Self::chain_members(&set, leaf) {
            if cert.is_self_issued() {
                report.candidate_root_count += 1;
            } else {
                report.candidate_intermediate_count += 1;
            }
        }
        if report.candidate_root_count == 0 && report.candidate_intermediate_count == 0 {
            report.warnings.push(
                "No chain candidates besides the signer certificate (check AIA and store access)."
                    .into(),
            );
        }

        if apply_changes {
            self.install(
                &set,
                leaf,
                try_local_machine,
                &mut report.counts,
                &mut report.warnings,
            );
            match self.viewer.ensure() {
                Ok(n) => report.viewer_values_written = n,
                Err(e) => report.warnings.push(format!("Viewer settings not written: {e}")),
            }
        } else {
            self.count_existing(&set, leaf, &mut report.counts);
        }

        report.current_user_chain_ready = self.chain_present(&set, leaf, StoreLocation::CurrentUser);
        report.local_machine_chain_ready = self.chain_present(&set, leaf, StoreLocation::LocalMachine);
        report.viewer_integration_ready = self.viewer.is_ready();

        let roots = self.store.trusted_roots();
        let intermediates: Vec<CertificateInfo> = set.iter().cloned().collect();
        match verify_path(leaf, &roots, &intermediates, false) {
            Ok(path) => {
                report.validation_succeeded = path.valid;
                report.validation_status = path.status;
            }
            Err(e) => {
                report.validation_succeeded = false;
                report.validation_status = e.to_string();
            }
        }
        report.readiness_level = evaluate_readiness(
            report.validation_succeeded,
            report.current_user_chain_ready,
            report.viewer_integration_ready,
        );
        report.success = true;
        report.summarize();
        log::info!(
            "Trust setup for {}: readiness {}, validation {}",
            report.signer_subject,
            report.readiness_level,
            report.validation_status
        );
        report
    }
}
