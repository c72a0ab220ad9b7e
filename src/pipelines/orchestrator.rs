//! `SigningOrchestrator` coordinates one signing request end to end.
//!
//! Per request: take the slot gate, acquire a logged-in session, select the
//! signing certificate, run the document builder. Session-invalid failures
//! reopen the session and repeat the whole attempt with linear backoff; PIN
//! failures and input errors are returned as they are.

use crate::adapters::net::{HttpFetcher, NetworkFetcher};
use crate::adapters::pkcs11::{discover_module, Pkcs11Backend};
use crate::adapters::timestamp_http_client::{TimestampHttpClient, TimestampHttpConfig};
use crate::adapters::trust_store::{FileTrustStore, FileViewerIntegration};
use crate::domain::crypto::CertificateInfo;
use crate::domain::types::{
    DeviceInfo, PdfSignOptions, SignatureRequest, SignedArtifact, TimestampUrl, TokenPin,
};
use crate::infra::config::{credentials_from, AgentConfiguration, RetryConfig};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::cert_selector::{
    best_certificate, select_signing_certificate, token_certificates,
};
use crate::services::devices::{describe_device, slot_certificates};
use crate::services::pades::{signed_pdf_file_name, signer_display_name, PadesInputs, PdfSignatureBuilder};
use crate::services::pdf_validation::{PdfSignatureValidator, PdfValidationReport};
use crate::services::revocation::RevocationCollector;
use crate::services::signer::TokenSigner;
use crate::services::timestamp::{TimestampAuthority, TimestampService};
use crate::services::token_session::{TokenSession, TokenSessionPool};
use crate::services::trust_chain::{TrustChainBuilder, TrustSetupReport};
use crate::services::xades::{raw_payload_base64, sign_xml};
use chrono::Local;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Session-invalid retry budget with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_step: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
        }
    }

    #[must_use]
    pub fn xml(config: &RetryConfig) -> Self {
        Self::new(
            config.max_session_retries,
            Duration::from_millis(config.xml_backoff_step_ms),
        )
    }

    #[must_use]
    pub fn pdf(config: &RetryConfig) -> Self {
        Self::new(
            config.max_session_retries,
            Duration::from_millis(config.pdf_backoff_step_ms),
        )
    }

    /// First attempt plus retries.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `attempt + 1`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

/// Outcome of an XML request, signed or raw.
#[derive(Debug, Clone)]
pub struct XmlSignOutcome {
    /// Signed document, or the base64 payload in raw mode.
    pub content: String,
    pub artifact: SignedArtifact,
    /// Copy of the submitted payload; `None` in raw mode.
    pub original_path: Option<PathBuf>,
}

pub struct SigningOrchestrator {
    pool: Arc<TokenSessionPool>,
    trust: TrustChainBuilder,
    validator: PdfSignatureValidator,
    revocation: Option<RevocationCollector>,
    timestamp_authority: Option<Arc<dyn TimestampAuthority>>,
    config: AgentConfiguration,
    output_directory: PathBuf,
}

fn xml_payload(document: &[u8]) -> SigningResult<&str> {
    let payload = std::str::from_utf8(document)
        .map_err(|_| SigningError::InvalidInput("XML payload is not valid UTF-8".into()))?;
    if payload.trim().is_empty() {
        return Err(SigningError::InvalidInput("XML payload is empty".into()));
    }
    Ok(payload)
}

impl SigningOrchestrator {
    #[must_use]
    pub fn new(pool: Arc<TokenSessionPool>, trust: TrustChainBuilder, config: AgentConfiguration) -> Self {
        let validator = PdfSignatureValidator::new(trust.store().clone());
        let output_directory = config.output_directory.clone();
        Self {
            pool,
            trust,
            validator,
            revocation: None,
            timestamp_authority: None,
            config,
            output_directory,
        }
    }

    /// Wire the production adapters described by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if no PKCS#11 module can be found or loaded, or the
    /// HTTP client cannot be built.
    pub fn from_config(config: AgentConfiguration) -> SigningResult<Self> {
        let module = config
            .effective_pkcs11_module()
            .or_else(discover_module)
            .ok_or_else(|| {
                SigningError::HardwareUnavailable(
                    "no PKCS#11 module configured or found; set pkcs11_module or ESIGN_PKCS11_MODULE"
                        .into(),
                )
            })?;
        log::info!("Loading PKCS#11 module {}", module.display());
        let backend = Pkcs11Backend::load(&module)?;
        let pool = Arc::new(TokenSessionPool::new(Arc::new(backend)));

        let store_root = config
            .trust
            .store_root
            .clone()
            .unwrap_or_else(FileTrustStore::default_root);
        let viewer_file = config
            .trust
            .viewer_settings_file
            .clone()
            .unwrap_or_else(FileViewerIntegration::default_path);
        let fetcher: Arc<dyn NetworkFetcher> = Arc::new(HttpFetcher::new(config.network_timeout())?);
        let trust = TrustChainBuilder::new(
            Arc::new(FileTrustStore::new(store_root)),
            fetcher.clone(),
            Arc::new(FileViewerIntegration::new(viewer_file)),
        );
        Ok(Self::new(pool, trust, config).with_revocation(RevocationCollector::new(fetcher)))
    }

    /// Collect OCSP and CRL material for PAdES-LT.
    #[must_use]
    pub fn with_revocation(mut self, collector: RevocationCollector) -> Self {
        self.revocation = Some(collector);
        self
    }

    /// Use this authority instead of building an HTTP client per request.
    #[must_use]
    pub fn with_timestamp_authority(mut self, authority: Arc<dyn TimestampAuthority>) -> Self {
        self.timestamp_authority = Some(authority);
        self
    }

    #[must_use]
    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<TokenSessionPool> {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfiguration {
        &self.config
    }

    #[must_use]
    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Every slot with a token present. Slots that fail to answer are skipped.
    pub async fn list_devices(&self) -> SigningResult<Vec<DeviceInfo>> {
        self.pool.refresh()?;
        let count = self.pool.slot_count()?;
        let mut devices = Vec::with_capacity(count);
        for slot in 0..count {
            let _gate = self.pool.lock_slot(slot).await?;
            match describe_device(&self.pool, slot) {
                Ok(device) => devices.push(device),
                Err(e) => log::warn!("Skipping slot {slot}: {e}"),
            }
        }
        log::info!("{} signature device(s) found", devices.len());
        Ok(devices)
    }

    /// Subject shown for the slot's signing certificate.
    pub async fn get_subject(&self, slot_index: usize) -> SigningResult<String> {
        let _gate = self.pool.lock_slot(slot_index).await?;
        self.pool.validate_slot(slot_index)?;
        Ok(describe_device(&self.pool, slot_index)?.subject_name)
    }

    /// Run `attempt` with a logged-in session, retrying on session loss.
    ///
    /// The caller holds the slot gate for the whole loop.
    async fn with_session<T, F, Fut>(
        &self,
        slot_index: usize,
        pin: &TokenPin,
        force_fresh: bool,
        policy: RetryPolicy,
        mut attempt: F,
    ) -> SigningResult<T>
    where
        F: FnMut(TokenSession) -> Fut,
        Fut: Future<Output = SigningResult<T>>,
    {
        let max_attempts = policy.max_attempts();
        let mut last_error = String::new();
        for n in 1..=max_attempts {
            let outcome = match self.pool.acquire(slot_index, pin, force_fresh || n > 1) {
                Ok(session) => attempt(session).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    log::warn!(
                        "Session lost on {} (attempt {n}/{max_attempts}): {e}",
                        self.pool.describe_slot(slot_index)
                    );
                    self.pool.invalidate(slot_index);
                    last_error = e.to_string();
                    if n < max_attempts {
                        tokio::time::sleep(policy.backoff(n)).await;
                    }
                }
                Err(e) => {
                    if e.is_pin_failure() {
                        self.pool.invalidate(slot_index);
                    }
                    return Err(e);
                }
            }
        }
        Err(SigningError::SessionUnrecoverable {
            attempts: max_attempts,
            last_error,
        })
    }

    fn stamp() -> String {
        Local::now().format(STAMP_FORMAT).to_string()
    }

    fn write_output(&self, file_name: &str, bytes: &[u8]) -> SigningResult<PathBuf> {
        std::fs::create_dir_all(&self.output_directory).map_err(|e| {
            SigningError::IoError(format!(
                "Failed to create output directory {}: {e}",
                self.output_directory.display()
            ))
        })?;
        let path = self.output_directory.join(file_name);
        std::fs::write(&path, bytes)
            .map_err(|e| SigningError::IoError(format!("Failed to write {}: {e}", path.display())))?;
        Ok(path)
    }

    /// Store an XML payload base64 encoded without touching the token.
    pub fn store_raw_xml(&self, document: &[u8]) -> SigningResult<XmlSignOutcome> {
        let payload = xml_payload(document)?;
        let encoded = raw_payload_base64(payload);
        let path = self.write_output(&format!("raw-{}.b64", Self::stamp()), encoded.as_bytes())?;
        log::info!("Raw payload written to {}", path.display());
        Ok(XmlSignOutcome {
            artifact: SignedArtifact {
                bytes: encoded.clone().into_bytes(),
                output_path: path,
                signer_name: String::new(),
                timestamp_applied: false,
                profile: None,
            },
            content: encoded,
            original_path: None,
        })
    }

    /// Sign an XML payload as XAdES-BES, or with `raw` store it base64
    /// encoded instead (see [`Self::store_raw_xml`]).
    pub async fn sign_xml(&self, request: &SignatureRequest, raw: bool) -> SigningResult<XmlSignOutcome> {
        if raw {
            return self.store_raw_xml(&request.document);
        }
        let payload = xml_payload(&request.document)?;

        let stamp = Self::stamp();
        let original_path = self.write_output(&format!("erecete-{stamp}.xml"), payload.as_bytes())?;
        log::info!("Original XML saved to {}", original_path.display());

        let slot = request.slot_index;
        let _gate = self.pool.lock_slot(slot).await?;
        let pool = self.pool.as_ref();
        let (signed, signer_name) = self
            .with_session(
                slot,
                &request.pin,
                request.force_fresh_login,
                RetryPolicy::xml(&self.config.retry),
                move |session| async move {
                    let selected = select_signing_certificate(pool, session.handle)?;
                    let signer = TokenSigner::new(pool, session.handle, selected.key);
                    let signed = sign_xml(payload, &selected.certificate, &signer)?;
                    let name = selected
                        .certificate
                        .common_name()
                        .unwrap_or_else(|| selected.certificate.subject().to_string());
                    Ok((signed, name))
                },
            )
            .await?;

        let path = self.write_output(&format!("erecete-{stamp}.xsig"), signed.as_bytes())?;
        log::info!("XAdES-BES signature by {signer_name} written to {}", path.display());
        Ok(XmlSignOutcome {
            artifact: SignedArtifact {
                bytes: signed.clone().into_bytes(),
                output_path: path,
                signer_name,
                timestamp_applied: false,
                profile: None,
            },
            content: signed,
            original_path: Some(original_path),
        })
    }

    /// Request options with configured defaults filled in.
    fn effective_pdf_options(&self, options: &PdfSignOptions) -> PdfSignOptions {
        let defaults = &self.config.pdf;
        let non_blank = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        PdfSignOptions {
            width: options.width.or(Some(defaults.width)),
            height: options.height.or(Some(defaults.height)),
            margin: options.margin.or(Some(defaults.margin)),
            reason: non_blank(&options.reason).or_else(|| Some(defaults.reason.clone())),
            location: non_blank(&options.location).or_else(|| Some(defaults.location.clone())),
            enable_timestamp: Some(options.enable_timestamp.unwrap_or(defaults.enable_timestamp)),
            tsa_url: non_blank(&options.tsa_url).or_else(|| defaults.timestamp_url.clone()),
            tsa_username: non_blank(&options.tsa_username).or_else(|| defaults.tsa_username.clone()),
            tsa_password: options.tsa_password.clone().or_else(|| defaults.tsa_password.clone()),
            auto_setup_trust_chain: Some(
                options
                    .auto_setup_trust_chain
                    .unwrap_or(defaults.auto_setup_trust_chain),
            ),
            try_install_trust_to_local_machine: Some(
                options
                    .try_install_trust_to_local_machine
                    .unwrap_or(defaults.try_install_trust_to_local_machine),
            ),
            configure_viewer_integration: Some(
                options
                    .configure_viewer_integration
                    .unwrap_or(defaults.configure_viewer_integration),
            ),
            ..options.clone()
        }
    }

    /// Timestamp source for a PDF request, if timestamping is enabled and
    /// an authority is reachable.
    fn timestamp_for(&self, options: &PdfSignOptions) -> Option<Arc<dyn TimestampAuthority>> {
        if !options.enable_timestamp.unwrap_or(false) {
            return None;
        }
        if let Some(authority) = &self.timestamp_authority {
            return Some(authority.clone());
        }
        let Some(url) = options.tsa_url.as_deref() else {
            log::warn!("Timestamping enabled but no TSA URL configured; signing without it");
            return None;
        };
        let primary = match TimestampUrl::new(url) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Ignoring TSA URL: {e}");
                return None;
            }
        };
        let mut cfg = TimestampHttpConfig::new(primary, self.config.network_timeout()).with_credentials(
            credentials_from(options.tsa_username.as_deref(), options.tsa_password.as_deref()),
        );
        cfg.fallbacks = self
            .config
            .pdf
            .fallback_timestamp_urls
            .iter()
            .filter_map(|u| TimestampUrl::new(u).ok())
            .collect();
        match TimestampHttpClient::new(cfg) {
            Ok(client) => Some(Arc::new(TimestampService::new(client))),
            Err(e) => {
                log::warn!("TSA client unavailable, signing without timestamp: {e}");
                None
            }
        }
    }

    /// Sign a PDF as PAdES, degrading LT -> T -> B when the TSA or the
    /// revocation sources do not answer.
    pub async fn sign_pdf(
        &self,
        request: &SignatureRequest,
        options: &PdfSignOptions,
    ) -> SigningResult<SignedArtifact> {
        let pdf = request.document.as_slice();
        if pdf.len() < 5 || !pdf.starts_with(b"%PDF") {
            return Err(SigningError::InvalidInput("document does not look like a PDF".into()));
        }
        let options = self.effective_pdf_options(options);
        let timestamp = self.timestamp_for(&options);
        let builder = PdfSignatureBuilder::new(self.config.pdf.reason.clone(), self.config.pdf.location.clone());

        let slot = request.slot_index;
        let _gate = self.pool.lock_slot(slot).await?;
        let pool = self.pool.as_ref();
        let trust = &self.trust;
        let revocation = self.revocation.as_ref();
        let options_ref = &options;
        let builder_ref = &builder;
        let timestamp_ref = timestamp.as_deref();
        let warmed_up = &AtomicBool::new(!options.auto_setup_trust_chain.unwrap_or(false));

        let (outcome, signer_name) = self
            .with_session(
                slot,
                &request.pin,
                request.force_fresh_login,
                RetryPolicy::pdf(&self.config.retry),
                move |session| async move {
                    let selected = select_signing_certificate(pool, session.handle)?;
                    let on_token = token_certificates(pool, session.handle).unwrap_or_default();
                    if !warmed_up.swap(true, Ordering::SeqCst) {
                        warm_up_trust(trust, &selected.certificate, &on_token, options_ref).await;
                    }
                    let chain = trust.resolve_chain(&selected.certificate, &on_token).await;
                    log::debug!("Embedding {} certificate(s)", chain.len());
                    let signer = TokenSigner::new(pool, session.handle, selected.key);
                    let outcome = builder_ref
                        .sign(
                            pdf,
                            options_ref,
                            PadesInputs {
                                certificate: &selected.certificate,
                                chain: &chain,
                                signer: &signer,
                                timestamp: timestamp_ref,
                                revocation,
                            },
                        )
                        .await?;
                    Ok((outcome, signer_display_name(options_ref, &selected.certificate)))
                },
            )
            .await?;

        let file_name = signed_pdf_file_name(options.file_name.as_deref(), Local::now());
        let path = self.write_output(&file_name, &outcome.bytes)?;
        log::info!(
            "{} signature by {signer_name} written to {} (timestamp: {})",
            outcome.profile,
            path.display(),
            outcome.timestamp_applied
        );

        Ok(SignedArtifact {
            bytes: outcome.bytes,
            output_path: path,
            signer_name,
            timestamp_applied: outcome.timestamp_applied,
            profile: Some(outcome.profile),
        })
    }

    async fn slot_signer_and_certificates(
        &self,
        slot: usize,
    ) -> SigningResult<(CertificateInfo, Vec<CertificateInfo>)> {
        let _gate = self.pool.lock_slot(slot).await?;
        let certificates = slot_certificates(&self.pool, slot)?;
        let leaf = best_certificate(&certificates)
            .cloned()
            .ok_or_else(|| SigningError::CertificateError("no certificate found on the token".into()))?;
        Ok((leaf, certificates))
    }

    /// Discover the signer's chain and, with `apply_changes`, install it.
    ///
    /// Never fails: problems are reported in the returned report.
    pub async fn trust_setup(&self, slot_index: usize, apply_changes: bool) -> TrustSetupReport {
        let (leaf, on_token) = match self.slot_signer_and_certificates(slot_index).await {
            Ok(found) => found,
            Err(e) => return TrustSetupReport::failed(e.to_string()),
        };
        self.trust
            .setup(
                &leaf,
                &on_token,
                apply_changes,
                self.config.pdf.try_install_trust_to_local_machine,
            )
            .await
    }

    #[must_use]
    pub fn validate_pdf(&self, pdf: &[u8]) -> PdfValidationReport {
        self.validator.validate(pdf)
    }
}

/// Best-effort chain installation ahead of a PDF signature. Runs under the
/// caller's slot gate with the certificates it already read.
async fn warm_up_trust(
    trust: &TrustChainBuilder,
    leaf: &CertificateInfo,
    on_token: &[CertificateInfo],
    options: &PdfSignOptions,
) {
    let report = trust
        .setup(
            leaf,
            on_token,
            true,
            options.try_install_trust_to_local_machine.unwrap_or(false),
        )
        .await;
    log::info!(
        "Trust warm-up: {} root(s), {} intermediate(s) added, readiness {:?}",
        report.counts.added_root_count,
        report.counts.added_intermediate_count,
        report.readiness_level
    );
    for warning in &report.warnings {
        log::warn!("Trust warm-up: {warning}");
    }
}
