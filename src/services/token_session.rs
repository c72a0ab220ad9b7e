//! Hardware session pool.
//!
//! Single owner of the token backend and of the per-slot session cache.
//! Every backend call goes through one process-wide gate because token
//! drivers are not reentrant; logical signing requests on the same slot are
//! additionally serialized, first come first served, by a per-slot async
//! gate that the orchestrator holds for the whole operation.

use crate::adapters::backend::{
    CertificateObject, ObjectHandle, PrivateKeyObject, SessionHandle, SessionMode, TokenBackend,
};
use crate::domain::national_id::mask_serial;
use crate::domain::types::{TokenInfo, TokenPin};
use crate::infra::error::{SigningError, SigningResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;

/// Cached login session for one slot.
#[derive(Debug, Clone, Copy)]
pub struct TokenSession {
    pub handle: SessionHandle,
    pub slot_index: usize,
    pub last_used: Instant,
}

/// Token presence as of the last enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenSnapshot {
    slot_count: usize,
    serials: Vec<String>,
}

/// Held for the duration of one logical operation on a slot.
pub struct SlotGuard {
    slot_index: usize,
    _guard: OwnedMutexGuard<()>,
}

impl SlotGuard {
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }
}

pub struct TokenSessionPool {
    backend: Arc<dyn TokenBackend>,
    hardware_gate: Mutex<()>,
    slot_gates: Mutex<HashMap<usize, Arc<tokio::sync::Mutex<()>>>>,
    sessions: Mutex<HashMap<usize, TokenSession>>,
    snapshot: Mutex<Option<TokenSnapshot>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> SigningResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| SigningError::TokenError(format!("{what} poisoned")))
}

impl TokenSessionPool {
    #[must_use]
    pub fn new(backend: Arc<dyn TokenBackend>) -> Self {
        Self {
            backend,
            hardware_gate: Mutex::new(()),
            slot_gates: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(None),
        }
    }

    /// Run one backend call under the hardware gate.
    fn hardware<T>(&self, f: impl FnOnce(&dyn TokenBackend) -> SigningResult<T>) -> SigningResult<T> {
        let _gate = lock(&self.hardware_gate, "hardware gate")?;
        f(self.backend.as_ref())
    }

    /// Wait for exclusive use of a slot. Waiters are served in arrival order.
    pub async fn lock_slot(&self, slot_index: usize) -> SigningResult<SlotGuard> {
        let gate = {
            let mut gates = lock(&self.slot_gates, "slot gates")?;
            gates.entry(slot_index).or_default().clone()
        };
        let guard = gate.lock_owned().await;
        Ok(SlotGuard {
            slot_index,
            _guard: guard,
        })
    }

    pub fn slot_count(&self) -> SigningResult<usize> {
        self.hardware(|b| b.slot_count())
    }

    pub fn token_info(&self, slot_index: usize) -> SigningResult<TokenInfo> {
        self.hardware(|b| b.token_info(slot_index))
    }

    /// Fail with `InvalidSlot` unless a token is present at `slot_index`.
    pub fn validate_slot(&self, slot_index: usize) -> SigningResult<()> {
        let available = self.slot_count()?;
        if slot_index >= available {
            return Err(SigningError::InvalidSlot {
                requested: slot_index,
                available,
            });
        }
        Ok(())
    }

    /// Re-enumerate tokens and drop every cached session if the set of
    /// present tokens changed since the previous call.
    pub fn refresh(&self) -> SigningResult<()> {
        let slot_count = self.slot_count()?;
        let serials = (0..slot_count)
            .map(|i| self.token_info(i).map(|t| t.serial).unwrap_or_default())
            .collect();
        let current = TokenSnapshot {
            slot_count,
            serials,
        };
        let changed = {
            let mut snapshot = lock(&self.snapshot, "token snapshot")?;
            let changed = snapshot.as_ref().is_some_and(|prev| *prev != current);
            *snapshot = Some(current);
            changed
        };
        if changed {
            log::info!("Token set changed; discarding cached sessions");
            self.invalidate_all();
        }
        Ok(())
    }

    /// Cached session for the slot, or a freshly opened and logged-in one.
    ///
    /// Callers must hold the slot's [`SlotGuard`].
    ///
    /// # Errors
    ///
    /// `InvalidSlot` before any session is opened; PIN failures as returned
    /// by the backend, after the new session has been closed again.
    pub fn acquire(
        &self,
        slot_index: usize,
        pin: &TokenPin,
        force_fresh: bool,
    ) -> SigningResult<TokenSession> {
        self.refresh()?;
        self.validate_slot(slot_index)?;

        if !force_fresh {
            let mut sessions = lock(&self.sessions, "session cache")?;
            if let Some(session) = sessions.get_mut(&slot_index) {
                session.last_used = Instant::now();
                log::debug!("Reusing session on slot {slot_index}");
                return Ok(*session);
            }
        }

        self.invalidate(slot_index);

        let handle = self.hardware(|b| b.open_session(slot_index, SessionMode::ReadWrite))?;
        if let Err(e) = self.hardware(|b| b.login(handle, pin)) {
            log::warn!("Login on slot {slot_index} failed: {e}");
            let _ = self.hardware(|b| b.close_session(handle));
            return Err(e);
        }

        let session = TokenSession {
            handle,
            slot_index,
            last_used: Instant::now(),
        };
        lock(&self.sessions, "session cache")?.insert(slot_index, session);
        log::info!("Logged in on slot {slot_index}");
        Ok(session)
    }

    /// Dispose of the cached session for the slot, if any.
    pub fn invalidate(&self, slot_index: usize) {
        let removed = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&slot_index),
            Err(_) => None,
        };
        if let Some(session) = removed {
            log::debug!("Disposing session on slot {slot_index}");
            if let Err(e) = self.hardware(|b| b.close_session(session.handle)) {
                log::debug!("close on slot {slot_index} failed: {e}");
            }
        }
    }

    pub fn invalidate_all(&self) {
        let slots: Vec<usize> = match self.sessions.lock() {
            Ok(sessions) => sessions.keys().copied().collect(),
            Err(_) => Vec::new(),
        };
        for slot in slots {
            self.invalidate(slot);
        }
    }

    #[must_use]
    pub fn cached_session_count(&self) -> usize {
        self.sessions.lock().map_or(0, |s| s.len())
    }

    /// Uncached read-only session for certificate-only work (no login).
    pub fn open_read_only(&self, slot_index: usize) -> SigningResult<SessionHandle> {
        self.validate_slot(slot_index)?;
        self.hardware(|b| b.open_session(slot_index, SessionMode::ReadOnly))
    }

    pub fn close(&self, session: SessionHandle) -> SigningResult<()> {
        self.hardware(|b| b.close_session(session))
    }

    pub fn list_certificates(&self, session: SessionHandle) -> SigningResult<Vec<CertificateObject>> {
        self.hardware(|b| b.list_certificates(session))
    }

    pub fn list_private_keys(&self, session: SessionHandle) -> SigningResult<Vec<PrivateKeyObject>> {
        self.hardware(|b| b.list_private_keys(session))
    }

    /// Raw `CKM_RSA_PKCS` over a DigestInfo.
    pub fn sign(
        &self,
        session: SessionHandle,
        key: ObjectHandle,
        digest_info: &[u8],
    ) -> SigningResult<Vec<u8>> {
        let signature = self.hardware(|b| b.sign(session, key, digest_info))?;
        log::debug!("Token produced {}-byte signature", signature.len());
        Ok(signature)
    }

    /// Label and masked serial for log lines.
    #[must_use]
    pub fn describe_slot(&self, slot_index: usize) -> String {
        match self.token_info(slot_index) {
            Ok(info) => format!("{} ({})", info.label, mask_serial(&info.serial)),
            Err(_) => format!("slot {slot_index}"),
        }
    }
}

impl Drop for TokenSessionPool {
    fn drop(&mut self) {
        self.invalidate_all();
    }
}
