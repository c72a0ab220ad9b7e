//! PKCS#11 backend over `cryptoki`.
//!
//! The library is loaded and initialized once; sessions live in an arena
//! keyed by opaque handles, and each session keeps the object handles it
//! handed out so callers never hold raw `CK_OBJECT_HANDLE` values.

use crate::adapters::backend::{
    CertificateObject, ObjectHandle, PrivateKeyObject, SessionHandle, SessionMode, TokenBackend,
};
use crate::domain::types::{TokenInfo, TokenPin};
use crate::infra::error::{SigningError, SigningResult};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

struct SessionEntry {
    session: Session,
    logged_in: bool,
    objects: Vec<cryptoki::object::ObjectHandle>,
}

#[derive(Default)]
struct Arena {
    next_id: u64,
    sessions: HashMap<u64, SessionEntry>,
}

/// `TokenBackend` backed by a vendor PKCS#11 module.
pub struct Pkcs11Backend {
    ctx: Pkcs11,
    module_path: PathBuf,
    arena: Mutex<Arena>,
}

impl Pkcs11Backend {
    /// Load and initialize the PKCS#11 module at `module_path`.
    pub fn load(module_path: impl AsRef<Path>) -> SigningResult<Self> {
        let module_path = module_path.as_ref().to_path_buf();
        log::info!("Loading PKCS#11 module {}", module_path.display());
        let ctx = Pkcs11::new(&module_path).map_err(|e| {
            SigningError::HardwareUnavailable(format!(
                "cannot load PKCS#11 module {}: {e}",
                module_path.display()
            ))
        })?;
        match ctx.initialize(CInitializeArgs::OsThreads) {
            Ok(()) | Err(CryptokiError::AlreadyInitialized) => {}
            Err(CryptokiError::Pkcs11(RvError::CryptokiAlreadyInitialized, _)) => {}
            Err(e) => return Err(SigningError::HardwareUnavailable(e.to_string())),
        }
        Ok(Self {
            ctx,
            module_path,
            arena: Mutex::new(Arena::default()),
        })
    }

    #[must_use]
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    fn arena(&self) -> SigningResult<MutexGuard<'_, Arena>> {
        self.arena
            .lock()
            .map_err(|_| SigningError::TokenError("session arena poisoned".into()))
    }

    fn slot(&self, slot_index: usize) -> SigningResult<Slot> {
        let slots = self.ctx.get_slots_with_token()?;
        let available = slots.len();
        slots
            .into_iter()
            .nth(slot_index)
            .ok_or(SigningError::InvalidSlot {
                requested: slot_index,
                available,
            })
    }

    fn with_entry<T>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut SessionEntry) -> SigningResult<T>,
    ) -> SigningResult<T> {
        let mut arena = self.arena()?;
        let entry = arena.sessions.get_mut(&handle.raw()).ok_or_else(|| {
            SigningError::SessionInvalid(format!("session handle {} invalid", handle.raw()))
        })?;
        f(entry)
    }
}

fn read_id(session: &Session, object: cryptoki::object::ObjectHandle) -> SigningResult<Vec<u8>> {
    let attrs = session.get_attributes(object, &[AttributeType::Id])?;
    Ok(attrs
        .into_iter()
        .find_map(|a| match a {
            Attribute::Id(id) => Some(id),
            _ => None,
        })
        .unwrap_or_default())
}

/// Arena index of `object`, added on first sight. Cached sessions enumerate
/// keys on every request, so the table stays bounded by the token's keys.
fn intern_object<T: Copy + PartialEq>(objects: &mut Vec<T>, object: T) -> usize {
    if let Some(index) = objects.iter().position(|known| *known == object) {
        return index;
    }
    objects.push(object);
    objects.len() - 1
}

impl TokenBackend for Pkcs11Backend {
    fn slot_count(&self) -> SigningResult<usize> {
        Ok(self.ctx.get_slots_with_token()?.len())
    }

    fn token_info(&self, slot_index: usize) -> SigningResult<TokenInfo> {
        let slot = self.slot(slot_index)?;
        let info = self.ctx.get_token_info(slot)?;
        Ok(TokenInfo {
            label: info.label().trim().to_string(),
            serial: info.serial_number().trim().to_string(),
        })
    }

    fn open_session(&self, slot_index: usize, mode: SessionMode) -> SigningResult<SessionHandle> {
        let slot = self.slot(slot_index)?;
        let session = match mode {
            SessionMode::ReadOnly => self.ctx.open_ro_session(slot)?,
            SessionMode::ReadWrite => self.ctx.open_rw_session(slot)?,
        };
        let mut arena = self.arena()?;
        arena.next_id += 1;
        let id = arena.next_id;
        arena.sessions.insert(
            id,
            SessionEntry {
                session,
                logged_in: false,
                objects: Vec::new(),
            },
        );
        log::debug!("Opened {mode:?} session {id} on slot {slot_index}");
        Ok(SessionHandle::new(id))
    }

    fn login(&self, session: SessionHandle, pin: &TokenPin) -> SigningResult<()> {
        self.with_entry(session, |entry| {
            let auth = AuthPin::new(pin.as_str().into());
            match entry.session.login(UserType::User, Some(&auth)) {
                Ok(()) | Err(CryptokiError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {
                    entry.logged_in = true;
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn close_session(&self, session: SessionHandle) -> SigningResult<()> {
        let entry = self.arena()?.sessions.remove(&session.raw());
        if let Some(entry) = entry {
            if entry.logged_in {
                if let Err(e) = entry.session.logout() {
                    log::debug!("logout on session {} failed: {e}", session.raw());
                }
            }
            // C_CloseSession runs when the session is dropped.
            drop(entry.session);
            log::debug!("Closed session {}", session.raw());
        }
        Ok(())
    }

    fn list_certificates(&self, session: SessionHandle) -> SigningResult<Vec<CertificateObject>> {
        self.with_entry(session, |entry| {
            let handles = entry
                .session
                .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])?;
            let mut out = Vec::with_capacity(handles.len());
            for handle in handles {
                let attrs = entry
                    .session
                    .get_attributes(handle, &[AttributeType::Value, AttributeType::Id])?;
                let mut der = None;
                let mut id = Vec::new();
                for attr in attrs {
                    match attr {
                        Attribute::Value(v) => der = Some(v),
                        Attribute::Id(v) => id = v,
                        _ => {}
                    }
                }
                match der {
                    Some(der) if !der.is_empty() => out.push(CertificateObject { id, der }),
                    _ => log::debug!("skipping certificate object without CKA_VALUE"),
                }
            }
            Ok(out)
        })
    }

    fn list_private_keys(&self, session: SessionHandle) -> SigningResult<Vec<PrivateKeyObject>> {
        self.with_entry(session, |entry| {
            let handles = entry.session.find_objects(&[
                Attribute::Class(ObjectClass::PRIVATE_KEY),
                Attribute::KeyType(KeyType::RSA),
            ])?;
            let mut out = Vec::with_capacity(handles.len());
            for handle in handles {
                let id = read_id(&entry.session, handle)?;
                let index = intern_object(&mut entry.objects, handle);
                out.push(PrivateKeyObject {
                    handle: ObjectHandle::new(index as u64),
                    id,
                });
            }
            Ok(out)
        })
    }

    fn sign(&self, session: SessionHandle, key: ObjectHandle, data: &[u8]) -> SigningResult<Vec<u8>> {
        self.with_entry(session, |entry| {
            let object = usize::try_from(key.raw())
                .ok()
                .and_then(|i| entry.objects.get(i).copied())
                .ok_or_else(|| {
                    SigningError::SessionInvalid(format!("object handle {} invalid", key.raw()))
                })?;
            Ok(entry.session.sign(&Mechanism::RsaPkcs, object, data)?)
        })
    }
}

impl Drop for Pkcs11Backend {
    fn drop(&mut self) {
        if let Ok(mut arena) = self.arena.lock() {
            for (_, entry) in arena.sessions.drain() {
                if entry.logged_in {
                    let _ = entry.session.logout();
                }
            }
        }
    }
}

/// Well-known module locations tried when no path is configured.
#[must_use]
pub fn default_module_candidates() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if cfg!(windows) {
        paths.extend(
            ["akisp11.dll", "C:\\Windows\\System32\\akisp11.dll"]
                .iter()
                .map(PathBuf::from),
        );
    } else if cfg!(target_os = "macos") {
        paths.extend(
            ["/usr/local/lib/libakisp11.dylib", "/Library/AKIS/libakisp11.dylib"]
                .iter()
                .map(PathBuf::from),
        );
    } else {
        paths.extend(
            [
                "/usr/lib/libakisp11.so",
                "/usr/local/lib/libakisp11.so",
                "/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so",
                "/usr/lib/softhsm/libsofthsm2.so",
            ]
            .iter()
            .map(PathBuf::from),
        );
    }
    paths
}

/// First existing candidate module path.
#[must_use]
pub fn discover_module() -> Option<PathBuf> {
    default_module_candidates().into_iter().find(|p| p.exists())
}
