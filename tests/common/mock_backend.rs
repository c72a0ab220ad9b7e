//! Scriptable in-memory token backend.
//!
//! Holds certificates and RSA keys per slot, signs with `CKM_RSA_PKCS`
//! semantics and can be told to lose sessions or reject the PIN.

use esign_agent::{
    CertificateObject, ObjectHandle, PrivateKeyObject, SessionHandle, SessionMode, SigningError,
    SigningResult, TokenBackend, TokenInfo, TokenPin,
};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Padding;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How `login` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBehavior {
    Accept,
    Incorrect,
    Locked,
}

/// One token.
pub struct MockToken {
    pub label: String,
    pub serial: String,
    pub certificates: Vec<CertificateObject>,
    pub keys: Vec<(Vec<u8>, PKey<Private>)>,
}

impl MockToken {
    pub fn new(label: &str, serial: &str) -> Self {
        Self {
            label: label.to_string(),
            serial: serial.to_string(),
            certificates: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Certificate and key sharing `id` as `CKA_ID`.
    pub fn with_key_pair(mut self, id: &[u8], der: Vec<u8>, key: PKey<Private>) -> Self {
        self.certificates.push(CertificateObject {
            id: id.to_vec(),
            der,
        });
        self.keys.push((id.to_vec(), key));
        self
    }

    /// Certificate without a private key, e.g. a CA copy on the card.
    pub fn with_certificate(mut self, der: Vec<u8>) -> Self {
        self.certificates.push(CertificateObject {
            id: Vec::new(),
            der,
        });
        self
    }
}

#[derive(Default)]
struct State {
    next_handle: u64,
    /// session -> slot
    sessions: HashMap<u64, usize>,
    login: Option<LoginBehavior>,
    /// Sign calls still to fail with a lost session.
    lose_sessions_on_sign: usize,
}

pub struct MockTokenBackend {
    tokens: Vec<MockToken>,
    state: Mutex<State>,
    pub opens: AtomicUsize,
    pub logins: AtomicUsize,
    pub signs: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockTokenBackend {
    pub fn new(tokens: Vec<MockToken>) -> Self {
        Self {
            tokens,
            state: Mutex::new(State::default()),
            opens: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            signs: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_login(&self, behavior: LoginBehavior) {
        self.state.lock().unwrap().login = Some(behavior);
    }

    /// Make the next `count` sign calls report `CKR_SESSION_HANDLE_INVALID`.
    pub fn lose_sessions_on_sign(&self, count: usize) {
        self.state.lock().unwrap().lose_sessions_on_sign = count;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn sign_count(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    fn slot_of(&self, session: SessionHandle) -> SigningResult<usize> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(&session.raw())
            .copied()
            .ok_or_else(|| SigningError::SessionInvalid("CKR_SESSION_HANDLE_INVALID".into()))
    }

    fn token(&self, slot_index: usize) -> SigningResult<&MockToken> {
        self.tokens.get(slot_index).ok_or(SigningError::InvalidSlot {
            requested: slot_index,
            available: self.tokens.len(),
        })
    }
}

impl TokenBackend for MockTokenBackend {
    fn slot_count(&self) -> SigningResult<usize> {
        Ok(self.tokens.len())
    }

    fn token_info(&self, slot_index: usize) -> SigningResult<TokenInfo> {
        let token = self.token(slot_index)?;
        Ok(TokenInfo {
            label: token.label.clone(),
            serial: token.serial.clone(),
        })
    }

    fn open_session(&self, slot_index: usize, _mode: SessionMode) -> SigningResult<SessionHandle> {
        self.token(slot_index)?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.sessions.insert(handle, slot_index);
        Ok(SessionHandle::new(handle))
    }

    fn login(&self, session: SessionHandle, _pin: &TokenPin) -> SigningResult<()> {
        self.slot_of(session)?;
        self.logins.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().unwrap().login.unwrap_or(LoginBehavior::Accept) {
            LoginBehavior::Accept => Ok(()),
            LoginBehavior::Incorrect => Err(SigningError::PinIncorrect),
            LoginBehavior::Locked => Err(SigningError::PinLocked),
        }
    }

    fn close_session(&self, session: SessionHandle) -> SigningResult<()> {
        if self.state.lock().unwrap().sessions.remove(&session.raw()).is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn list_certificates(&self, session: SessionHandle) -> SigningResult<Vec<CertificateObject>> {
        let slot = self.slot_of(session)?;
        Ok(self.token(slot)?.certificates.clone())
    }

    fn list_private_keys(&self, session: SessionHandle) -> SigningResult<Vec<PrivateKeyObject>> {
        let slot = self.slot_of(session)?;
        Ok(self
            .token(slot)?
            .keys
            .iter()
            .enumerate()
            .map(|(index, (id, _))| PrivateKeyObject {
                handle: ObjectHandle::new(index as u64 + 1),
                id: id.clone(),
            })
            .collect())
    }

    fn sign(&self, session: SessionHandle, key: ObjectHandle, data: &[u8]) -> SigningResult<Vec<u8>> {
        let slot = self.slot_of(session)?;
        self.signs.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            if state.lose_sessions_on_sign > 0 {
                state.lose_sessions_on_sign -= 1;
                return Err(SigningError::SessionInvalid("CKR_SESSION_HANDLE_INVALID".into()));
            }
        }
        let index = (key.raw() as usize)
            .checked_sub(1)
            .ok_or_else(|| SigningError::TokenError("CKR_KEY_HANDLE_INVALID".into()))?;
        let (_, pkey) = self
            .token(slot)?
            .keys
            .get(index)
            .ok_or_else(|| SigningError::TokenError("CKR_KEY_HANDLE_INVALID".into()))?;
        let rsa = pkey.rsa().unwrap();
        let mut out = vec![0u8; rsa.size() as usize];
        let len = rsa.private_encrypt(data, &mut out, Padding::PKCS1).unwrap();
        out.truncate(len);
        Ok(out)
    }
}
