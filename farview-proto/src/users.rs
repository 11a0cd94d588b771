//! Enrolled accounts and per-connection session accounting
//!
//! The store is the one piece of state shared across connections. Lookups
//! taken by the authentication path never reveal whether a name exists: an
//! unknown, disabled, or group-mismatched account resolves to a fabricated
//! (salt, verifier) pair derived deterministically from a persisted secret
//! seed, so repeated attempts against a nonexistent account look exactly
//! like attempts against a real account with an unlucky password. Only the
//! host's own logs ever see the difference.

use std::sync::Mutex;

use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use rustc_hash::FxHashMap;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::{
    crypto::srp::{self, SrpGroup},
    error::Error,
};

type HmacSha256 = Hmac<Sha256>;

/// Bytes in the enumeration seed
pub const SEED_LEN: usize = 64;

/// Bit flags attached to an account
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct AccountFlags(u32);

impl AccountFlags {
    /// Account may authenticate
    pub const ENABLED: Self = Self(0x1);

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every flag in `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Copy of `self` with the flags in `other` set
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Copy of `self` with the flags in `other` cleared
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// One enrolled account, as handed over by the settings owner
#[derive(Debug, Clone)]
pub struct Account {
    /// Unique, case-sensitive account name
    pub name: String,
    /// Random salt fixed at enrollment
    pub salt: Vec<u8>,
    /// SRP verifier, big-endian, padded to the group's key length
    pub verifier: Vec<u8>,
    /// Group the verifier was computed in
    pub group: SrpGroup,
    /// Concurrent session cap; `None` is unlimited
    pub session_cap: Option<u32>,
    /// Flags, including [`AccountFlags::ENABLED`]
    pub flags: AccountFlags,
}

impl Account {
    /// Enroll a new account from a username and password
    ///
    /// Generates a fresh salt and derives the verifier; the password is not
    /// retained.
    pub fn enroll(name: impl Into<String>, password: &str, group: SrpGroup) -> Self {
        let name = name.into();
        let salt = srp::generate_salt();
        let verifier = srp::compute_verifier(&group, &name, password, &salt);
        Self {
            name,
            salt,
            verifier,
            group,
            session_cap: None,
            flags: AccountFlags::ENABLED,
        }
    }
}

struct AccountState {
    account: Account,
    sessions: u32,
}

struct StoreInner {
    accounts: FxHashMap<String, AccountState>,
    seed: [u8; SEED_LEN],
}

/// Credential material for one authentication attempt
///
/// Identical in shape whether the account is real or fabricated; the
/// distinction drives host-side audit logging only and never the wire.
#[derive(Debug)]
pub struct AccountView {
    /// Account salt
    pub salt: Vec<u8>,
    /// Account verifier, padded to the group's key length
    pub verifier: Vec<u8>,
    /// Group the handshake proceeds in
    pub group: SrpGroup,
    fabricated: bool,
}

impl AccountView {
    /// Whether this view was fabricated from the enumeration seed
    pub(crate) fn is_fabricated(&self) -> bool {
        self.fabricated
    }
}

/// Shared store of accounts consulted during key exchange
///
/// `lookup` is taken concurrently by every connecting peer; session counter
/// and flag mutations are serialized behind one lock. The authentication
/// path never mutates anything except the session counters.
pub struct UserStore {
    inner: Mutex<StoreInner>,
}

impl UserStore {
    /// Build a store from persisted accounts and the persisted seed
    pub fn new(accounts: impl IntoIterator<Item = Account>, seed: [u8; SEED_LEN]) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| {
                (
                    account.name.clone(),
                    AccountState {
                        account,
                        sessions: 0,
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(StoreInner { accounts, seed }),
        }
    }

    /// Generate a fresh enumeration seed for first-run hosts
    ///
    /// The settings owner persists this next to the account table; the
    /// fabricated credentials for any unknown name stay stable only as long
    /// as the seed does.
    pub fn generate_seed() -> [u8; SEED_LEN] {
        let mut seed = [0; SEED_LEN];
        OsRng.fill_bytes(&mut seed);
        seed
    }

    /// Resolve credential material for a claimed name
    ///
    /// Returns the real tuple only for an enabled account enrolled in the
    /// negotiated group; anything else resolves through the seed. Both
    /// paths produce the same shape and there is no "not found" result.
    pub fn lookup(&self, name: &str, negotiated: &SrpGroup) -> AccountView {
        let inner = self.inner.lock().unwrap();
        if let Some(state) = inner.accounts.get(name) {
            let account = &state.account;
            if !account.flags.contains(AccountFlags::ENABLED) {
                debug!(username = name, "lookup for disabled account");
            } else if account.group != *negotiated {
                debug!(username = name, "lookup with mismatched group");
            } else {
                return AccountView {
                    salt: account.salt.clone(),
                    verifier: account.verifier.clone(),
                    group: account.group.clone(),
                    fabricated: false,
                };
            }
        } else {
            debug!(username = name, "lookup for unknown account");
        }
        fabricate(&inner.seed, name, negotiated)
    }

    /// Count a new session against an account
    ///
    /// Unknown names succeed silently, so a fabricated identity never takes
    /// an observable branch. Called only once a handshake reaches `Done`.
    pub fn begin_session(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.accounts.get_mut(name) {
            if let Some(cap) = state.account.session_cap {
                if state.sessions >= cap {
                    return Err(Error::SessionLimitExceeded);
                }
            }
            state.sessions += 1;
        }
        Ok(())
    }

    /// Release a session slot taken by `begin_session`
    pub fn end_session(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.accounts.get_mut(name) {
            if state.sessions == 0 {
                warn!(username = name, "session counter underflow averted");
                return;
            }
            state.sessions -= 1;
        }
    }

    /// Live sessions for an account, if it exists
    pub fn session_count(&self, name: &str) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner.accounts.get(name).map(|state| state.sessions)
    }

    /// Enable or disable an account; affects the next handshake only
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.accounts.get_mut(name) {
            Some(state) => {
                let flags = state.account.flags;
                state.account.flags = if enabled {
                    flags.with(AccountFlags::ENABLED)
                } else {
                    flags.without(AccountFlags::ENABLED)
                };
                true
            }
            None => false,
        }
    }

    /// Insert or replace an account
    ///
    /// Replacing keeps the live session counter: established channels are
    /// unaffected by credential changes.
    pub fn add_account(&self, account: Account) {
        let mut inner = self.inner.lock().unwrap();
        let sessions = inner
            .accounts
            .get(&account.name)
            .map(|state| state.sessions)
            .unwrap_or(0);
        inner.accounts.insert(
            account.name.clone(),
            AccountState { account, sessions },
        );
    }

    /// Remove an account; returns whether it existed
    pub fn remove_account(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.accounts.remove(name).is_some()
    }

    /// Snapshot of all accounts for the settings owner to persist
    pub fn snapshot(&self) -> Vec<Account> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .values()
            .map(|state| state.account.clone())
            .collect()
    }
}

/// Stable fake credentials for a name outside the real account set
///
/// Salt and verifier are PRF outputs keyed by the persisted seed, so the
/// same name always resolves to the same plausible tuple, with the same
/// byte lengths a real account would have in the negotiated group.
fn fabricate(seed: &[u8; SEED_LEN], name: &str, group: &SrpGroup) -> AccountView {
    let salt = prf_blocks(seed, b"salt", name, srp::SALT_LEN);
    let raw = prf_blocks(seed, b"verifier", name, group.key_len());
    AccountView {
        salt,
        // Reduced into the group so the verifier is a legal element
        verifier: group.element_from_bytes(&raw),
        group: group.clone(),
        fabricated: true,
    }
}

fn prf_blocks(seed: &[u8], label: &[u8], name: &str, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 31);
    let mut block = 0u8;
    while out.len() < len {
        let mut mac =
            HmacSha256::new_from_slice(seed).expect("HMAC accepts keys of any length");
        mac.update(label);
        mac.update(&[block]);
        mac.update(name.as_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
        block += 1;
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let mut alice = Account::enroll("alice", "hunter2", SrpGroup::modp_1536());
        alice.session_cap = Some(2);
        UserStore::new([alice], [7; SEED_LEN])
    }

    #[test]
    fn real_lookup_returns_enrolled_material() {
        let store = store();
        let account = &store.snapshot()[0];
        let view = store.lookup("alice", &SrpGroup::modp_1536());
        assert!(!view.is_fabricated());
        assert_eq!(view.salt, account.salt);
        assert_eq!(view.verifier, account.verifier);
    }

    #[test]
    fn unknown_name_fabricates_stable_plausible_tuple() {
        let store = store();
        let group = SrpGroup::modp_1536();
        let first = store.lookup("mallory", &group);
        let second = store.lookup("mallory", &group);
        assert!(first.is_fabricated());
        assert_eq!(first.salt, second.salt);
        assert_eq!(first.verifier, second.verifier);

        // Same shape as a real account
        let real = store.lookup("alice", &group);
        assert_eq!(first.salt.len(), real.salt.len());
        assert_eq!(first.verifier.len(), real.verifier.len());

        // Distinct names resolve to distinct credentials
        let other = store.lookup("mallory2", &group);
        assert_ne!(first.verifier, other.verifier);
    }

    #[test]
    fn disabled_account_resolves_through_seed() {
        let store = store();
        let group = SrpGroup::modp_1536();
        let real = store.lookup("alice", &group);

        assert!(store.set_enabled("alice", false));
        let disabled = store.lookup("alice", &group);
        assert!(disabled.is_fabricated());
        assert_ne!(disabled.verifier, real.verifier);

        assert!(store.set_enabled("alice", true));
        assert!(!store.lookup("alice", &group).is_fabricated());
    }

    #[test]
    fn mismatched_group_resolves_through_seed() {
        let store = store();
        let view = store.lookup("alice", &SrpGroup::modp_2048());
        assert!(view.is_fabricated());
        assert_eq!(view.verifier.len(), SrpGroup::modp_2048().key_len());
    }

    #[test]
    fn session_cap_enforced_and_released() {
        let store = store();
        store.begin_session("alice").unwrap();
        store.begin_session("alice").unwrap();
        assert_eq!(
            store.begin_session("alice").unwrap_err(),
            Error::SessionLimitExceeded
        );
        store.end_session("alice");
        store.begin_session("alice").unwrap();
        assert_eq!(store.session_count("alice"), Some(2));
    }

    #[test]
    fn unknown_name_sessions_are_silent() {
        let store = store();
        store.begin_session("mallory").unwrap();
        store.end_session("mallory");
        assert_eq!(store.session_count("mallory"), None);
    }

    #[test]
    fn end_session_never_underflows() {
        let store = store();
        store.end_session("alice");
        assert_eq!(store.session_count("alice"), Some(0));
    }

    #[test]
    fn replacing_account_keeps_live_sessions() {
        let store = store();
        store.begin_session("alice").unwrap();
        store.add_account(Account::enroll("alice", "new password", SrpGroup::modp_1536()));
        assert_eq!(store.session_count("alice"), Some(1));
    }
}
