//! SRP-6a key exchange arithmetic
//!
//! Implements the verifier derivation and the host/client halves of the
//! exchange over classic MODP groups. All wire values are big-endian and
//! left-padded to the modulus length, so both sides hash identical byte
//! strings into the scrambling parameter and the proof transcript.

use bytes::{Buf, BufMut};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    coding::{self, BufExt, BufMutExt, Codec, CodecError},
    constant_time,
    error::Error,
};

/// Bytes of random salt attached to each enrolled account
pub const SALT_LEN: usize = 64;

/// Bytes of private ephemeral exponent generated per handshake attempt
const EPHEMERAL_LEN: usize = 64;

/// SRP group parameters: a generator and a safe-prime modulus
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SrpGroup {
    generator: BigUint,
    modulus: BigUint,
}

// 1536-bit and 2048-bit MODP groups from RFC 3526, generator 2. Aside from
// their published provenance, any safe prime works here; per-account groups
// decoded off the wire go through the same validation as these.
const MODP_1536: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                         98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                         9ED529077096966D670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF";

const MODP_2048: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                         020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                         4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                         EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                         98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                         9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                         E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                         3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

impl SrpGroup {
    /// The 1536-bit MODP group
    pub fn modp_1536() -> Self {
        Self::from_hex(MODP_1536)
    }

    /// The 2048-bit MODP group
    pub fn modp_2048() -> Self {
        Self::from_hex(MODP_2048)
    }

    /// Groups a host accepts by default, weakest first
    pub fn default_set() -> Vec<Self> {
        vec![Self::modp_1536(), Self::modp_2048()]
    }

    fn from_hex(modulus: &str) -> Self {
        Self {
            generator: BigUint::from(2u32),
            // Infallible: the constants above are well-formed hex
            modulus: BigUint::parse_bytes(modulus.as_bytes(), 16).unwrap(),
        }
    }

    /// Construct from raw big-endian parameter bytes
    ///
    /// Fails on degenerate parameters a hostile peer could offer: a modulus
    /// too small to resist brute force, an even modulus, or a generator
    /// outside `(1, N)`.
    pub fn from_parameters(generator: &[u8], modulus: &[u8]) -> Result<Self, Error> {
        let generator = BigUint::from_bytes_be(generator);
        let modulus = BigUint::from_bytes_be(modulus);
        if modulus.bits() < 1024 || (&modulus % 2u32).is_zero() {
            return Err(Error::MalformedFrame);
        }
        if generator < BigUint::from(2u32) || generator >= modulus {
            return Err(Error::MalformedFrame);
        }
        Ok(Self { generator, modulus })
    }

    /// Modulus length in bits
    pub fn bits(&self) -> u64 {
        self.modulus.bits()
    }

    /// Raw big-endian (generator, modulus) bytes for persistence
    pub fn parameter_bytes(&self) -> (Vec<u8>, Vec<u8>) {
        (self.generator.to_bytes_be(), self.modulus.to_bytes_be())
    }

    /// Length of public keys and verifiers in this group, in bytes
    pub fn key_len(&self) -> usize {
        (self.modulus.bits() as usize + 7) / 8
    }

    /// Reduce arbitrary bytes into a group element, padded to the key length
    pub(crate) fn element_from_bytes(&self, raw: &[u8]) -> Vec<u8> {
        pad(
            &(BigUint::from_bytes_be(raw) % &self.modulus),
            self.key_len(),
        )
    }

    /// SRP-6a multiplier `k = H(N | pad(g))`
    fn multiplier(&self) -> BigUint {
        let digest = h(&[
            &self.modulus.to_bytes_be(),
            &pad(&self.generator, self.key_len()),
        ]);
        BigUint::from_bytes_be(&digest)
    }

    fn modpow_g(&self, exp: &BigUint) -> BigUint {
        self.generator.modpow(exp, &self.modulus)
    }
}

impl Codec for SrpGroup {
    fn decode<B: Buf>(buf: &mut B) -> coding::Result<Self> {
        let generator = buf.get_bytes()?;
        let modulus = buf.get_bytes()?;
        Self::from_parameters(&generator, &modulus).map_err(|_| CodecError::IllegalValue)
    }
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write_bytes(&self.generator.to_bytes_be());
        buf.write_bytes(&self.modulus.to_bytes_be());
    }
}

fn h(parts: &[&[u8]]) -> [u8; 32] {
    let mut d = Sha256::new();
    for part in parts {
        d.update(part);
    }
    d.finalize().into()
}

/// Big-endian bytes of `x`, left-padded with zeros to `len`
fn pad(x: &BigUint, len: usize) -> Vec<u8> {
    let bytes = x.to_bytes_be();
    debug_assert!(bytes.len() <= len);
    let mut out = vec![0; len - bytes.len().min(len)];
    out.extend_from_slice(&bytes);
    out
}

/// Fresh random salt for account enrollment
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Private key `x = H(salt | H(username ":" password))`
fn private_key(username: &str, password: &str, salt: &[u8]) -> BigUint {
    let inner = Zeroizing::new(h(&[username.as_bytes(), b":", password.as_bytes()]));
    let digest = Zeroizing::new(h(&[salt, &*inner]));
    BigUint::from_bytes_be(&*digest)
}

/// Derive the password verifier `v = g^x mod N` stored instead of a password
///
/// One-way: sufficient to check a proof, insufficient to recover the
/// password. Returned padded to the group's key length.
pub fn compute_verifier(group: &SrpGroup, username: &str, password: &str, salt: &[u8]) -> Vec<u8> {
    let x = private_key(username, password, salt);
    pad(&group.modpow_g(&x), group.key_len())
}

fn random_ephemeral() -> BigUint {
    let mut bytes = Zeroizing::new([0u8; EPHEMERAL_LEN]);
    OsRng.fill_bytes(&mut *bytes);
    BigUint::from_bytes_be(&*bytes)
}

/// Scrambling parameter `u = H(pad(A) | pad(B))`
fn scrambler(group: &SrpGroup, a_pub: &BigUint, b_pub: &BigUint) -> BigUint {
    let len = group.key_len();
    BigUint::from_bytes_be(&h(&[&pad(a_pub, len), &pad(b_pub, len)]))
}

/// Both proofs of the exchange transcript
///
/// `m1 = H((H(N) xor H(g)) | H(username) | salt | pad(A) | pad(B) | K)` and
/// `m2 = H(pad(A) | m1 | K)`.
fn proofs(
    group: &SrpGroup,
    username: &str,
    salt: &[u8],
    a_pub: &BigUint,
    b_pub: &BigUint,
    key: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let len = group.key_len();
    let hn = h(&[&group.modulus.to_bytes_be()]);
    let hg = h(&[&group.generator.to_bytes_be()]);
    let mut hx = [0u8; 32];
    for (out, (n, g)) in hx.iter_mut().zip(hn.iter().zip(&hg)) {
        *out = n ^ g;
    }
    let hu = h(&[username.as_bytes()]);
    let a = pad(a_pub, len);
    let m1 = h(&[&hx, &hu, salt, &a, &pad(b_pub, len), key]);
    let m2 = h(&[&a, &m1, key]);
    (m1, m2)
}

/// Secrets derived once both ephemerals and the verifier are known
///
/// Holds the session key, the proof to transmit and the proof expected from
/// the peer; the key is wiped on drop.
pub struct SessionSecrets {
    key: [u8; 32],
    own_proof: [u8; 32],
    expected_peer_proof: [u8; 32],
}

impl SessionSecrets {
    /// Proof of the transcript to send to the peer
    pub fn own_proof(&self) -> &[u8; 32] {
        &self.own_proof
    }

    /// Check the peer's proof in constant time
    pub fn peer_proof_matches(&self, proof: &[u8]) -> bool {
        constant_time::eq(&self.expected_peer_proof, proof)
    }

    /// Surrender the session key, consuming the secrets
    pub fn into_key(self) -> crate::crypto::SessionKey {
        crate::crypto::SessionKey::from_bytes(self.key)
    }
}

impl Drop for SessionSecrets {
    fn drop(&mut self) {
        self.key.zeroize();
        self.expected_peer_proof.zeroize();
    }
}

impl std::fmt::Debug for SessionSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecrets(..)")
    }
}

/// Host half of one key exchange attempt
///
/// Created at `Identify` once the account's salt and verifier are known;
/// consumed when the client's public key arrives.
pub struct ServerExchange {
    group: SrpGroup,
    username: String,
    salt: Vec<u8>,
    verifier: BigUint,
    private: BigUint,
    public: BigUint,
}

impl ServerExchange {
    /// Generate a fresh ephemeral pair and compute `B = kv + g^b mod N`
    pub fn new(group: SrpGroup, username: String, salt: Vec<u8>, verifier: &[u8]) -> Self {
        let verifier = BigUint::from_bytes_be(verifier);
        let private = random_ephemeral();
        let kv = (group.multiplier() * &verifier) % &group.modulus;
        let public = (kv + group.modpow_g(&private)) % &group.modulus;
        Self {
            group,
            username,
            salt,
            verifier,
            private,
            public,
        }
    }

    /// Public ephemeral to transmit, padded to the group's key length
    pub fn public_key(&self) -> Vec<u8> {
        pad(&self.public, self.group.key_len())
    }

    /// Derive the shared secret from the client's public key
    ///
    /// `A mod N == 0` is rejected before any arithmetic: such a value forces
    /// the shared secret to zero regardless of the verifier.
    pub fn complete(self, client_public: &[u8]) -> Result<SessionSecrets, Error> {
        let a_pub = BigUint::from_bytes_be(client_public);
        if (&a_pub % &self.group.modulus).is_zero() {
            return Err(Error::InvalidEphemeral);
        }
        let u = scrambler(&self.group, &a_pub, &self.public);
        // S = (A * v^u) ^ b mod N
        let base = (&a_pub * self.verifier.modpow(&u, &self.group.modulus)) % &self.group.modulus;
        let secret = base.modpow(&self.private, &self.group.modulus);
        let key = h(&[&pad(&secret, self.group.key_len())]);
        let (m1, m2) = proofs(
            &self.group,
            &self.username,
            &self.salt,
            &a_pub,
            &self.public,
            &key,
        );
        Ok(SessionSecrets {
            key,
            own_proof: m2,
            expected_peer_proof: m1,
        })
    }
}

/// Client half of one key exchange attempt
pub struct ClientExchange {
    group: SrpGroup,
    username: String,
    password: Zeroizing<String>,
    private: BigUint,
    public: BigUint,
}

impl ClientExchange {
    /// Generate a fresh ephemeral pair and compute `A = g^a mod N`
    pub fn new(group: SrpGroup, username: String, password: Zeroizing<String>) -> Self {
        let private = random_ephemeral();
        let public = group.modpow_g(&private);
        Self {
            group,
            username,
            password,
            private,
            public,
        }
    }

    /// Public ephemeral to transmit, padded to the group's key length
    pub fn public_key(&self) -> Vec<u8> {
        pad(&self.public, self.group.key_len())
    }

    /// Derive the shared secret from the host's salt and public key
    pub fn complete(self, salt: &[u8], server_public: &[u8]) -> Result<SessionSecrets, Error> {
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % &self.group.modulus).is_zero() {
            return Err(Error::InvalidEphemeral);
        }
        let u = scrambler(&self.group, &self.public, &b_pub);
        let x = private_key(&self.username, &self.password, salt);
        // S = (B - k * g^x) ^ (a + u * x) mod N, with the subtraction kept
        // non-negative by adding N first
        let n = &self.group.modulus;
        let kgx = (self.group.multiplier() * self.group.modpow_g(&x)) % n;
        let base = ((&b_pub % n) + n - kgx) % n;
        let exp = &self.private + u * x;
        let secret = base.modpow(&exp, n);
        let key = h(&[&pad(&secret, self.group.key_len())]);
        let (m1, m2) = proofs(
            &self.group,
            &self.username,
            salt,
            &self.public,
            &b_pub,
            &key,
        );
        Ok(SessionSecrets {
            key,
            own_proof: m1,
            expected_peer_proof: m2,
        })
    }
}
