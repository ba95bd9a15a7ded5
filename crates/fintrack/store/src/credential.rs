//! Credential digests and verification codes

use rand::Rng;
use uuid::Uuid;

/// Salted blake3 digest of an account credential
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialDigest {
    salt: String,
    digest: String,
}

impl CredentialDigest {
    pub fn derive(secret: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = hash(&salt, secret).to_hex().to_string();
        Self { salt, digest }
    }

    pub fn from_parts(salt: String, digest: String) -> Self {
        Self { salt, digest }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Constant-time comparison against a candidate secret.
    pub fn matches(&self, secret: &str) -> bool {
        match blake3::Hash::from_hex(&self.digest) {
            Ok(stored) => stored == hash(&self.salt, secret),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for CredentialDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialDigest(<redacted>)")
    }
}

fn hash(salt: &str, secret: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.finalize()
}

/// Six-digit numeric verification code.
pub fn verification_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Digest under which a session token is stored.
pub fn session_key(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_only_the_original_secret() {
        let digest = CredentialDigest::derive("hunter22");
        assert!(digest.matches("hunter22"));
        assert!(!digest.matches("hunter23"));

        let again = CredentialDigest::derive("hunter22");
        assert_ne!(digest.digest(), again.digest(), "salts differ");

        let restored =
            CredentialDigest::from_parts(digest.salt().to_string(), digest.digest().to_string());
        assert!(restored.matches("hunter22"));
    }

    #[test]
    fn corrupt_digest_never_matches() {
        let digest = CredentialDigest::from_parts("salt".into(), "not-hex".into());
        assert!(!digest.matches(""));
    }

    #[test]
    fn verification_codes_are_six_digits() {
        for _ in 0..100 {
            let code = verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
