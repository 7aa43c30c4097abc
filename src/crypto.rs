//! Password hashing for the MAPI login challenge
//!
//! Protocol 9 hashes the password twice: first with the algorithm named in
//! the challenge's password-hash field (the stored form on the server), then
//! the hex form of that hash concatenated with the salt is digested with one of
//! the algorithms the server offers. The response carries `{ALGO}hexdigest`.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Hash algorithms this client can compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-512
    Sha512,
    /// SHA-384
    Sha384,
    /// SHA-256
    Sha256,
    /// SHA-224
    Sha224,
    /// SHA-1
    Sha1,
    /// MD5
    Md5,
}

impl HashAlgorithm {
    /// Look up an algorithm by the name the server uses (`SHA512`, `MD5`, ...).
    ///
    /// Returns `None` for algorithms this client does not implement, such as
    /// `RIPEMD160`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHA512" => Some(HashAlgorithm::Sha512),
            "SHA384" => Some(HashAlgorithm::Sha384),
            "SHA256" => Some(HashAlgorithm::Sha256),
            "SHA224" => Some(HashAlgorithm::Sha224),
            "SHA1" => Some(HashAlgorithm::Sha1),
            "MD5" => Some(HashAlgorithm::Md5),
            _ => None,
        }
    }

    /// Name as written in the challenge and the `{ALGO}` response tag
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha224 => "SHA224",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Md5 => "MD5",
        }
    }

    /// Lowercase hex digest of `data`
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
            HashAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            HashAlgorithm::Sha224 => hex::encode(Sha224::digest(data)),
            HashAlgorithm::Sha1 => hex::encode(Sha1::digest(data)),
            HashAlgorithm::Md5 => hex::encode(Md5::digest(data)),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hash the plain password with the server's password algorithm
pub fn prehash_password(algorithm: HashAlgorithm, password: &str) -> String {
    algorithm.hex_digest(password.as_bytes())
}

/// Digest over the pre-hashed password and salt, tagged with the algorithm:
/// `{SHA512}<hex>`
pub fn credential_digest(algorithm: HashAlgorithm, prehashed: &str, salt: &str) -> String {
    let mut input = Vec::with_capacity(prehashed.len() + salt.len());
    input.extend_from_slice(prehashed.as_bytes());
    input.extend_from_slice(salt.as_bytes());
    format!("{{{}}}{}", algorithm.name(), algorithm.hex_digest(&input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(HashAlgorithm::from_name("SHA512"), Some(HashAlgorithm::Sha512));
        assert_eq!(HashAlgorithm::from_name("sha1"), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::from_name("MD5"), Some(HashAlgorithm::Md5));
        assert_eq!(HashAlgorithm::from_name("RIPEMD160"), None);
        assert_eq!(HashAlgorithm::from_name("PROT10"), None);
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            HashAlgorithm::Md5.hex_digest(b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            HashAlgorithm::Sha1.hex_digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            HashAlgorithm::Sha224.hex_digest(b"abc"),
            "23097d223405d8228642a477bda255b32aadbce4bda0b3f7e36c9da7"
        );
        assert_eq!(
            HashAlgorithm::Sha384.hex_digest(b"abc"),
            "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7"
        );
    }

    #[test]
    fn test_credential_digest() {
        let prehashed = prehash_password(HashAlgorithm::Sha512, "monetdb");
        assert_eq!(
            prehashed,
            "a73f1d86383446438ac64f56e15ada38b41fbb18f029d2181723aeb2acac6a831f60e5fdbd64ac2c8c70e035dd44cbbe3b45565ef2d58feb2821a2078c7fad35"
        );
        assert_eq!(
            credential_digest(HashAlgorithm::Sha256, &prehashed, "saltsalt"),
            "{SHA256}848fa8f68857416877f51995cdac22d4b813b24feaccaf055b89a08341199b10"
        );
    }
}
