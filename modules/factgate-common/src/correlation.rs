//! Correlation identifiers threading a causal chain of facts.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Attribute name under which a fact's correlation id travels.
pub const CORRELATION_ID: &str = "CORRELATION_ID";

const SIGNATURE_BYTES: usize = 4;

/// Deterministic signature of a salt, embedded in salted correlation ids.
pub fn salt_signature(salt: &str) -> String {
    let digest = Sha256::digest(salt.as_bytes());
    hex::encode(&digest[..SIGNATURE_BYTES])
}

/// Generate a unique correlation token.
///
/// With a non-empty salt the token is `<uuid>-<signature>`, so every id derived
/// from the same salt shares its suffix while the uuid part keeps it unique.
pub fn generate(salt: Option<&str>) -> String {
    let unique = Uuid::new_v4().to_string();
    match salt.filter(|s| !s.is_empty()) {
        Some(salt) => format!("{unique}-{}", salt_signature(salt)),
        None => unique,
    }
}

/// Whether a correlation id was generated from the given salt.
pub fn is_salted_with(correlation_id: &str, salt: &str) -> bool {
    correlation_id.ends_with(&format!("-{}", salt_signature(salt)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salted_ids_embed_the_salt_signature() {
        let salt = "cybersecurity-domain";
        let id = generate(Some(salt));
        assert!(!id.is_empty());
        assert!(id.contains(&salt_signature(salt)));
        assert!(is_salted_with(&id, salt));
    }

    #[test]
    fn same_salt_shares_signature_but_differs_in_unique_part() {
        let a = generate(Some("pu-1"));
        let b = generate(Some("pu-1"));
        assert_ne!(a, b);
        assert_eq!(a.rsplit('-').next(), b.rsplit('-').next());
        assert!(!is_salted_with(&a, "pu-2"));
    }

    #[test]
    fn unsalted_generation_is_never_empty() {
        let id = generate(None);
        assert!(!id.is_empty());
        assert!(Uuid::parse_str(&id).is_ok());

        // An empty salt behaves like no salt.
        assert!(Uuid::parse_str(&generate(Some(""))).is_ok());
    }
}
