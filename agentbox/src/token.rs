//! Auth-token generation, storage, and verification.
//!
//! The token is a bearer secret: 32 cryptographically random bytes,
//! base64url-encoded to 43 characters, stored owner-readable only. It is
//! compared in constant time; length is checked up front so an
//! unequal-length guess short-circuits without a byte scan.

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use subtle::ConstantTimeEq;

use agentbox_protocol::TOKEN_LEN;

/// Generate a fresh token: 32 random bytes, base64url without padding.
pub fn generate() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    debug_assert_eq!(token.len(), TOKEN_LEN);
    token
}

/// Write the token to `path` with 0600 permissions, creating parent
/// directories as needed.
pub fn store(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("writing token file: {}", path.display()))?;
        file.write_all(token.as_bytes())?;
        file.write_all(b"\n")?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, format!("{token}\n"))
            .with_context(|| format!("writing token file: {}", path.display()))?;
    }
    Ok(())
}

/// Read the token from disk, trimming the trailing newline.
pub fn load(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading token file: {}", path.display()))?;
    let token = raw.trim().to_string();
    anyhow::ensure!(!token.is_empty(), "token file is empty: {}", path.display());
    Ok(token)
}

/// Load the stored token, generating and persisting one if absent.
pub fn load_or_generate(path: &Path) -> Result<String> {
    if path.exists() {
        load(path)
    } else {
        let token = generate();
        store(path, &token)?;
        tracing::info!(path = %path.display(), "generated new auth token");
        Ok(token)
    }
}

/// Constant-time token comparison. Unequal lengths are rejected before the
/// byte comparison; equal-length inputs are always scanned in full.
pub fn verify(expected: &str, presented: &str) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_shape() {
        let token = generate();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn store_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token");
        let token = generate();
        store(&path, &token).unwrap();
        assert_eq!(load(&path).unwrap(), token);
    }

    #[cfg(unix)]
    #[test]
    fn stored_token_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        store(&path, &generate()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let first = load_or_generate(&path).unwrap();
        let second = load_or_generate(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn verify_accepts_exact_match() {
        let token = generate();
        assert!(verify(&token, &token.clone()));
    }

    #[test]
    fn verify_rejects_wrong_token_of_equal_length() {
        let token = generate();
        let mut wrong = token.clone().into_bytes();
        // Flip the last byte to an always-different valid character.
        let last = wrong.last_mut().unwrap();
        *last = if *last == b'A' { b'B' } else { b'A' };
        let wrong = String::from_utf8(wrong).unwrap();
        assert_eq!(wrong.len(), token.len());
        assert!(!verify(&token, &wrong));
    }

    #[test]
    fn verify_rejects_length_mismatch() {
        let token = generate();
        assert!(!verify(&token, &token[..token.len() - 1]));
        assert!(!verify(&token, ""));
        assert!(!verify(&token, &format!("{token}x")));
    }

    #[test]
    fn load_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "\n").unwrap();
        assert!(load(&path).is_err());
    }
}
