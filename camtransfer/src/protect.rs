//! Public-key file protector: X25519 key agreement plus XChaCha20-Poly1305.
//!
//! `apply` needs only the recipient's public key, so a capture machine never
//! holds anything able to decrypt. `invert` needs the matching private key.
//!
//! Every artifact gets a fresh ephemeral key pair. The file key is
//! `blake3::derive_key(KDF_CONTEXT, shared || ephemeral_public || recipient_public)`.
//!
//! Artifact layout: `MAGIC (8) || ephemeral_public (32) || nonce (24) || ciphertext+tag`.
//! The magic and ephemeral public key are bound as associated data.

use async_trait::async_trait;
use camtransfer_core::contract::{KeyMaterial, Protector};
use camtransfer_core::error::ProtectError;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use x25519_dalek::{PublicKey, StaticSecret};

pub const MAGIC: &[u8; 8] = b"CAMTRv02";
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const PROTECTED_EXTENSION: &str = "enc";
const RESTORED_EXTENSION: &str = "dec";
const HEADER_LEN: usize = MAGIC.len() + KEY_LEN + NONCE_LEN;
const KDF_CONTEXT: &str = "camtransfer 2024-06 protected file key v2";

#[derive(Debug, Clone, Copy, Default)]
pub struct SealedProtector;

impl SealedProtector {
    pub fn new() -> Self {
        Self
    }
}

fn key_bytes(key: &KeyMaterial, role: &str) -> Result<[u8; KEY_LEN], ProtectError> {
    <[u8; KEY_LEN]>::try_from(key.as_bytes()).map_err(|_| {
        ProtectError::Cipher(format!("{role} key must be {KEY_LEN} bytes, got {}", key.len()))
    })
}

fn random_bytes<const N: usize>() -> Result<[u8; N], ProtectError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out)
        .map_err(|e| ProtectError::Cipher(format!("random source failed: {e}")))?;
    Ok(out)
}

/// Cipher for one artifact, from the agreed secret and both public halves.
fn file_cipher(
    secret: &StaticSecret,
    their_public: &PublicKey,
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<XChaCha20Poly1305, ProtectError> {
    let shared = secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(ProtectError::Cipher("degenerate public key".into()));
    }
    let mut material = Vec::with_capacity(3 * KEY_LEN);
    material.extend_from_slice(shared.as_bytes());
    material.extend_from_slice(ephemeral.as_bytes());
    material.extend_from_slice(recipient.as_bytes());
    let file_key = blake3::derive_key(KDF_CONTEXT, &material);
    Ok(XChaCha20Poly1305::new(Key::from_slice(&file_key)))
}

fn associated_data(ephemeral: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(MAGIC.len() + ephemeral.len());
    aad.extend_from_slice(MAGIC);
    aad.extend_from_slice(ephemeral);
    aad
}

fn seal(public_key: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, ProtectError> {
    let recipient = PublicKey::from(key_bytes(public_key, "public")?);
    let ephemeral_secret = StaticSecret::from(random_bytes::<KEY_LEN>()?);
    let ephemeral = PublicKey::from(&ephemeral_secret);
    let nonce = random_bytes::<NONCE_LEN>()?;

    let aead = file_cipher(&ephemeral_secret, &recipient, &ephemeral, &recipient)?;
    let sealed = aead
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &associated_data(ephemeral.as_bytes()),
            },
        )
        .map_err(|_| ProtectError::Cipher("encryption failed".into()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(ephemeral.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open(path: &Path, private_key: &KeyMaterial, artifact: &[u8]) -> Result<Vec<u8>, ProtectError> {
    if artifact.len() < HEADER_LEN + TAG_LEN {
        return Err(ProtectError::Malformed {
            path: path.to_path_buf(),
            reason: format!("only {} bytes", artifact.len()),
        });
    }
    let (magic, rest) = artifact.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(ProtectError::Malformed {
            path: path.to_path_buf(),
            reason: "unknown header".into(),
        });
    }
    let (ephemeral_bytes, rest) = rest.split_at(KEY_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);

    let secret = StaticSecret::from(key_bytes(private_key, "private")?);
    let recipient = PublicKey::from(&secret);
    let mut ephemeral = [0u8; KEY_LEN];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral = PublicKey::from(ephemeral);

    file_cipher(&secret, &ephemeral, &ephemeral, &recipient)?
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: &associated_data(ephemeral_bytes),
            },
        )
        .map_err(|_| ProtectError::Cipher("authentication failed: wrong key or tampered file".into()))
}

/// `name` with `.ext` appended to the full file name.
fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

/// Where an inverted artifact is written.
fn restored_path(path: &Path, overwrite: bool) -> PathBuf {
    let base = if path.extension().is_some_and(|e| e == PROTECTED_EXTENSION) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };
    if overwrite {
        base
    } else {
        with_appended_extension(&base, RESTORED_EXTENSION)
    }
}

/// Write through a temp file so a crash never leaves a truncated output.
async fn write_atomically(path: &Path, bytes: Vec<u8>) -> Result<(), ProtectError> {
    let tmp = with_appended_extension(path, "tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn run_cipher<F>(work: F) -> Result<Vec<u8>, ProtectError>
where
    F: FnOnce() -> Result<Vec<u8>, ProtectError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProtectError::Cipher(format!("cipher task failed: {e}")))?
}

#[async_trait]
impl Protector for SealedProtector {
    async fn apply(
        &self,
        path: &Path,
        public_key: &KeyMaterial,
        overwrite: bool,
    ) -> Result<PathBuf, ProtectError> {
        let plaintext = tokio::fs::read(path).await?;
        let key = public_key.clone();
        let artifact = run_cipher(move || seal(&key, &plaintext)).await?;

        let out = with_appended_extension(path, PROTECTED_EXTENSION);
        write_atomically(&out, artifact).await?;
        if overwrite {
            tokio::fs::remove_file(path).await?;
            debug!(path = %path.display(), "Removed plaintext after encryption");
        }
        info!(path = %path.display(), artifact = %out.display(), "Encrypted file");
        Ok(out)
    }

    async fn invert(
        &self,
        path: &Path,
        private_key: &KeyMaterial,
        overwrite: bool,
    ) -> Result<PathBuf, ProtectError> {
        let artifact = tokio::fs::read(path).await?;
        let key = private_key.clone();
        let owned_path = path.to_path_buf();
        let plaintext = run_cipher(move || open(&owned_path, &key, &artifact)).await?;

        let out = restored_path(path, overwrite);
        write_atomically(&out, plaintext).await?;
        if overwrite && out != path {
            tokio::fs::remove_file(path).await?;
        }
        Ok(out)
    }

    fn is_protected(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == PROTECTED_EXTENSION)
    }
}
