//! Key-pair provisioning for the sealed protector.
//!
//! `create-key --key <stem>` writes two files:
//! - `<stem>.pub`: `public:` followed by 64 hex characters. Goes on the
//!   capture machine and is all `run` ever needs.
//! - `<stem>.priv`: `private:` followed by 64 hex characters, mode 0600.
//!   Only `decrypt` reads it; keep it off the capture machine.
//!
//! The label stops one half being loaded where the other is expected.
//! Whitespace around the line is ignored on load.

use anyhow::{anyhow, bail, Context, Result};
use camtransfer_core::contract::KeyMaterial;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_LEN: usize = 32;
pub const PUBLIC_EXTENSION: &str = "pub";
pub const PRIVATE_EXTENSION: &str = "priv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Public,
    Private,
}

impl KeyKind {
    fn label(self) -> &'static str {
        match self {
            KeyKind::Public => "public",
            KeyKind::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairPaths {
    pub public: PathBuf,
    pub private: PathBuf,
}

impl KeyPairPaths {
    pub fn for_stem(stem: &Path) -> Self {
        Self {
            public: with_suffix(stem, PUBLIC_EXTENSION),
            private: with_suffix(stem, PRIVATE_EXTENSION),
        }
    }
}

fn with_suffix(stem: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = stem.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Generate a fresh key pair next to `stem`. Never replaces an existing file.
pub fn create_key_pair(stem: &Path) -> Result<KeyPairPaths> {
    let paths = KeyPairPaths::for_stem(stem);
    for path in [&paths.public, &paths.private] {
        if path.exists() {
            error!(path = %path.display(), "Key file already exists, refusing to overwrite");
            bail!("key file {} already exists", path.display());
        }
    }

    let mut seed = [0u8; KEY_LEN];
    getrandom::getrandom(&mut seed).map_err(|e| anyhow!("random source failed: {e}"))?;
    let secret = StaticSecret::from(seed);
    let public = PublicKey::from(&secret);

    write_new(&paths.private, KeyKind::Private, &secret.to_bytes(), 0o600)?;
    if let Err(e) = write_new(&paths.public, KeyKind::Public, public.as_bytes(), 0o644) {
        if let Err(cleanup) = fs::remove_file(&paths.private) {
            warn!(path = %paths.private.display(), error = %cleanup, "Could not remove half-written key pair");
        }
        return Err(e);
    }

    info!(
        public = %paths.public.display(),
        private = %paths.private.display(),
        "Created key pair"
    );
    Ok(paths)
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn write_new(path: &Path, kind: KeyKind, bytes: &[u8], mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            error!(path = %path.display(), "Key file already exists, refusing to overwrite");
            bail!("key file {} already exists", path.display());
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("failed to create key file {}", path.display())))
        }
    };
    writeln!(file, "{}:{}", kind.label(), hex::encode(bytes))
        .with_context(|| format!("failed to write key file {}", path.display()))
}

/// Load the public half, for encrypting.
pub fn load_public_key(path: &Path) -> Result<KeyMaterial> {
    load(path, KeyKind::Public)
}

/// Load the private half, for decrypting.
pub fn load_private_key(path: &Path) -> Result<KeyMaterial> {
    load(path, KeyKind::Private)
}

fn load(path: &Path, kind: KeyKind) -> Result<KeyMaterial> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    let bytes =
        parse_key(&text, kind).with_context(|| format!("invalid key file {}", path.display()))?;
    info!(path = %path.display(), kind = kind.label(), "Loaded key file");
    Ok(KeyMaterial::new(bytes.to_vec()))
}

fn parse_key(text: &str, kind: KeyKind) -> Result<[u8; KEY_LEN]> {
    let (label, encoded) = text
        .trim()
        .split_once(':')
        .ok_or_else(|| anyhow!("expected '{}:<hex>'", kind.label()))?;
    if label != kind.label() {
        bail!("holds a {label} key, expected a {} key", kind.label());
    }
    let bytes = hex::decode(encoded).map_err(|e| anyhow!("invalid hex: {e}"))?;
    if bytes.len() != KEY_LEN {
        bail!(
            "expected {KEY_LEN} bytes ({} hex chars), got {}",
            KEY_LEN * 2,
            bytes.len()
        );
    }
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}
