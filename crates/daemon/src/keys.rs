//! WireGuard key pair provisioning
//!
//! Two providers:
//! - builtin: x25519 in process
//! - wg-tool: shells out to `wg genkey` / `wg pubkey`

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use wgsync_common::{Error, Result};
use x25519_dalek::{PublicKey, StaticSecret};

/// WireGuard key pair, base64 encoded
#[derive(Clone)]
pub struct WgKeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for WgKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgKeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Source of fresh key pairs for new peers and the interface itself
#[async_trait]
pub trait KeyProvisioner: Send + Sync {
    async fn generate_key_pair(&self) -> Result<WgKeyPair>;
}

/// Generate a WireGuard keypair using x25519
pub fn generate_wireguard_keypair() -> WgKeyPair {
    use rand::RngCore;

    let mut private_key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_key_bytes);

    // WireGuard key clamping
    private_key_bytes[0] &= 248;
    private_key_bytes[31] &= 127;
    private_key_bytes[31] |= 64;

    let secret = StaticSecret::from(private_key_bytes);
    let public = PublicKey::from(&secret);

    WgKeyPair {
        private_key: STANDARD.encode(private_key_bytes),
        public_key: STANDARD.encode(public.as_bytes()),
    }
}

/// Derive the public key for a base64 private key
pub fn public_key_from_private(private_key: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(private_key.trim())
        .map_err(|e| Error::ProvisioningFailed(format!("private key is not base64: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::ProvisioningFailed("private key must be 32 bytes".to_string()))?;
    let public = PublicKey::from(&StaticSecret::from(bytes));
    Ok(STANDARD.encode(public.as_bytes()))
}

/// In-process key generation
#[derive(Debug, Clone, Default)]
pub struct BuiltinKeyProvisioner;

#[async_trait]
impl KeyProvisioner for BuiltinKeyProvisioner {
    async fn generate_key_pair(&self) -> Result<WgKeyPair> {
        Ok(generate_wireguard_keypair())
    }
}

/// Key generation through the `wg` command line tool
#[derive(Debug, Clone)]
pub struct WgToolKeyProvisioner {
    binary: String,
    timeout: Duration,
}

impl WgToolKeyProvisioner {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, subcommand: &str, input: Option<&str>) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .arg(subcommand)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ProvisioningFailed(format!("failed to run {} {}: {}", self.binary, subcommand, e))
            })?;

        // Feeding stdin and collecting output share one deadline
        let stdin = child.stdin.take();
        let exchange = async move {
            if let (Some(input), Some(mut stdin)) = (input, stdin) {
                stdin.write_all(input.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                warn!("{} {} timed out", self.binary, subcommand);
                Error::ProvisioningFailed(format!(
                    "{} {} timed out after {}s",
                    self.binary,
                    subcommand,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                Error::ProvisioningFailed(format!("{} {}: {}", self.binary, subcommand, e))
            })?;

        if !output.status.success() {
            return Err(Error::ProvisioningFailed(format!(
                "{} {} failed: {}",
                self.binary,
                subcommand,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(Error::ProvisioningFailed(format!(
                "{} {} produced no output",
                self.binary, subcommand
            )));
        }
        Ok(value)
    }
}

#[async_trait]
impl KeyProvisioner for WgToolKeyProvisioner {
    async fn generate_key_pair(&self) -> Result<WgKeyPair> {
        let private_key = self.run("genkey", None).await?;
        let public_key = self.run("pubkey", Some(&private_key)).await?;
        debug!("Generated key pair via {} (public {})", self.binary, public_key);
        Ok(WgKeyPair {
            private_key,
            public_key,
        })
    }
}
