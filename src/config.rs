//! Snapshot job configuration and SSH algorithm policies.
//!
//! The first half of this module holds the caller-facing configuration: the
//! session credentials block (keyed the way the session JSON names them) and
//! the [`SnapshotJob`] describing one batch. The second half lists the SSH
//! algorithms offered for each [`SecurityLevel`](crate::session::SecurityLevel).

use std::path::{Path, PathBuf};

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::report::OutputType;
use crate::session::{Credentials, ProxyCredentials, SecurityLevel};

/// Default upper bound on simultaneously open device sessions.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default title used to name tabular reports.
pub const DEFAULT_REPORT_TITLE: &str = "Snapshot";

/// Credentials block of a session configuration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    #[serde(rename = "NETWORK_USERNAME", default)]
    pub username: String,

    #[serde(rename = "NETWORK_PASSWORD", default)]
    pub password: String,

    /// Jump host address. Devices are reached through it when set.
    #[serde(
        rename = "JUMPHOST_IP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub jumphost_ip: Option<String>,

    #[serde(
        rename = "JUMPHOST_USERNAME",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub jumphost_username: Option<String>,

    #[serde(
        rename = "JUMPHOST_PASSWORD",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub jumphost_password: Option<String>,

    /// SSH algorithm policy, `Secure` when absent.
    #[serde(
        rename = "SECURITY_LEVEL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub security_level: Option<SecurityLevel>,

    /// Built-in prompt template name, `generic` when absent.
    #[serde(
        rename = "DEVICE_TEMPLATE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_template: Option<String>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("username", &self.username)
            .field("jumphost_ip", &self.jumphost_ip)
            .field("jumphost_username", &self.jumphost_username)
            .field("security_level", &self.security_level)
            .field("device_template", &self.device_template)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    session: SessionConfig,
}

impl SessionConfig {
    /// Parses a session block from a JSON object string.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| SnapshotError::InvalidConfig(format!("session json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the `session` block of a JSON configuration file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SnapshotError::InvalidConfig(format!("read {}: {e}", path.display()))
        })?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|e| {
            SnapshotError::InvalidConfig(format!("parse {}: {e}", path.display()))
        })?;
        file.session.validate()?;
        Ok(file.session)
    }

    /// Rejects configurations that cannot log into anything.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.username.trim().is_empty() {
            return Err(SnapshotError::InvalidConfig(
                "NETWORK_USERNAME is not set".to_string(),
            ));
        }
        if self.jumphost().is_some() && self.jumphost_username.is_none() {
            return Err(SnapshotError::InvalidConfig(
                "JUMPHOST_IP is set but JUMPHOST_USERNAME is missing".to_string(),
            ));
        }
        Ok(())
    }

    /// Device login credentials.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    /// Jump host credentials, present only when a jump host is configured.
    pub fn proxy(&self) -> Option<ProxyCredentials> {
        let hostname = self.jumphost()?;
        Some(ProxyCredentials {
            hostname: hostname.to_string(),
            username: self.jumphost_username.clone().unwrap_or_default(),
            password: self.jumphost_password.clone().unwrap_or_default(),
        })
    }

    fn jumphost(&self) -> Option<&str> {
        self.jumphost_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// One snapshot batch: what to collect, from where, and how to report it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotJob {
    /// Device identifiers, in report order.
    pub devices: Vec<String>,
    /// Commands issued on every device, in order.
    pub commands: Vec<String>,
    #[serde(default)]
    pub output: OutputType,
    /// Directory receiving the report artifacts. Created when missing.
    pub output_dir: PathBuf,
    pub session: SessionConfig,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_report_title")]
    pub report_title: String,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_report_title() -> String {
    DEFAULT_REPORT_TITLE.to_string()
}

impl SnapshotJob {
    /// Builds a job with default worker count and report title.
    pub fn new(
        devices: Vec<String>,
        commands: Vec<String>,
        output: OutputType,
        output_dir: impl Into<PathBuf>,
        session: SessionConfig,
    ) -> Self {
        Self {
            devices: non_blank(&devices),
            commands: non_blank(&commands),
            output,
            output_dir: output_dir.into(),
            session,
            max_workers: DEFAULT_MAX_WORKERS,
            report_title: DEFAULT_REPORT_TITLE.to_string(),
        }
    }

    /// Parses a job from JSON and validates its session block.
    ///
    /// Blank device and command entries are dropped.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let mut job: SnapshotJob = serde_json::from_str(json)
            .map_err(|e| SnapshotError::InvalidConfig(format!("job json: {e}")))?;
        job.session.validate()?;
        job.devices = non_blank(&job.devices);
        job.commands = non_blank(&job.commands);
        Ok(job)
    }
}

/// Trimmed entries, without the blank ones.
pub fn non_blank(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits pasted multi-line text into trimmed, non-empty lines.
pub fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON schema of [`SnapshotJob`], pretty printed.
pub fn job_schema() -> Result<String, SnapshotError> {
    let schema = schemars::schema_for!(SnapshotJob);
    serde_json::to_string_pretty(&schema)
        .map_err(|e| SnapshotError::InvalidConfig(format!("encode job schema: {e}")))
}

/// Key exchange algorithms for the secure profile.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

/// Ciphers for the secure profile.
pub static SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

/// MAC algorithms for the secure profile.
pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

/// Host key algorithms for the secure profile.
pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

/// Key exchange algorithms for legacy devices, including SHA-1 Diffie-Hellman groups.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Ciphers for legacy devices, including CBC modes.
pub static LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

/// MAC algorithms for legacy devices.
pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA1_ETM,
];

/// Host key algorithms for legacy devices, including DSA and SHA-1 RSA.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

/// Compression methods offered by every profile.
pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];
