use super::*;

/// SSH algorithm policy, selected with the `SECURITY_LEVEL` session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum SecurityLevel {
    /// Modern algorithms only, host keys checked against known_hosts.
    #[default]
    Secure,
    /// Every algorithm russh supports, no host key check. For old devices.
    LegacyCompatible,
}

impl SecurityLevel {
    /// Algorithm lists offered during key exchange.
    pub fn preferred(self) -> Preferred {
        let (kex, key, cipher, mac) = match self {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }

    /// Host key verification used with this level unless overridden.
    pub fn default_server_check(self) -> ServerCheckMethod {
        match self {
            SecurityLevel::Secure => ServerCheckMethod::DefaultKnownHostsFile,
            SecurityLevel::LegacyCompatible => ServerCheckMethod::NoCheck,
        }
    }
}

/// Algorithm policy plus host key verification for [`SshOpener`](super::SshOpener).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl ConnectionSecurityOptions {
    pub fn new(level: SecurityLevel) -> Self {
        Self {
            level,
            server_check: level.default_server_check(),
        }
    }

    /// Replaces the host key verification, e.g. with a pinned public key.
    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub(super) fn preferred(&self) -> Preferred {
        self.level.preferred()
    }
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::new(SecurityLevel::default())
    }
}

impl From<SecurityLevel> for ConnectionSecurityOptions {
    fn from(level: SecurityLevel) -> Self {
        Self::new(level)
    }
}
