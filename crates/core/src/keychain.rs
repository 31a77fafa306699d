//! Keychain item records.
//!
//! Key, Certificate, and Identity records are independently persisted
//! and independently revocable; an Identity references its Key and
//! Certificate by UUID rather than owning them.

/// Class tag of a persisted keychain item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemClass {
    Key,
    Certificate,
    Identity,
}

impl ItemClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemClass::Key => "key",
            ItemClass::Certificate => "certificate",
            ItemClass::Identity => "identity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "key" => Some(ItemClass::Key),
            "certificate" => Some(ItemClass::Certificate),
            "identity" => Some(ItemClass::Identity),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keychain item to persist; the store generates its UUID.
#[derive(Debug, Clone)]
pub enum NewKeychainItem {
    /// PKCS#8 DER RSA private key.
    Key { key_der: Vec<u8> },
    /// X.509 DER certificate.
    Certificate { cert_der: Vec<u8> },
    /// Pairing of a Key and a Certificate by UUID.
    Identity {
        key_uuid: String,
        certificate_uuid: String,
    },
}

impl NewKeychainItem {
    pub fn class(&self) -> ItemClass {
        match self {
            NewKeychainItem::Key { .. } => ItemClass::Key,
            NewKeychainItem::Certificate { .. } => ItemClass::Certificate,
            NewKeychainItem::Identity { .. } => ItemClass::Identity,
        }
    }
}

/// A loaded keychain item.
#[derive(Debug, Clone)]
pub enum KeychainItem {
    Key {
        uuid: String,
        key_der: Vec<u8>,
    },
    Certificate {
        uuid: String,
        cert_der: Vec<u8>,
    },
    Identity {
        uuid: String,
        key_uuid: String,
        certificate_uuid: String,
    },
}

impl KeychainItem {
    pub fn uuid(&self) -> &str {
        match self {
            KeychainItem::Key { uuid, .. }
            | KeychainItem::Certificate { uuid, .. }
            | KeychainItem::Identity { uuid, .. } => uuid,
        }
    }

    pub fn class(&self) -> ItemClass {
        match self {
            KeychainItem::Key { .. } => ItemClass::Key,
            KeychainItem::Certificate { .. } => ItemClass::Certificate,
            KeychainItem::Identity { .. } => ItemClass::Identity,
        }
    }
}
