//! Tenant-scoped storage key derivation.
//!
//! Object keys are `base64url(SHA-512(tenant || 0x00 || name))`: fixed width,
//! URL safe, and distinct tenants never share a key for the same name.
//! Tenant identifiers never contain NUL (they arrive in HTTP header values),
//! which keeps the separator unambiguous.
//! Metadata keys hash `"meta\0" || name` the same way.

use base64::{Engine as _, engine::general_purpose};
use sha2::{Digest, Sha512};

const META_PREFIX: &str = "meta\0";

/// Name of the metadata object that accompanies `name`.
pub fn meta_name(name: &str) -> String {
    format!("{}{}", META_PREFIX, name)
}

/// Maps logical names to storage keys for one tenant.
///
/// Built once per request from the authenticated tenant and passed to every
/// component that needs a key.
#[derive(Clone, Debug)]
pub struct KeyDeriver {
    tenant: String,
}

impl KeyDeriver {
    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Storage key of the object uploaded as `name`.
    pub fn derive(&self, name: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(self.tenant.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        general_purpose::URL_SAFE.encode(hasher.finalize())
    }

    /// Storage key of the metadata object that accompanies `name`.
    pub fn derive_meta(&self, name: &str) -> String {
        self.derive(&meta_name(name))
    }
}
