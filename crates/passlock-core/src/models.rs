//! Wire models for the vault persistence contract.
//!
//! The server stores and forwards every binary field opaquely as standard
//! base64; it never sees plaintext and performs no cryptography.

use chrono::{DateTime, Utc};
use passlock_crypto::kdf::KDF_ALGORITHM;
use passlock_crypto::{EncryptedSecret, KdfParams};
use serde::{Deserialize, Serialize};

pub const UNTITLED_ITEM: &str = "Untitled";
pub const MAX_LISTED_ITEMS: usize = 500;

/// One per vault. Never contains plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMeta {
    pub kdf_algorithm: String,
    pub kdf_params: KdfParams,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub wrapped_vault_key: Vec<u8>,
    #[serde(with = "b64")]
    pub wrap_nonce: Vec<u8>,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupVaultRequest {
    pub kdf_algorithm: String,
    pub kdf_params: KdfParams,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub wrapped_vault_key: Vec<u8>,
    #[serde(with = "b64")]
    pub wrap_nonce: Vec<u8>,
    pub version: u64,
}

/// Re-wrap after a master password change, guarded by `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMetaPatch {
    pub kdf_algorithm: String,
    pub kdf_params: KdfParams,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub wrapped_vault_key: Vec<u8>,
    #[serde(with = "b64")]
    pub wrap_nonce: Vec<u8>,
    pub expected_version: u64,
}

impl SetupVaultRequest {
    pub fn argon2id(params: KdfParams, salt: &[u8], nonce: &[u8], wrapped: &[u8]) -> Self {
        Self {
            kdf_algorithm: KDF_ALGORITHM.to_string(),
            kdf_params: params,
            salt: salt.to_vec(),
            wrapped_vault_key: wrapped.to_vec(),
            wrap_nonce: nonce.to_vec(),
            version: 1,
        }
    }
}

/// Plaintext-visible item metadata, usable for search and listing while locked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub favorite: bool,
}

impl ItemMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Trimmed name (empty becomes "Untitled"); blank optional fields become `None`.
    pub fn normalized(&self) -> Self {
        let name = self.name.trim();
        Self {
            name: if name.is_empty() {
                UNTITLED_ITEM.to_string()
            } else {
                name.to_string()
            },
            username: non_blank(&self.username),
            url: non_blank(&self.url),
            folder: non_blank(&self.folder),
            favorite: self.favorite,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    pub id: String,
    #[serde(flatten)]
    pub meta: ItemMetadata,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultItem {
    pub fn sealed_secret(&self) -> EncryptedSecret {
        EncryptedSecret {
            iv: self.iv.clone(),
            ciphertext: self.ciphertext.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVaultItem {
    #[serde(flatten)]
    pub meta: ItemMetadata,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
}

impl NewVaultItem {
    pub fn new(meta: &ItemMetadata, sealed: EncryptedSecret) -> Self {
        Self {
            meta: meta.normalized(),
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
        }
    }
}

/// Partial update. Absent fields are left untouched by the server; an empty
/// string clears an optional metadata field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub ciphertext: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub iv: Option<Vec<u8>>,
}

impl VaultItemPatch {
    pub fn secret(sealed: EncryptedSecret) -> Self {
        Self {
            ciphertext: Some(sealed.ciphertext),
            iv: Some(sealed.iv),
            ..Self::default()
        }
    }

    /// Sends every metadata field so cleared values reach the server.
    pub fn with_metadata(mut self, meta: &ItemMetadata) -> Self {
        let meta = meta.normalized();
        self.name = Some(meta.name);
        self.username = Some(meta.username.unwrap_or_default());
        self.url = Some(meta.url.unwrap_or_default());
        self.folder = Some(meta.folder.unwrap_or_default());
        self.favorite = Some(meta.favorite);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn touches_secret(&self) -> bool {
        self.ciphertext.is_some() || self.iv.is_some()
    }
}

/// Listing filter. `folder` and `favorite` are applied by the server;
/// `query` is a case-insensitive substring search over the plaintext
/// metadata, applied client-side. Results come back favourites first, then
/// most recently updated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub folder: Option<String>,
    pub favorite: Option<bool>,
    pub query: Option<String>,
}

impl ItemFilter {
    pub fn matches(&self, item: &VaultItem) -> bool {
        let folder_ok = match &self.folder {
            Some(folder) => item.meta.folder.as_deref() == Some(folder.as_str()),
            None => true,
        };
        let favorite_ok = match self.favorite {
            Some(favorite) => item.meta.favorite == favorite,
            None => true,
        };
        folder_ok && favorite_ok && self.matches_query(item)
    }

    /// Blank queries match everything.
    pub fn matches_query(&self, item: &VaultItem) -> bool {
        let needle = match self.query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => q.to_lowercase(),
            _ => return true,
        };
        let meta = &item.meta;
        [
            Some(meta.name.as_str()),
            meta.username.as_deref(),
            meta.url.as_deref(),
            meta.folder.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .contains(&needle)
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(folder) = &self.folder {
            pairs.push(("folder", folder.clone()));
        }
        if let Some(favorite) = self.favorite {
            pairs.push(("favorite", favorite.to_string()));
        }
        pairs
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
    }
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_binary_fields_are_base64() {
        let req = SetupVaultRequest::argon2id(KdfParams::default(), &[0u8; 16], &[1u8; 12], &[2u8; 48]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["kdfAlgorithm"], "argon2id");
        assert_eq!(value["salt"], "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(value["version"], 1);
        assert!(value["wrapNonce"].is_string());
        assert!(value["wrappedVaultKey"].is_string());
    }

    #[test]
    fn item_parses_server_shape() {
        let item: VaultItem = serde_json::from_value(json!({
            "id": "abc",
            "name": "GitHub",
            "username": null,
            "favorite": true,
            "ciphertext": "AQID",
            "iv": "BAUG",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(item.meta.name, "GitHub");
        assert_eq!(item.meta.username, None);
        assert!(item.meta.favorite);
        assert_eq!(item.ciphertext, vec![1, 2, 3]);
        assert_eq!(item.iv, vec![4, 5, 6]);
    }

    #[test]
    fn patch_omits_absent_fields() {
        let patch = VaultItemPatch {
            favorite: Some(true),
            ..VaultItemPatch::default()
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"favorite": true}));
        assert!(VaultItemPatch::default().is_empty());
    }

    #[test]
    fn metadata_normalisation() {
        let meta = ItemMetadata {
            name: "   ".into(),
            username: Some("  ".into()),
            url: Some(" https://example.com ".into()),
            folder: None,
            favorite: false,
        }
        .normalized();
        assert_eq!(meta.name, UNTITLED_ITEM);
        assert_eq!(meta.username, None);
        assert_eq!(meta.url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn filter_query_pairs() {
        let filter = ItemFilter {
            folder: Some("Work".into()),
            favorite: Some(false),
            query: Some("git".into()),
        };
        assert_eq!(
            filter.query_pairs(),
            vec![("folder", "Work".to_string()), ("favorite", "false".to_string())]
        );
    }

    #[test]
    fn query_searches_metadata_case_insensitively() {
        let item: VaultItem = serde_json::from_value(json!({
            "id": "abc",
            "name": "Work mail",
            "username": "Octocat",
            "url": "https://mail.example.com",
            "folder": null,
            "favorite": false,
            "ciphertext": "AQID",
            "iv": "BAUG",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-02T00:00:00Z"
        }))
        .unwrap();
        let search = |q: &str| ItemFilter {
            query: Some(q.into()),
            ..ItemFilter::default()
        };
        assert!(search("OCTO").matches(&item));
        assert!(search(" example.com ").matches(&item));
        assert!(search("mail octo").matches(&item));
        assert!(search("   ").matches(&item));
        assert!(!search("bank").matches(&item));
    }
}
