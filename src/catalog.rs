//! Box metadata catalog: maps a box type (plus optional extended type) to
//! descriptive metadata. The catalog is an immutable value injected into the
//! pipeline at session start; tests substitute fixture catalogs freely.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::boxes::{BoxHeader, BoxKey, FourCC};

/// Descriptive metadata for one box type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxDescriptor {
    pub identifier: BoxKey,
    pub name: String,
    pub summary: String,
    pub specification: Option<String>,
    /// Expected FullBox version, when the specification pins one.
    pub version: Option<u8>,
    /// Expected FullBox flags, when the specification pins them.
    pub flags: Option<u32>,
}

/// Immutable catalog with lookup by four-character code or extended type.
#[derive(Debug, Default)]
pub struct BoxCatalog {
    by_type: HashMap<FourCC, BoxDescriptor>,
    by_extended_type: HashMap<[u8; 16], BoxDescriptor>,
}

impl BoxCatalog {
    pub fn from_entries(entries: Vec<BoxDescriptor>) -> Self {
        let mut by_type = HashMap::new();
        let mut by_extended_type = HashMap::new();
        for descriptor in entries {
            match descriptor.identifier {
                BoxKey::Uuid(uuid) => {
                    by_extended_type.insert(uuid, descriptor);
                }
                BoxKey::FourCC(cc) => {
                    by_type.insert(cc, descriptor);
                }
            }
        }
        Self { by_type, by_extended_type }
    }

    /// Parse the JSON registry format. Malformed entries are logged and
    /// skipped rather than failing the whole load.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let registry: RegistryFile = serde_json::from_str(json)?;
        let entries = registry
            .boxes
            .into_iter()
            .filter_map(|entry| match entry.into_descriptor() {
                Ok(d) => Some(d),
                Err(reason) => {
                    tracing::warn!(%reason, "skipping malformed catalog entry");
                    None
                }
            })
            .collect();
        Ok(Self::from_entries(entries))
    }

    /// Catalog bundled with the crate, parsed once and shared.
    pub fn bundled() -> Arc<BoxCatalog> {
        static BUNDLED: OnceLock<Arc<BoxCatalog>> = OnceLock::new();
        BUNDLED
            .get_or_init(|| {
                Arc::new(BoxCatalog::from_json(include_str!("../assets/boxes.json")).unwrap_or_else(
                    |e| {
                        tracing::error!(error = %e, "failed to parse bundled box catalog");
                        BoxCatalog::default()
                    },
                ))
            })
            .clone()
    }

    /// Look up the descriptor for a type code, preferring an extended-type
    /// match when one is given.
    pub fn lookup(&self, typ: FourCC, extended: Option<&[u8; 16]>) -> Option<&BoxDescriptor> {
        if let Some(uuid) = extended {
            if let Some(descriptor) = self.by_extended_type.get(uuid) {
                return Some(descriptor);
            }
        }
        self.by_type.get(&typ)
    }

    pub fn descriptor_for(&self, header: &BoxHeader) -> Option<&BoxDescriptor> {
        self.lookup(header.typ, header.uuid.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_extended_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    boxes: Vec<RegistryEntry>,
}

#[derive(Deserialize)]
struct RegistryEntry {
    #[serde(rename = "type")]
    typ: String,
    uuid: Option<String>,
    name: String,
    summary: String,
    specification: Option<String>,
    version: Option<u8>,
    /// Hexadecimal string, e.g. `"000001"`.
    flags: Option<String>,
}

impl RegistryEntry {
    fn into_descriptor(self) -> Result<BoxDescriptor, String> {
        let cc = FourCC::from_str(&self.typ)
            .ok_or_else(|| format!("type {:?} is not four characters", self.typ))?;
        let identifier = match &self.uuid {
            Some(hex_str) => {
                let bytes = hex::decode(hex_str)
                    .map_err(|e| format!("uuid {hex_str:?}: {e}"))?;
                let uuid: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| format!("uuid {hex_str:?} is not 16 bytes"))?;
                BoxKey::Uuid(uuid)
            }
            None => BoxKey::FourCC(cc),
        };
        let flags = self
            .flags
            .map(|s| u32::from_str_radix(&s, 16).map_err(|e| format!("flags {s:?}: {e}")))
            .transpose()?;
        Ok(BoxDescriptor {
            identifier,
            name: self.name,
            summary: self.summary,
            specification: self.specification,
            version: self.version,
            flags,
        })
    }
}
