//! Contract table: maps contract ids to the templates that build objects.
//!
//! Every peer must hold the same table, because a Create message carries
//! only the contract id. The table is fixed before a session starts; a
//! missing mapping is a startup error, never a runtime one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use replicast_protocol::{ContractId, NetId, PlayerId, Transform};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Behavior, RegistryError};

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// What a template is told about the object it is building.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnInfo {
    pub net_id: NetId,
    pub contract: ContractId,
    pub owner: PlayerId,
    pub transform: Transform,
}

/// Builds the behaviors of a freshly created object.
///
/// The returned list is the object's complete behavior set: behaviors are
/// registered here, before the object is considered ready, and never added
/// later.
pub trait Template: Send + Sync + 'static {
    fn instantiate(&self, info: &SpawnInfo) -> Vec<Box<dyn Behavior>>;
}

impl<F> Template for F
where
    F: Fn(&SpawnInfo) -> Vec<Box<dyn Behavior>> + Send + Sync + 'static,
{
    fn instantiate(&self, info: &SpawnInfo) -> Vec<Box<dyn Behavior>> {
        self(info)
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// One spawnable contract in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: ContractId,
    pub lookup_key: String,
}

/// The data half of a contract table, loadable from JSON:
///
/// ```json
/// {
///   "player_contract": "tank",
///   "items": [
///     { "id": 0, "lookup_key": "spawner" },
///     { "id": 1, "lookup_key": "enemy" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractManifest {
    /// Lookup key of the template used for player-controlled objects.
    pub player_contract: String,
    #[serde(default)]
    pub items: Vec<ManifestItem>,
}

impl ContractManifest {
    /// Parses and validates a manifest.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads, parses and validates a manifest file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| {
            RegistryError::ManifestIo {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json_str(&json)
    }

    /// The id of the item registered under `lookup_key`.
    pub fn id_for_key(&self, lookup_key: &str) -> Option<ContractId> {
        self.items
            .iter()
            .find(|item| item.lookup_key == lookup_key)
            .map(|item| item.id)
    }

    /// Rejects duplicate ids, empty lookup keys and duplicate lookup keys.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.player_contract.trim().is_empty() {
            return Err(RegistryError::MissingPlayerTemplate(
                self.player_contract.clone(),
            ));
        }
        let mut ids = Vec::with_capacity(self.items.len());
        let mut keys: Vec<&str> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            check_entry(item.id, &item.lookup_key, &ids, &keys)?;
            ids.push(item.id);
            keys.push(&item.lookup_key);
        }
        Ok(())
    }
}

fn check_entry(
    id: ContractId,
    lookup_key: &str,
    ids: &[ContractId],
    keys: &[&str],
) -> Result<(), RegistryError> {
    if id.is_player() || ids.contains(&id) {
        return Err(RegistryError::DuplicateContract(id));
    }
    if lookup_key.trim().is_empty() {
        return Err(RegistryError::EmptyLookupKey(id));
    }
    if keys.contains(&lookup_key) {
        return Err(RegistryError::DuplicateLookupKey(lookup_key.to_owned()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ContractTable
// ---------------------------------------------------------------------------

struct Entry {
    lookup_key: String,
    template: Arc<dyn Template>,
}

/// Contract id → template lookup, plus lookup key → contract id.
///
/// Always has a player template, so [`ContractId::PLAYER`] resolves.
pub struct ContractTable {
    player: Arc<dyn Template>,
    entries: BTreeMap<ContractId, Entry>,
}

impl ContractTable {
    /// A table with only the player template.
    pub fn new(player: impl Template) -> Self {
        Self {
            player: Arc::new(player),
            entries: BTreeMap::new(),
        }
    }

    /// Adds a contract. Fails on a reused id (including the player id),
    /// an empty lookup key or a reused lookup key.
    pub fn with_contract(
        mut self,
        id: ContractId,
        lookup_key: impl Into<String>,
        template: impl Template,
    ) -> Result<Self, RegistryError> {
        self.insert(id, lookup_key.into(), Arc::new(template))?;
        Ok(self)
    }

    /// Binds every manifest item to the template registered under its
    /// lookup key.
    pub fn from_manifest(
        manifest: &ContractManifest,
        templates_by_key: &HashMap<String, Arc<dyn Template>>,
    ) -> Result<Self, RegistryError> {
        manifest.validate()?;
        let player = templates_by_key
            .get(&manifest.player_contract)
            .cloned()
            .ok_or_else(|| {
                RegistryError::MissingPlayerTemplate(manifest.player_contract.clone())
            })?;

        let mut table = Self {
            player,
            entries: BTreeMap::new(),
        };
        for item in &manifest.items {
            let template = templates_by_key
                .get(&item.lookup_key)
                .cloned()
                .ok_or_else(|| RegistryError::MissingTemplate(item.lookup_key.clone()))?;
            table.insert(item.id, item.lookup_key.clone(), template)?;
        }

        info!(
            contracts = table.entries.len(),
            player = %manifest.player_contract,
            "contract table loaded"
        );
        Ok(table)
    }

    fn insert(
        &mut self,
        id: ContractId,
        lookup_key: String,
        template: Arc<dyn Template>,
    ) -> Result<(), RegistryError> {
        let ids: Vec<ContractId> = self.entries.keys().copied().collect();
        let keys: Vec<&str> =
            self.entries.values().map(|e| e.lookup_key.as_str()).collect();
        check_entry(id, &lookup_key, &ids, &keys)?;
        self.entries.insert(id, Entry { lookup_key, template });
        Ok(())
    }

    /// The template for `contract`; [`ContractId::PLAYER`] yields the
    /// player template.
    pub fn template(&self, contract: ContractId) -> Option<&Arc<dyn Template>> {
        if contract.is_player() {
            Some(&self.player)
        } else {
            self.entries.get(&contract).map(|entry| &entry.template)
        }
    }

    /// Resolves a lookup key, e.g. `"enemy"`.
    pub fn id_for_key(&self, lookup_key: &str) -> Option<ContractId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.lookup_key == lookup_key)
            .map(|(id, _)| *id)
    }

    pub fn contains(&self, contract: ContractId) -> bool {
        contract.is_player() || self.entries.contains_key(&contract)
    }

    /// Fails with the first contract id the table cannot build.
    pub fn check_all(
        &self,
        contracts: impl IntoIterator<Item = ContractId>,
    ) -> Result<(), RegistryError> {
        match contracts.into_iter().find(|c| !self.contains(*c)) {
            Some(missing) => Err(RegistryError::UnknownContract(missing)),
            None => Ok(()),
        }
    }

    /// Number of non-player contracts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ContractTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, e)| (id, &e.lookup_key)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(_: &SpawnInfo) -> Vec<Box<dyn Behavior>> {
        Vec::new()
    }

    fn templates(keys: &[&str]) -> HashMap<String, Arc<dyn Template>> {
        keys.iter()
            .map(|k| (k.to_string(), Arc::new(empty) as Arc<dyn Template>))
            .collect()
    }

    const MANIFEST: &str = r#"{
        "player_contract": "tank",
        "items": [
            { "id": 0, "lookup_key": "spawner" },
            { "id": 1, "lookup_key": "enemy" }
        ]
    }"#;

    // =====================================================================
    // ContractManifest
    // =====================================================================

    #[test]
    fn test_manifest_from_json_str_parses_items() {
        let manifest = ContractManifest::from_json_str(MANIFEST).unwrap();
        assert_eq!(manifest.player_contract, "tank");
        assert_eq!(manifest.items.len(), 2);
        assert_eq!(manifest.items[1].id, ContractId(1));
    }

    #[test]
    fn test_manifest_id_for_key() {
        let manifest = ContractManifest::from_json_str(MANIFEST).unwrap();
        assert_eq!(manifest.id_for_key("enemy"), Some(ContractId(1)));
        assert_eq!(manifest.id_for_key("tank"), None);
    }

    #[test]
    fn test_manifest_duplicate_id_is_error() {
        let json = r#"{"player_contract":"p","items":[
            {"id":2,"lookup_key":"a"},{"id":2,"lookup_key":"b"}]}"#;
        assert!(matches!(
            ContractManifest::from_json_str(json),
            Err(RegistryError::DuplicateContract(ContractId(2)))
        ));
    }

    #[test]
    fn test_manifest_empty_lookup_key_is_error() {
        let json = r#"{"player_contract":"p","items":[{"id":2,"lookup_key":" "}]}"#;
        assert!(matches!(
            ContractManifest::from_json_str(json),
            Err(RegistryError::EmptyLookupKey(ContractId(2)))
        ));
    }

    #[test]
    fn test_manifest_duplicate_lookup_key_is_error() {
        let json = r#"{"player_contract":"p","items":[
            {"id":1,"lookup_key":"a"},{"id":2,"lookup_key":"a"}]}"#;
        assert!(matches!(
            ContractManifest::from_json_str(json),
            Err(RegistryError::DuplicateLookupKey(k)) if k == "a"
        ));
    }

    #[test]
    fn test_manifest_player_id_as_item_is_error() {
        let json = r#"{"player_contract":"p","items":[{"id":-1,"lookup_key":"a"}]}"#;
        assert!(ContractManifest::from_json_str(json).is_err());
    }

    #[test]
    fn test_manifest_malformed_json_is_parse_error() {
        assert!(matches!(
            ContractManifest::from_json_str("{ nope"),
            Err(RegistryError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_manifest_missing_file_is_io_error() {
        let result = ContractManifest::from_json_file("/definitely/not/here.json");
        assert!(matches!(result, Err(RegistryError::ManifestIo { .. })));
    }

    // =====================================================================
    // ContractTable
    // =====================================================================

    #[test]
    fn test_from_manifest_binds_templates() {
        let manifest = ContractManifest::from_json_str(MANIFEST).unwrap();
        let table =
            ContractTable::from_manifest(&manifest, &templates(&["tank", "spawner", "enemy"]))
                .unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.template(ContractId::PLAYER).is_some());
        assert!(table.template(ContractId(1)).is_some());
        assert!(table.template(ContractId(9)).is_none());
        assert_eq!(table.id_for_key("enemy"), Some(ContractId(1)));
        assert_eq!(table.id_for_key("boss"), None);
    }

    #[test]
    fn test_from_manifest_missing_template_is_error() {
        let manifest = ContractManifest::from_json_str(MANIFEST).unwrap();
        let result = ContractTable::from_manifest(&manifest, &templates(&["tank", "spawner"]));
        assert!(matches!(result, Err(RegistryError::MissingTemplate(k)) if k == "enemy"));
    }

    #[test]
    fn test_from_manifest_missing_player_template_is_error() {
        let manifest = ContractManifest::from_json_str(MANIFEST).unwrap();
        let result = ContractTable::from_manifest(&manifest, &templates(&["spawner", "enemy"]));
        assert!(matches!(result, Err(RegistryError::MissingPlayerTemplate(_))));
    }

    #[test]
    fn test_with_contract_rejects_duplicates() {
        let table = ContractTable::new(empty)
            .with_contract(ContractId(0), "crate", empty)
            .unwrap();
        assert!(matches!(
            table.with_contract(ContractId(1), "crate", empty),
            Err(RegistryError::DuplicateLookupKey(_))
        ));
    }

    #[test]
    fn test_check_all_reports_unknown_contract() {
        let table = ContractTable::new(empty)
            .with_contract(ContractId(0), "crate", empty)
            .unwrap();
        assert!(table.check_all([ContractId(0), ContractId::PLAYER]).is_ok());
        assert!(matches!(
            table.check_all([ContractId(0), ContractId(4)]),
            Err(RegistryError::UnknownContract(ContractId(4)))
        ));
    }
}
