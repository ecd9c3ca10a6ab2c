//! Error types for the registry layer.

use std::path::PathBuf;

use replicast_protocol::ContractId;

/// Errors raised while building contract tables or managing objects.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The contract manifest file could not be read.
    #[error("cannot read contract manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The contract manifest is not valid JSON for a manifest.
    #[error("cannot parse contract manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    /// Two entries share a contract id.
    #[error("duplicate contract id {0}")]
    DuplicateContract(ContractId),

    /// An entry has an empty lookup key.
    #[error("contract {0} has an empty lookup key")]
    EmptyLookupKey(ContractId),

    /// Two entries share a lookup key.
    #[error("duplicate lookup key {0:?}")]
    DuplicateLookupKey(String),

    /// A manifest entry names a lookup key no template was registered for.
    #[error("no template registered for lookup key {0:?}")]
    MissingTemplate(String),

    /// The player-controlled template is missing.
    #[error("no player template registered (lookup key {0:?})")]
    MissingPlayerTemplate(String),

    /// A contract id that the table does not know.
    #[error("unknown contract {0}")]
    UnknownContract(ContractId),

    /// Spawning is only allowed on the authoritative session.
    #[error("only the server may spawn objects")]
    NotAuthoritative,
}
