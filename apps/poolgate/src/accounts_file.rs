use std::path::Path;

use serde::Deserialize;

/// One provisioned account as the credential provider hands it over: a
/// label and an already-valid bearer credential.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AccountSeed {
    pub(crate) label: String,
    pub(crate) credential: String,
    #[serde(default)]
    pub(crate) disabled: bool,
}

pub(crate) fn load_account_seeds(
    path: &Path,
) -> Result<Vec<AccountSeed>, Box<dyn std::error::Error + Send + Sync>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read accounts file {}: {err}", path.display()))?;
    let seeds: Vec<AccountSeed> = serde_json::from_str(&raw)
        .map_err(|err| format!("invalid accounts file {}: {err}", path.display()))?;
    Ok(seeds)
}
