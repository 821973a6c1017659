//! `bc-cli config-hash` — loads a layered YAML config stack (§6
//! "Configuration surface": base -> mindset overlay -> environment overlay)
//! and prints its canonical JSON and content hash, for operators diffing
//! two deployments or pinning a config to a run's audit trail.

use anyhow::Result;

pub fn config_hash(paths: Vec<String>) -> Result<()> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = bc_config::load_layered_yaml(&path_refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}
