//! Writes the OpenAPI specification to `openapi.json` in the workspace root.
//!
//! Run with: cargo run --bin gen-openapi -p operas-server

use std::fs;
use std::path::PathBuf;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let json = operas_server::api::get_openapi_json().context("Failed to serialize OpenAPI spec")?;

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .context("Could not find workspace root")?;
    let output_path = workspace_root.join("openapi.json");

    fs::write(&output_path, &json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    let spec: serde_json::Value = serde_json::from_str(&json)?;
    let paths = spec["paths"].as_object().map_or(0, serde_json::Map::len);
    let schemas = spec["components"]["schemas"]
        .as_object()
        .map_or(0, serde_json::Map::len);

    println!("Written to: {}", output_path.display());
    println!("Paths: {paths}, schemas: {schemas}");
    Ok(())
}
