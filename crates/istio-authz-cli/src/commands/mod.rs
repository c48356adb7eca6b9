//! CLI commands

use std::path::Path;

use istio_common::yaml::parse_yaml_multi;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

pub mod check;
pub mod crds;
pub mod validate;

/// Read a YAML or JSON file into one value per document
pub fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let documents = parse_yaml_multi(&contents)?;
    debug!(path = %path.display(), documents = documents.len(), "Read manifest");
    Ok(documents)
}
