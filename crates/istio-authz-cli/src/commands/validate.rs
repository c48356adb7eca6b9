//! Validate command

use std::path::PathBuf;

use clap::Args;
use istio_authz::CompiledPolicy;
use istio_common::crd::IstioResource;
use serde_json::Value;

use super::read_documents;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Manifest files (YAML or JSON, multi-document allowed)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let mut errors = Vec::new();

    for file in &args.files {
        for (i, document) in read_documents(file)?.into_iter().enumerate() {
            let location = format!("{}[{}]", file.display(), i);
            match validate_document(document) {
                Ok(description) => println!("  {} {} valid", location, description),
                Err(e) => errors.push(format!("{}: {}", location, e)),
            }
        }
    }

    println!();
    if errors.is_empty() {
        println!("All validations passed");
        Ok(())
    } else {
        println!("Validation errors:");
        for error in &errors {
            println!("  - {}", error);
        }
        Err(Error::validation(format!(
            "{} invalid documents",
            errors.len()
        )))
    }
}

/// Decode and validate one document, returning `Kind namespace/name`
fn validate_document(document: Value) -> Result<String> {
    let resource = IstioResource::from_value(document)?;
    resource.validate()?;
    if let Some(policy) = resource.as_authorization_policy() {
        CompiledPolicy::compile(policy)?;
    }
    Ok(format!("{} {}", resource.kind(), resource.name()))
}
