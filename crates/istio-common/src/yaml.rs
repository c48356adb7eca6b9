//! YAML loading for Istio manifests
//!
//! Manifests are scanned with yaml-rust2 and converted into `serde_json::Value`
//! so that JSON and YAML input reach the typed resources through one serde
//! path. JSON is valid YAML, so `parse_yaml` accepts both.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Errors from scanning or converting a manifest
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum YamlError {
    /// The input is not well-formed YAML
    #[error("line {line}, column {column}: {message}")]
    Scan {
        /// 1-based line of the offending token
        line: usize,
        /// 0-based column of the offending token
        column: usize,
        /// Scanner message
        message: String,
    },

    /// The YAML is well-formed but has no JSON equivalent
    #[error("document {document} at {path}: {message}")]
    Unsupported {
        /// 0-based index of the document in the stream
        document: usize,
        /// Dotted path to the offending node (`$` for the root)
        path: String,
        /// What cannot be represented
        message: String,
    },
}

/// Parse the first YAML document of `input`.
///
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    match load(input)?.into_iter().next() {
        Some(doc) => Converter::new(0).convert(doc, "$"),
        None => Ok(Value::Null),
    }
}

/// Parse every document of a `---` separated stream.
///
/// Empty documents (a trailing `---`, or a document holding only comments)
/// are dropped.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let mut documents = Vec::new();
    for (index, doc) in load(input)?.into_iter().enumerate() {
        if doc.is_null() {
            continue;
        }
        documents.push(Converter::new(index).convert(doc, "$")?);
    }
    Ok(documents)
}

fn load(input: &str) -> Result<Vec<Yaml>, YamlError> {
    YamlLoader::load_from_str(input).map_err(|e| YamlError::Scan {
        line: e.marker().line(),
        column: e.marker().col(),
        message: e.info().to_string(),
    })
}

struct Converter {
    document: usize,
}

impl Converter {
    fn new(document: usize) -> Self {
        Self { document }
    }

    fn unsupported(&self, path: &str, message: impl Into<String>) -> YamlError {
        YamlError::Unsupported {
            document: self.document,
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn convert(&self, yaml: Yaml, path: &str) -> Result<Value, YamlError> {
        Ok(match yaml {
            Yaml::Null => Value::Null,
            Yaml::Boolean(b) => Value::Bool(b),
            Yaml::Integer(i) => Value::Number(i.into()),
            Yaml::Real(text) => {
                let f: f64 = text
                    .parse()
                    .map_err(|_| self.unsupported(path, format!("invalid number '{}'", text)))?;
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| self.unsupported(path, format!("non-finite number '{}'", text)))?
            }
            Yaml::String(s) => Value::String(s),
            Yaml::Array(items) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.convert(item, &format!("{}[{}]", path, i)))
                    .collect::<Result<_, _>>()?,
            ),
            Yaml::Hash(entries) => {
                let mut object = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.key(key, path)?;
                    let child = format!("{}.{}", path, key);
                    object.insert(key, self.convert(value, &child)?);
                }
                Value::Object(object)
            }
            Yaml::Alias(_) => return Err(self.unsupported(path, "aliases are not supported")),
            Yaml::BadValue => return Err(self.unsupported(path, "bad value")),
        })
    }

    /// JSON object keys are strings. Scalar keys are rendered as text so
    /// that numeric maps such as `portLevelMtls: {8080: ...}` keep working.
    fn key(&self, key: Yaml, path: &str) -> Result<String, YamlError> {
        match key {
            Yaml::String(s) | Yaml::Real(s) => Ok(s),
            Yaml::Integer(i) => Ok(i.to_string()),
            Yaml::Boolean(b) => Ok(b.to_string()),
            Yaml::Null => Ok("null".to_string()),
            _ => Err(self.unsupported(path, "mapping keys must be scalars")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_authorization_policy() {
        let yaml = r#"
apiVersion: security.istio.io/v1beta1
kind: AuthorizationPolicy
metadata:
  name: httpbin
  namespace: foo
spec:
  action: DENY
  rules:
  - from:
    - source:
        namespaces: ["dev"]
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["kind"], "AuthorizationPolicy");
        assert_eq!(result["metadata"]["namespace"], "foo");
        assert_eq!(
            result["spec"]["rules"][0]["from"][0]["source"]["namespaces"][0],
            "dev"
        );
    }

    #[test]
    fn test_json_input_is_accepted() {
        let result = parse_yaml(r#"{"method": "GET", "port": 8080}"#).unwrap();
        assert_eq!(result["method"], "GET");
        assert_eq!(result["port"], 8080);
    }

    #[test]
    fn test_integer_keys_become_strings() {
        let result = parse_yaml("portLevelMtls:\n  8080:\n    mode: DISABLE\n").unwrap();
        assert_eq!(result["portLevelMtls"]["8080"]["mode"], "DISABLE");
    }

    #[test]
    fn test_multi_document_stream_drops_empty_documents() {
        let results = parse_yaml_multi("name: first\n---\n# comment only\n---\nname: second\n---\n")
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["name"], "second");
    }

    #[test]
    fn test_empty_input_is_null() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
        assert!(parse_yaml_multi("").unwrap().is_empty());
    }

    #[test]
    fn test_scan_errors_carry_position() {
        match parse_yaml("spec:\n  hosts: [a, b\n") {
            Err(YamlError::Scan { line, .. }) => assert!(line >= 2),
            other => panic!("expected scan error, got {:?}", other),
        }
    }

    #[test]
    fn test_complex_keys_are_reported_with_path() {
        let yaml = "name: first\n---\nspec:\n  ? [a, b]\n  : value\n";
        let err = parse_yaml_multi(yaml).unwrap_err();
        assert_eq!(
            err,
            YamlError::Unsupported {
                document: 1,
                path: "$.spec".to_string(),
                message: "mapping keys must be scalars".to_string(),
            }
        );
    }

    #[test]
    fn test_floats_convert() {
        let result = parse_yaml("percentage:\n  value: 12.5\n").unwrap();
        assert_eq!(result["percentage"]["value"].as_f64(), Some(12.5));
    }
}
