//! The secrets map: which environment variables the child receives, and
//! where each value comes from.
//!
//! ```yaml
//! DB_HOST: db.internal          # literal
//! DB_PASSWORD: !var prod/db/pw  # provider value
//! TLS_CERT: !var:file prod/cert # provider value, written to a temp file
//! CONFIG: !file "debug: true"   # literal, written to a temp file
//! BANNER: !str "!not a tag"     # literal
//! ```

use super::SummonError;
use serde_yaml::Value;

/// Where one variable's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSpec {
    Literal(String),
    Var(String),
    File(String),
    VarFile(String),
}

impl SecretSpec {
    /// Whether the value is read from a provider.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Var(_) | Self::VarFile(_))
    }

    /// Whether the value is written to a temp file and the path exported.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_) | Self::VarFile(_))
    }
}

fn scalar(name: &str, value: &Value) -> Result<String, SummonError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(SummonError::InvalidEntry {
            name: name.to_string(),
            message: "value must be a scalar".to_string(),
        }),
    }
}

/// Parse a secrets map, keeping its order.
pub fn parse_secrets(content: &str) -> Result<Vec<(String, SecretSpec)>, SummonError> {
    let document: Value =
        serde_yaml::from_str(content).map_err(|e| SummonError::Parse(e.to_string()))?;
    let mapping = match document {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Ok(Vec::new()),
        _ => return Err(SummonError::Parse("secrets map must be a mapping".to_string())),
    };

    let mut secrets = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            Value::String(name) => name,
            other => {
                return Err(SummonError::Parse(format!(
                    "variable names must be strings, found {other:?}"
                )))
            }
        };

        let spec = match &value {
            Value::Tagged(tagged) => {
                let inner = scalar(&name, &tagged.value)?;
                if tagged.tag == "var" {
                    SecretSpec::Var(inner)
                } else if tagged.tag == "var:file" {
                    SecretSpec::VarFile(inner)
                } else if tagged.tag == "file" {
                    SecretSpec::File(inner)
                } else if tagged.tag == "str" {
                    SecretSpec::Literal(inner)
                } else {
                    return Err(SummonError::InvalidEntry {
                        name,
                        message: format!("unknown tag {}", tagged.tag),
                    });
                }
            }
            other => SecretSpec::Literal(scalar(&name, other)?),
        };
        secrets.push((name, spec));
    }
    Ok(secrets)
}
