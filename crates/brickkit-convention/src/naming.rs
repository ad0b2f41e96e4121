//! Name generation and validation from naming patterns.
//!
//! Patterns combine literal text with placeholders drawn from a named
//! parameter context:
//!
//! - `{env}` — current environment suffix (`dev`, `acc`, `prd`)
//! - `{team}` / `{product}` — values from the naming configuration
//! - `{acronym}` — the securable type's short acronym (`cat`, `sch`, …)
//! - `{name}` — the base name supplied at generation time
//!
//! A pattern may also carry a validation regex used in validation-only
//! mode, where names are checked but never generated.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use brickkit_core::{Environment, Error, Result, SecurableType};

/// Naming configuration of a convention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingSpec {
    /// Name template with placeholders.
    pub pattern: String,
    /// Value for the `{team}` placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Value for the `{product}` placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Securable types the pattern applies to; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
    /// Optional regex for validation-only mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_pattern: Option<String>,
}

impl NamingSpec {
    /// Returns true when this naming configuration applies to the type.
    #[must_use]
    pub fn applies_to(&self, securable_type: SecurableType) -> bool {
        self.applies_to
            .as_ref()
            .is_none_or(|set| set.contains(&securable_type))
    }

    /// Substitutes placeholders to generate a name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the pattern references a
    /// placeholder with no value, or contains an unknown placeholder.
    pub fn generate_name(
        &self,
        securable_type: SecurableType,
        base_name: &str,
        env: Environment,
    ) -> Result<String> {
        let mut output = String::with_capacity(self.pattern.len() + base_name.len());
        let mut rest = self.pattern.as_str();
        while let Some(start) = rest.find('{') {
            output.push_str(&rest[..start]);
            let Some(end) = rest[start..].find('}') else {
                return Err(Error::validation(
                    "naming_pattern",
                    base_name,
                    format!("unterminated placeholder in pattern '{}'", self.pattern),
                ));
            };
            let placeholder = &rest[start + 1..start + end];
            match placeholder {
                "env" => output.push_str(env.suffix()),
                "acronym" => output.push_str(securable_type.acronym()),
                "name" => output.push_str(base_name),
                "team" => match &self.team {
                    Some(team) => output.push_str(team),
                    None => {
                        return Err(Error::validation(
                            "naming_pattern",
                            base_name,
                            "pattern uses {team} but no team is configured",
                        ));
                    }
                },
                "product" => match &self.product {
                    Some(product) => output.push_str(product),
                    None => {
                        return Err(Error::validation(
                            "naming_pattern",
                            base_name,
                            "pattern uses {product} but no product is configured",
                        ));
                    }
                },
                other => {
                    return Err(Error::validation(
                        "naming_pattern",
                        base_name,
                        format!("unknown placeholder '{{{other}}}'"),
                    ));
                }
            }
            rest = &rest[start + end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }

    /// Validates a name against the validation regex, when configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the configured regex itself does
    /// not compile.
    pub fn validate_name(&self, name: &str) -> Result<bool> {
        let Some(pattern) = &self.validation_pattern else {
            return Ok(true);
        };
        let regex = Regex::new(pattern).map_err(|e| {
            Error::validation(
                "naming_pattern",
                name,
                format!("invalid validation regex '{pattern}': {e}"),
            )
        })?;
        Ok(regex.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_names_from_placeholders() {
        let spec = NamingSpec {
            pattern: "{env}_{team}_{acronym}_{name}".into(),
            team: Some("quant".into()),
            product: None,
            applies_to: None,
            validation_pattern: None,
        };
        let name = spec
            .generate_name(SecurableType::Catalog, "risk", Environment::Prd)
            .unwrap();
        assert_eq!(name, "prd_quant_cat_risk");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let spec = NamingSpec {
            pattern: "{product}_{name}".into(),
            ..NamingSpec::default()
        };
        assert!(spec
            .generate_name(SecurableType::Schema, "reports", Environment::Dev)
            .is_err());
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let spec = NamingSpec {
            pattern: "{region}_{name}".into(),
            ..NamingSpec::default()
        };
        assert!(spec
            .generate_name(SecurableType::Schema, "reports", Environment::Dev)
            .is_err());
    }

    #[test]
    fn validation_regex_checks_names() {
        let spec = NamingSpec {
            pattern: String::new(),
            validation_pattern: Some(r"^[a-z][a-z0-9_]*$".into()),
            ..NamingSpec::default()
        };
        assert!(spec.validate_name("analytics_dev").unwrap());
        assert!(!spec.validate_name("Analytics-Dev").unwrap());
    }
}
