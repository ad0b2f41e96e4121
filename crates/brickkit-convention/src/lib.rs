//! # brickkit-convention
//!
//! The convention engine: organizational standards layered onto a
//! declared resource tree.
//!
//! - **Defaults**: tags and ownership filled in when absent
//! - **Required tags**: validated after defaults, with allowed values
//! - **Naming**: pattern-based name generation and validation
//! - **Rules**: a registry of named governance rules (built-in + custom)
//! - **Documents**: strict YAML schema for convention files
//!
//! Application is idempotent and deterministic: applying the same
//! convention twice changes nothing, and validation of the same tree
//! always yields the same report.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod convention;
pub mod document;
pub mod naming;
pub mod rules;

pub use convention::{
    AbacPolicyTemplate, Convention, OwnershipSpec, RequiredTag, RuleViolation, TagDefault,
    ValidationReport,
};
pub use document::ConventionDocument;
pub use naming::NamingSpec;
pub use rules::{RuleContext, RuleFn, RuleMode, RuleParams, RuleSpec, RulesRegistry};
