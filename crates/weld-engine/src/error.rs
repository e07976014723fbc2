//! Error types for the Weld engine.

use thiserror::Error;

use weld_core::{ApiError, EventCategory};

/// Errors raised while populating the field registry.
///
/// All of these are startup-time programming errors; callers are expected
/// to propagate them and abort.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A field with this name is already registered.
    #[error("field '{0}' is already registered")]
    DuplicateField(String),

    /// An alias points at a name that does not resolve to a field.
    #[error("alias '{alias}' targets unknown field '{target}'")]
    UnknownAliasTarget {
        /// The alias being created.
        alias: String,
        /// The missing target name.
        target: String,
    },

    /// No field or alias is registered under this name.
    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Errors raised while compiling developer conditions into an expression.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A regex literal failed to compile.
    #[error("invalid pattern '{pattern}': {source}")]
    BadPattern {
        /// The offending pattern source.
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A bare literal had no canonical field to bind to.
    #[error("no canonical field for bare literal '{literal}' in {category:?} conditions")]
    NoCanonicalField {
        /// The literal that could not be lowered.
        literal: String,
        /// The category the condition was built for.
        category: EventCategory,
    },

    /// Field lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised while evaluating an expression tree.
///
/// These never escape the top-level evaluation entry point: the evaluator
/// logs them and reports a non-match.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A field extractor failed.
    #[error("extractor for field '{field}' failed: {reason}")]
    Extractor {
        /// The field whose extractor failed.
        field: String,
        /// Description of the failure.
        reason: String,
    },

    /// A bot API call made by an extractor failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// An operand had a shape the operator cannot work with.
    #[error("operator {operator} cannot be applied: {reason}")]
    BadOperand {
        /// Name of the operator.
        operator: &'static str,
        /// Description of the mismatch.
        reason: String,
    },
}

/// A schema rejected a candidate value.
///
/// Not an evaluation fault: operators treat this as a non-match.
#[derive(Debug, Clone, Error)]
#[error("schema '{schema}' rejected value: {reason}")]
pub struct SchemaError {
    /// Name of the rejecting schema.
    pub schema: String,
    /// Description of the rejection.
    pub reason: String,
}

/// Errors raised while extracting handler parameters from a dispatch
/// context.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The handler requested a context kind evaluation did not produce.
    #[error("handler requested {0}, but the dispatch context does not carry it")]
    Missing(&'static str),
}

/// Result type for handler-parameter extraction.
pub type ExtractResult<T> = Result<T, ExtractError>;
