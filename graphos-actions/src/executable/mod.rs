//! Evaluation of executable nodes.

use std::time::Duration;

use graphos_core::action::ArgMap;

pub mod expression;
mod script_runner;

pub use script_runner::run_python_source;

/// Node property holding the executable's language.
pub const EXECUTABLE_TYPE_PROPERTY: &str = "executable_type";
/// Node property holding the executable's source.
pub const EXECUTABLE_SOURCE_PROPERTY: &str = "executable";

/// Languages an executable node may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutableType {
    Expression,
    Python,
}

impl ExecutableType {
    /// Every accepted `executable_type` value, including aliases.
    pub const ACCEPTED: &'static [&'static str] = &["elixir_code", "expression", "python"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expression => "expression",
            Self::Python => "python",
        }
    }
}

impl TryFrom<&str> for ExecutableType {
    type Error = ExecutableError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "elixir_code" | "expression" => Ok(Self::Expression),
            "python" => Ok(Self::Python),
            other => Err(ExecutableError::UnsupportedType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutableError {
    #[error("unsupported executable type: {0}")]
    UnsupportedType(String),

    #[error("expression_parse_error: {0}")]
    Parse(String),

    #[error("expression_eval_error: {0}")]
    Evaluation(String),

    #[error("script_execution_failed: {0}")]
    ScriptExecution(String),

    #[error("script_timeout: {0}")]
    ScriptTimeout(String),

    #[error("script_invalid_json: {0}")]
    ScriptInvalidOutput(String),
}

/// A checked executable, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Executable {
    Expression(expression::Expr),
    Python(String),
}

impl Executable {
    /// Check `source` against `executable_type`. Expressions are parsed;
    /// scripts only need to be non-empty.
    pub fn compile(executable_type: &str, source: &str) -> Result<Self, ExecutableError> {
        match ExecutableType::try_from(executable_type)? {
            ExecutableType::Expression => expression::parse(source)
                .map(Self::Expression)
                .map_err(ExecutableError::Parse),
            ExecutableType::Python if source.trim().is_empty() => {
                Err(ExecutableError::Parse("python source is empty".to_string()))
            }
            ExecutableType::Python => Ok(Self::Python(source.to_string())),
        }
    }

    pub fn executable_type(&self) -> ExecutableType {
        match self {
            Self::Expression(_) => ExecutableType::Expression,
            Self::Python(_) => ExecutableType::Python,
        }
    }
}

/// Runs executables with the configured limits.
#[derive(Debug, Clone)]
pub struct ExecutableRuntime {
    script_timeout: Duration,
}

impl ExecutableRuntime {
    pub fn new(script_timeout: Duration) -> Self {
        Self { script_timeout }
    }

    pub async fn run(
        &self,
        executable: &Executable,
        context: &ArgMap,
        execution_id: &str,
        node_id: &str,
    ) -> Result<serde_json::Value, ExecutableError> {
        match executable {
            Executable::Expression(expr) => expr.eval(context).map_err(ExecutableError::Evaluation),
            Executable::Python(source) => {
                run_python_source(
                    source,
                    &serde_json::Value::Object(context.clone()),
                    self.script_timeout,
                    execution_id,
                    node_id,
                )
                .await
            }
        }
    }
}
