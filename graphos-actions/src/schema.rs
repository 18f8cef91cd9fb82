use std::sync::Arc;

use graphos_core::error::ActionError;

/// Compiled input schema of one action.
#[derive(Clone)]
pub(crate) struct InputValidator {
    validator: Arc<jsonschema::Validator>,
}

impl InputValidator {
    pub(crate) fn compile(schema: &serde_json::Value) -> Result<Self, String> {
        if !schema.is_object() {
            return Err("input_schema must be a JSON object".to_string());
        }
        let validator = jsonschema::validator_for(schema)
            .map_err(|err| format!("input_schema does not compile: {err}"))?;
        Ok(Self {
            validator: Arc::new(validator),
        })
    }

    /// Validate `instance`, reporting every violation in one message.
    pub(crate) fn validate(&self, instance: &serde_json::Value) -> Result<(), ActionError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ActionError::ValidationError(errors.join("; ")))
        }
    }
}
