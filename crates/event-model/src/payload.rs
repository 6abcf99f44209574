//! Payload Field Validation

use crate::error::ValidationError;
use serde_json::{Map, Value};

/// Typed, validating view over an envelope payload.
///
/// Every failure is a [`ValidationError`], which handlers turn into a
/// permanent (non-retried) failure with `?`.
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> PayloadReader<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Fail on the first field in `names` that is absent or null
    pub fn require_fields(&self, names: &[&str]) -> Result<(), ValidationError> {
        match names.iter().find(|name| self.get(name).is_none()) {
            Some(missing) => Err(ValidationError::MissingField((*missing).to_string())),
            None => Ok(()),
        }
    }

    /// Required string field
    pub fn require_str(&self, field: &str) -> Result<&'a str, ValidationError> {
        match self.get(field) {
            Some(value) => value.as_str().ok_or_else(|| ValidationError::InvalidType {
                field: field.to_string(),
                expected: "a string",
            }),
            None => Err(ValidationError::MissingField(field.to_string())),
        }
    }

    /// Required numeric field. Numeric strings are accepted, matching the
    /// lenient parsing producers rely on.
    pub fn require_f64(&self, field: &str) -> Result<f64, ValidationError> {
        match self.get(field) {
            Some(value) => Self::as_number(field, value),
            None => Err(ValidationError::MissingField(field.to_string())),
        }
    }

    /// Optional numeric field; present but malformed is still an error
    pub fn optional_f64(&self, field: &str) -> Result<Option<f64>, ValidationError> {
        self.get(field)
            .map(|value| Self::as_number(field, value))
            .transpose()
    }

    pub fn optional_str(&self, field: &str) -> Option<&'a str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Validate a single value against a range
    pub fn validate_range(
        &self,
        field: &str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), ValidationError> {
        if value < range.0 || value > range.1 || value.is_nan() {
            Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    /// Required numeric field constrained to `range`
    pub fn require_f64_in_range(
        &self,
        field: &str,
        range: (f64, f64),
    ) -> Result<f64, ValidationError> {
        let value = self.require_f64(field)?;
        self.validate_range(field, value, range)?;
        Ok(value)
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.fields.get(field).filter(|value| !value.is_null())
    }

    fn as_number(field: &str, value: &Value) -> Result<f64, ValidationError> {
        match value {
            Value::Number(number) => number.as_f64().ok_or_else(|| ValidationError::InvalidType {
                field: field.to_string(),
                expected: "a finite number",
            }),
            Value::String(text) => text.trim().parse::<f64>().map_err(|_| {
                ValidationError::InvalidFormat(format!("{field} is not numeric: {text:?}"))
            }),
            _ => Err(ValidationError::InvalidType {
                field: field.to_string(),
                expected: "a number",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_fields() {
        let fields = payload(json!({ "resourceId": "node-1", "utilization": 0.82, "capacity": null }));
        let reader = PayloadReader::new(&fields);

        assert!(reader.require_fields(&["resourceId", "utilization"]).is_ok());
        assert_eq!(
            reader.require_fields(&["resourceId", "capacity"]),
            Err(ValidationError::MissingField("capacity".into()))
        );
    }

    #[test]
    fn test_numeric_parsing() {
        let fields = payload(json!({ "cpu": 0.91, "cores": "8", "name": true }));
        let reader = PayloadReader::new(&fields);

        assert_eq!(reader.require_f64("cpu").unwrap(), 0.91);
        assert_eq!(reader.require_f64("cores").unwrap(), 8.0);
        assert!(matches!(
            reader.require_f64("name"),
            Err(ValidationError::InvalidType { .. })
        ));
        assert_eq!(reader.optional_f64("missing").unwrap(), None);
    }

    #[test]
    fn test_range_check() {
        let fields = payload(json!({ "complianceScore": 120.0, "errorRate": 0.02 }));
        let reader = PayloadReader::new(&fields);

        assert!(reader.require_f64_in_range("errorRate", (0.0, 1.0)).is_ok());
        assert!(matches!(
            reader.require_f64_in_range("complianceScore", (0.0, 100.0)),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_require_str() {
        let fields = payload(json!({ "region": "eu-west-1", "zone": 3 }));
        let reader = PayloadReader::new(&fields);

        assert_eq!(reader.require_str("region").unwrap(), "eu-west-1");
        assert!(reader.require_str("zone").is_err());
        assert_eq!(reader.optional_str("zone"), None);
    }
}
