//! Schema definition, normalization and validation.
//!
//! A [`RecordSchema`] describes the single flat record shape the table holds.
//! Records are normalized (trimmed and coerced to the declared types) before
//! they are validated, and both steps run before every remote write.

use crate::{error::Result, Error, Fields, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Number => write!(f, "Number"),
        }
    }
}

/// Definition of a field in the record schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether the field must be non-empty
    pub required: bool,
    /// Inclusive lower bound for numeric fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Value given to the field in a freshly added row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            min: None,
            max: None,
            default: None,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Restrict a numeric field to an inclusive range.
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the value used for new rows.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The type's empty value: `""` for strings, `null` for numbers.
    pub fn empty_value(&self) -> Value {
        match self.field_type {
            FieldType::String => Value::String(String::new()),
            FieldType::Number => Value::Null,
        }
    }

    /// Coerce a raw value to this field's type.
    pub fn normalize(&self, value: Option<&Value>) -> Value {
        match self.field_type {
            FieldType::String => normalize_string(value),
            FieldType::Number => normalize_number(value),
        }
    }

    /// Validate an already normalized value against this definition.
    pub fn check(&self, value: &Value) -> Result<()> {
        if self.required && is_empty(value) {
            return Err(Error::MissingRequiredField(self.name.clone()));
        }

        if let Some(n) = value.as_f64() {
            let below = self.min.is_some_and(|min| n < min);
            let above = self.max.is_some_and(|max| n > max);
            if below || above {
                return Err(Error::OutOfRange {
                    field: self.name.clone(),
                    value: n,
                    min: self.min,
                    max: self.max,
                });
            }
        }

        Ok(())
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn normalize_string(value: Option<&Value>) -> Value {
    let text = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        // Null, missing and non-scalar values
        _ => String::new(),
    };
    Value::String(text)
}

fn normalize_number(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Number(n)) => canonical_number(n),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(number_from_f64)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn canonical_number(n: &Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n.clone());
    }
    n.as_f64().and_then(number_from_f64).unwrap_or(Value::Null)
}

fn number_from_f64(f: f64) -> Option<Value> {
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        return Some(Value::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number)
}

/// Schema for the synchronized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSchema {
    /// Field definitions, in column order
    pub fields: Vec<FieldDef>,
}

impl RecordSchema {
    /// Create a new schema.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// The five-column people table: name, age, city, food, color.
    pub fn people() -> Self {
        Self::new(vec![
            FieldDef::required("name", FieldType::String).with_default("New Person"),
            FieldDef::optional("age", FieldType::Number).with_range(Some(0.0), Some(150.0)),
            FieldDef::optional("city", FieldType::String),
            FieldDef::optional("food", FieldType::String),
            FieldDef::optional("color", FieldType::String),
        ])
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field values for a freshly added row.
    pub fn draft(&self) -> Fields {
        self.fields
            .iter()
            .map(|f| {
                let value = f.default.clone().unwrap_or_else(|| f.empty_value());
                (f.name.clone(), value)
            })
            .collect()
    }

    /// Normalize every declared field; undeclared fields are dropped.
    pub fn normalize_fields(&self, fields: &Fields) -> Fields {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.normalize(fields.get(&f.name))))
            .collect()
    }

    /// Normalize only the declared fields present in `fields`.
    pub fn normalize_partial(&self, fields: &Fields) -> Fields {
        self.fields
            .iter()
            .filter(|f| fields.contains_key(&f.name))
            .map(|f| (f.name.clone(), f.normalize(fields.get(&f.name))))
            .collect()
    }

    /// Normalize a record. The identity is left untouched.
    pub fn normalize(&self, record: &Record) -> Record {
        Record::new(record.id.clone(), self.normalize_fields(&record.fields))
    }

    /// Validate a set of field values, reporting the first failure.
    pub fn check_fields(&self, fields: &Fields) -> Result<()> {
        let normalized = self.normalize_fields(fields);
        for field in &self.fields {
            let value = normalized.get(&field.name).unwrap_or(&Value::Null);
            field.check(value)?;
        }
        Ok(())
    }

    /// Validate a record, reporting the first failure.
    pub fn check(&self, record: &Record) -> Result<()> {
        self.check_fields(&record.fields)
    }

    /// Whether a record may be written remotely.
    pub fn validate(&self, record: &Record) -> bool {
        self.check(record).is_ok()
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::people()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identity;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::new(1, serde_json::from_value(value).unwrap())
    }

    #[test]
    fn validation_gating() {
        let schema = RecordSchema::people();

        assert!(!schema.validate(&record(json!({"name": "", "age": 30}))));
        assert!(!schema.validate(&record(json!({"name": "Bob", "age": 200}))));
        assert!(schema.validate(&record(json!({"name": "Bob", "age": 30}))));
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = RecordSchema::people();

        let result = schema.check(&record(json!({"age": 30})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));

        // whitespace normalizes to empty
        let result = schema.check(&record(json!({"name": "   "})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn validate_range_bounds_inclusive() {
        let schema = RecordSchema::people();

        assert!(schema.validate(&record(json!({"name": "A", "age": 0}))));
        assert!(schema.validate(&record(json!({"name": "A", "age": 150}))));
        assert!(!schema.validate(&record(json!({"name": "A", "age": -1}))));
        assert!(!schema.validate(&record(json!({"name": "A", "age": 150.5}))));

        let result = schema.check(&record(json!({"name": "A", "age": "151"})));
        assert!(matches!(result, Err(Error::OutOfRange { field, .. }) if field == "age"));
    }

    #[test]
    fn absent_numeric_passes() {
        let schema = RecordSchema::people();
        assert!(schema.validate(&record(json!({"name": "A", "age": null}))));
        assert!(schema.validate(&record(json!({"name": "A"}))));
        // unparseable input coerces to null
        assert!(schema.validate(&record(json!({"name": "A", "age": "old"}))));
    }

    #[test]
    fn normalize_fills_and_coerces() {
        let schema = RecordSchema::people();
        let raw = Record::new(
            Identity::temporary(2),
            serde_json::from_value(json!({
                "name": "  Carl ",
                "age": " 42 ",
                "food": 7,
                "extra": "dropped"
            }))
            .unwrap(),
        );

        let normalized = schema.normalize(&raw);

        assert_eq!(normalized.id, Identity::temporary(2));
        assert_eq!(
            serde_json::to_value(&normalized.fields).unwrap(),
            json!({
                "name": "Carl",
                "age": 42,
                "city": "",
                "food": "7",
                "color": ""
            })
        );
    }

    #[test]
    fn normalize_numbers() {
        let age = FieldDef::optional("age", FieldType::Number);

        assert_eq!(age.normalize(Some(&json!(30.0))), json!(30));
        assert_eq!(age.normalize(Some(&json!(30.5))), json!(30.5));
        assert_eq!(age.normalize(Some(&json!("12.25"))), json!(12.25));
        assert_eq!(age.normalize(Some(&json!(""))), Value::Null);
        assert_eq!(age.normalize(Some(&json!(true))), Value::Null);
        assert_eq!(age.normalize(None), Value::Null);
    }

    #[test]
    fn normalize_partial_keeps_only_present() {
        let schema = RecordSchema::people();
        let fields: Fields = serde_json::from_value(json!({"city": " Rome ", "x": 1})).unwrap();

        let partial = schema.normalize_partial(&fields);
        assert_eq!(serde_json::to_value(&partial).unwrap(), json!({"city": "Rome"}));
    }

    #[test]
    fn draft_defaults() {
        let draft = RecordSchema::people().draft();
        assert_eq!(
            serde_json::to_value(&draft).unwrap(),
            json!({
                "name": "New Person",
                "age": null,
                "city": "",
                "food": "",
                "color": ""
            })
        );
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Number.to_string(), "Number");
    }

    #[test]
    fn schema_serialization() {
        let schema = RecordSchema::people();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: RecordSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                (-1e6f64..1e6).prop_map(Value::from),
                ".{0,12}".prop_map(Value::from),
            ]
        }

        proptest! {
            #[test]
            fn prop_normalize_is_idempotent(
                name in arb_value(),
                age in arb_value(),
                city in arb_value(),
            ) {
                let schema = RecordSchema::people();
                let mut fields = Fields::new();
                fields.insert("name".into(), name);
                fields.insert("age".into(), age);
                fields.insert("city".into(), city);
                let raw = Record::new(1, fields);

                let once = schema.normalize(&raw);
                let twice = schema.normalize(&once);
                prop_assert_eq!(&once, &twice);
                prop_assert_eq!(schema.validate(&raw), schema.validate(&once));
            }
        }
    }
}
