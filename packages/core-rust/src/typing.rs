//! Type registry used to reconstruct typed values from raw payloads.
//!
//! Payload values arrive as untyped JSON-like trees. Before they are handed
//! to application callbacks they are passed through
//! [`TypeRegistry::augment_types`], which consults the registry for the
//! declared type (or the `_typeName` tag carried by the value) and applies
//! the registered constructor. The registry is an explicit instance that is
//! shared with the components that need it; there is no process-wide table.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Field carrying the type name of a structured value.
pub const TYPE_NAME_FIELD: &str = "_typeName";

/// Constructor applied to raw values of a registered struct type.
pub type TypeConstructor = Arc<dyn Fn(Value) -> Result<Value, TypingError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypingError {
    #[error("value is tagged with unregistered type {type_name}")]
    UnknownType { type_name: String },
    #[error("{literal:?} is not a literal of enumeration {type_name}")]
    InvalidEnumLiteral { type_name: String, literal: String },
    #[error("cannot construct {type_name}: {reason}")]
    Construction { type_name: String, reason: String },
}

enum TypeEntry {
    Struct(TypeConstructor),
    Enumeration(BTreeSet<String>),
}

/// Registry of struct and enumeration types known to this runtime.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, TypeEntry>>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types = self.types.read();
        let mut names: Vec<&String> = types.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a struct type whose instances are tagged with their
    /// type name when augmented.
    pub fn register_struct(&self, type_name: impl Into<String>) {
        let type_name = type_name.into();
        let tag = type_name.clone();
        self.register_struct_with(
            type_name,
            Arc::new(move |value| match value {
                Value::Object(mut fields) => {
                    fields
                        .entry(TYPE_NAME_FIELD)
                        .or_insert_with(|| Value::String(tag.clone()));
                    Ok(Value::Object(fields))
                }
                other => Err(TypingError::Construction {
                    type_name: tag.clone(),
                    reason: format!("expected an object, got {other}"),
                }),
            }),
        );
    }

    /// Registers a struct type with a custom constructor. Re-registering a
    /// name replaces the previous entry.
    pub fn register_struct_with(&self, type_name: impl Into<String>, constructor: TypeConstructor) {
        self.insert(type_name.into(), TypeEntry::Struct(constructor));
    }

    pub fn register_enum<I, S>(&self, type_name: impl Into<String>, literals: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let literals = literals.into_iter().map(Into::into).collect();
        self.insert(type_name.into(), TypeEntry::Enumeration(literals));
    }

    fn insert(&self, type_name: String, entry: TypeEntry) {
        let mut types = self.types.write();
        if types.contains_key(&type_name) {
            debug!(type_name = %type_name, "replacing type registration");
        }
        types.insert(type_name, entry);
    }

    #[must_use]
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.read().contains_key(type_name)
    }

    /// Reconstructs a typed value from `raw`.
    ///
    /// `declared_type` is the type name the receiver expects (for example an
    /// attribute type or an output parameter type); a trailing `[]` declares
    /// an array of that element type. A `_typeName` tag inside an object takes
    /// precedence over the declared type. Values of unregistered declared
    /// types (including primitives such as `String`) pass through unchanged.
    ///
    /// # Errors
    ///
    /// Fails if an object is tagged with an unregistered type, if a string is
    /// not a literal of its declared enumeration, or if a constructor fails.
    pub fn augment_types(&self, raw: Value, declared_type: Option<&str>) -> Result<Value, TypingError> {
        match raw {
            Value::Array(items) => {
                let element_type = declared_type.and_then(|t| t.strip_suffix("[]"));
                items
                    .into_iter()
                    .map(|item| self.augment_types(item, element_type))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Value::Object(fields) => self.augment_object(fields, declared_type),
            Value::String(literal) => {
                if let Some(type_name) = declared_type {
                    if let Some(TypeEntry::Enumeration(literals)) = self.types.read().get(type_name) {
                        if !literals.contains(&literal) {
                            return Err(TypingError::InvalidEnumLiteral {
                                type_name: type_name.to_string(),
                                literal,
                            });
                        }
                    }
                }
                Ok(Value::String(literal))
            }
            other => Ok(other),
        }
    }

    fn augment_object(
        &self,
        fields: serde_json::Map<String, Value>,
        declared_type: Option<&str>,
    ) -> Result<Value, TypingError> {
        let tagged = fields
            .get(TYPE_NAME_FIELD)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let Some(type_name) = tagged.clone().or_else(|| declared_type.map(str::to_owned)) else {
            return Ok(Value::Object(fields));
        };

        // Clone the constructor out so it runs without the lock held; it may
        // call back into the registry for nested values.
        let constructor = match self.types.read().get(&type_name) {
            Some(TypeEntry::Struct(constructor)) => Some(Arc::clone(constructor)),
            Some(TypeEntry::Enumeration(_)) => {
                return Err(TypingError::Construction {
                    type_name,
                    reason: "enumeration values must be strings".to_string(),
                })
            }
            None => None,
        };

        match constructor {
            Some(constructor) => constructor(Value::Object(fields)),
            None if tagged.is_some() => Err(TypingError::UnknownType { type_name }),
            None => Ok(Value::Object(fields)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register_struct("vehicle.RadioStation");
        registry.register_enum("vehicle.Country", ["DE", "US", "AT"]);
        registry
    }

    #[test]
    fn primitives_pass_through() {
        let registry = registry();
        assert_eq!(registry.augment_types(json!(42), Some("Integer")).unwrap(), json!(42));
        assert_eq!(registry.augment_types(json!("x"), Some("String")).unwrap(), json!("x"));
        assert_eq!(registry.augment_types(Value::Null, None).unwrap(), Value::Null);
    }

    #[test]
    fn declared_struct_gets_tagged() {
        let value = registry()
            .augment_types(json!({"name": "Radio Jazz"}), Some("vehicle.RadioStation"))
            .unwrap();
        assert_eq!(value[TYPE_NAME_FIELD], "vehicle.RadioStation");
        assert_eq!(value["name"], "Radio Jazz");
    }

    #[test]
    fn array_declaration_applies_to_elements() {
        let value = registry()
            .augment_types(json!([{"name": "a"}, {"name": "b"}]), Some("vehicle.RadioStation[]"))
            .unwrap();
        assert_eq!(value[0][TYPE_NAME_FIELD], "vehicle.RadioStation");
        assert_eq!(value[1][TYPE_NAME_FIELD], "vehicle.RadioStation");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = registry()
            .augment_types(json!({"_typeName": "vehicle.Unknown"}), None)
            .unwrap_err();
        assert_eq!(
            err,
            TypingError::UnknownType {
                type_name: "vehicle.Unknown".to_string()
            }
        );
    }

    #[test]
    fn untagged_object_of_unregistered_type_passes_through() {
        let raw = json!({"a": 1});
        assert_eq!(registry().augment_types(raw.clone(), Some("Map")).unwrap(), raw);
    }

    #[test]
    fn enum_literals_are_checked() {
        let registry = registry();
        assert_eq!(
            registry.augment_types(json!("DE"), Some("vehicle.Country")).unwrap(),
            json!("DE")
        );
        assert!(matches!(
            registry.augment_types(json!("XX"), Some("vehicle.Country")),
            Err(TypingError::InvalidEnumLiteral { .. })
        ));
    }

    #[test]
    fn custom_constructor_runs_without_lock() {
        let registry = Arc::new(registry());
        let inner = Arc::clone(&registry);
        registry.register_struct_with(
            "vehicle.Preset",
            Arc::new(move |value| {
                let station = inner.augment_types(value["station"].clone(), Some("vehicle.RadioStation"))?;
                Ok(json!({ "_typeName": "vehicle.Preset", "station": station }))
            }),
        );
        let value = registry
            .augment_types(json!({"station": {"name": "x"}}), Some("vehicle.Preset"))
            .unwrap();
        assert_eq!(value["station"][TYPE_NAME_FIELD], "vehicle.RadioStation");
    }
}
