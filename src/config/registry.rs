//! Field registry: which configuration fields can be overridden remotely,
//! and how each one resolves.
//!
//! # Responsibilities
//! - Describe every overridable field of a configuration structure through a
//!   static descriptor table (`Configurable::fields`)
//! - Build the flat `Envs` registry from that table
//! - Hold one generation of resolved values (`Envs`) and compare generations
//!
//! # Design Decisions
//! - Descriptor tables are hand-written per structure; no runtime reflection
//! - Names never change after the registry is built; only values do
//! - `Envs` is ordered by name so iteration and change lists are deterministic

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::config::value::RawValue;

/// Errors raised while building a registry or assigning a field.
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    /// The descriptor table of a configuration structure is malformed.
    #[error("invalid configuration shape: {0}")]
    InvalidShape(String),

    /// No field with this name exists in the registry.
    #[error("unknown field \"{0}\"")]
    UnknownField(String),

    /// The value to assign is empty.
    #[error("empty value for field \"{0}\"")]
    EmptyValue(String),

    /// The value cannot be converted to the field's type.
    #[error("cannot use {found:?} as {expected}")]
    TypeMismatch { expected: &'static str, found: String },
}

/// Which namespace of the distributed store a field resolves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Shared by every service on the stand.
    Global,
    /// Scoped to this service.
    Local,
    /// Derived from service discovery, never set directly.
    Discovery,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Global => f.write_str("global"),
            Classification::Local => f.write_str("local"),
            Classification::Discovery => f.write_str("discovery"),
        }
    }
}

/// One row of a configuration structure's descriptor table.
pub struct FieldSpec<C> {
    pub name: &'static str,
    pub classification: Classification,
    pub secret: bool,
    /// Companion address-list field filled by resolving this field's value
    /// as a service name.
    pub discovery: Option<&'static str>,
    pub get: fn(&C) -> RawValue,
    pub set: fn(&mut C, RawValue) -> Result<(), FieldError>,
}

impl<C> FieldSpec<C> {
    pub const fn global(mut self) -> Self {
        self.classification = Classification::Global;
        self
    }

    pub const fn discovery(mut self) -> Self {
        self.classification = Classification::Discovery;
        self
    }

    pub const fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub const fn discovers(mut self, companion: &'static str) -> Self {
        self.discovery = Some(companion);
        self
    }
}

impl<C> fmt::Debug for FieldSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("classification", &self.classification)
            .field("secret", &self.secret)
            .field("discovery", &self.discovery)
            .finish()
    }
}

/// Declares a `FieldSpec` bound to a field path of the given structure.
///
/// ```ignore
/// field!(AppConfig, "REDIS_DB_INDEX", local.redis.db_index)
/// ```
#[macro_export]
macro_rules! field {
    ($cfg:ty, $name:literal, $($path:ident).+) => {
        $crate::config::registry::FieldSpec::<$cfg> {
            name: $name,
            classification: $crate::config::registry::Classification::Local,
            secret: false,
            discovery: None,
            get: |c: &$cfg| $crate::config::value::RawValue::from(c.$($path).+.clone()),
            set: |c: &mut $cfg, raw: $crate::config::value::RawValue| {
                c.$($path).+ = $crate::config::value::Coerce::coerce(raw)?;
                Ok(())
            },
        }
    };
}

/// A configuration structure whose fields can be resolved by name.
pub trait Configurable: Clone + Send + Sync + 'static {
    /// Descriptor table, one entry per overridable field.
    fn fields() -> &'static [FieldSpec<Self>];

    /// Semantic validation; reports every failure.
    fn validate(&self) -> Result<(), Vec<ValidationError>>;

    /// Service identity used to scope the distributed store.
    fn service_name(&self) -> &str;

    /// Deployment stand; `local` marks a developer machine.
    fn stand_name(&self) -> &str;

    fn field_spec(name: &str) -> Option<&'static FieldSpec<Self>> {
        Self::fields().iter().find(|spec| spec.name == name)
    }
}

/// Metadata and resolved values of a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub classification: Classification,
    pub is_secret: bool,
    pub is_structured: bool,
    pub discovery_link: Option<String>,
    /// Override fetched from the distributed store.
    pub value: Option<RawValue>,
    /// Value obtained through the secret store; authoritative when set.
    pub external_value: Option<RawValue>,
}

impl FieldDescriptor {
    /// The value that should be applied to the configuration.
    pub fn effective_value(&self) -> Option<&RawValue> {
        if self.is_secret {
            self.external_value.as_ref()
        } else {
            self.value.as_ref()
        }
    }

    fn cleared(&self) -> Self {
        Self {
            value: None,
            external_value: None,
            ..self.clone()
        }
    }
}

/// One generation of remote configuration state, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envs {
    fields: BTreeMap<String, FieldDescriptor>,
}

impl Envs {
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldDescriptor> {
        self.fields.iter()
    }

    pub fn effective_value(&self, name: &str) -> Option<&RawValue> {
        self.fields.get(name).and_then(FieldDescriptor::effective_value)
    }

    /// Sets the override value; returns `false` for unknown names.
    pub fn set_value(&mut self, name: &str, value: RawValue) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Sets the secret-store value; returns `false` for unknown names.
    pub fn set_external_value(&mut self, name: &str, value: RawValue) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.external_value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Same names and metadata, no values.
    pub fn cleared(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .map(|(name, field)| (name.clone(), field.cleared()))
                .collect(),
        }
    }

    fn insert(&mut self, field: FieldDescriptor) {
        self.fields.insert(field.name.clone(), field);
    }
}

impl<'a> IntoIterator for &'a Envs {
    type Item = (&'a String, &'a FieldDescriptor);
    type IntoIter = btree_map::Iter<'a, String, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Builds the registry for `config` from its descriptor table.
///
/// The instance is read once to classify each field's representation
/// (structured payloads, address lists).
pub fn build_registry<C: Configurable>(config: &C) -> Result<Envs, FieldError> {
    let specs = C::fields();
    let mut envs = Envs::default();

    for spec in specs {
        if envs.contains(spec.name) {
            return Err(FieldError::InvalidShape(format!(
                "field \"{}\" is declared twice",
                spec.name
            )));
        }

        let current = (spec.get)(config);
        envs.insert(FieldDescriptor {
            name: spec.name.to_string(),
            classification: spec.classification,
            is_secret: spec.secret,
            is_structured: current.is_structured(),
            discovery_link: spec.discovery.map(str::to_string),
            value: None,
            external_value: None,
        });
    }

    for spec in specs {
        let Some(companion) = spec.discovery else {
            continue;
        };

        let target = specs
            .iter()
            .find(|other| other.name == companion)
            .ok_or_else(|| {
                FieldError::InvalidShape(format!(
                    "field \"{}\" discovers into missing field \"{}\"",
                    spec.name, companion
                ))
            })?;

        if target.classification != Classification::Discovery {
            return Err(FieldError::InvalidShape(format!(
                "discovery target \"{}\" must be classified as discovery",
                companion
            )));
        }

        if !matches!((target.get)(config), RawValue::Addresses(_)) {
            return Err(FieldError::InvalidShape(format!(
                "discovery target \"{}\" is not an address list",
                companion
            )));
        }

        if let Some(field) = envs.fields.get_mut(companion) {
            field.discovery_link = Some(spec.name.to_string());
        }
    }

    Ok(envs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::AppConfig;
    use crate::remote::ServiceAddress;

    #[derive(Debug, Clone, Default)]
    struct Broken {
        service: String,
        addrs: Vec<ServiceAddress>,
    }

    static BROKEN_FIELDS: &[FieldSpec<Broken>] = &[
        crate::field!(Broken, "SERVICE", service).discovers("ADDRS"),
        // Not marked as discovery.
        crate::field!(Broken, "ADDRS", addrs),
    ];

    impl Configurable for Broken {
        fn fields() -> &'static [FieldSpec<Self>] {
            BROKEN_FIELDS
        }

        fn validate(&self) -> Result<(), Vec<ValidationError>> {
            Ok(())
        }

        fn service_name(&self) -> &str {
            &self.service
        }

        fn stand_name(&self) -> &str {
            "local"
        }
    }

    #[test]
    fn test_registry_contains_nested_fields() {
        let envs = build_registry(&AppConfig::default()).unwrap();

        assert!(envs.contains("SERVICE_NAME"));
        assert!(envs.contains("PROMETHEUS_PORT"));
        assert!(envs.contains("REDIS_DB_INDEX"));
        assert_eq!(envs.len(), AppConfig::fields().len());
    }

    #[test]
    fn test_registry_classification_and_flags() {
        let envs = build_registry(&AppConfig::default()).unwrap();

        assert_eq!(envs.get("SERVICE_NAME").unwrap().classification, Classification::Local);
        assert_eq!(envs.get("LOG_LEVEL").unwrap().classification, Classification::Global);
        assert_eq!(envs.get("POSTGRES_ADDRS").unwrap().classification, Classification::Discovery);
        assert!(envs.get("RABBIT_PASS").unwrap().is_secret);
        assert!(envs.get("GPG_PUBLIC_SIGNATURES").unwrap().is_structured);
        assert!(!envs.get("POSTGRES_ADDRS").unwrap().is_structured);
    }

    #[test]
    fn test_discovery_link_is_bidirectional() {
        let envs = build_registry(&AppConfig::default()).unwrap();

        let source = envs.get("DISCOVERY_POSTGRES_SERVICE").unwrap();
        assert_eq!(source.discovery_link.as_deref(), Some("POSTGRES_ADDRS"));

        let companion = envs.get("POSTGRES_ADDRS").unwrap();
        assert_eq!(companion.discovery_link.as_deref(), Some("DISCOVERY_POSTGRES_SERVICE"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build_registry(&AppConfig::default()).unwrap();
        let mut other = AppConfig::default();
        other.local.service_name = "another".to_string();
        let b = build_registry(&other).unwrap();

        assert!(a.names().eq(b.names()));
    }

    #[test]
    fn test_malformed_table_is_invalid_shape() {
        let err = build_registry(&Broken::default()).unwrap_err();
        assert!(matches!(err, FieldError::InvalidShape(_)));
    }

    #[test]
    fn test_effective_value_prefers_secret() {
        let mut envs = build_registry(&AppConfig::default()).unwrap();
        envs.set_value("RABBIT_PASS", RawValue::from("secret/rabbit"));
        assert_eq!(envs.effective_value("RABBIT_PASS"), None);

        envs.set_external_value("RABBIT_PASS", RawValue::from("hunter2"));
        assert_eq!(envs.effective_value("RABBIT_PASS"), Some(&RawValue::from("hunter2")));
        assert!(envs.cleared().effective_value("RABBIT_PASS").is_none());
    }
}
