//! Assigning and reading configuration fields by name.

use std::collections::BTreeMap;

use crate::config::registry::{Configurable, Envs, FieldError};
use crate::config::value::RawValue;

const REDACTED: &str = "***";

/// Assigns `raw` to the field called `name` on `config`, coercing it to the
/// field's type.
///
/// Only the named field is touched. On error `config` is left unmodified.
pub fn set_field<C: Configurable>(
    config: &mut C,
    envs: &Envs,
    name: &str,
    raw: RawValue,
) -> Result<(), FieldError> {
    if !envs.contains(name) {
        return Err(FieldError::UnknownField(name.to_string()));
    }

    if raw.is_empty() {
        return Err(FieldError::EmptyValue(name.to_string()));
    }

    let spec = C::field_spec(name).ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
    (spec.set)(config, raw)
}

/// Reads the field called `name` from `config`.
pub fn get_field<C: Configurable>(config: &C, name: &str) -> Option<RawValue> {
    C::field_spec(name).map(|spec| (spec.get)(config))
}

/// Every field of `config` by name, with non-empty secret values masked.
pub fn redacted_view<C: Configurable>(config: &C) -> BTreeMap<&'static str, RawValue> {
    C::fields()
        .iter()
        .map(|spec| {
            let value = (spec.get)(config);
            let value = if spec.secret && !value.is_empty() {
                RawValue::from(REDACTED)
            } else {
                value
            };
            (spec.name, value)
        })
        .collect()
}
