//! Key metadata: default values and casters.

use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

/// Transform applied to every value before it is stored or handed out.
pub type Caster = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Metadata registered for a config key.
///
/// ```rust
/// use fsadmin::ConfigDef;
/// use serde_json::json;
///
/// let def = ConfigDef::with_default(80);
/// // Numeric defaults get a numeric caster automatically.
/// assert_eq!(def.cast(&json!("8080")), json!(8080));
/// ```
#[derive(Clone, Default)]
pub struct ConfigDef {
    /// Value reported when nothing is stored.
    pub default_value: Option<Value>,
    /// Optional value transform.
    pub caster: Option<Caster>,
}

impl ConfigDef {
    /// Definition with neither default nor caster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition with a default value.
    pub fn with_default(value: impl Into<Value>) -> Self {
        Self {
            default_value: Some(value.into()),
            caster: None,
        }
        .normalized()
    }

    /// Replace the caster.
    pub fn caster<F>(mut self, caster: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.caster = Some(Arc::new(caster));
        self
    }

    /// Install the numeric caster when no caster is set and the default is a number.
    pub(crate) fn normalized(mut self) -> Self {
        if self.caster.is_none() && matches!(self.default_value, Some(Value::Number(_))) {
            self.caster = Some(number_caster());
        }
        self
    }

    /// Apply the caster, if any.
    pub fn cast(&self, value: &Value) -> Value {
        match &self.caster {
            Some(caster) => caster(value),
            None => value.clone(),
        }
    }
}

impl fmt::Debug for ConfigDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDef")
            .field("default_value", &self.default_value)
            .field("caster", &self.caster.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Caster coercing values to numbers.
///
/// Integral floats become integers and other numbers pass through. Numeric
/// strings are parsed (blank is 0), booleans become 0 or 1, null becomes 0.
/// Anything else becomes null.
pub fn number_caster() -> Caster {
    Arc::new(cast_number)
}

fn cast_number(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => number_from_f64(f).unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        },
        Value::Bool(b) => Value::from(u8::from(*b)),
        Value::Null => Value::from(0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Value::from(0);
            }
            if let Ok(i) = s.parse::<i64>() {
                return Value::from(i);
            }
            s.parse::<f64>()
                .ok()
                .and_then(number_from_f64)
                .unwrap_or(Value::Null)
        }
        Value::Array(_) | Value::Object(_) => Value::Null,
    }
}

fn number_from_f64(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Some(Value::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_default_installs_caster() {
        let def = ConfigDef::with_default(5);
        assert!(def.caster.is_some());
        assert_eq!(def.cast(&json!("12")), json!(12));
    }

    #[test]
    fn integral_floats_become_integers() {
        let cast = number_caster();
        assert_eq!(cast(&json!(80.0)), json!(80));
        assert_eq!(cast(&json!(-3.0)), json!(-3));
        assert_eq!(cast(&json!(2.5)), json!(2.5));
        assert_eq!(cast(&json!(7)), json!(7));
    }

    #[test]
    fn non_numeric_default_has_no_caster() {
        let def = ConfigDef::with_default("x");
        assert!(def.caster.is_none());
        assert_eq!(def.cast(&json!("12")), json!("12"));
    }

    #[test]
    fn explicit_caster_is_kept() {
        let def = ConfigDef::with_default(1).caster(|v| json!(v.to_string()));
        assert_eq!(def.cast(&json!(2)), json!("2"));
    }

    #[test]
    fn number_coercion() {
        let cast = number_caster();
        assert_eq!(cast(&json!(3)), json!(3));
        assert_eq!(cast(&json!(" 42 ")), json!(42));
        assert_eq!(cast(&json!("1.5")), json!(1.5));
        assert_eq!(cast(&json!("2.0")), json!(2));
        assert_eq!(cast(&json!("")), json!(0));
        assert_eq!(cast(&json!(true)), json!(1));
        assert_eq!(cast(&json!(null)), json!(0));
        assert_eq!(cast(&json!("abc")), json!(null));
        assert_eq!(cast(&json!([1])), json!(null));
    }
}
