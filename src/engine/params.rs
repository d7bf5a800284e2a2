//! Parameter Model
//!
//! Typed decorator parameters with positional/named binding, schema
//! validation, and deterministic coercion. Schemas are pure data: the same
//! structures drive runtime validation and generator-side template data.

use std::time::Duration;

use indexmap::IndexMap;

use crate::engine::errors::EngineError;

// =============================================================================
// VALUES
// =============================================================================

/// Schema-declared parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Bool,
    Int,
    Float,
    Duration,
    Ident,
    List,
    Map,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Str => "string",
            ParamType::Bool => "bool",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Duration => "duration",
            ParamType::Ident => "identifier",
            ParamType::List => "list",
            ParamType::Map => "map",
        }
    }
}

/// A parameter value. Inner sequences and branch maps ride on the IR nodes,
/// not here, so values stay plain data.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Duration(Duration),
    Ident(String),
    List(Vec<ParamValue>),
    Map(IndexMap<String, ParamValue>),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Str(_) => "string",
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Duration(_) => "duration",
            ParamValue::Ident(_) => "identifier",
            ParamValue::List(_) => "list",
            ParamValue::Map(_) => "map",
        }
    }

    /// Render the value as the string it substitutes to in shell text.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(n) => n.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Duration(d) => format_duration(*d),
            ParamValue::Ident(s) => s.clone(),
            ParamValue::List(items) => items
                .iter()
                .map(|v| v.render())
                .collect::<Vec<_>>()
                .join(","),
            ParamValue::Map(map) => map
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.render()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Deterministic coercion to a schema type. Returns the coerced value or
    /// the actual type name for the error message.
    fn coerce(&self, ty: ParamType) -> Result<ParamValue, &'static str> {
        match (self, ty) {
            (v, ParamType::List) if matches!(v, ParamValue::List(_)) => Ok(v.clone()),
            (v, ParamType::Map) if matches!(v, ParamValue::Map(_)) => Ok(v.clone()),
            (ParamValue::Str(s), ParamType::Str) => Ok(ParamValue::Str(s.clone())),
            (ParamValue::Ident(s), ParamType::Str) => Ok(ParamValue::Str(s.clone())),
            (ParamValue::Str(s), ParamType::Ident) => Ok(ParamValue::Ident(s.clone())),
            (ParamValue::Ident(s), ParamType::Ident) => Ok(ParamValue::Ident(s.clone())),
            (ParamValue::Bool(b), ParamType::Bool) => Ok(ParamValue::Bool(*b)),
            (ParamValue::Str(s), ParamType::Bool) => match s.as_str() {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err("string"),
            },
            (ParamValue::Int(n), ParamType::Int) => Ok(ParamValue::Int(*n)),
            (ParamValue::Str(s), ParamType::Int) => {
                s.parse::<i64>().map(ParamValue::Int).map_err(|_| "string")
            }
            // Lossless only: a float with no fractional part may become an int.
            (ParamValue::Float(f), ParamType::Int) => {
                if f.fract() == 0.0 && f.abs() < (1i64 << 53) as f64 {
                    Ok(ParamValue::Int(*f as i64))
                } else {
                    Err("float")
                }
            }
            (ParamValue::Float(f), ParamType::Float) => Ok(ParamValue::Float(*f)),
            (ParamValue::Int(n), ParamType::Float) => {
                if n.abs() < 1i64 << 53 {
                    Ok(ParamValue::Float(*n as f64))
                } else {
                    Err("int")
                }
            }
            (ParamValue::Str(s), ParamType::Float) => {
                s.parse::<f64>().map(ParamValue::Float).map_err(|_| "string")
            }
            (ParamValue::Duration(d), ParamType::Duration) => Ok(ParamValue::Duration(*d)),
            (ParamValue::Str(s), ParamType::Duration) => {
                parse_duration(s).map(ParamValue::Duration).ok_or("string")
            }
            // A bare integer duration means seconds.
            (ParamValue::Int(n), ParamType::Duration) if *n >= 0 => {
                Ok(ParamValue::Duration(Duration::from_secs(*n as u64)))
            }
            (v, _) => Err(v.type_name()),
        }
    }
}

/// One supplied parameter: named or positional (`name` empty).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub value: ParamValue,
}

/// The supplied parameter list of one decorator node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    items: Vec<Param>,
}

impl Params {
    pub fn new(items: Vec<Param>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Param] {
        &self.items
    }

    /// Value of a named parameter.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.items
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| &p.value)
    }

    /// Value of a named parameter, rendered, or a default.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> String {
        self.get(name).map(|v| v.render()).unwrap_or_else(|| default.to_string())
    }

    /// The i-th positional parameter.
    pub fn positional(&self, index: usize) -> Option<&ParamValue> {
        self.items
            .iter()
            .filter(|p| p.name.is_none())
            .nth(index)
            .map(|p| &p.value)
    }

    pub fn positional_count(&self) -> usize {
        self.items.iter().filter(|p| p.name.is_none()).count()
    }

    pub fn named_count(&self) -> usize {
        self.items.iter().filter(|p| p.name.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// One schema slot.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<ParamValue>,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self { name, ty, required: true, default: None, description }
    }

    pub fn optional(
        name: &'static str,
        ty: ParamType,
        default: Option<ParamValue>,
        description: &'static str,
    ) -> Self {
        Self { name, ty, required: false, default, description }
    }
}

/// A decorator's published parameter schema, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    pub params: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// Bind supplied parameters against this schema:
    /// named bind by name, remaining positionals fill unfilled slots in
    /// declaration order, missing required slots fail, values coerce to the
    /// declared type.
    pub fn bind(&self, decorator: &str, supplied: &Params) -> Result<BoundParams, EngineError> {
        let mut values: IndexMap<String, ParamValue> = IndexMap::new();

        for param in supplied.items() {
            if let Some(name) = &param.name {
                let spec = self.params.iter().find(|s| s.name == name).ok_or_else(|| {
                    EngineError::DecoratorMisused(format!(
                        "@{} has no parameter '{}'",
                        decorator, name
                    ))
                })?;
                let coerced = coerce_for(decorator, spec, &param.value)?;
                values.insert(spec.name.to_string(), coerced);
            }
        }

        let mut positionals = supplied.items().iter().filter(|p| p.name.is_none());
        for spec in &self.params {
            if values.contains_key(spec.name) {
                continue;
            }
            match positionals.next() {
                Some(param) => {
                    let coerced = coerce_for(decorator, spec, &param.value)?;
                    values.insert(spec.name.to_string(), coerced);
                }
                None => {
                    if let Some(default) = &spec.default {
                        values.insert(spec.name.to_string(), default.clone());
                    } else if spec.required {
                        return Err(EngineError::ParameterRequired {
                            decorator: decorator.to_string(),
                            param: spec.name.to_string(),
                        });
                    }
                }
            }
        }

        if positionals.next().is_some() {
            return Err(EngineError::DecoratorMisused(format!(
                "@{} given more positional parameters than its schema declares",
                decorator
            )));
        }

        Ok(BoundParams { values })
    }
}

fn coerce_for(
    decorator: &str,
    spec: &ParamSpec,
    value: &ParamValue,
) -> Result<ParamValue, EngineError> {
    value.coerce(spec.ty).map_err(|got| EngineError::ParameterType {
        decorator: decorator.to_string(),
        param: spec.name.to_string(),
        expected: spec.ty.name().to_string(),
        got: got.to_string(),
    })
}

/// Parameters after schema binding, with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct BoundParams {
    values: IndexMap<String, ParamValue>,
}

impl BoundParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Str(s)) | Some(ParamValue::Ident(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ParamValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn duration(&self, name: &str) -> Option<Duration> {
        match self.values.get(name) {
            Some(ParamValue::Duration(d)) => Some(*d),
            _ => None,
        }
    }
}

// =============================================================================
// DURATIONS
// =============================================================================

/// Parse a duration literal: a non-negative number with one of the suffixes
/// `ns`, `us`, `ms`, `s`, `m`, `h`. A bare number means seconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (number, scale_ns) = if let Some(n) = text.strip_suffix("ns") {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix("us") {
        (n, 1e3)
    } else if let Some(n) = text.strip_suffix("ms") {
        (n, 1e6)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1e9)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60.0 * 1e9)
    } else if let Some(n) = text.strip_suffix('h') {
        (n, 3600.0 * 1e9)
    } else {
        (text, 1e9)
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((value * scale_ns) as u64))
}

/// Render a duration back to its shortest exact literal.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos % 1_000_000_000 == 0 {
        let secs = nanos / 1_000_000_000;
        if secs % 3600 == 0 {
            return format!("{}h", secs / 3600);
        }
        if secs % 60 == 0 {
            return format!("{}m", secs / 60);
        }
        return format!("{}s", secs);
    }
    if nanos % 1_000_000 == 0 {
        return format!("{}ms", nanos / 1_000_000);
    }
    if nanos % 1_000 == 0 {
        return format!("{}us", nanos / 1_000);
    }
    format!("{}ns", nanos)
}
