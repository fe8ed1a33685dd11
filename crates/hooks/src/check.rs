//! Typed hook checks.
//!
//! A record's `check_type` + `check_value` pair is compiled into one
//! [`Check`]. Two encodings of `check_value` are accepted: the flat legacy
//! strings (`title:50`, `tests:3`, `confidence:LOW,MEDIUM,HIGH`, a JSON array
//! of field names) and a JSON object such as `{"field": "title", "max": 50}`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::HookError;

const DEFAULT_LENGTH_FIELD: &str = "title";
const DEFAULT_LENGTH_MAX: usize = 50;
const DEFAULT_COUNT_THRESHOLD: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Character length of `field` must not exceed `max`.
    Length { field: String, max: usize },
    /// Every field must be present and non-empty.
    RequiredFields { fields: Vec<String> },
    /// `field` must be an array with at least `min` items.
    MinCount { field: String, min: usize },
    /// `field` must be an array with at most `max` items.
    MaxCount { field: String, max: usize },
    /// `field`, when present, must be one of `allowed`.
    Enum { field: String, allowed: Vec<String> },
}

/// Structured form of `check_value`.
#[derive(Debug, Default, Deserialize)]
struct CheckSpec {
    field: Option<String>,
    fields: Option<Vec<String>>,
    max: Option<usize>,
    min: Option<usize>,
    threshold: Option<usize>,
    allowed: Option<Vec<String>>,
}

/// A failed check, with the values a message template may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub default_message: String,
    pub vars: Vec<(&'static str, String)>,
}

impl Violation {
    /// Substitute `{hook}`, `{tool}` and the check's own placeholders.
    pub fn render(&self, template: Option<&str>, hook: &str, tool: &str) -> String {
        let Some(template) = template else {
            return self.default_message.clone();
        };
        let mut out = template.replace("{hook}", hook).replace("{tool}", tool);
        for (key, value) in &self.vars {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        out
    }
}

fn invalid(hook: &str, reason: impl Into<String>) -> HookError {
    HookError::InvalidCheckValue {
        hook: hook.to_string(),
        reason: reason.into(),
    }
}

fn parse_usize(hook: &str, raw: &str) -> Result<usize, HookError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(hook, format!("'{raw}' is not a non-negative integer")))
}

/// Splits `field:rest`. The field must be non-empty.
fn split_field<'a>(hook: &str, value: &'a str) -> Result<(&'a str, Option<&'a str>), HookError> {
    let (field, rest) = match value.split_once(':') {
        Some((field, rest)) => (field.trim(), Some(rest.trim())),
        None => (value.trim(), None),
    };
    if field.is_empty() {
        return Err(invalid(hook, "missing field name"));
    }
    Ok((field, rest))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Check {
    pub fn compile(hook: &str, check_type: &str, value: Option<&str>) -> Result<Self, HookError> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());

        if let Some(raw) = value.filter(|v| v.starts_with('{')) {
            let spec: CheckSpec =
                serde_json::from_str(raw).map_err(|e| invalid(hook, e.to_string()))?;
            return Self::from_spec(hook, check_type, spec);
        }

        match check_type.trim() {
            "length" => {
                let Some(value) = value else {
                    return Ok(Check::Length {
                        field: DEFAULT_LENGTH_FIELD.into(),
                        max: DEFAULT_LENGTH_MAX,
                    });
                };
                match value.split_once(':') {
                    Some(_) => {
                        let (field, max) = split_field(hook, value)?;
                        let max = match max.filter(|m| !m.is_empty()) {
                            Some(m) => parse_usize(hook, m)?,
                            None => DEFAULT_LENGTH_MAX,
                        };
                        Ok(Check::Length {
                            field: field.into(),
                            max,
                        })
                    }
                    None => match value.parse::<usize>() {
                        Ok(max) => Ok(Check::Length {
                            field: DEFAULT_LENGTH_FIELD.into(),
                            max,
                        }),
                        Err(_) => Ok(Check::Length {
                            field: value.into(),
                            max: DEFAULT_LENGTH_MAX,
                        }),
                    },
                }
            }
            "required_fields" => {
                let value = value.ok_or_else(|| invalid(hook, "no fields listed"))?;
                let fields = if value.starts_with('[') {
                    serde_json::from_str::<Vec<String>>(value)
                        .map_err(|e| invalid(hook, e.to_string()))?
                } else {
                    split_list(value)
                };
                Self::required(hook, fields)
            }
            kind @ ("min_count" | "max_count") => {
                let value = value.ok_or_else(|| invalid(hook, "missing field name"))?;
                let (field, threshold) = split_field(hook, value)?;
                let threshold = match threshold.filter(|t| !t.is_empty()) {
                    Some(t) => parse_usize(hook, t)?,
                    None => DEFAULT_COUNT_THRESHOLD,
                };
                Ok(Self::count(kind, field.into(), threshold))
            }
            "enum" => {
                let value = value.ok_or_else(|| invalid(hook, "no allow-list"))?;
                let (field, list) = split_field(hook, value)?;
                let allowed = list.map(split_list).unwrap_or_default();
                Self::enumeration(hook, field.into(), allowed)
            }
            other => Err(HookError::UnknownCheckType {
                hook: hook.to_string(),
                check_type: other.to_string(),
            }),
        }
    }

    fn from_spec(hook: &str, check_type: &str, spec: CheckSpec) -> Result<Self, HookError> {
        match check_type.trim() {
            "length" => Ok(Check::Length {
                field: spec.field.unwrap_or_else(|| DEFAULT_LENGTH_FIELD.into()),
                max: spec.max.or(spec.threshold).unwrap_or(DEFAULT_LENGTH_MAX),
            }),
            "required_fields" => Self::required(hook, spec.fields.unwrap_or_default()),
            kind @ ("min_count" | "max_count") => {
                let field = spec.field.ok_or_else(|| invalid(hook, "missing field name"))?;
                let threshold = if kind == "min_count" {
                    spec.min.or(spec.threshold)
                } else {
                    spec.max.or(spec.threshold)
                };
                Ok(Self::count(
                    kind,
                    field,
                    threshold.unwrap_or(DEFAULT_COUNT_THRESHOLD),
                ))
            }
            "enum" => {
                let field = spec.field.ok_or_else(|| invalid(hook, "missing field name"))?;
                Self::enumeration(hook, field, spec.allowed.unwrap_or_default())
            }
            other => Err(HookError::UnknownCheckType {
                hook: hook.to_string(),
                check_type: other.to_string(),
            }),
        }
    }

    fn required(hook: &str, fields: Vec<String>) -> Result<Self, HookError> {
        let fields: Vec<String> = fields
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            return Err(invalid(hook, "no fields listed"));
        }
        Ok(Check::RequiredFields { fields })
    }

    fn count(kind: &str, field: String, threshold: usize) -> Self {
        if kind == "min_count" {
            Check::MinCount {
                field,
                min: threshold,
            }
        } else {
            Check::MaxCount {
                field,
                max: threshold,
            }
        }
    }

    fn enumeration(hook: &str, field: String, allowed: Vec<String>) -> Result<Self, HookError> {
        if allowed.is_empty() {
            return Err(invalid(hook, "enum needs at least one allowed value"));
        }
        Ok(Check::Enum { field, allowed })
    }

    pub fn check_type(&self) -> &'static str {
        match self {
            Check::Length { .. } => "length",
            Check::RequiredFields { .. } => "required_fields",
            Check::MinCount { .. } => "min_count",
            Check::MaxCount { .. } => "max_count",
            Check::Enum { .. } => "enum",
        }
    }

    /// `Ok(None)` when the arguments pass.
    pub fn evaluate(&self, hook: &str, args: &Value) -> Result<Option<Violation>, HookError> {
        let args = args.as_object().ok_or_else(|| HookError::ArgumentsNotObject {
            hook: hook.to_string(),
        })?;

        let violation = match self {
            Check::Length { field, max } => {
                let actual = char_len(args.get(field));
                (actual > *max).then(|| Violation {
                    default_message: format!(
                        "'{field}' is too long ({actual} characters, max {max})"
                    ),
                    vars: vec![
                        ("field", field.clone()),
                        ("max", max.to_string()),
                        ("actual", actual.to_string()),
                    ],
                })
            }
            Check::RequiredFields { fields } => {
                let missing: Vec<&str> = fields
                    .iter()
                    .filter(|f| is_blank(args, f))
                    .map(String::as_str)
                    .collect();
                (!missing.is_empty()).then(|| {
                    let missing = missing.join(", ");
                    Violation {
                        default_message: format!("Missing required fields: {missing}"),
                        vars: vec![("missing", missing), ("field", fields.join(", "))],
                    }
                })
            }
            Check::MinCount { field, min } => match item_count(args, field) {
                Some(actual) if actual >= *min => None,
                actual => Some(count_violation(field, "min", *min, actual, |a| {
                    format!("'{field}' needs at least {min} items ({a} given)")
                })),
            },
            Check::MaxCount { field, max } => match item_count(args, field) {
                Some(actual) if actual <= *max => None,
                actual => Some(count_violation(field, "max", *max, actual, |a| {
                    format!("'{field}' allows at most {max} items ({a} given)")
                })),
            },
            Check::Enum { field, allowed } => match args.get(field) {
                None | Some(Value::Null) => None,
                Some(value) => {
                    let value = string_form(value);
                    (!allowed.iter().any(|a| a == value.trim())).then(|| {
                        let allowed = allowed.join(", ");
                        Violation {
                            default_message: format!(
                                "'{field}' must be one of {allowed} (got '{value}')"
                            ),
                            vars: vec![
                                ("field", field.clone()),
                                ("allowed", allowed),
                                ("value", value),
                            ],
                        }
                    })
                }
            },
        };

        Ok(violation)
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn char_len(value: Option<&Value>) -> usize {
    match value {
        None | Some(Value::Null) => 0,
        Some(value) => string_form(value).chars().count(),
    }
}

fn is_blank(args: &Map<String, Value>, field: &str) -> bool {
    match args.get(field) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Missing counts as zero items; a non-array value has no count.
fn item_count(args: &Map<String, Value>, field: &str) -> Option<usize> {
    match args.get(field) {
        None | Some(Value::Null) => Some(0),
        Some(Value::Array(items)) => Some(items.len()),
        Some(_) => None,
    }
}

fn count_violation(
    field: &str,
    bound: &'static str,
    threshold: usize,
    actual: Option<usize>,
    message: impl Fn(&str) -> String,
) -> Violation {
    let actual = match actual {
        Some(n) => n.to_string(),
        None => "not a list".to_string(),
    };
    Violation {
        default_message: message(&actual),
        vars: vec![
            ("field", field.to_string()),
            (bound, threshold.to_string()),
            ("actual", actual),
        ],
    }
}
