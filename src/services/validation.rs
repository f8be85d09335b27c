//! Pre-flight validation of whole operation chains.
//!
//! Runs before any side effect: no filesystem access, no engine call, no
//! persistence. Every violation in the chain is reported, not just the
//! first one.

use garde::Validate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{MediaAsset, OperationSpec, OutputFormat, OverlayPosition, RawOperation};

/// Longest accepted chain.
pub const MAX_OPERATIONS: usize = 20;

/// Output resolutions the transform engine is provisioned for.
pub const SUPPORTED_RESOLUTIONS: &[(u32, u32)] = &[
    (3840, 2160),
    (2560, 1440),
    (1920, 1080),
    (1280, 720),
    (854, 480),
    (640, 360),
    (426, 240),
];

const DEFAULT_FONT_SIZE: u32 = 24;

#[derive(Debug, Deserialize, Validate)]
struct CutParams {
    #[garde(required, length(min = 1))]
    start: Option<String>,

    #[garde(required, length(min = 1))]
    end: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct ResizeParams {
    #[garde(required, range(min = 1, max = 7680))]
    width: Option<u32>,

    #[garde(required, range(min = 1, max = 4320))]
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct ConvertParams {
    #[garde(required, length(min = 1))]
    target_format: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct OverlayParams {
    #[garde(required, length(chars, min = 1, max = 200))]
    text: Option<String>,

    #[garde(required, length(min = 1))]
    position: Option<String>,

    #[garde(range(min = 8, max = 128))]
    font_size: Option<u32>,
}

/// One problem found in a chain.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Violation {
    /// Position in the chain; `None` for chain-level problems.
    pub index: Option<usize>,
    pub operation: Option<String>,
    pub message: String,
}

/// Every violation found in one chain.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationErrors {
    pub violations: Vec<Violation>,
}

impl ValidationErrors {
    /// True if any violation mentions `needle` (used by callers and tests
    /// that look for a specific parameter).
    pub fn mentions(&self, needle: &str) -> bool {
        self.violations.iter().any(|v| v.message.contains(needle))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| match (v.index, &v.operation) {
                (Some(i), Some(op)) => format!("operation {i} ({op}): {}", v.message),
                (Some(i), None) => format!("operation {i}: {}", v.message),
                _ => v.message.clone(),
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Checks an operation chain against an asset.
#[derive(Debug, Clone)]
pub struct OperationValidator {
    max_operations: usize,
}

impl Default for OperationValidator {
    fn default() -> Self {
        Self {
            max_operations: MAX_OPERATIONS,
        }
    }
}

impl OperationValidator {
    pub fn new(max_operations: usize) -> Self {
        Self { max_operations }
    }

    /// Validate `operations` for `asset`, returning the typed chain in the
    /// caller's order, or every violation found.
    pub fn validate_chain(
        &self,
        asset: &MediaAsset,
        operations: &[RawOperation],
    ) -> Result<Vec<OperationSpec>, ValidationErrors> {
        let mut violations = Vec::new();

        if operations.is_empty() {
            violations.push(Violation {
                index: None,
                operation: None,
                message: "at least one operation is required".to_string(),
            });
        }
        if operations.len() > self.max_operations {
            violations.push(Violation {
                index: None,
                operation: None,
                message: format!(
                    "{} operations requested, at most {} allowed",
                    operations.len(),
                    self.max_operations
                ),
            });
        }

        let mut specs = Vec::with_capacity(operations.len());
        for (index, raw) in operations.iter().enumerate() {
            match validate_operation(asset, raw) {
                Ok(spec) => specs.push(spec),
                Err(messages) => violations.extend(messages.into_iter().map(|message| Violation {
                    index: Some(index),
                    operation: raw.op_type.clone(),
                    message,
                })),
            }
        }

        if violations.is_empty() {
            Ok(specs)
        } else {
            Err(ValidationErrors { violations })
        }
    }
}

fn validate_operation(asset: &MediaAsset, raw: &RawOperation) -> Result<OperationSpec, Vec<String>> {
    let Some(op_type) = raw.op_type.as_deref() else {
        return Err(vec!["operation type is required".to_string()]);
    };

    match op_type.to_ascii_lowercase().as_str() {
        "cut" => checked(raw, |params| validate_cut(asset, params)),
        "resize" => checked(raw, validate_resize),
        "convert" => checked(raw, validate_convert),
        "overlay" => checked(raw, validate_overlay),
        other => Err(vec![format!("unknown operation type '{other}'")]),
    }
}

/// Run the declarative rules and the domain checks of one operation,
/// returning the messages of both.
///
/// A check may return an empty error list when the only problem is one the
/// declarative rules already reported.
fn checked<T, F>(raw: &RawOperation, check: F) -> Result<OperationSpec, Vec<String>>
where
    T: DeserializeOwned + Validate<Context = ()>,
    F: FnOnce(T) -> Result<OperationSpec, Vec<String>>,
{
    let (params, mut errors) = parse_params::<T>(raw)?;
    match check(params) {
        Ok(spec) if errors.is_empty() => Ok(spec),
        Ok(_) => Err(errors),
        Err(domain) if domain.is_empty() && errors.is_empty() => {
            Err(vec!["invalid parameters".to_string()])
        }
        Err(domain) => {
            errors.extend(domain);
            Err(errors)
        }
    }
}

/// Deserialize loose parameters and collect their declarative rule
/// failures. Only a shape mismatch is fatal.
fn parse_params<T: DeserializeOwned + Validate<Context = ()>>(
    raw: &RawOperation,
) -> Result<(T, Vec<String>), Vec<String>> {
    let params: T = serde_json::from_value(serde_json::Value::Object(raw.params.clone()))
        .map_err(|e| vec![format!("invalid parameters: {e}")])?;

    let errors = match params.validate() {
        Ok(()) => Vec::new(),
        Err(report) => report
            .iter()
            .map(|(path, error)| format!("{path}: {error}"))
            .collect(),
    };
    Ok((params, errors))
}

/// Present, non-empty value of an optional string parameter. Missing or
/// empty values are already reported by the declarative rules.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn validate_cut(asset: &MediaAsset, params: CutParams) -> Result<OperationSpec, Vec<String>> {
    let mut errors = Vec::new();
    let start = present(params.start);
    let end = present(params.end);

    let start_secs = start.as_deref().and_then(|raw| {
        let secs = parse_timestamp(raw);
        if secs.is_none() {
            errors.push(format!("start: '{raw}' is not a HH:MM:SS timestamp"));
        }
        secs
    });
    let end_secs = end.as_deref().and_then(|raw| {
        let secs = parse_timestamp(raw);
        if secs.is_none() {
            errors.push(format!("end: '{raw}' is not a HH:MM:SS timestamp"));
        }
        secs
    });

    if let (Some(s), Some(e)) = (start_secs, end_secs) {
        let (start, end) = (start.as_deref().unwrap_or_default(), end.as_deref().unwrap_or_default());
        if s >= e {
            errors.push(format!("start ({start}) must be before end ({end})"));
        }
        if let Some(duration) = asset.duration_secs {
            if e > duration {
                errors.push(format!("end ({end}) is past the asset duration ({duration:.2}s)"));
            }
        }
    }

    if errors.is_empty() {
        Ok(OperationSpec::Cut {
            start: start.unwrap_or_default(),
            end: end.unwrap_or_default(),
        })
    } else {
        Err(errors)
    }
}

fn validate_resize(params: ResizeParams) -> Result<OperationSpec, Vec<String>> {
    let width = params.width.unwrap_or_default();
    let height = params.height.unwrap_or_default();

    if width > 0 && height > 0 && !SUPPORTED_RESOLUTIONS.contains(&(width, height)) {
        let supported: Vec<String> = SUPPORTED_RESOLUTIONS
            .iter()
            .map(|(w, h)| format!("{w}x{h}"))
            .collect();
        return Err(vec![format!(
            "resolution {width}x{height} is not supported (expected one of {})",
            supported.join(", ")
        )]);
    }
    Ok(OperationSpec::Resize { width, height })
}

fn validate_convert(params: ConvertParams) -> Result<OperationSpec, Vec<String>> {
    // A missing format is already reported by the declarative rules.
    let Some(requested) = present(params.target_format) else {
        return Err(Vec::new());
    };
    OutputFormat::from_str(requested.trim_start_matches('.'))
        .map(|target_format| OperationSpec::Convert { target_format })
        .map_err(|_| vec![format!("target_format: unsupported format '{requested}'")])
}

fn validate_overlay(params: OverlayParams) -> Result<OperationSpec, Vec<String>> {
    let text = params.text.unwrap_or_default();
    let Some(requested) = present(params.position) else {
        return Err(Vec::new());
    };
    let position = OverlayPosition::from_str(&requested)
        .map_err(|_| vec![format!("position: unsupported position '{requested}'")])?;

    Ok(OperationSpec::Overlay {
        text,
        position,
        font_size: params.font_size.unwrap_or(DEFAULT_FONT_SIZE),
    })
}

/// Parse `HH:MM:SS` or `HH:MM:SS.fff` into seconds.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || h.is_empty() || m.len() != 2 || s.len() < 2 {
        return None;
    }

    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    let seconds: f64 = s.parse().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + seconds)
}
