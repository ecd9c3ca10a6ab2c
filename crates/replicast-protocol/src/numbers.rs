//! Bounded-precision decimal text for numeric payloads.
//!
//! Every float that crosses the wire is written with two fractional digits.
//! Peers reconstruct approximate values and must tolerate the error.

/// Rounds to two decimal places.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Two fixed fractional digits: `1.0` becomes `"1.00"`.
///
/// Used for the spatial fields of Create messages.
pub fn format_fixed(value: f32) -> String {
    let text = format!("{value:.2}");
    if text == "-0.00" {
        return "0.00".to_owned();
    }
    text
}

/// Two fractional digits with trailing zeros and a bare trailing point
/// removed: `1.0` becomes `"1"`, `0.5` becomes `"0.5"`.
///
/// Used for component payloads.
pub fn format_compact(value: f32) -> String {
    let fixed = format_fixed(value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-" | "-0" => "0".to_owned(),
        other => other.to_owned(),
    }
}

/// Parses a float field, falling back to `default` when the text is not a
/// finite number.
pub fn parse_f32_or(text: &str, default: f32) -> f32 {
    match text.trim().parse::<f32>() {
        Ok(value) if value.is_finite() => value,
        _ => default,
    }
}
