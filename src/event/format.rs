//! Text rendering of floating point values for MQTT payloads

/// Significant digits used in general (scientific) notation
const GENERAL_PRECISION: i32 = 6;

/// Render a double the way device topics carry them
///
/// Values above 1e7 or below 1e-4 (this includes zero and all negative
/// values) use shortest general notation with six significant digits,
/// e.g. `1.23457e+07`. Everything else uses five decimals with trailing
/// zeros trimmed, always keeping one digit after the decimal point.
pub fn format_double(d: f64) -> String {
    if d > 1e7 || d < 1e-4 {
        return format_general(d);
    }
    if d.is_nan() {
        return "nan".to_string();
    }

    let mut s = format!("{:.5}", d);
    while s.ends_with('0') && !s[..s.len() - 1].ends_with('.') {
        s.pop();
    }
    s
}

fn format_general(d: f64) -> String {
    if d.is_infinite() {
        return if d > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.*e}", (GENERAL_PRECISION - 1) as usize, d);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= GENERAL_PRECISION {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            sign,
            exponent.abs()
        )
    } else {
        let decimals = (GENERAL_PRECISION - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, d)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
