//! Numeric formats expected by instrument command parsers.
//!
//! Several command sets were written against C `printf` conventions: `%f` always
//! prints six decimals and `%e` always prints a signed, two-digit exponent. Rust's
//! `{:e}` prints `1e-3`, which those parsers reject.

/// Fixed-point with `decimals` digits after the point (`%f` is `fixed(v, 6)`).
pub fn fixed(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

/// `printf`-style `%.{precision}e`: `scientific(0.001, 6)` is `1.000000e-03`.
pub fn scientific(value: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, value);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            Err(_) => raw,
        },
        // NaN and infinities have no exponent part.
        None => raw,
    }
}

/// Upper-case hexadecimal without prefix.
pub fn hex_upper(code: u32) -> String {
    format!("{:X}", code)
}
