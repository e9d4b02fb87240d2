/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lenient numeric parse: anything that isn't a finite-or-infinite number is missing.
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let v: f64 = clean_str(raw?).parse().ok()?;
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

/// Column type as a dataframe profiler reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Int64,
    Float64,
    Object,
}

impl InferredType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferredType::Int64 => "int64",
            InferredType::Float64 => "float64",
            InferredType::Object => "object",
        }
    }
}

/// Infer a column type from its cells. Integers with gaps widen to float64,
/// any non-numeric cell makes the column `object`.
pub fn infer_column_type<'a>(cells: impl Iterator<Item = Option<&'a str>>) -> InferredType {
    let mut saw_missing = false;
    let mut saw_float = false;
    let mut saw_value = false;
    for cell in cells {
        let Some(raw) = cell else {
            saw_missing = true;
            continue;
        };
        let s = clean_str(raw);
        if s.is_empty() {
            saw_missing = true;
            continue;
        }
        saw_value = true;
        if s.parse::<i64>().is_ok() {
            continue;
        }
        if s.parse::<f64>().is_ok() {
            saw_float = true;
            continue;
        }
        return InferredType::Object;
    }
    match (saw_value, saw_float || saw_missing) {
        (false, _) => InferredType::Float64,
        (true, true) => InferredType::Float64,
        (true, false) => InferredType::Int64,
    }
}

/// Format a float the way pandas writes CSV cells: integral values keep `.0`,
/// magnitudes outside `[1e-4, 1e16)` use `1e-05` style exponents and
/// infinities print as `inf`/`-inf`.
pub fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return format!("{}", v);
    }
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{:e}", v);
        return match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => sci,
        };
    }
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_is_lenient() {
        assert_eq!(parse_number(Some("12")), Some(12.0));
        assert_eq!(parse_number(Some(" \"3.5\" ")), Some(3.5));
        assert_eq!(parse_number(Some("-4")), Some(-4.0));
        assert_eq!(parse_number(Some("abc")), None);
        assert_eq!(parse_number(Some("NaN")), None);
        assert_eq!(parse_number(Some("")), None);
        assert_eq!(parse_number(None), None);
    }

    #[test]
    fn test_infer_column_type() {
        let ints = [Some("1"), Some("2")];
        assert_eq!(infer_column_type(ints.into_iter()), InferredType::Int64);
        let gappy = [Some("1"), None];
        assert_eq!(infer_column_type(gappy.into_iter()), InferredType::Float64);
        let floats = [Some("1.5"), Some("2")];
        assert_eq!(infer_column_type(floats.into_iter()), InferredType::Float64);
        let text = [Some("1"), Some("Peru")];
        assert_eq!(infer_column_type(text.into_iter()), InferredType::Object);
    }

    #[test]
    fn test_format_float_matches_pandas() {
        assert_eq!(format_float(123.0), "123.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(-7.0), "-7.0");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(0.0001), "0.0001");
    }

    #[test]
    fn test_format_float_exponents_and_infinities() {
        assert_eq!(format_float(0.00001), "1e-05");
        assert_eq!(format_float(2.5e-7), "2.5e-07");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(-1.5e20), "-1.5e+20");
        assert_eq!(format_float(1e100), "1e+100");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }
}
