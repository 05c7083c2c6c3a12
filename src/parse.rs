use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Signed number with optional thousands separators and decimals.
const NUMBER_PATTERN: &str = r"[-+]?[\d,]*\.?\d+";

fn number_regex() -> Regex {
    Regex::new(NUMBER_PATTERN).expect("number regex")
}

fn to_f64(token: &str) -> Option<f64> {
    token.replace(',', "").parse::<f64>().ok()
}

/// Parse a numeric value that may arrive as a JSON number or as a string with
/// currency symbols, unit suffixes, thousands separators, or surrounding
/// prose. Never fails: anything unparseable yields `default` after a warning.
pub fn parse_numeric(value: &Value, unit: Option<&str>, default: f64) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(default),
        Value::String(s) => parse_numeric_str(s, unit, default),
        other => {
            warn!(value = %other, default, "failed to parse numeric value");
            default
        }
    }
}

/// String-input variant of [`parse_numeric`].
///
/// With a unit, numbers anchored to the unit win: the string is split on every
/// unit occurrence, and for each boundary the last number right before the
/// unit is taken, falling back to the first number after it (covers
/// unit-before-number layouts). Without a unit match, currency glyphs are
/// stripped and the first number anywhere in the string is used.
pub fn parse_numeric_str(input: &str, unit: Option<&str>, default: f64) -> f64 {
    let re = number_regex();
    let trimmed = input.trim();

    if let Some(unit) = unit.filter(|u| !u.is_empty()) {
        let segments: Vec<&str> = trimmed.split(unit).collect();
        if segments.len() > 1 {
            for i in 0..segments.len() - 1 {
                if let Some(m) = re.find_iter(segments[i]).last() {
                    if let Some(v) = to_f64(m.as_str()) {
                        return v;
                    }
                }
                if let Some(m) = re.find(segments[i + 1]) {
                    if let Some(v) = to_f64(m.as_str()) {
                        return v;
                    }
                }
            }
        }
    }

    let cleaned = trimmed.replace(' ', "").replace('¥', "").replace('$', "");
    if let Some(m) = re.find(&cleaned) {
        if let Some(v) = to_f64(m.as_str()) {
            return v;
        }
    }

    warn!(value = input, default, "failed to parse numeric value");
    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_inputs_pass_through() {
        assert_eq!(parse_numeric(&json!(123.45), None, 0.0), 123.45);
        assert_eq!(parse_numeric(&json!(-7), None, 0.0), -7.0);
    }

    #[test]
    fn unit_anchored_extraction() {
        assert_eq!(parse_numeric_str("123.45元", Some("元"), 0.0), 123.45);
        assert_eq!(
            parse_numeric_str("订单金额:456.78元", Some("元"), 0.0),
            456.78
        );
        // Unit before the number: the segment after the unit is consulted.
        assert_eq!(parse_numeric_str("共计 元99.5", Some("元"), 0.0), 99.5);
        // The unit-anchored number wins over an earlier unrelated number.
        assert_eq!(
            parse_numeric_str("第2笔 金额88.00元", Some("元"), 0.0),
            88.00
        );
    }

    #[test]
    fn comma_handling() {
        assert_eq!(parse_numeric_str("25,378.75", None, 0.0), 25378.75);
        assert_eq!(
            parse_numeric_str("2,225,378.75元", Some("元"), 0.0),
            2225378.75
        );
    }

    #[test]
    fn currency_glyphs_are_stripped() {
        assert_eq!(parse_numeric_str("¥ 1,200.50", None, 0.0), 1200.50);
        assert_eq!(parse_numeric_str("$42", None, 0.0), 42.0);
    }

    #[test]
    fn default_fallback() {
        assert_eq!(parse_numeric(&Value::Null, None, 0.0), 0.0);
        assert_eq!(parse_numeric(&json!({}), None, 0.0), 0.0);
        assert_eq!(parse_numeric_str("", None, 0.0), 0.0);
        assert_eq!(parse_numeric_str("元", Some("元"), 0.0), 0.0);
        assert_eq!(parse_numeric_str("x", None, -1.0), -1.0);
    }

    #[test]
    fn signs_and_bare_decimals() {
        assert_eq!(parse_numeric_str("-12.5元", Some("元"), 0.0), -12.5);
        assert_eq!(parse_numeric_str("+3", None, 0.0), 3.0);
        assert_eq!(parse_numeric_str(".5", None, 0.0), 0.5);
    }

    #[test]
    fn parser_is_stable_on_clean_strings() {
        let first = parse_numeric_str("25,378.75", None, 0.0);
        let again = parse_numeric_str(&first.to_string(), None, 0.0);
        assert_eq!(first, again);
    }
}
