use super::Element;
use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};

/// Significant digits used on the wire, matching `%.20g`
const WIRE_PRECISION: i32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct NumberElement {
    pub name: String,
    pub label: String,
    /// printf-style display hint from the driver
    pub format: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
}

impl NumberElement {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            format: "%g".to_string(),
            min: 0.0,
            max: 0.0,
            step: 0.0,
            value,
        }
    }

    /// True when the driver declared a usable range and `value` is outside it
    pub fn out_of_range(&self, value: f64) -> bool {
        self.min < self.max && (value < self.min || value > self.max)
    }
}

pub(crate) struct NumberUpdate {
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
}

fn optional_limit(
    child: &ProtocolElement,
    key: &str,
    device: &str,
    property: &str,
) -> IndiResult<Option<f64>> {
    match child.attribute(key) {
        Some(raw) => parse_number(raw).map(Some).ok_or_else(|| {
            IndiError::invalid(device, property, format!("invalid {} '{}'", key, raw))
        }),
        None => Ok(None),
    }
}

impl Element for NumberElement {
    type Update = NumberUpdate;

    fn name(&self) -> &str {
        &self.name
    }

    fn from_definition(child: &ProtocolElement, device: &str, property: &str) -> IndiResult<Self> {
        let name = child.name().unwrap_or_default();
        let value = parse_number(child.text()).unwrap_or_else(|| {
            tracing::warn!(
                "{}.{}: {}: invalid number '{}', using 0",
                device,
                property,
                name,
                child.text()
            );
            0.0
        });
        Ok(Self {
            name: name.to_string(),
            label: child.non_empty_attribute("label").unwrap_or(name).to_string(),
            format: child.non_empty_attribute("format").unwrap_or("%g").to_string(),
            min: optional_limit(child, "min", device, property)?.unwrap_or(0.0),
            max: optional_limit(child, "max", device, property)?.unwrap_or(0.0),
            step: optional_limit(child, "step", device, property)?.unwrap_or(0.0),
            value,
        })
    }

    fn stage_update(
        &self,
        child: &ProtocolElement,
        device: &str,
        property: &str,
    ) -> IndiResult<Option<NumberUpdate>> {
        let value = parse_number(child.text()).ok_or_else(|| {
            IndiError::invalid(
                device,
                property,
                format!("{}: invalid number '{}'", self.name, child.text()),
            )
        })?;
        Ok(Some(NumberUpdate {
            value,
            min: optional_limit(child, "min", device, property)?,
            max: optional_limit(child, "max", device, property)?,
        }))
    }

    fn commit_update(&mut self, update: NumberUpdate) {
        self.value = update.value;
        if let Some(min) = update.min {
            self.min = min;
        }
        if let Some(max) = update.max {
            self.max = max;
        }
    }
}

/// Parse a decimal or sexagesimal (`-12:30:15.5`, `12 30`, `12;30`) number
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = text.parse::<f64>() {
        return Some(value);
    }

    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let mut value = 0.0;
    let mut scale = 1.0;
    let mut parts = 0;
    for part in body
        .split(|c: char| c == ':' || c == ';' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        if parts == 3 || part.starts_with(['-', '+']) {
            return None;
        }
        let component: f64 = part.parse().ok()?;
        value += component / scale;
        scale *= 60.0;
        parts += 1;
    }
    if parts < 2 {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Format like C's `%.20g`
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.*e}", (WIRE_PRECISION - 1) as usize, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= WIRE_PRECISION {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            strip_trailing_zeros(mantissa),
            sign,
            exponent.abs()
        )
    } else {
        let decimals = (WIRE_PRECISION - 1 - exponent) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn strip_trailing_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_matches_printf_g20() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(0.1), "0.10000000000000000555");
        assert_eq!(format_number(1e20), "1e+20");
        assert_eq!(format_number(9.5367431640625e-7), "9.5367431640625e-07");
        assert_eq!(format_number(0.0001220703125), "0.0001220703125");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn test_format_number_round_trips() {
        for value in [3.141592653589793, -1234567.891, 6.02214076e23, 1.0 / 3.0] {
            assert_eq!(parse_number(&format_number(value)), Some(value));
        }
    }

    #[test]
    fn test_parse_number_decimal_and_sexagesimal() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("12:30"), Some(12.5));
        assert_eq!(parse_number("12 30"), Some(12.5));
        let southern = parse_number("-10:30:36").unwrap();
        assert!((southern + 10.51).abs() < 1e-12);
        assert_eq!(parse_number("+5;15"), Some(5.25));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("1:2:3:4"), None);
        assert_eq!(parse_number("1:-2"), None);
    }

    #[test]
    fn test_out_of_range_requires_declared_range() {
        let mut element = NumberElement::new("X", 0.0);
        assert!(!element.out_of_range(1e9));
        element.min = -10.0;
        element.max = 10.0;
        assert!(element.out_of_range(10.5));
        assert!(!element.out_of_range(10.0));
    }
}
