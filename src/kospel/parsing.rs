use serde::Deserialize;
use serde_aux::prelude::*;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use super::{RegisterKind, REGISTERS};

/// Envelope of every `/api/ekd/read` response.
#[derive(Deserialize, Debug)]
pub struct Payload {
    // The vendor sends this as a number or a numeric string; absent means ok.
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub status: i64,
    // Anything but a non-empty object (`[]`, `false`, `null`) means no data.
    #[serde(default)]
    pub regs: Option<Value>,
}

impl Payload {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// The register map, if the response carried a non-empty one.
    pub fn registers(&self) -> Option<&Map<String, Value>> {
        match &self.regs {
            Some(Value::Object(regs)) if !regs.is_empty() => Some(regs),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("register {0} is missing from the response")]
    MissingRegister(&'static str),
    #[error("register {register} has unparsable value {value}")]
    InvalidValue { register: &'static str, value: String },
}

/// A single formatted register value as written to the log.
#[derive(Debug, Clone, Copy)]
pub enum Field {
    Int(i64),
    Float(f64),
}

impl Field {
    fn as_f64(self) -> f64 {
        match self {
            Field::Int(value) => value as f64,
            Field::Float(value) => value,
        }
    }

    pub fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }

    /// Integer first, decimal second: the order the log decoder tries.
    pub fn parse(raw: &str) -> Option<Field> {
        raw.parse::<i64>()
            .map(Field::Int)
            .or_else(|_| raw.parse::<f64>().map(Field::Float))
            .ok()
    }
}

// Numeric comparison, so `21` read back from a log line equals `21.0`.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Field::Int(value) => value.to_string(),
            Field::Float(value) => {
                let text = value.to_string();
                if value.is_finite() && !text.contains('.') {
                    format!("{text}.0")
                } else {
                    text
                }
            }
        };
        f.pad(&text)
    }
}

/// Register values in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading(Vec<Field>);

impl Reading {
    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    /// True when no field carries a non-zero value; such readings are never stored.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|field| field.is_zero())
    }
}

impl From<Vec<Field>> for Reading {
    fn from(fields: Vec<Field>) -> Self {
        Reading(fields)
    }
}

/// Reads the last digit of a raw temperature as tenths: `"215"` is `21.5`.
pub fn format_float(raw: &str) -> Option<f64> {
    let last = raw.chars().last()?;
    let head = &raw[..raw.len() - last.len_utf8()];
    format!("{head}.{last}").trim().parse().ok()
}

fn raw_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn format_int(value: &Value) -> Option<i64> {
    match value {
        Value::String(text) => text.trim().parse().ok(),
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f.trunc() as i64)),
        _ => None,
    }
}

pub fn format_payload(regs: &Map<String, Value>) -> Result<Reading, FormatError> {
    let mut fields = Vec::with_capacity(REGISTERS.len());
    for &(register, _, kind) in REGISTERS {
        let value = regs.get(register).ok_or(FormatError::MissingRegister(register))?;
        let field = match kind {
            RegisterKind::Temperature => raw_text(value).as_deref().and_then(format_float).map(Field::Float),
            RegisterKind::Integer => format_int(value).map(Field::Int),
        };
        let field = field.ok_or_else(|| FormatError::InvalidValue {
            register,
            value: value.to_string(),
        })?;
        fields.push(field);
    }
    Ok(Reading(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_value, json};

    fn sample_regs() -> Map<String, Value> {
        let value = json!({
            "TEMP_IN": "215", "TEMP_OUT": "210", "FACTOR_SETTING": "180",
            "TEMP_ROOM": "205", "TEMP_EXT": "050", "HU_INCLUDED_POWER": "1",
            "PRESSURE": "12", "FLOW": "3", "FLAG_CH_PUMP_OFF_ON": "1",
            "FLAG_IN_NA": "0", "FLAG_IN_RP": "0", "FLAG_IN_FUN": "0",
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn format_float_moves_last_digit_behind_point() {
        assert_eq!(format_float("215"), Some(21.5));
        assert_eq!(format_float("1003"), Some(100.3));
        assert_eq!(format_float("050"), Some(5.0));
        assert_eq!(format_float("-15"), Some(-1.5));
        assert_eq!(format_float("7"), Some(0.7));
    }

    #[test]
    fn format_float_rejects_garbage() {
        assert_eq!(format_float(""), None);
        assert_eq!(format_float("2a5"), None);
        assert_eq!(format_float("21.5"), None);
    }

    #[test]
    fn formats_sample_payload_in_canonical_order() {
        let reading = format_payload(&sample_regs()).unwrap();
        let rendered: Vec<String> = reading.fields().iter().map(|f| f.to_string()).collect();
        assert_eq!(
            rendered,
            ["21.5", "21.0", "18.0", "20.5", "5.0", "1", "12", "3", "1", "0", "0", "0"]
        );
    }

    #[test]
    fn numeric_registers_accept_json_numbers() {
        let mut regs = sample_regs();
        regs.insert("TEMP_IN".into(), json!(215));
        regs.insert("PRESSURE".into(), json!(12));
        let reading = format_payload(&regs).unwrap();
        assert_eq!(reading.fields()[0], Field::Float(21.5));
        assert_eq!(reading.fields()[6], Field::Int(12));
    }

    #[test]
    fn missing_register_is_reported_by_name() {
        let mut regs = sample_regs();
        regs.remove("FLOW");
        assert_eq!(format_payload(&regs), Err(FormatError::MissingRegister("FLOW")));
    }

    #[test]
    fn unparsable_register_is_an_error() {
        let mut regs = sample_regs();
        regs.insert("PRESSURE".into(), json!("high"));
        assert!(matches!(
            format_payload(&regs),
            Err(FormatError::InvalidValue { register: "PRESSURE", .. })
        ));
    }

    #[test]
    fn fields_compare_numerically() {
        assert_eq!(Field::Int(21), Field::Float(21.0));
        assert_ne!(Field::Int(21), Field::Float(21.5));
        assert_eq!(Field::parse("21"), Some(Field::Int(21)));
        assert_eq!(Field::parse("21.5"), Some(Field::Float(21.5)));
        assert_eq!(Field::parse(""), None);
    }

    #[test]
    fn blank_reading_detection() {
        let zeros = Reading::from(vec![Field::Float(0.0), Field::Int(0)]);
        assert!(zeros.is_blank());
        let one = Reading::from(vec![Field::Float(0.0), Field::Int(1)]);
        assert!(!one.is_blank());
    }

    #[test]
    fn payload_status_accepts_strings_and_defaults_to_ok() {
        let payload = from_value::<Payload>(json!({"status": "1"})).unwrap();
        assert!(!payload.is_ok());
        assert!(payload.registers().is_none());

        let payload = from_value::<Payload>(json!({"regs": {}})).unwrap();
        assert!(payload.is_ok());
        assert!(payload.registers().is_none());

        for regs in [json!([]), json!(false), json!(null), json!("")] {
            let payload = from_value::<Payload>(json!({"status": 0, "regs": regs})).unwrap();
            assert!(payload.registers().is_none());
        }

        let payload = from_value::<Payload>(json!({"status": 0, "regs": sample_regs()})).unwrap();
        assert!(payload.is_ok());
        assert_eq!(payload.registers().map(|r| r.len()), Some(12));
    }
}
