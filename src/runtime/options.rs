//! Session configuration: user options, channel mapping, metadata
//!
//! Options are declared by each decoder as [`OptionSpec`]s (id, default,
//! allowed values) and validated once at session start. Anything wrong with
//! them is fatal: no sample is read until the configuration is valid.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use super::errors::SessionError;

/// Value of a decoder option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(Cow<'static, str>),
}

impl OptionValue {
    /// String value usable in `static` option tables
    pub const fn str(value: &'static str) -> Self {
        OptionValue::Str(Cow::Borrowed(value))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Int(_) => "integer",
            OptionValue::Float(_) => "number",
            OptionValue::Str(_) => "string",
        }
    }

    /// Convert a user-supplied value to the type of `default`.
    /// Strings are parsed; integers widen to floats.
    fn coerce_to(&self, default: &OptionValue) -> Option<OptionValue> {
        match (default, self) {
            (OptionValue::Int(_), OptionValue::Int(v)) => Some(OptionValue::Int(*v)),
            (OptionValue::Int(_), OptionValue::Str(s)) => {
                parse_int(s.trim()).map(OptionValue::Int)
            }
            (OptionValue::Float(_), OptionValue::Float(v)) => Some(OptionValue::Float(*v)),
            (OptionValue::Float(_), OptionValue::Int(v)) => Some(OptionValue::Float(*v as f64)),
            (OptionValue::Float(_), OptionValue::Str(s)) => {
                s.trim().parse().ok().map(OptionValue::Float)
            }
            (OptionValue::Str(_), OptionValue::Str(s)) => Some(OptionValue::Str(s.clone())),
            _ => None,
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Float(v) => write!(f, "{}", v),
            OptionValue::Str(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(Cow::Owned(value.to_string()))
    }
}

/// Declaration of one decoder option
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub id: &'static str,
    pub desc: &'static str,
    pub default: OptionValue,
    /// Allowed values; empty means any value of the default's type
    pub values: &'static [OptionValue],
}

/// Validated option values for one session
#[derive(Debug, Clone)]
pub struct Options {
    decoder: String,
    values: BTreeMap<&'static str, OptionValue>,
}

impl Options {
    /// Validate user-supplied values against the declared schema.
    ///
    /// Unset options take their default.
    pub fn validate(
        decoder: &str,
        specs: &[OptionSpec],
        user: &BTreeMap<String, OptionValue>,
    ) -> Result<Self, SessionError> {
        if let Some(unknown) = user.keys().find(|id| !specs.iter().any(|s| s.id == id.as_str())) {
            return Err(SessionError::UnknownOption {
                decoder: decoder.to_string(),
                option: unknown.clone(),
            });
        }

        let mut values = BTreeMap::new();
        for spec in specs {
            let value = match user.get(spec.id) {
                None => spec.default.clone(),
                Some(given) => {
                    let value =
                        given
                            .coerce_to(&spec.default)
                            .ok_or_else(|| SessionError::OptionType {
                                decoder: decoder.to_string(),
                                option: spec.id.to_string(),
                                expected: spec.default.type_name(),
                                value: given.to_string(),
                            })?;
                    if !spec.values.is_empty() && !spec.values.contains(&value) {
                        return Err(SessionError::InvalidOption {
                            decoder: decoder.to_string(),
                            option: spec.id.to_string(),
                            value: value.to_string(),
                            allowed: spec
                                .values
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join(", "),
                        });
                    }
                    value
                }
            };
            values.insert(spec.id, value);
        }

        Ok(Self {
            decoder: decoder.to_string(),
            values,
        })
    }

    fn get(&self, id: &str) -> Result<&OptionValue, SessionError> {
        self.values.get(id).ok_or_else(|| {
            SessionError::Contract(format!(
                "decoder '{}' read undeclared option '{}'",
                self.decoder, id
            ))
        })
    }

    fn wrong_type(&self, id: &str, expected: &str) -> SessionError {
        SessionError::Contract(format!(
            "decoder '{}' read option '{}' as {}",
            self.decoder, id, expected
        ))
    }

    pub fn int(&self, id: &str) -> Result<i64, SessionError> {
        match self.get(id)? {
            OptionValue::Int(v) => Ok(*v),
            _ => Err(self.wrong_type(id, "integer")),
        }
    }

    pub fn float(&self, id: &str) -> Result<f64, SessionError> {
        match self.get(id)? {
            OptionValue::Float(v) => Ok(*v),
            OptionValue::Int(v) => Ok(*v as f64),
            _ => Err(self.wrong_type(id, "number")),
        }
    }

    pub fn str(&self, id: &str) -> Result<&str, SessionError> {
        match self.get(id)? {
            OptionValue::Str(v) => Ok(v),
            _ => Err(self.wrong_type(id, "string")),
        }
    }

    /// Positive option value, or an `OptionRange` error naming the option
    pub fn positive_float(&self, id: &str) -> Result<f64, SessionError> {
        let value = self.float(id)?;
        if value > 0.0 && value.is_finite() {
            Ok(value)
        } else {
            Err(SessionError::OptionRange {
                decoder: self.decoder.clone(),
                option: id.to_string(),
                reason: format!("must be positive, got {}", value),
            })
        }
    }
}

/// Out-of-band facts delivered to a decoder before decoding starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metadata {
    /// Capture sample rate in Hz
    Samplerate(u64),
}

/// Per-session configuration supplied by the host
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    samplerate: Option<u64>,
    channels: BTreeMap<String, usize>,
    options: BTreeMap<String, OptionValue>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samplerate(mut self, samplerate: u64) -> Self {
        self.samplerate = Some(samplerate);
        self
    }

    /// Map a logical channel name to a physical line
    pub fn channel(mut self, name: impl Into<String>, line: usize) -> Self {
        self.channels.insert(name.into(), line);
        self
    }

    pub fn option(mut self, id: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(id.into(), value.into());
        self
    }

    pub fn samplerate(&self) -> Option<u64> {
        self.samplerate
    }

    pub fn channels(&self) -> &BTreeMap<String, usize> {
        &self.channels
    }

    pub fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    /// Fill in the sample rate unless one was set explicitly
    pub fn samplerate_or(mut self, samplerate: Option<u64>) -> Self {
        if self.samplerate.is_none() {
            self.samplerate = samplerate;
        }
        self
    }
}

/// Parse a sample rate such as "50 MHz", "100kHz", "2.5 MHz" or "1000" into Hz
pub fn parse_samplerate(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let multiplier = match unit.trim() {
        "GHz" | "G" => 1_000_000_000.0,
        "MHz" | "M" => 1_000_000.0,
        "KHz" | "kHz" | "k" | "K" => 1_000.0,
        "Hz" | "" => 1.0,
        _ => return None,
    };
    let hz = value * multiplier;
    (hz >= 1.0).then(|| hz.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[OptionSpec] = &[
        OptionSpec {
            id: "mode",
            desc: "Mode",
            default: OptionValue::Int(0),
            values: &[OptionValue::Int(0), OptionValue::Int(1)],
        },
        OptionSpec {
            id: "edge",
            desc: "Edge",
            default: OptionValue::str("falling"),
            values: &[OptionValue::str("rising"), OptionValue::str("falling")],
        },
        OptionSpec {
            id: "baudrate",
            desc: "Baud rate",
            default: OptionValue::Float(9600.0),
            values: &[],
        },
    ];

    fn user(pairs: &[(&str, OptionValue)]) -> BTreeMap<String, OptionValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_defaults_applied() {
        let options = Options::validate("test", SPECS, &BTreeMap::new()).unwrap();
        assert_eq!(options.int("mode").unwrap(), 0);
        assert_eq!(options.str("edge").unwrap(), "falling");
        assert_eq!(options.float("baudrate").unwrap(), 9600.0);
    }

    #[test]
    fn test_value_outside_allowed_set() {
        let err = Options::validate("test", SPECS, &user(&[("mode", OptionValue::Int(2))]))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOption { ref option, .. } if option == "mode"));
        assert!(err.to_string().contains("[0, 1]"));
    }

    #[test]
    fn test_string_values_are_parsed() {
        let options = Options::validate(
            "test",
            SPECS,
            &user(&[("mode", "1".into()), ("baudrate", "115200".into())]),
        )
        .unwrap();
        assert_eq!(options.int("mode").unwrap(), 1);
        assert_eq!(options.float("baudrate").unwrap(), 115200.0);
    }

    #[test]
    fn test_int_widens_to_float() {
        let options =
            Options::validate("test", SPECS, &user(&[("baudrate", OptionValue::Int(300))])).unwrap();
        assert_eq!(options.float("baudrate").unwrap(), 300.0);
    }

    #[test]
    fn test_type_mismatch() {
        let err = Options::validate("test", SPECS, &user(&[("mode", "fast".into())])).unwrap_err();
        assert!(matches!(err, SessionError::OptionType { expected: "integer", .. }));

        let err = Options::validate("test", SPECS, &user(&[("edge", OptionValue::Int(1))]))
            .unwrap_err();
        assert!(matches!(err, SessionError::OptionType { expected: "string", .. }));
    }

    #[test]
    fn test_unknown_option() {
        let err = Options::validate("test", SPECS, &user(&[("parity", "odd".into())])).unwrap_err();
        assert!(matches!(err, SessionError::UnknownOption { .. }));
    }

    #[test]
    fn test_undeclared_read_is_contract_error() {
        let options = Options::validate("test", SPECS, &BTreeMap::new()).unwrap();
        assert!(matches!(options.int("nope"), Err(SessionError::Contract(_))));
        assert!(matches!(options.str("mode"), Err(SessionError::Contract(_))));
    }

    #[test]
    fn test_positive_float() {
        let options =
            Options::validate("test", SPECS, &user(&[("baudrate", OptionValue::Float(0.0))]))
                .unwrap();
        assert!(matches!(
            options.positive_float("baudrate"),
            Err(SessionError::OptionRange { .. })
        ));
    }

    #[test]
    fn test_parse_samplerate() {
        assert_eq!(parse_samplerate("50 MHz"), Some(50_000_000));
        assert_eq!(parse_samplerate("1 GHz"), Some(1_000_000_000));
        assert_eq!(parse_samplerate("100 kHz"), Some(100_000));
        assert_eq!(parse_samplerate("100 KHz"), Some(100_000));
        assert_eq!(parse_samplerate("2.5MHz"), Some(2_500_000));
        assert_eq!(parse_samplerate("1000"), Some(1000));
        assert_eq!(parse_samplerate("1000 Hz"), Some(1000));
        assert_eq!(parse_samplerate("50 mhz"), None);
        assert_eq!(parse_samplerate("abc MHz"), None);
        assert_eq!(parse_samplerate(""), None);
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new()
            .channel("scl", 0)
            .channel("sda", 1)
            .option("address_format", "unshifted")
            .samplerate_or(Some(1_000_000));
        assert_eq!(config.samplerate(), Some(1_000_000));
        assert_eq!(config.channels().get("sda"), Some(&1));

        let config = config.with_samplerate(2_000_000).samplerate_or(Some(5));
        assert_eq!(config.samplerate(), Some(2_000_000));
    }
}
