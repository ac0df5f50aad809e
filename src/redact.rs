//! Pattern-based redaction of entry text
//!
//! Patterns are data: each one is a regex plus replacement text. They run in
//! list order and each sees the output of the previous one. Only the free-text
//! parts of an entry (category, message, string values in the context) are
//! redacted, so structured output such as JSON stays well formed.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::logging::LogEntry;

/// Built-in pattern catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Email,
    Phone,
    CreditCard,
    IpAddress,
    /// Bearer tokens and JSON Web Tokens
    Token,
    VehiclePlate,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Email,
        Preset::CreditCard,
        Preset::Phone,
        Preset::IpAddress,
        Preset::Token,
        Preset::VehiclePlate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Email => "email",
            Preset::Phone => "phone",
            Preset::CreditCard => "credit_card",
            Preset::IpAddress => "ip_address",
            Preset::Token => "token",
            Preset::VehiclePlate => "vehicle_plate",
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            Preset::Email => &EMAIL,
            Preset::Phone => &PHONE,
            Preset::CreditCard => &CREDIT_CARD,
            Preset::IpAddress => &IP_ADDRESS,
            Preset::Token => &TOKEN,
            Preset::VehiclePlate => &VEHICLE_PLATE,
        }
    }

    fn replacement(&self) -> &'static str {
        match self {
            Preset::Email => "[EMAIL_REDACTED]",
            Preset::Phone => "[PHONE_REDACTED]",
            Preset::CreditCard => "[CARD_REDACTED]",
            Preset::IpAddress => "[IP_REDACTED]",
            Preset::Token => "[TOKEN_REDACTED]",
            Preset::VehiclePlate => "[PLATE_REDACTED]",
        }
    }

    /// Extra check a match must pass before it is replaced
    fn check(&self) -> Option<MatchCheck> {
        match self {
            Preset::CreditCard => Some(MatchCheck::Luhn),
            _ => None,
        }
    }

    /// Build the redaction pattern for this preset
    pub fn pattern(&self) -> RedactionPattern {
        RedactionPattern {
            name: self.name().to_string(),
            regex: self.regex().clone(),
            replacement: self.replacement().to_string(),
            check: self.check(),
        }
    }
}

/// Post-match filter for presets whose regex alone is too broad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchCheck {
    Luhn,
}

impl MatchCheck {
    fn accepts(&self, candidate: &str) -> bool {
        match self {
            MatchCheck::Luhn => is_card_number(candidate),
        }
    }
}

/// 13 to 19 digits passing the Luhn checksum
fn is_card_number(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

// Pre-compiled preset patterns
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{2,3}\)?[\s.-]?\d{4,5}[\s.-]?\d{4}\b").unwrap()
});

static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").unwrap());

static IP_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap());

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:bearer\s+[A-Za-z0-9\-._~+/]+=*)|eyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+",
    )
    .unwrap()
});

static VEHICLE_PLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{3}-?\d[A-Z0-9]\d{2}\b").unwrap());

/// Serializable form of a custom pattern, as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRule {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
}

impl RedactionRule {
    /// Compile the rule into a pattern
    pub fn compile(&self) -> Result<RedactionPattern, ConfigError> {
        RedactionPattern::new(&self.name, &self.pattern, &self.replacement)
    }
}

/// A named matcher plus the text that replaces every match
#[derive(Debug, Clone)]
pub struct RedactionPattern {
    name: String,
    regex: Regex,
    replacement: String,
    check: Option<MatchCheck>,
}

impl RedactionPattern {
    /// Compile a custom pattern
    pub fn new(name: &str, pattern: &str, replacement: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.to_string(),
            regex,
            replacement: replacement.to_string(),
            check: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str) -> String {
        match self.check {
            Some(check) => self
                .regex
                .replace_all(text, |caps: &Captures| {
                    if check.accepts(&caps[0]) {
                        self.replacement.clone()
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned(),
            // NoExpand: replacement text is literal, `$` is not a group reference
            None => self
                .regex
                .replace_all(text, regex::NoExpand(&self.replacement))
                .into_owned(),
        }
    }
}

/// Ordered list of redaction patterns
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    patterns: Vec<RedactionPattern>,
}

impl Redactor {
    pub fn new(patterns: Vec<RedactionPattern>) -> Self {
        Self { patterns }
    }

    /// Build a redactor from presets followed by compiled custom rules
    pub fn from_config(presets: &[Preset], rules: &[RedactionRule]) -> Result<Self, ConfigError> {
        let mut patterns: Vec<RedactionPattern> = presets.iter().map(Preset::pattern).collect();
        for rule in rules {
            patterns.push(rule.compile()?);
        }
        Ok(Self { patterns })
    }

    /// Append a pattern; it runs after every existing one
    pub fn push(&mut self, pattern: RedactionPattern) {
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[RedactionPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Apply every pattern in order, each to the previous output
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.patterns {
            if pattern.regex.is_match(&out) {
                out = pattern.apply(&out);
            }
        }
        out
    }

    /// Copy of `entry` with category, message and context strings redacted
    ///
    /// Timestamp, level, session id and sequence are left alone.
    pub fn redact_entry(&self, entry: &LogEntry) -> LogEntry {
        let mut out = entry.clone();
        if self.patterns.is_empty() {
            return out;
        }
        out.category = self.redact(&entry.category);
        out.message = self.redact(&entry.message);
        if let Some(context) = out.context.as_mut() {
            for value in context.values_mut() {
                self.redact_value(value);
            }
        }
        out
    }

    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.redact(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.redact_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.redact_value(v)),
            _ => {}
        }
    }
}
