//! Recipient parsing and number normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Minimum number of digits for a number to be considered dialable.
pub const MIN_NUMBER_DIGITS: usize = 7;

/// Normalized phone number: digits only, no leading `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientNumber(String);

impl RecipientNumber {
    /// Normalizes `raw` and rejects anything shorter than [`MIN_NUMBER_DIGITS`].
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < MIN_NUMBER_DIGITS {
            return None;
        }
        Some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RecipientNumber {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for RecipientNumber {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for RecipientNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RecipientNumber> for String {
    fn from(value: RecipientNumber) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Input line exactly as supplied, used to rebuild a filtered list.
    pub raw_line: String,
    pub number: RecipientNumber,
    #[serde(default)]
    pub value_one: String,
    #[serde(default)]
    pub value_two: String,
}

impl Recipient {
    /// Parses `number[,valueOne[,valueTwo]]`. Returns `None` for blank or
    /// undialable lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let mut fields = trimmed.split(',');
        let number = RecipientNumber::parse(fields.next().unwrap_or_default())?;
        let value_one = fields.next().map(str::trim).unwrap_or_default().to_string();
        let value_two = fields.next().map(str::trim).unwrap_or_default().to_string();
        Some(Self {
            raw_line: line.to_string(),
            number,
            value_one,
            value_two,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedRecipients {
    pub recipients: Vec<Recipient>,
    /// Non-blank lines that did not yield a dialable number.
    pub rejected: Vec<String>,
}

/// Parses newline separated input, keeping order and dropping invalid lines.
pub fn parse_recipients(input: &str) -> ParsedRecipients {
    let mut out = ParsedRecipients::default();
    for line in input.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match Recipient::parse_line(line) {
            Some(recipient) => out.recipients.push(recipient),
            None => {
                tracing::debug!(line, "skipped invalid recipient line");
                out.rejected.push(line.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_prefix_and_separators_share_identity() {
        let a = RecipientNumber::parse("+7 999 123-45-67").expect("valid number");
        let b = RecipientNumber::parse("79991234567").expect("valid number");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "79991234567");
    }

    #[test]
    fn short_numbers_are_rejected() {
        assert!(RecipientNumber::parse("+123456").is_none());
        assert!(RecipientNumber::parse("abc").is_none());
        assert!(RecipientNumber::parse("1234567").is_some());
    }

    #[test]
    fn parse_line_trims_values_and_keeps_raw_line() {
        let r = Recipient::parse_line("  +79991234567 , Анна ,  Москва ").expect("valid line");
        assert_eq!(r.number.as_str(), "79991234567");
        assert_eq!(r.value_one, "Анна");
        assert_eq!(r.value_two, "Москва");
        assert_eq!(r.raw_line, "  +79991234567 , Анна ,  Москва ");
    }

    #[test]
    fn missing_values_default_to_empty() {
        let r = Recipient::parse_line("79991234567").expect("valid line");
        assert!(r.value_one.is_empty());
        assert!(r.value_two.is_empty());
    }

    #[test]
    fn parse_recipients_preserves_order_and_reports_rejects() {
        let parsed = parse_recipients("79990000001,A\n\n12345\n+79990000002,B,C\n");
        let numbers: Vec<&str> = parsed
            .recipients
            .iter()
            .map(|r| r.number.as_str())
            .collect();
        assert_eq!(numbers, vec!["79990000001", "79990000002"]);
        assert_eq!(parsed.rejected, vec!["12345".to_string()]);
    }
}
