//! Instrument identifiers and the instrument ↔ `exchange|token` mapping.

use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::result::Result;

/// Broker-side key of an instrument: `exchange|token`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    /// Exchange segment, e.g. `NSE` or `NFO`.
    pub exchange: String,
    /// Scrip token assigned by the exchange.
    pub token: String,
}

impl InstrumentKey {
    /// Creates a key from its two parts.
    pub fn new(exchange: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            token: token.into(),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.exchange, self.token)
    }
}

impl FromStr for InstrumentKey {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('|') {
            Some((exchange, token)) if !exchange.is_empty() && !token.is_empty() => {
                Ok(InstrumentKey::new(exchange.trim(), token.trim()))
            }
            _ => Err(FeedError::ParseMappings(format!(
                "expected `exchange|token`, got `{}`",
                s
            ))),
        }
    }
}

/// Parses a token mapping file.
///
/// Each non-empty line holds `instrument,exchange|token`. Lines starting with `#`
/// are comments. Returns an error on the first malformed line.
pub fn parse_token_mappings<R: BufRead>(reader: R) -> Result<HashMap<String, InstrumentKey>> {
    let mut mappings = HashMap::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(FeedError::Io)?;
        let trimmed_line = line.trim();
        if trimmed_line.is_empty() || trimmed_line.starts_with('#') {
            continue;
        }

        let (instrument, key) = trimmed_line.split_once(',').ok_or_else(|| {
            FeedError::ParseMappings(format!("line {}: missing `,` separator", index + 1))
        })?;
        let instrument = instrument.trim();
        if instrument.is_empty() {
            return Err(FeedError::ParseMappings(format!(
                "line {}: empty instrument id",
                index + 1
            )));
        }
        mappings.insert(instrument.to_string(), key.parse::<InstrumentKey>()?);
    }
    Ok(mappings)
}

/// Immutable bijection between instrument ids and broker keys.
///
/// Built once for the requested instrument set; every requested instrument must
/// resolve or construction fails with [`FeedError::Configuration`].
#[derive(Debug, Clone)]
pub struct TokenMapping {
    by_instrument: HashMap<String, InstrumentKey>,
    by_key: HashMap<InstrumentKey, String>,
}

impl TokenMapping {
    /// Restricts `mappings` to `instruments`.
    pub fn new<I, S>(mappings: &HashMap<String, InstrumentKey>, instruments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_instrument = HashMap::new();
        let mut by_key = HashMap::new();
        let mut missing = Vec::new();

        for instrument in instruments {
            let instrument = instrument.as_ref();
            let Some(key) = mappings.get(instrument) else {
                missing.push(instrument.to_string());
                continue;
            };
            if let Some(other) = by_key.get(key) {
                if other != instrument {
                    return Err(FeedError::ParseMappings(format!(
                        "token {} is mapped by both {} and {}",
                        key, other, instrument
                    )));
                }
                continue;
            }
            by_key.insert(key.clone(), instrument.to_string());
            by_instrument.insert(instrument.to_string(), key.clone());
        }

        if !missing.is_empty() {
            missing.sort();
            return Err(FeedError::Configuration(missing));
        }
        Ok(Self {
            by_instrument,
            by_key,
        })
    }

    /// Uses every entry of `mappings`.
    pub fn from_all(mappings: &HashMap<String, InstrumentKey>) -> Result<Self> {
        Self::new(mappings, mappings.keys())
    }

    /// Broker key for an instrument id.
    pub fn key_for(&self, instrument: &str) -> Option<&InstrumentKey> {
        self.by_instrument.get(instrument)
    }

    /// Instrument id for a broker key.
    pub fn instrument_for(&self, key: &InstrumentKey) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    /// All mapped broker keys.
    pub fn keys(&self) -> impl Iterator<Item = &InstrumentKey> {
        self.by_key.keys()
    }

    /// All mapped instrument ids.
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.by_instrument.keys().map(String::as_str)
    }

    /// Number of mapped instruments.
    pub fn len(&self) -> usize {
        self.by_instrument.len()
    }

    /// `true` when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.by_instrument.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn mappings() -> HashMap<String, InstrumentKey> {
        let file = "# instrument,exchange|token\n\
                    NSE|NIFTY INDEX,NSE|26000\n\
                    \n\
                    NFO|NIFTY28DEC23C21000, NFO|43651\n";
        parse_token_mappings(Cursor::new(file)).unwrap()
    }

    #[test]
    fn parses_mapping_file_skipping_comments() {
        let mappings = mappings();
        assert_eq!(mappings.len(), 2);
        assert_eq!(
            mappings["NFO|NIFTY28DEC23C21000"],
            InstrumentKey::new("NFO", "43651")
        );
    }

    #[test]
    fn rejects_line_without_separator() {
        let err = parse_token_mappings(Cursor::new("NSE|26000\n")).unwrap_err();
        assert!(matches!(err, FeedError::ParseMappings(_)));
    }

    #[test]
    fn builds_bijection_for_requested_set() {
        let mapping = TokenMapping::new(&mappings(), ["NSE|NIFTY INDEX"]).unwrap();
        assert_eq!(mapping.len(), 1);
        let key = InstrumentKey::new("NSE", "26000");
        assert_eq!(mapping.key_for("NSE|NIFTY INDEX"), Some(&key));
        assert_eq!(mapping.instrument_for(&key), Some("NSE|NIFTY INDEX"));
        assert!(mapping.key_for("NFO|NIFTY28DEC23C21000").is_none());
    }

    #[test]
    fn missing_instrument_is_configuration_error() {
        let err = TokenMapping::new(&mappings(), ["NSE|NIFTY INDEX", "NSE|SBIN-EQ"]).unwrap_err();
        match err {
            FeedError::Configuration(missing) => assert_eq!(missing, vec!["NSE|SBIN-EQ"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_token_is_rejected() {
        let mut mappings = mappings();
        mappings.insert("ALIAS".to_string(), InstrumentKey::new("NSE", "26000"));
        let err = TokenMapping::new(&mappings, ["NSE|NIFTY INDEX", "ALIAS"]).unwrap_err();
        assert!(matches!(err, FeedError::ParseMappings(_)));
    }

    #[test]
    fn key_round_trips_through_display() {
        let key: InstrumentKey = "NFO|43651".parse().unwrap();
        assert_eq!(key.to_string(), "NFO|43651");
        assert!("NFO43651".parse::<InstrumentKey>().is_err());
    }
}
