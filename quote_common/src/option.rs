//! Option contract metadata and the resolver seam.
//!
//! The feed does not know how instrument ids encode contract details; it asks an
//! [`OptionResolver`]. `SymbolOptionResolver` understands the common
//! `<UNDERLYING><DDMONYY><C|P><STRIKE>` trading-symbol shape, optionally prefixed
//! with `EXCHANGE|`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum OptionType {
    /// Right to buy.
    #[strum(to_string = "call", serialize = "c", serialize = "ce")]
    Call,
    /// Right to sell.
    #[strum(to_string = "put", serialize = "p", serialize = "pe")]
    Put,
}

/// Contract details needed by the nearest-premium search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying symbol, e.g. `NIFTY`.
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Call or put.
    pub option_type: OptionType,
    /// Strike price.
    pub strike: f64,
}

/// Resolves an instrument id to option contract metadata.
pub trait OptionResolver: Send + Sync {
    /// Contract details, or `None` when the instrument is not an option.
    fn resolve(&self, instrument: &str) -> Option<OptionContract>;
}

impl<F> OptionResolver for F
where
    F: Fn(&str) -> Option<OptionContract> + Send + Sync,
{
    fn resolve(&self, instrument: &str) -> Option<OptionContract> {
        self(instrument)
    }
}

/// Parses option contracts out of trading symbols like `NFO|NIFTY28DEC23C21000`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolOptionResolver;

/// Length of the `DDMONYY` expiry part.
const EXPIRY_LEN: usize = 7;

impl OptionResolver for SymbolOptionResolver {
    fn resolve(&self, instrument: &str) -> Option<OptionContract> {
        let symbol = instrument
            .rsplit_once('|')
            .map_or(instrument, |(_, symbol)| symbol)
            .trim();

        let strike_start = symbol
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .last()
            .map(|(i, _)| i)?;
        let strike: f64 = symbol[strike_start..].parse().ok()?;

        let type_index = strike_start.checked_sub(1)?;
        let option_type = match symbol.as_bytes()[type_index].to_ascii_uppercase() {
            b'C' => OptionType::Call,
            b'P' => OptionType::Put,
            _ => return None,
        };

        let expiry_start = type_index.checked_sub(EXPIRY_LEN)?;
        if expiry_start == 0 || !symbol.is_char_boundary(expiry_start) {
            return None;
        }
        let expiry = NaiveDate::parse_from_str(&symbol[expiry_start..type_index], "%d%b%y").ok()?;

        Some(OptionContract {
            underlying: symbol[..expiry_start].to_string(),
            expiry,
            option_type,
            strike,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_and_put_symbols() {
        let call = SymbolOptionResolver.resolve("NFO|NIFTY28DEC23C21000").unwrap();
        assert_eq!(call.underlying, "NIFTY");
        assert_eq!(call.expiry, NaiveDate::from_ymd_opt(2023, 12, 28).unwrap());
        assert_eq!(call.option_type, OptionType::Call);
        assert_eq!(call.strike, 21000.0);

        let put = SymbolOptionResolver.resolve("BANKNIFTY04JAN24P47500").unwrap();
        assert_eq!(put.underlying, "BANKNIFTY");
        assert_eq!(put.option_type, OptionType::Put);
        assert_eq!(put.expiry, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
    }

    #[test]
    fn non_options_resolve_to_none() {
        assert!(SymbolOptionResolver.resolve("NSE|NIFTY INDEX").is_none());
        assert!(SymbolOptionResolver.resolve("NSE|SBIN-EQ").is_none());
        assert!(SymbolOptionResolver.resolve("NFO|NIFTY28DEC23F").is_none());
        assert!(SymbolOptionResolver.resolve("NFO|NIFTY99XYZ23C100").is_none());
    }

    #[test]
    fn option_type_parses_short_forms() {
        assert_eq!("c".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("PE".parse::<OptionType>().unwrap(), OptionType::Put);
        assert_eq!(OptionType::Call.to_string(), "call");
    }
}
