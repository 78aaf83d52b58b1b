//! Nearest-premium option search over the aggregator cache.

use chrono::NaiveDate;
use quote_common::{OptionResolver, OptionType, TokenMapping};

use crate::aggregator::QuoteAggregator;
use crate::bars::instrument_name;

/// Option whose last price is closest to the requested premium.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestOption {
    /// Instrument id.
    pub instrument: String,
    /// Last traded price.
    pub price: f64,
}

/// Finds the cached option of `option_type` expiring on `expiry` whose last
/// price is closest to `premium`.
///
/// Instruments the resolver does not recognize as options are skipped. Equal
/// distances go to the lexicographically smallest instrument id, so the result
/// does not depend on cache iteration order.
pub fn nearest_premium(
    aggregator: &QuoteAggregator,
    mapping: &TokenMapping,
    resolver: &dyn OptionResolver,
    expiry: NaiveDate,
    option_type: OptionType,
    premium: f64,
) -> Option<NearestOption> {
    let mut nearest: Option<(f64, NearestOption)> = None;

    for (key, cached) in aggregator.snapshot() {
        let instrument = instrument_name(mapping, &key);
        let Some(contract) = resolver.resolve(&instrument) else {
            continue;
        };
        if contract.expiry != expiry || contract.option_type != option_type {
            continue;
        }

        let price = cached.record.last_price;
        let difference = (price - premium).abs();
        let closer = match &nearest {
            None => true,
            Some((best, current)) => {
                difference < *best || (difference == *best && instrument < current.instrument)
            }
        };
        if closer {
            nearest = Some((difference, NearestOption { instrument, price }));
        }
    }
    nearest.map(|(_, option)| option)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::{aggregator, message};
    use quote_common::instruments::parse_token_mappings;
    use quote_common::{OptionContract, RawTick, SymbolOptionResolver};
    use std::io::Cursor;

    const MAPPINGS: &str = "\
NFO|NIFTY28DEC23C21000,NFO|1001
NFO|NIFTY28DEC23C21100,NFO|1002
NFO|NIFTY28DEC23P21000,NFO|1003
NFO|NIFTY04JAN24C21000,NFO|1004
NSE|NIFTY INDEX,NSE|26000
";

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 12, 28).unwrap()
    }

    fn cache(prices: &[(&str, f64)]) -> (QuoteAggregator, TokenMapping) {
        let mapping =
            TokenMapping::from_all(&parse_token_mappings(Cursor::new(MAPPINGS)).unwrap()).unwrap();
        let (aggregator, _) = aggregator();
        for (instrument, price) in prices {
            let key = mapping.key_for(instrument).unwrap();
            let tick =
                RawTick::new(key.exchange.as_str(), key.token.as_str()).with_last_price(*price);
            aggregator.apply(message(None, tick)).unwrap();
        }
        (aggregator, mapping)
    }

    #[test]
    fn picks_closest_matching_call() {
        let (aggregator, mapping) = cache(&[
            ("NFO|NIFTY28DEC23C21000", 98.0),
            ("NFO|NIFTY28DEC23C21100", 105.0),
            ("NFO|NIFTY28DEC23P21000", 100.0),
            ("NFO|NIFTY04JAN24C21000", 100.0),
            ("NSE|NIFTY INDEX", 100.0),
        ]);
        let nearest = nearest_premium(
            &aggregator,
            &mapping,
            &SymbolOptionResolver,
            expiry(),
            OptionType::Call,
            100.0,
        )
        .unwrap();
        assert_eq!(
            nearest,
            NearestOption {
                instrument: "NFO|NIFTY28DEC23C21000".to_string(),
                price: 98.0,
            }
        );
    }

    #[test]
    fn ties_go_to_smallest_instrument_id() {
        let (aggregator, mapping) = cache(&[
            ("NFO|NIFTY28DEC23C21100", 103.0),
            ("NFO|NIFTY28DEC23C21000", 97.0),
        ]);
        let nearest = nearest_premium(
            &aggregator,
            &mapping,
            &SymbolOptionResolver,
            expiry(),
            OptionType::Call,
            100.0,
        )
        .unwrap();
        assert_eq!(nearest.instrument, "NFO|NIFTY28DEC23C21000");
    }

    #[test]
    fn no_match_when_filters_exclude_everything() {
        let (aggregator, mapping) = cache(&[("NSE|NIFTY INDEX", 100.0)]);
        assert!(
            nearest_premium(
                &aggregator,
                &mapping,
                &SymbolOptionResolver,
                expiry(),
                OptionType::Put,
                100.0,
            )
            .is_none()
        );
    }

    #[test]
    fn custom_resolver_is_consulted() {
        let (aggregator, mapping) = cache(&[("NSE|NIFTY INDEX", 100.0)]);
        let everything_is_a_put = |_: &str| {
            Some(OptionContract {
                underlying: "NIFTY".to_string(),
                expiry: expiry(),
                option_type: OptionType::Put,
                strike: 0.0,
            })
        };
        let nearest = nearest_premium(
            &aggregator,
            &mapping,
            &everything_is_a_put,
            expiry(),
            OptionType::Put,
            90.0,
        )
        .unwrap();
        assert_eq!(nearest.instrument, "NSE|NIFTY INDEX");
        assert_eq!(nearest.price, 100.0);
    }
}
