//! Price conversion for fills.
//!
//! Fill prices arrive denominated in an arbitrary payment currency.
//! Storage wants them in chain-native units (required) and USD
//! (best effort). Conversions are bucketed by day; a missing USD rate
//! degrades the fill, a missing native rate drops it.

use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::{address, Address, U256};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};

use crate::storage::UsdPriceRecord;

/// The chain-native currency sentinel.
pub const NATIVE_CURRENCY: Address = Address::ZERO;

/// Wrapped-native token (mainnet WETH). Treated as native for pricing.
pub const WRAPPED_NATIVE: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

const SECONDS_PER_DAY: i64 = 86_400;

/// Truncates a timestamp to the start of its UTC day.
#[must_use]
pub const fn day_bucket(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)
}

/// A per-item price expressed in native and USD terms.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceConversion {
    /// Per-item price in native smallest units.
    pub native_price: U256,
    /// Per-item price in USD, when a rate was known for the day.
    pub usd_price: Option<BigDecimal>,
}

/// Converts currency-denominated prices into native and USD terms.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Converts a per-item price at the given timestamp.
    ///
    /// Returns `None` when no native-terms conversion exists for the
    /// currency; callers drop the item in that case.
    async fn convert(
        &self,
        currency: Address,
        currency_price: U256,
        timestamp: i64,
    ) -> Option<PriceConversion>;
}

/// Oracle backed by static per-day rate tables.
///
/// Native and wrapped-native prices pass through unchanged. Other
/// currencies convert through a (currency, day) native-rate table.
#[derive(Debug, Clone, Default)]
pub struct DayPriceOracle {
    /// USD per whole native token, by day bucket.
    usd_per_native: HashMap<i64, BigDecimal>,
    /// Native smallest units per currency smallest unit, by
    /// (currency, day bucket).
    native_rates: HashMap<(Address, i64), BigDecimal>,
    /// Decimals of the native token, for USD scaling.
    native_decimals: u32,
}

impl DayPriceOracle {
    /// Creates an empty oracle with 18 native decimals.
    #[must_use]
    pub fn new() -> Self {
        Self {
            usd_per_native: HashMap::new(),
            native_rates: HashMap::new(),
            native_decimals: 18,
        }
    }

    /// Builds an oracle from stored per-day USD quotes.
    ///
    /// Quotes for the native token feed the USD table directly. Every
    /// other currency gets a native conversion rate on the days where
    /// a non-zero native quote exists, and is unknown elsewhere.
    #[must_use]
    pub fn from_records(records: &[UsdPriceRecord]) -> Self {
        let mut oracle = Self::new();
        for record in records {
            if Self::is_native(record.currency) {
                oracle
                    .usd_per_native
                    .insert(day_bucket(record.day), record.value.clone());
            }
        }
        for record in records {
            if Self::is_native(record.currency) {
                continue;
            }
            let day = day_bucket(record.day);
            let Some(native_usd) = oracle.usd_per_native.get(&day) else {
                continue;
            };
            if native_usd.is_zero() {
                continue;
            }
            let Some(unit) = 10u64.checked_pow(record.decimals) else {
                continue;
            };
            // Native smallest units per currency smallest unit.
            let rate = record.value.clone()
                * BigDecimal::from(10u64.pow(oracle.native_decimals))
                / (native_usd.clone() * BigDecimal::from(unit));
            oracle.native_rates.insert((record.currency, day), rate);
        }
        oracle
    }

    /// Records the USD rate for the day containing the timestamp.
    pub fn set_usd_rate(&mut self, timestamp: i64, usd_per_native: BigDecimal) {
        self.usd_per_native
            .insert(day_bucket(timestamp), usd_per_native);
    }

    /// Records a native conversion rate for a currency on the day
    /// containing the timestamp.
    pub fn set_native_rate(&mut self, currency: Address, timestamp: i64, rate: BigDecimal) {
        self.native_rates
            .insert((currency, day_bucket(timestamp)), rate);
    }

    fn is_native(currency: Address) -> bool {
        currency == NATIVE_CURRENCY || currency == WRAPPED_NATIVE
    }

    fn usd_for(&self, native_price: &BigDecimal, timestamp: i64) -> Option<BigDecimal> {
        let rate = self.usd_per_native.get(&day_bucket(timestamp))?;
        let scale = BigDecimal::from(10u64.pow(self.native_decimals));
        Some(native_price * rate / scale)
    }
}

#[async_trait]
impl PriceOracle for DayPriceOracle {
    async fn convert(
        &self,
        currency: Address,
        currency_price: U256,
        timestamp: i64,
    ) -> Option<PriceConversion> {
        let native_price = if Self::is_native(currency) {
            currency_price
        } else {
            let rate = self.native_rates.get(&(currency, day_bucket(timestamp)))?;
            bigdecimal_to_u256(&(u256_to_bigdecimal(currency_price) * rate))?
        };

        let usd_price = self.usd_for(&u256_to_bigdecimal(native_price), timestamp);
        Some(PriceConversion {
            native_price,
            usd_price,
        })
    }
}

/// Converts a `U256` into an exact `BigDecimal`.
#[must_use]
pub fn u256_to_bigdecimal(value: U256) -> BigDecimal {
    // The decimal string of a U256 always parses.
    BigDecimal::from_str(&value.to_string()).unwrap_or_else(|_| BigDecimal::zero())
}

/// Converts a `BigDecimal` into a `U256`, truncating any fractional
/// part. Returns `None` for negative values or values past 2^256.
#[must_use]
pub fn bigdecimal_to_u256(value: &BigDecimal) -> Option<U256> {
    if value.sign() == bigdecimal::num_bigint::Sign::Minus {
        return None;
    }
    let truncated = value.with_scale(0);
    let (digits, _) = truncated.into_bigint_and_exponent();
    U256::from_str_radix(&digits.to_string(), 10).ok()
}
