//! Hedge strike selection.
//!
//! Picks the protective leg for a sold main leg: either a fixed strike
//! offset or a bounded nearest-match search for a target premium. The search
//! runs synchronously on the order-placement path, so it is capped at
//! `max_candidates` quotes.

use chrono::NaiveDate;
use options_core::traits::MarketData;
use options_core::types::{HedgeMode, OptionContract, OptionType};
use options_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hedge search tuning. The window and step are heuristics, not contracts;
/// both are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeConfig {
    /// Strike increment between candidates.
    pub strike_step: Decimal,
    /// Maximum candidates priced per search.
    pub max_candidates: u32,
    /// Strike distance used by offset mode and by the percentage-mode
    /// fallback.
    pub default_offset: Decimal,
    /// Per-quote timeout.
    pub quote_timeout_ms: u64,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            strike_step: Decimal::new(50, 0),
            max_candidates: 10,
            default_offset: Decimal::new(200, 0),
            quote_timeout_ms: 1500,
        }
    }
}

/// A selected hedge leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeQuote {
    pub strike: Decimal,
    pub price: Decimal,
    /// True when the percentage search found nothing and fell back to the
    /// offset rule.
    pub fell_back: bool,
}

/// Searches the option chain for the hedge strike matching a signal's hedge
/// mode.
pub struct HedgeSelector {
    market_data: Arc<dyn MarketData>,
    config: HedgeConfig,
}

impl HedgeSelector {
    pub fn new(market_data: Arc<dyn MarketData>, config: HedgeConfig) -> Self {
        Self {
            market_data,
            config,
        }
    }

    /// Select a hedge strike and premium for a sold main leg.
    pub async fn select(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        main_strike: Decimal,
        option_type: OptionType,
        main_premium: Decimal,
        mode: &HedgeMode,
    ) -> Result<HedgeQuote> {
        match mode {
            HedgeMode::Offset(offset) => {
                self.offset_quote(symbol, expiry, main_strike, option_type, *offset, false)
                    .await
            }
            HedgeMode::PremiumPct(pct) => {
                let target = main_premium * *pct / Decimal::new(100, 0);
                match self
                    .nearest_premium(symbol, expiry, main_strike, option_type, target)
                    .await
                {
                    Some(quote) => Ok(quote),
                    None => {
                        warn!(
                            symbol,
                            %main_strike,
                            %target,
                            "No hedge candidate priced within the search window, falling back to offset"
                        );
                        self.offset_quote(
                            symbol,
                            expiry,
                            main_strike,
                            option_type,
                            self.config.default_offset,
                            true,
                        )
                        .await
                    }
                }
            }
        }
    }

    /// Hedge strikes sit further out-of-the-money than the main strike:
    /// lower for puts, higher for calls.
    fn hedge_strike(main_strike: Decimal, option_type: OptionType, distance: Decimal) -> Decimal {
        match option_type {
            OptionType::Put => main_strike - distance,
            OptionType::Call => main_strike + distance,
        }
    }

    async fn offset_quote(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        main_strike: Decimal,
        option_type: OptionType,
        offset: Decimal,
        fell_back: bool,
    ) -> Result<HedgeQuote> {
        let strike = Self::hedge_strike(main_strike, option_type, offset);
        let contract = OptionContract::new(symbol, strike, option_type, expiry);

        // Offset mode needs no search; the premium lookup is best-effort
        // because the order path still wants a price.
        let price = match self.quote(&contract).await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    instrument = %contract.instrument_id(),
                    error = %e,
                    "Hedge premium lookup failed, defaulting to zero"
                );
                Decimal::ZERO
            }
        };

        if fell_back && price.is_zero() {
            return Err(Error::HedgeNotFound);
        }

        Ok(HedgeQuote {
            strike,
            price,
            fell_back,
        })
    }

    async fn nearest_premium(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        main_strike: Decimal,
        option_type: OptionType,
        target: Decimal,
    ) -> Option<HedgeQuote> {
        let mut best: Option<(Decimal, HedgeQuote)> = None;

        for i in 1..=self.config.max_candidates {
            let distance = self.config.strike_step * Decimal::from(i);
            let strike = Self::hedge_strike(main_strike, option_type, distance);
            let contract = OptionContract::new(symbol, strike, option_type, expiry);

            let price = match self.quote(&contract).await {
                Ok(price) if price > Decimal::ZERO => price,
                Ok(_) => continue,
                Err(e) => {
                    debug!(
                        instrument = %contract.instrument_id(),
                        error = %e,
                        "Skipping unpriceable hedge candidate"
                    );
                    continue;
                }
            };

            let diff = (price - target).abs();
            // Strict '<' keeps the earlier candidate (nearer the main strike)
            // on ties.
            if best.as_ref().map_or(true, |(d, _)| diff < *d) {
                best = Some((
                    diff,
                    HedgeQuote {
                        strike,
                        price,
                        fell_back: false,
                    },
                ));
            }
        }

        best.map(|(_, quote)| quote)
    }

    async fn quote(&self, contract: &OptionContract) -> Result<Decimal> {
        let timeout = Duration::from_millis(self.config.quote_timeout_ms);
        match tokio::time::timeout(timeout, self.market_data.option_price(contract)).await {
            Ok(result) => result,
            Err(_) => Err(Error::BrokerTimeout {
                timeout_ms: self.config.quote_timeout_ms,
            }),
        }
    }
}
