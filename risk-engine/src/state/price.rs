use enum_dispatch::enum_dispatch;
use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::{CONF_INTERVAL_MULTIPLE, EXP_10_I80F48, MAX_CONF_INTERVAL, STD_DEV_MULTIPLE},
    types::{Bank, OraclePrice, OraclePriceType, OracleSetup, PriceBias, PriceWithConfidence},
};
use serde::{Deserialize, Serialize};

use crate::{
    check, errors::RiskError, math_error, state::bank_config::BankConfigImpl, RiskResult,
};

/// Switchboard pull feeds report 18 decimal fixed point values.
const SWITCHBOARD_PRECISION: u32 = 18;

#[enum_dispatch]
pub trait PriceAdapter {
    fn get_price_of_type(
        &self,
        oracle_price_type: OraclePriceType,
        bias: Option<PriceBias>,
    ) -> RiskResult<I80F48>;

    fn get_confidence_interval(&self, oracle_price_type: OraclePriceType) -> RiskResult<I80F48>;

    /// Snapshot of both price flavours with their confidence bands, in the form the health
    /// computation consumes.
    fn to_oracle_price(&self) -> RiskResult<OraclePrice>;
}

/// Raw feed payloads as delivered by the price indexer, before any scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RawOracleFeed {
    PythPush(PythPushPriceFeed),
    SwitchboardPull(SwitchboardPullPriceFeed),
}

#[enum_dispatch(PriceAdapter)]
#[derive(Debug, Clone)]
pub enum OraclePriceFeedAdapter {
    PythPush(PythPushPriceFeed),
    SwitchboardPull(SwitchboardPullPriceFeed),
    Fixed(FixedPriceFeed),
}

impl OraclePriceFeedAdapter {
    /// Matches the raw feed against the bank's oracle setup and rejects it when it is older
    /// than the bank's oracle max age.
    pub fn try_from_bank(
        bank: &Bank,
        feed: Option<RawOracleFeed>,
        current_timestamp: i64,
    ) -> RiskResult<Self> {
        let bank_config = &bank.config;
        let max_age = bank_config.get_oracle_max_age();

        match (bank_config.oracle_setup, feed) {
            (OracleSetup::None, _) => Err(RiskError::OracleNotSetup),
            (OracleSetup::Fixed, _) => Ok(OraclePriceFeedAdapter::Fixed(FixedPriceFeed {
                price: bank.fixed_price.into(),
                timestamp: current_timestamp,
            })),
            (OracleSetup::PythPushOracle, Some(RawOracleFeed::PythPush(feed))) => {
                check_age(feed.publish_time, current_timestamp, max_age)?;
                Ok(OraclePriceFeedAdapter::PythPush(feed))
            }
            (OracleSetup::SwitchboardPull, Some(RawOracleFeed::SwitchboardPull(feed))) => {
                check_age(feed.last_update_timestamp, current_timestamp, max_age)?;
                Ok(OraclePriceFeedAdapter::SwitchboardPull(feed))
            }
            _ => Err(RiskError::OracleNotSetup),
        }
    }
}

fn check_age(published: i64, current_timestamp: i64, max_age: u64) -> RiskResult {
    if max_age == 0 {
        return Ok(());
    }

    let age = current_timestamp.saturating_sub(published);
    check!(
        age <= max_age as i64,
        RiskError::StaleOracle,
        "Oracle is {}s old, max age {}s",
        age,
        max_age
    );

    Ok(())
}

/// Widens a price by its confidence interval, after capping the interval at
/// `MAX_CONF_INTERVAL` of the price.
fn price_with_confidence(price: I80F48, confidence: I80F48) -> RiskResult<PriceWithConfidence> {
    check!(price > I80F48::ZERO, RiskError::InvalidPrice);

    let max_confidence = price
        .checked_mul(MAX_CONF_INTERVAL)
        .ok_or_else(math_error!())?;
    let confidence = confidence.min(max_confidence);

    let lowest_price = price.checked_sub(confidence).ok_or_else(math_error!())?;
    let highest_price = price.checked_add(confidence).ok_or_else(math_error!())?;

    Ok(PriceWithConfidence {
        price: price.into(),
        confidence: confidence.into(),
        lowest_price: lowest_price.into(),
        highest_price: highest_price.into(),
    })
}

fn biased(price: PriceWithConfidence, bias: Option<PriceBias>) -> I80F48 {
    price.get(bias)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythPushPriceFeed {
    pub price: i64,
    pub conf: u64,
    pub ema_price: i64,
    pub ema_conf: u64,
    pub expo: i32,
    pub publish_time: i64,
}

impl PythPushPriceFeed {
    fn price_and_conf(&self, oracle_price_type: OraclePriceType) -> (i64, u64) {
        match oracle_price_type {
            OraclePriceType::TimeWeighted => (self.ema_price, self.ema_conf),
            OraclePriceType::RealTime => (self.price, self.conf),
        }
    }

    fn with_confidence(&self, oracle_price_type: OraclePriceType) -> RiskResult<PriceWithConfidence> {
        let (price, _) = self.price_and_conf(oracle_price_type);
        let price = pyth_price_components_to_i80f48(I80F48::from_num(price), self.expo)?;
        price_with_confidence(price, self.get_confidence_interval(oracle_price_type)?)
    }
}

impl PriceAdapter for PythPushPriceFeed {
    fn get_price_of_type(
        &self,
        oracle_price_type: OraclePriceType,
        bias: Option<PriceBias>,
    ) -> RiskResult<I80F48> {
        Ok(biased(self.with_confidence(oracle_price_type)?, bias))
    }

    fn get_confidence_interval(&self, oracle_price_type: OraclePriceType) -> RiskResult<I80F48> {
        let (_, conf) = self.price_and_conf(oracle_price_type);
        pyth_price_components_to_i80f48(I80F48::from_num(conf), self.expo)?
            .checked_mul(CONF_INTERVAL_MULTIPLE)
            .ok_or_else(math_error!())
    }

    fn to_oracle_price(&self) -> RiskResult<OraclePrice> {
        Ok(OraclePrice {
            price_realtime: self.with_confidence(OraclePriceType::RealTime)?,
            price_weighted: self.with_confidence(OraclePriceType::TimeWeighted)?,
            timestamp: self.publish_time,
        })
    }
}

/// Switchboard pull results carry no EMA, both price types resolve to the latest result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchboardPullPriceFeed {
    pub result: i128,
    pub std_dev: i128,
    pub last_update_timestamp: i64,
}

impl SwitchboardPullPriceFeed {
    fn with_confidence(&self) -> RiskResult<PriceWithConfidence> {
        let price = switchboard_value_to_i80f48(self.result)?;
        price_with_confidence(price, self.get_confidence_interval(OraclePriceType::RealTime)?)
    }
}

impl PriceAdapter for SwitchboardPullPriceFeed {
    fn get_price_of_type(
        &self,
        _oracle_price_type: OraclePriceType,
        bias: Option<PriceBias>,
    ) -> RiskResult<I80F48> {
        Ok(biased(self.with_confidence()?, bias))
    }

    fn get_confidence_interval(&self, _oracle_price_type: OraclePriceType) -> RiskResult<I80F48> {
        switchboard_value_to_i80f48(self.std_dev)?
            .checked_mul(STD_DEV_MULTIPLE)
            .ok_or_else(math_error!())
    }

    fn to_oracle_price(&self) -> RiskResult<OraclePrice> {
        let price = self.with_confidence()?;
        Ok(OraclePrice {
            price_realtime: price,
            price_weighted: price,
            timestamp: self.last_update_timestamp,
        })
    }
}

/// Constant price with no confidence band, used for pegged assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPriceFeed {
    pub price: I80F48,
    pub timestamp: i64,
}

impl PriceAdapter for FixedPriceFeed {
    fn get_price_of_type(
        &self,
        _oracle_price_type: OraclePriceType,
        _bias: Option<PriceBias>,
    ) -> RiskResult<I80F48> {
        Ok(self.price)
    }

    fn get_confidence_interval(&self, _oracle_price_type: OraclePriceType) -> RiskResult<I80F48> {
        Ok(I80F48::ZERO)
    }

    fn to_oracle_price(&self) -> RiskResult<OraclePrice> {
        let price = price_with_confidence(self.price, I80F48::ZERO)?;
        Ok(OraclePrice {
            price_realtime: price,
            price_weighted: price,
            timestamp: self.timestamp,
        })
    }
}

#[inline(always)]
pub fn pyth_price_components_to_i80f48(price: I80F48, exponent: i32) -> RiskResult<I80F48> {
    let scaling_factor = EXP_10_I80F48
        .get(exponent.unsigned_abs() as usize)
        .copied()
        .ok_or_else(math_error!())?;

    let price = if exponent == 0 {
        price
    } else if exponent < 0 {
        price
            .checked_div(scaling_factor)
            .ok_or_else(math_error!())?
    } else {
        price
            .checked_mul(scaling_factor)
            .ok_or_else(math_error!())?
    };

    Ok(price)
}

#[inline(always)]
fn switchboard_value_to_i80f48(value: i128) -> RiskResult<I80F48> {
    I80F48::checked_from_num(value)
        .ok_or_else(math_error!())?
        .checked_div(EXP_10_I80F48[SWITCHBOARD_PRECISION as usize])
        .ok_or_else(math_error!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_with_tolerance;
    use fixed_macro::types::I80F48;
    use marginfi_risk_types::types::{BankConfig, Pubkey};

    fn sol_feed(publish_time: i64) -> PythPushPriceFeed {
        PythPushPriceFeed {
            price: 15_000_000_000,
            conf: 10_000_000,
            ema_price: 14_800_000_000,
            ema_conf: 20_000_000,
            expo: -8,
            publish_time,
        }
    }

    fn pyth_bank(max_age: u16) -> Bank {
        Bank {
            config: BankConfig {
                oracle_setup: OracleSetup::PythPushOracle,
                oracle_keys: [Pubkey::new_from_seed(7); 5],
                oracle_max_age: max_age,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn pyth_confidence_is_scaled() {
        let feed = sol_feed(100);

        let realtime = feed
            .get_price_of_type(OraclePriceType::RealTime, None)
            .unwrap();
        assert_eq!(realtime, I80F48!(150));

        // 0.1 * 2.12
        let low = feed
            .get_price_of_type(OraclePriceType::RealTime, Some(PriceBias::Low))
            .unwrap();
        assert_eq_with_tolerance!(low, I80F48!(149.788), I80F48!(0.0001));

        let weighted_high = feed
            .get_price_of_type(OraclePriceType::TimeWeighted, Some(PriceBias::High))
            .unwrap();
        assert_eq_with_tolerance!(weighted_high, I80F48!(148.424), I80F48!(0.0001));
    }

    #[test]
    fn confidence_is_capped_at_five_percent() {
        let feed = PythPushPriceFeed {
            conf: 1_000_000_000,
            ..sol_feed(100)
        };

        let oracle_price = feed.to_oracle_price().unwrap();
        assert_eq_with_tolerance!(
            I80F48::from(oracle_price.price_realtime.lowest_price),
            I80F48!(142.5),
            I80F48!(0.0001)
        );
        assert_eq_with_tolerance!(
            I80F48::from(oracle_price.price_realtime.confidence),
            I80F48!(7.5),
            I80F48!(0.0001)
        );
    }

    #[test]
    fn stale_pyth_feed_is_rejected() {
        let bank = pyth_bank(30);
        let feed = Some(RawOracleFeed::PythPush(sol_feed(1_000)));

        assert!(OraclePriceFeedAdapter::try_from_bank(&bank, feed, 1_020).is_ok());
        assert_eq!(
            OraclePriceFeedAdapter::try_from_bank(&bank, feed, 1_031).unwrap_err(),
            RiskError::StaleOracle
        );
    }

    #[test]
    fn mismatched_feed_is_not_setup() {
        let bank = pyth_bank(0);
        let feed = Some(RawOracleFeed::SwitchboardPull(SwitchboardPullPriceFeed {
            result: 1_000_000_000_000_000_000,
            std_dev: 0,
            last_update_timestamp: 0,
        }));

        assert_eq!(
            OraclePriceFeedAdapter::try_from_bank(&bank, feed, 10).unwrap_err(),
            RiskError::OracleNotSetup
        );
        assert_eq!(
            OraclePriceFeedAdapter::try_from_bank(&Bank::default(), None, 10).unwrap_err(),
            RiskError::OracleNotSetup
        );
    }

    #[test]
    fn fixed_setup_reads_bank_price() {
        let mut bank = Bank::default();
        bank.config.oracle_setup = OracleSetup::Fixed;
        bank.fixed_price = I80F48!(1.0001).into();

        let adapter = OraclePriceFeedAdapter::try_from_bank(&bank, None, 42).unwrap();
        let oracle_price = adapter.to_oracle_price().unwrap();
        assert_eq!(
            oracle_price.get_price_of_type(OraclePriceType::TimeWeighted, Some(PriceBias::Low)),
            I80F48!(1.0001)
        );
        assert_eq!(oracle_price.timestamp, 42);
    }

    #[test]
    fn switchboard_has_single_price_flavour() {
        let feed = SwitchboardPullPriceFeed {
            result: 2_500_000_000_000_000_000,
            std_dev: 10_000_000_000_000_000,
            last_update_timestamp: 50,
        };

        let oracle_price = feed.to_oracle_price().unwrap();
        assert_eq!(oracle_price.price_realtime, oracle_price.price_weighted);
        assert_eq_with_tolerance!(
            oracle_price.get_price_of_type(OraclePriceType::RealTime, Some(PriceBias::High)),
            I80F48!(2.5196),
            I80F48!(0.0001)
        );
    }
}
