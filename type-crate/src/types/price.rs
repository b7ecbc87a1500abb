use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use super::WrappedI80F48;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceBias {
    Low,
    High,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OraclePriceType {
    /// Time weighted price
    /// EMA for PythPush
    TimeWeighted,
    /// Real time price
    RealTime,
}

/// A price point with its confidence band already widened and capped.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceWithConfidence {
    pub price: WrappedI80F48,
    pub confidence: WrappedI80F48,
    pub lowest_price: WrappedI80F48,
    pub highest_price: WrappedI80F48,
}

impl PriceWithConfidence {
    pub fn get(&self, bias: Option<PriceBias>) -> I80F48 {
        match bias {
            None => self.price.into(),
            Some(PriceBias::Low) => self.lowest_price.into(),
            Some(PriceBias::High) => self.highest_price.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OraclePrice {
    pub price_realtime: PriceWithConfidence,
    pub price_weighted: PriceWithConfidence,
    /// Unix seconds of the last feed update
    pub timestamp: i64,
}

impl OraclePrice {
    pub fn get_price_of_type(&self, price_type: OraclePriceType, bias: Option<PriceBias>) -> I80F48 {
        match price_type {
            OraclePriceType::RealTime => self.price_realtime.get(bias),
            OraclePriceType::TimeWeighted => self.price_weighted.get(bias),
        }
    }
}
