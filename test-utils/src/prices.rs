use fixed::types::I80F48;
use marginfi_risk_types::types::{OraclePrice, PriceWithConfidence};

pub const TEST_PRICE_TIMESTAMP: i64 = 1_700_000_000;

pub fn price_with_confidence(price: I80F48, confidence: I80F48) -> PriceWithConfidence {
    PriceWithConfidence {
        price: price.into(),
        confidence: confidence.into(),
        lowest_price: (price - confidence).into(),
        highest_price: (price + confidence).into(),
    }
}

/// Same price and confidence for the realtime and time weighted flavours.
pub fn oracle_price(price: I80F48, confidence: I80F48) -> OraclePrice {
    oracle_price_with_twap(price, price, confidence)
}

pub fn oracle_price_with_twap(
    realtime: I80F48,
    time_weighted: I80F48,
    confidence: I80F48,
) -> OraclePrice {
    OraclePrice {
        price_realtime: price_with_confidence(realtime, confidence),
        price_weighted: price_with_confidence(time_weighted, confidence),
        timestamp: TEST_PRICE_TIMESTAMP,
    }
}
