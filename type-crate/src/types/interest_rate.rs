use bytemuck::Zeroable;
use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use super::WrappedI80F48;

pub const INTEREST_CURVE_LEGACY: u8 = 0;
pub const INTEREST_CURVE_SEVEN_POINT: u8 = 1;
pub const CURVE_POINTS: usize = 5;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Zeroable, Default, Serialize, Deserialize)]
pub struct InterestRateConfig {
    pub optimal_utilization_rate: WrappedI80F48,
    pub plateau_interest_rate: WrappedI80F48,
    pub max_interest_rate: WrappedI80F48,

    // Fees
    /// Goes to insurance, funds `collected_insurance_fees_outstanding`
    pub insurance_fee_fixed_apr: WrappedI80F48,
    /// Goes to insurance, funds `collected_insurance_fees_outstanding`
    pub insurance_ir_fee: WrappedI80F48,
    /// Earned by the group, goes to `collected_group_fees_outstanding`
    pub protocol_fixed_fee_apr: WrappedI80F48,
    /// Earned by the group, goes to `collected_group_fees_outstanding`
    pub protocol_ir_fee: WrappedI80F48,
    pub protocol_origination_fee: WrappedI80F48,

    /// The base rate at utilization = 0
    /// * a %, as u32, out of 1000%, e.g. 100% = 0.1 * u32::MAX
    pub zero_util_rate: u32,
    /// The base rate at utilization = 100
    /// * a %, as u32, out of 1000%, e.g. 100% = 0.1 * u32::MAX
    pub hundred_util_rate: u32,
    /// Kink points between 0 and 100% utilization, exclusive, in ascending order.
    /// * points where util = 0 are unused padding and trail the used ones
    pub points: [RatePoint; CURVE_POINTS],

    /// 0 (INTEREST_CURVE_LEGACY) = optimal/plateau/max curve, 1 (INTEREST_CURVE_SEVEN_POINT) =
    /// multi-point curve.
    pub curve_type: u8,
}

#[derive(Clone, Copy, Default, Zeroable, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePoint {
    /// The utilization rate where `rate` applies
    /// * a %, as u32, out of 100%, e.g. 50% = .5 * u32::MAX
    pub util: u32,
    /// The base rate that applies
    /// * a %, as u32, out of 1000%, e.g. 100% = 0.1 * u32::MAX
    pub rate: u32,
}

impl RatePoint {
    pub const fn new(util: u32, rate: u32) -> Self {
        Self { util, rate }
    }
}

/// Pads or truncates to exactly CURVE_POINTS entries. Performs no validation.
pub fn make_points(points: &[RatePoint]) -> [RatePoint; CURVE_POINTS] {
    let mut out = [RatePoint::default(); CURVE_POINTS];
    for (i, p) in points.iter().take(CURVE_POINTS).enumerate() {
        out[i] = *p;
    }
    out
}

/// Encodes an APR (0-1000%) as u32, clamping out-of-range input.
pub fn milli_to_u32(value: I80F48) -> u32 {
    let max_percent: I80F48 = I80F48::from_num(10.0);
    let clamped: I80F48 = value.min(max_percent).max(I80F48::ZERO);
    let ratio: I80F48 = clamped / max_percent;
    (ratio * I80F48::from_num(u32::MAX)).to_num::<u32>()
}

/// Encodes a utilization (0-100%) as u32, clamping out-of-range input.
pub fn centi_to_u32(value: I80F48) -> u32 {
    let clamped: I80F48 = value.min(I80F48::ONE).max(I80F48::ZERO);
    (clamped * I80F48::from_num(u32::MAX)).to_num::<u32>()
}
