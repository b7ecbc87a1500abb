use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::SECONDS_PER_YEAR,
    types::{InterestRateConfig, RatePoint, CURVE_POINTS, INTEREST_CURVE_SEVEN_POINT},
};
use serde::{Deserialize, Serialize};

use crate::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedInterestRates {
    pub base_rate_apr: I80F48,
    pub lending_rate_apr: I80F48,
    pub borrowing_rate_apr: I80F48,
    pub group_fee_apr: I80F48,
    pub insurance_fee_apr: I80F48,
}

/// Share values and fees after settling one accrual period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    pub asset_share_value: I80F48,
    pub liability_share_value: I80F48,
    pub insurance_fees: I80F48,
    pub group_fees: I80F48,
}

#[derive(Debug, Clone, Copy)]
enum RateCurve {
    /// Linear up to the plateau rate at the optimal utilization, then linear up to the max rate.
    Plateau {
        optimal_ur: I80F48,
        plateau_ir: I80F48,
        max_ir: I80F48,
    },
    /// Linear between the rate at 0%, each used kink, and the rate at 100%.
    Kinked {
        zero_ir: I80F48,
        hundred_ir: I80F48,
        points: [RatePoint; CURVE_POINTS],
    },
}

#[derive(Debug, Clone, Copy)]
struct Fee {
    rate: I80F48,
    fixed: I80F48,
}

impl Fee {
    /// Fee APR charged on top of `base_rate`.
    fn on(&self, base_rate: I80F48) -> Option<I80F48> {
        base_rate.checked_mul(self.rate)?.checked_add(self.fixed)
    }
}

/// Base rate curve of a bank with the insurance and group fees charged on top of it.
#[derive(Debug, Clone, Copy)]
pub struct RateModel {
    curve: RateCurve,
    insurance: Fee,
    group: Fee,
}

impl From<&InterestRateConfig> for RateModel {
    fn from(config: &InterestRateConfig) -> Self {
        let curve = if config.curve_type == INTEREST_CURVE_SEVEN_POINT {
            RateCurve::Kinked {
                zero_ir: apr_from_u32(config.zero_util_rate),
                hundred_ir: apr_from_u32(config.hundred_util_rate),
                points: config.points,
            }
        } else {
            RateCurve::Plateau {
                optimal_ur: config.optimal_utilization_rate.into(),
                plateau_ir: config.plateau_interest_rate.into(),
                max_ir: config.max_interest_rate.into(),
            }
        };

        Self {
            curve,
            insurance: Fee {
                rate: config.insurance_ir_fee.into(),
                fixed: config.insurance_fee_fixed_apr.into(),
            },
            group: Fee {
                rate: config.protocol_ir_fee.into(),
                fixed: config.protocol_fixed_fee_apr.into(),
            },
        }
    }
}

impl RateModel {
    /// Rates at `utilization`. Lenders earn `base * ur`, borrowers pay
    /// `base * (1 + rate fees) + fixed fees`.
    pub fn rates_at(&self, utilization: I80F48) -> Option<ComputedInterestRates> {
        let base_rate_apr = self.base_rate(utilization)?;

        let group_fee_apr = self.group.on(base_rate_apr)?;
        let insurance_fee_apr = self.insurance.on(base_rate_apr)?;

        let lending_rate_apr = base_rate_apr.checked_mul(utilization)?;
        let borrowing_rate_apr = base_rate_apr
            .checked_add(group_fee_apr)?
            .checked_add(insurance_fee_apr)?;

        let rates = ComputedInterestRates {
            base_rate_apr,
            lending_rate_apr,
            borrowing_rate_apr,
            group_fee_apr,
            insurance_fee_apr,
        };

        [
            rates.lending_rate_apr,
            rates.borrowing_rate_apr,
            rates.group_fee_apr,
            rates.insurance_fee_apr,
        ]
        .iter()
        .all(|apr| !apr.is_negative())
        .then_some(rates)
    }

    /// Settles `time_delta` seconds of simple interest into the share values. Fees are charged
    /// on the total liabilities.
    pub fn accrue(
        &self,
        time_delta: u64,
        total_assets: I80F48,
        total_liabilities: I80F48,
        asset_share_value: I80F48,
        liability_share_value: I80F48,
    ) -> Option<Accrual> {
        let utilization = total_liabilities.checked_div(total_assets)?;
        debug!("Utilization rate: {}, time delta {}s", utilization, time_delta);

        let rates = self.rates_at(utilization)?;
        let period = I80F48::from_num(time_delta).checked_div(SECONDS_PER_YEAR)?;
        let grow = |value: I80F48, apr: I80F48| -> Option<I80F48> {
            value.checked_mul(I80F48::ONE.checked_add(apr.checked_mul(period)?)?)
        };
        let charge = |apr: I80F48| -> Option<I80F48> {
            total_liabilities.checked_mul(apr)?.checked_mul(period)
        };

        Some(Accrual {
            asset_share_value: grow(asset_share_value, rates.lending_rate_apr)?,
            liability_share_value: grow(liability_share_value, rates.borrowing_rate_apr)?,
            insurance_fees: charge(rates.insurance_fee_apr)?,
            group_fees: charge(rates.group_fee_apr)?,
        })
    }

    fn base_rate(&self, utilization: I80F48) -> Option<I80F48> {
        match self.curve {
            RateCurve::Plateau {
                optimal_ur,
                plateau_ir,
                max_ir,
            } => {
                if utilization <= optimal_ur {
                    utilization.checked_div(optimal_ur)?.checked_mul(plateau_ir)
                } else {
                    (utilization - optimal_ur)
                        .checked_div(I80F48::ONE - optimal_ur)?
                        .checked_mul(max_ir - plateau_ir)?
                        .checked_add(plateau_ir)
                }
            }
            RateCurve::Kinked {
                zero_ir,
                hundred_ir,
                points,
            } => {
                let ur = utilization.clamp(I80F48::ZERO, I80F48::ONE);
                let kinks = points
                    .iter()
                    .filter(|p| p.util != 0)
                    .map(|p| (util_from_u32(p.util), apr_from_u32(p.rate)));

                let mut from = (I80F48::ZERO, zero_ir);
                for to in kinks.chain(std::iter::once((I80F48::ONE, hundred_ir))) {
                    if ur <= to.0 {
                        return interpolate(from, to, ur);
                    }
                    from = to;
                }

                Some(hundred_ir)
            }
        }
    }
}

fn interpolate(from: (I80F48, I80F48), to: (I80F48, I80F48), x: I80F48) -> Option<I80F48> {
    if to.0 <= from.0 {
        return Some(from.1);
    }

    let t = (x - from.0).checked_div(to.0 - from.0)?;
    (to.1 - from.1).checked_mul(t)?.checked_add(from.1)
}

/// Curve rates are stored as a fraction of 1000% APR.
fn apr_from_u32(rate: u32) -> I80F48 {
    I80F48::from_num(rate) / I80F48::from_num(u32::MAX) * I80F48::from_num(10)
}

fn util_from_u32(util: u32) -> I80F48 {
    I80F48::from_num(util) / I80F48::from_num(u32::MAX)
}
