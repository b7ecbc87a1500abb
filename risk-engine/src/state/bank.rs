use std::ops::Not;

use fixed::types::I80F48;
use marginfi_risk_types::types::{Bank, BankOperationalState};

use crate::{
    check, debug,
    errors::RiskError,
    math_error,
    state::{
        bank_config::BankConfigImpl,
        interest_rate::{Accrual, ComputedInterestRates, RateModel},
        marginfi_account::calc_value,
    },
    RiskResult,
};

pub trait BankImpl {
    fn get_liability_amount(&self, shares: I80F48) -> RiskResult<I80F48>;
    fn get_asset_amount(&self, shares: I80F48) -> RiskResult<I80F48>;
    fn get_liability_shares(&self, value: I80F48) -> RiskResult<I80F48>;
    fn get_asset_shares(&self, value: I80F48) -> RiskResult<I80F48>;
    fn get_total_asset_amount(&self) -> RiskResult<I80F48>;
    fn get_total_liability_amount(&self) -> RiskResult<I80F48>;
    fn change_asset_shares(&mut self, shares: I80F48, bypass_deposit_limit: bool) -> RiskResult;
    fn change_liability_shares(&mut self, shares: I80F48, bypass_borrow_limit: bool)
        -> RiskResult;
    fn maybe_get_asset_weight_init_discount(&self, price: I80F48) -> RiskResult<Option<I80F48>>;
    fn check_utilization_ratio(&self) -> RiskResult;
    fn compute_utilization_rate(&self) -> RiskResult<I80F48>;
    fn compute_interest_rates(&self) -> RiskResult<ComputedInterestRates>;
    fn accrue_interest(&mut self, current_timestamp: i64) -> RiskResult;
    fn assert_operational_mode(
        &self,
        is_asset_or_liability_amount_increasing: Option<bool>,
    ) -> RiskResult;
    fn get_flag(&self, flag: u64) -> bool;
}

impl BankImpl for Bank {
    fn get_liability_amount(&self, shares: I80F48) -> RiskResult<I80F48> {
        shares
            .checked_mul(self.liability_share_value.into())
            .ok_or_else(math_error!())
    }

    fn get_asset_amount(&self, shares: I80F48) -> RiskResult<I80F48> {
        shares
            .checked_mul(self.asset_share_value.into())
            .ok_or_else(math_error!())
    }

    fn get_liability_shares(&self, value: I80F48) -> RiskResult<I80F48> {
        value
            .checked_div(self.liability_share_value.into())
            .ok_or_else(math_error!())
    }

    fn get_asset_shares(&self, value: I80F48) -> RiskResult<I80F48> {
        value
            .checked_div(self.asset_share_value.into())
            .ok_or_else(math_error!())
    }

    fn get_total_asset_amount(&self) -> RiskResult<I80F48> {
        self.get_asset_amount(self.total_asset_shares.into())
    }

    fn get_total_liability_amount(&self) -> RiskResult<I80F48> {
        self.get_liability_amount(self.total_liability_shares.into())
    }

    fn change_asset_shares(&mut self, shares: I80F48, bypass_deposit_limit: bool) -> RiskResult {
        let total_asset_shares: I80F48 = self.total_asset_shares.into();
        self.total_asset_shares = total_asset_shares
            .checked_add(shares)
            .ok_or_else(math_error!())?
            .into();

        if shares.is_positive() && self.config.is_deposit_limit_active() && !bypass_deposit_limit {
            let total_deposits_amount = self.get_total_asset_amount()?;
            let deposit_limit = I80F48::from_num(self.config.deposit_limit);

            check!(
                total_deposits_amount < deposit_limit,
                RiskError::BankAssetCapacityExceeded
            )
        }

        Ok(())
    }

    fn change_liability_shares(
        &mut self,
        shares: I80F48,
        bypass_borrow_limit: bool,
    ) -> RiskResult {
        let total_liability_shares: I80F48 = self.total_liability_shares.into();
        self.total_liability_shares = total_liability_shares
            .checked_add(shares)
            .ok_or_else(math_error!())?
            .into();

        if bypass_borrow_limit.not() && shares.is_positive() && self.config.is_borrow_limit_active()
        {
            let total_liability_amount = self.get_total_liability_amount()?;
            let borrow_limit = I80F48::from_num(self.config.borrow_limit);

            check!(
                total_liability_amount < borrow_limit,
                RiskError::BankLiabilityCapacityExceeded
            )
        }

        Ok(())
    }

    /// Share of the initial asset weight left once the bank's total deposits exceed the
    /// configured USD init limit. `price` should be the unbiased lowest price.
    fn maybe_get_asset_weight_init_discount(&self, price: I80F48) -> RiskResult<Option<I80F48>> {
        if !self.config.usd_init_limit_active() {
            return Ok(None);
        }

        let bank_total_assets_value =
            calc_value(self.get_total_asset_amount()?, price, self.mint_decimals, None)?;

        let total_asset_value_init_limit =
            I80F48::from_num(self.config.total_asset_value_init_limit);

        debug!(
            "Init limit active, limit: {}, total_assets: {}",
            total_asset_value_init_limit, bank_total_assets_value
        );

        if bank_total_assets_value > total_asset_value_init_limit {
            let discount = total_asset_value_init_limit
                .checked_div(bank_total_assets_value)
                .ok_or_else(math_error!())?;

            debug!(
                "Discounting assets by {:.2} because of total deposits {} over {} usd cap",
                discount, bank_total_assets_value, total_asset_value_init_limit
            );

            Ok(Some(discount))
        } else {
            Ok(None)
        }
    }

    fn check_utilization_ratio(&self) -> RiskResult {
        let total_assets = self.get_total_asset_amount()?;
        let total_liabilities = self.get_total_liability_amount()?;

        check!(
            total_assets >= total_liabilities,
            RiskError::IllegalUtilizationRatio
        );

        Ok(())
    }

    /// `liabilities / assets`, zero for a bank without deposits.
    fn compute_utilization_rate(&self) -> RiskResult<I80F48> {
        let total_assets = self.get_total_asset_amount()?;
        if total_assets.is_zero() {
            return Ok(I80F48::ZERO);
        }

        self.get_total_liability_amount()?
            .checked_div(total_assets)
            .ok_or_else(math_error!())
    }

    fn compute_interest_rates(&self) -> RiskResult<ComputedInterestRates> {
        let utilization_rate = self.compute_utilization_rate()?;
        RateModel::from(&self.config.interest_rate_config)
            .rates_at(utilization_rate)
            .ok_or_else(math_error!())
    }

    /// Settles interest accrued since `last_update` into the share values.
    ///
    /// Insurance and group fees are accumulated in the outstanding fee fields.
    fn accrue_interest(&mut self, current_timestamp: i64) -> RiskResult {
        let time_delta: u64 = current_timestamp
            .checked_sub(self.last_update)
            .and_then(|delta| u64::try_from(delta).ok())
            .ok_or_else(math_error!())?;
        if time_delta == 0 {
            return Ok(());
        }

        let total_assets = self.get_total_asset_amount()?;
        let total_liabilities = self.get_total_liability_amount()?;

        self.last_update = current_timestamp;

        if (total_assets == I80F48::ZERO) || (total_liabilities == I80F48::ZERO) {
            return Ok(());
        }

        let Accrual {
            asset_share_value,
            liability_share_value,
            insurance_fees: insurance_fees_collected,
            group_fees: group_fees_collected,
        } = RateModel::from(&self.config.interest_rate_config)
            .accrue(
                time_delta,
                total_assets,
                total_liabilities,
                self.asset_share_value.into(),
                self.liability_share_value.into(),
            )
            .ok_or_else(math_error!())?;

        debug!(
            "asset share value: {}, liability share value: {}, group fees: {}, insurance fees: {}",
            asset_share_value, liability_share_value, group_fees_collected, insurance_fees_collected
        );

        self.asset_share_value = asset_share_value.into();
        self.liability_share_value = liability_share_value.into();

        if group_fees_collected > I80F48::ZERO {
            self.collected_group_fees_outstanding = {
                group_fees_collected
                    .checked_add(self.collected_group_fees_outstanding.into())
                    .ok_or_else(math_error!())?
                    .into()
            };
        }

        if insurance_fees_collected > I80F48::ZERO {
            self.collected_insurance_fees_outstanding = {
                insurance_fees_collected
                    .checked_add(self.collected_insurance_fees_outstanding.into())
                    .ok_or_else(math_error!())?
                    .into()
            };
        }

        Ok(())
    }

    fn assert_operational_mode(
        &self,
        is_asset_or_liability_amount_increasing: Option<bool>,
    ) -> RiskResult {
        match self.config.operational_state {
            BankOperationalState::Paused => Err(RiskError::BankPaused),
            BankOperationalState::Operational => Ok(()),
            BankOperationalState::ReduceOnly => {
                if let Some(is_asset_or_liability_amount_increasing) =
                    is_asset_or_liability_amount_increasing
                {
                    check!(
                        !is_asset_or_liability_amount_increasing,
                        RiskError::BankReduceOnly
                    );
                }

                Ok(())
            }
        }
    }

    fn get_flag(&self, flag: u64) -> bool {
        (self.flags & flag) == flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_macro::types::I80F48;
    use marginfi_risk_types::types::{BankConfig, InterestRateConfig, RiskTier};

    fn operational_bank() -> Bank {
        Bank::new(
            Default::default(),
            BankConfig {
                asset_weight_init: I80F48!(0.8).into(),
                asset_weight_maint: I80F48!(0.9).into(),
                liability_weight_init: I80F48!(1.2).into(),
                liability_weight_maint: I80F48!(1.1).into(),
                operational_state: BankOperationalState::Operational,
                risk_tier: RiskTier::Collateral,
                interest_rate_config: InterestRateConfig {
                    optimal_utilization_rate: I80F48!(0.5).into(),
                    plateau_interest_rate: I80F48!(0.6).into(),
                    max_interest_rate: I80F48!(3).into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            Default::default(),
            6,
            0,
        )
    }

    #[test]
    fn deposit_limit_caps_total_assets() {
        let mut bank = operational_bank();
        bank.config.deposit_limit = 1_000;

        assert!(bank.change_asset_shares(I80F48!(999), false).is_ok());
        assert_eq!(
            bank.change_asset_shares(I80F48!(1), false),
            Err(RiskError::BankAssetCapacityExceeded)
        );
        // liquidations may push past the cap
        assert!(bank.change_asset_shares(I80F48!(500), true).is_ok());
        // withdrawals are never capped
        assert!(bank.change_asset_shares(I80F48!(-10), false).is_ok());
    }

    #[test]
    fn zero_limits_are_inactive() {
        let mut bank = operational_bank();
        assert!(bank.change_asset_shares(I80F48!(1_000_000_000), false).is_ok());
        assert!(bank.change_liability_shares(I80F48!(1_000_000), false).is_ok());

        bank.config.borrow_limit = 100;
        assert_eq!(
            bank.change_liability_shares(I80F48!(1), false),
            Err(RiskError::BankLiabilityCapacityExceeded)
        );
    }

    #[test]
    fn utilization_above_one_is_illegal() {
        let mut bank = operational_bank();
        bank.total_asset_shares = I80F48!(100).into();
        bank.total_liability_shares = I80F48!(40).into();

        assert!(bank.check_utilization_ratio().is_ok());
        assert_eq!(bank.compute_utilization_rate().unwrap(), I80F48!(0.4));

        bank.total_liability_shares = I80F48!(101).into();
        assert_eq!(
            bank.check_utilization_ratio(),
            Err(RiskError::IllegalUtilizationRatio)
        );
    }

    #[test]
    fn empty_bank_has_zero_utilization() {
        let bank = operational_bank();
        assert_eq!(bank.compute_utilization_rate().unwrap(), I80F48::ZERO);
        assert_eq!(
            bank.compute_interest_rates().unwrap().lending_rate_apr,
            I80F48::ZERO
        );
    }

    #[test]
    fn init_discount_applies_over_usd_limit() {
        let mut bank = operational_bank();
        bank.total_asset_shares = I80F48!(2_000_000_000).into(); // 2000 tokens
        bank.config.total_asset_value_init_limit = 1_000;

        let discount = bank
            .maybe_get_asset_weight_init_discount(I80F48!(1))
            .unwrap();
        assert_eq!(discount, Some(I80F48!(0.5)));

        assert_eq!(
            bank.maybe_get_asset_weight_init_discount(I80F48!(0.25))
                .unwrap(),
            None
        );
    }

    #[test]
    fn operational_modes() {
        let mut bank = operational_bank();
        assert!(bank.assert_operational_mode(Some(true)).is_ok());

        bank.config.operational_state = BankOperationalState::ReduceOnly;
        assert!(bank.assert_operational_mode(Some(false)).is_ok());
        assert!(bank.assert_operational_mode(None).is_ok());
        assert_eq!(
            bank.assert_operational_mode(Some(true)),
            Err(RiskError::BankReduceOnly)
        );

        bank.config.operational_state = BankOperationalState::Paused;
        assert_eq!(
            bank.assert_operational_mode(None),
            Err(RiskError::BankPaused)
        );
    }

    #[test]
    fn accrual_moves_share_values() {
        let mut bank = operational_bank();
        bank.total_asset_shares = I80F48!(1_000_000).into();
        bank.total_liability_shares = I80F48!(500_000).into();

        bank.accrue_interest(31_536_000).unwrap();

        // ur 0.5 sits on the plateau: borrowers pay 60%, lenders earn 30%
        assert_eq!(bank.last_update, 31_536_000);
        crate::assert_eq_with_tolerance!(
            I80F48::from(bank.liability_share_value),
            I80F48!(1.6),
            I80F48!(0.0001)
        );
        crate::assert_eq_with_tolerance!(
            I80F48::from(bank.asset_share_value),
            I80F48!(1.3),
            I80F48!(0.0001)
        );

        assert!(bank.accrue_interest(10).is_err());
    }
}
