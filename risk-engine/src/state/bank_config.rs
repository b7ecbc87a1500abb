use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::TOTAL_ASSET_VALUE_INIT_LIMIT_INACTIVE,
    types::{BalanceSide, BankConfig, OracleSetup},
};

use crate::state::marginfi_account::RequirementType;

/// Oracle age used when a Pyth bank leaves `oracle_max_age` unset.
pub const MAX_PYTH_ORACLE_AGE: u64 = 60;

pub trait BankConfigImpl {
    fn get_weights(&self, req_type: RequirementType) -> (I80F48, I80F48);
    fn get_weight(&self, requirement_type: RequirementType, balance_side: BalanceSide) -> I80F48;
    fn is_deposit_limit_active(&self) -> bool;
    fn is_borrow_limit_active(&self) -> bool;
    fn usd_init_limit_active(&self) -> bool;
    fn get_oracle_max_age(&self) -> u64;
    /// Initial weights zeroed while maintenance ones are kept: the asset is being phased out.
    fn is_retiring(&self) -> bool;
}

impl BankConfigImpl for BankConfig {
    #[inline]
    fn get_weights(&self, req_type: RequirementType) -> (I80F48, I80F48) {
        match req_type {
            RequirementType::Initial => (
                self.asset_weight_init.into(),
                self.liability_weight_init.into(),
            ),
            RequirementType::Maintenance => (
                self.asset_weight_maint.into(),
                self.liability_weight_maint.into(),
            ),
            RequirementType::Equity => (I80F48::ONE, I80F48::ONE),
        }
    }

    #[inline]
    fn get_weight(&self, requirement_type: RequirementType, balance_side: BalanceSide) -> I80F48 {
        match (requirement_type, balance_side) {
            (RequirementType::Initial, BalanceSide::Assets) => self.asset_weight_init.into(),
            (RequirementType::Initial, BalanceSide::Liabilities) => {
                self.liability_weight_init.into()
            }
            (RequirementType::Maintenance, BalanceSide::Assets) => self.asset_weight_maint.into(),
            (RequirementType::Maintenance, BalanceSide::Liabilities) => {
                self.liability_weight_maint.into()
            }
            (RequirementType::Equity, _) => I80F48::ONE,
        }
    }

    #[inline]
    fn is_deposit_limit_active(&self) -> bool {
        self.deposit_limit != 0
    }

    #[inline]
    fn is_borrow_limit_active(&self) -> bool {
        self.borrow_limit != 0
    }

    fn usd_init_limit_active(&self) -> bool {
        self.total_asset_value_init_limit != TOTAL_ASSET_VALUE_INIT_LIMIT_INACTIVE
    }

    #[inline]
    fn get_oracle_max_age(&self) -> u64 {
        match (self.oracle_max_age, self.oracle_setup) {
            (0, OracleSetup::PythPushOracle) => MAX_PYTH_ORACLE_AGE,
            (n, _) => n as u64,
        }
    }

    fn is_retiring(&self) -> bool {
        I80F48::from(self.asset_weight_init) == I80F48::ZERO
            && I80F48::from(self.asset_weight_maint) > I80F48::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_macro::types::I80F48;

    fn collateral_config() -> BankConfig {
        BankConfig {
            asset_weight_init: I80F48!(0.8).into(),
            asset_weight_maint: I80F48!(0.9).into(),
            liability_weight_init: I80F48!(1.25).into(),
            liability_weight_maint: I80F48!(1.1).into(),
            ..Default::default()
        }
    }

    #[test]
    fn equity_weights_are_unit() {
        let config = collateral_config();
        assert_eq!(
            config.get_weights(RequirementType::Equity),
            (I80F48::ONE, I80F48::ONE)
        );
        assert_eq!(
            config.get_weight(RequirementType::Maintenance, BalanceSide::Assets),
            I80F48!(0.9)
        );
        assert_eq!(
            config.get_weight(RequirementType::Initial, BalanceSide::Liabilities),
            I80F48!(1.25)
        );
    }

    #[test]
    fn zeroed_init_weight_marks_retiring_bank() {
        let mut config = collateral_config();
        assert!(!config.is_retiring());

        config.asset_weight_init = I80F48::ZERO.into();
        assert!(config.is_retiring());
    }

    #[test]
    fn unset_pyth_age_falls_back_to_default() {
        let mut config = collateral_config();
        config.oracle_setup = OracleSetup::PythPushOracle;
        assert_eq!(config.get_oracle_max_age(), MAX_PYTH_ORACLE_AGE);

        config.oracle_max_age = 30;
        assert_eq!(config.get_oracle_max_age(), 30);
    }
}
