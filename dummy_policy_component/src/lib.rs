//! # Dummy Rate Policy Blueprint
//! Component for testing interest accrual without a real monetary policy.

use scrypto::prelude::*;

#[blueprint]
mod policy {
    enable_method_auth! {
        methods {
            get_rate => PUBLIC;
            set_rate => restrict_to: [OWNER];
        }
    }

    struct Policy {
        rate: Decimal,
    }

    impl Policy {
        pub fn instantiate_policy(initial_rate: Decimal) -> Global<Policy> {
            Self { rate: initial_rate }
                .instantiate()
                .prepare_to_globalize(OwnerRole::None)
                .metadata(metadata! {
                    init {
                        "name" => "Cascade Dummy Rate Policy".to_string(), updatable;
                        "description" => "A dummy rate policy used for testing Cascade".to_string(), updatable;
                    }
                })
                .globalize()
        }

        /// Answers the per-second interest rate. The market stats are ignored here.
        pub fn get_rate(&self, _total_debt: Decimal, _lendable: Decimal) -> Decimal {
            self.rate
        }

        pub fn set_rate(&mut self, rate: Decimal) {
            assert!(rate >= Decimal::ZERO, "Rate cannot be negative");
            self.rate = rate;
        }
    }
}
