//! # Dummy Oracle Blueprint
//! Component for testing price lookups without external dependencies.

use scrypto::prelude::*;

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            get_price => PUBLIC;
            set_price => restrict_to: [OWNER];
        }
    }

    struct Oracle {
        price: Decimal,
    }

    impl Oracle {
        pub fn instantiate_oracle(initial_price: Decimal) -> Global<Oracle> {
            Self {
                price: initial_price,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::None)
            .metadata(metadata! {
                init {
                    "name" => "Cascade Dummy Oracle".to_string(), updatable;
                    "description" => "A dummy oracle used for testing Cascade".to_string(), updatable;
                }
            })
            .globalize()
        }

        pub fn get_price(&self) -> Decimal {
            self.price
        }

        pub fn set_price(&mut self, price: Decimal) {
            assert!(price > Decimal::ZERO, "Price must be positive");
            self.price = price;
        }
    }
}
