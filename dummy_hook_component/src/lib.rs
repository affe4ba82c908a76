//! # Dummy Hook Blueprint
//! Component for testing the AMM's callback surface. Records every notification it
//! receives and can be told to panic, which must abort the operation that fired it.

use scrypto::prelude::*;

#[blueprint]
mod hook {
    enable_method_auth! {
        methods {
            on_amm_event => PUBLIC;
            get_calls => PUBLIC;
            call_count => PUBLIC;
            set_panic_on_call => restrict_to: [OWNER];
        }
    }

    struct Hook {
        calls: Vec<(String, Option<NonFungibleLocalId>, Decimal, Decimal, i64)>,
        panic_on_call: bool,
    }

    impl Hook {
        pub fn instantiate_hook() -> Global<Hook> {
            Self {
                calls: vec![],
                panic_on_call: false,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::None)
            .metadata(metadata! {
                init {
                    "name" => "Cascade Dummy Hook".to_string(), updatable;
                    "description" => "A dummy AMM hook used for testing Cascade".to_string(), updatable;
                }
            })
            .globalize()
        }

        pub fn on_amm_event(
            &mut self,
            action: String,
            position_id: Option<NonFungibleLocalId>,
            amount_x: Decimal,
            amount_y: Decimal,
            active_band: i64,
        ) {
            assert!(!self.panic_on_call, "Hook failure");
            self.calls
                .push((action, position_id, amount_x, amount_y, active_band));
        }

        pub fn get_calls(
            &self,
        ) -> Vec<(String, Option<NonFungibleLocalId>, Decimal, Decimal, i64)> {
            self.calls.clone()
        }

        pub fn call_count(&self) -> u64 {
            self.calls.len() as u64
        }

        pub fn set_panic_on_call(&mut self, panic: bool) {
            self.panic_on_call = panic;
        }
    }
}
