//! # Dummy Router Blueprint
//! Component for testing leveraged loan creation. Swaps the borrowed asset into
//! collateral at a settable price, and can be told to misbehave: returning too little
//! collateral or returning the wrong asset entirely.

use scrypto::prelude::*;

#[blueprint]
mod router {
    enable_method_auth! {
        methods {
            swap => PUBLIC;
            set_price => restrict_to: [OWNER];
            set_return_fraction => restrict_to: [OWNER];
            set_return_wrong_asset => restrict_to: [OWNER];
        }
    }

    struct Router {
        /// Collateral reserves handed out by swaps.
        collateral_vault: Vault,
        /// Borrowed assets received from swaps.
        taken_vault: Vault,
        /// Collateral price in the borrowed asset.
        price: Decimal,
        /// Fraction of the fair output actually returned. One means an honest swap.
        return_fraction: Decimal,
        /// When set, swaps hand the input straight back instead of collateral.
        return_wrong_asset: bool,
    }

    impl Router {
        pub fn instantiate_router(
            collateral: Bucket,
            borrowed_address: ResourceAddress,
            price: Decimal,
        ) -> Global<Router> {
            Self {
                collateral_vault: Vault::with_bucket(collateral),
                taken_vault: Vault::new(borrowed_address),
                price,
                return_fraction: Decimal::ONE,
                return_wrong_asset: false,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::None)
            .metadata(metadata! {
                init {
                    "name" => "Cascade Dummy Router".to_string(), updatable;
                    "description" => "A dummy swap router used for testing Cascade".to_string(), updatable;
                }
            })
            .globalize()
        }

        pub fn swap(&mut self, input: Bucket) -> Bucket {
            if self.return_wrong_asset {
                return input;
            }
            let out = input.amount() / self.price * self.return_fraction;
            self.taken_vault.put(input);
            self.collateral_vault.take(out)
        }

        pub fn set_price(&mut self, price: Decimal) {
            assert!(price > Decimal::ZERO, "Price must be positive");
            self.price = price;
        }

        pub fn set_return_fraction(&mut self, fraction: Decimal) {
            self.return_fraction = fraction;
        }

        pub fn set_return_wrong_asset(&mut self, wrong: bool) {
            self.return_wrong_asset = wrong;
        }
    }
}
