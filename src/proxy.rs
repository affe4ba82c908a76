#![allow(deprecated)]

//! # Cascade Protocol Proxy Blueprint
//!
//! This blueprint defines the `Proxy` component, which serves as the primary user-facing
//! entry point for interacting with the Cascade protocol.
//!
//! ## Responsibilities
//! - **Routing:** Directs user calls to the `Market` component, which in turn drives the
//!   `BandAmm`. Exchanges and views are public on the underlying components and need no
//!   routing.
//! - **Authorization:** Holds the controller badges and uses them to authorize calls to
//!   protected methods on the underlying components.
//! - **Proof Handling:** Checks loan receipt proofs before forwarding calls that act on a
//!   specific loan, so only the receipt holder can manage a position.
//! - **Admin Functions:** Provides administrative methods for managing the protocol, such
//!   as setting parameters, managing controller badges, and re-pointing the oracle, rate
//!   policy and AMM hook.
//!
//! By acting as an intermediary, the Proxy enhances security, simplifies user interaction,
//! and facilitates easier upgrades of the underlying components.

use crate::amm_component::amm_component::*;
use crate::market_component::market_component::*;
use crate::shared_structs::*;
use scrypto::prelude::*;

#[blueprint]

mod proxy {
    enable_method_auth! {
        methods {
            // Public User Actions (Routed to the Market component)
            open_loan => PUBLIC;
            open_loan_leveraged => PUBLIC;
            add_collateral => PUBLIC;
            remove_collateral => PUBLIC;
            borrow_more => PUBLIC;
            repay => PUBLIC;
            self_liquidate => PUBLIC;
            liquidate => PUBLIC;
            burn_loan_receipt => PUBLIC; // Allows burning closed loan NFTs

            // Owner/Admin Actions (Require Owner Badge for Proxy, use Controller Badge for underlying calls)
            receive_badges => restrict_to: [OWNER]; // Receive controller badges
            send_badges => restrict_to: [OWNER]; // Send controller badges
            mint_controller_badge => restrict_to: [OWNER]; // Mint more controller badges
            set_oracle => restrict_to: [OWNER]; // Re-point the Market and AMM price feeds
            set_rate_policy => restrict_to: [OWNER]; // Re-point the interest rate policy
            set_market_parameters => restrict_to: [OWNER]; // Set Market parameters
            set_stops => restrict_to: [OWNER]; // Stop or resume operation groups
            set_amm_fee => restrict_to: [OWNER]; // Set AMM exchange fee
            set_amm_admin_fee_share => restrict_to: [OWNER]; // Set protocol share of AMM fees
            set_amm_hook => restrict_to: [OWNER]; // Wire a callback component into the AMM
            provide_liquidity => restrict_to: [OWNER]; // Add lendable liquidity
            withdraw_liquidity => restrict_to: [OWNER]; // Remove unborrowed liquidity
            collect_fees => restrict_to: [OWNER]; // Collect protocol earnings
        }
    }

    /// Acts as the main entry point and authorization layer for the Cascade protocol.
    /// Routes calls to the `Market` and `BandAmm` components.
    struct Proxy {
        /// Vault holding controller badges used to authorize calls to other protocol components.
        badge_vault: FungibleVault,
        /// Global reference to the `Market` loan book component.
        market: Global<Market>,
        /// Global reference to the `BandAmm` component holding all loan collateral.
        amm: Global<BandAmm>,
        /// The resource manager for the loan receipt NFTs.
        loan_receipt_manager: ResourceManager,
        /// The resource manager for the controller badge, kept to mint replacements.
        badge_manager: ResourceManager,
    }

    impl Proxy {
        /// Instantiates the entire Cascade protocol stack: Proxy, Market and BandAmm.
        /// Creates the controller badge resource along the way.
        ///
        /// # Arguments
        /// * `owner_role_address`: The `ResourceAddress` of the badge required for OWNER
        ///   actions on the Proxy itself.
        /// * `liquidity`: Initial lendable borrowed-asset liquidity. Its resource defines
        ///   the market's borrowed asset. May be empty.
        /// * `collateral_address`: The collateral asset accepted by the market.
        /// * `a`: The amplification parameter of the AMM's band grid.
        /// * `amm_fee`: The AMM's exchange fee.
        /// * `admin_fee_share`: The protocol's share of AMM exchange fees.
        /// * `base_price`: The initial grid anchor price.
        /// * `oracle_address`: The `ComponentAddress` of the price oracle. It must answer
        ///   a `get_price` method with the collateral price in the borrowed asset.
        /// * `policy_address`: The `ComponentAddress` of the rate policy. It must answer a
        ///   `get_rate` method with a per-second interest rate.
        ///
        /// # Returns
        /// * `(Global<Proxy>, Global<Market>, Global<BandAmm>, ResourceAddress, Bucket)`:
        ///   Global references to the newly instantiated components, the loan receipt
        ///   resource, and one controller badge for the instantiator to keep for setup and
        ///   emergency administration.
        ///
        /// # Logic
        /// 1. Allocates the Proxy component address.
        /// 2. Creates the controller badge resource, mintable only by the Proxy.
        /// 3. Instantiates the `Market`, which instantiates the `BandAmm` itself and
        ///    receives a controller badge to drive it with.
        /// 4. Globalizes the Proxy with an owner role satisfied by either the given owner
        ///    badge or a controller badge.
        pub fn new(
            owner_role_address: ResourceAddress,
            liquidity: Bucket,
            collateral_address: ResourceAddress,
            a: Decimal,
            amm_fee: Decimal,
            admin_fee_share: Decimal,
            base_price: Decimal,
            oracle_address: ComponentAddress,
            policy_address: ComponentAddress,
        ) -> (
            Global<Proxy>,
            Global<Market>,
            Global<BandAmm>,
            ResourceAddress,
            Bucket,
        ) {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(Proxy::blueprint_id());

            let mut controller_badge: Bucket = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(global_caller(component_address))),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "controller badge cascade", locked;
                    "symbol" => "cascCTRL", locked;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .mint_initial_supply(30)
            .into();

            let badge_manager: ResourceManager = controller_badge.resource_manager();
            let controller_badge_address = controller_badge.resource_address();
            let controller_badge_to_return = controller_badge.take(Decimal::ONE);

            let owner_role_access_rule = rule!(
                require_amount(dec!("0.75"), owner_role_address)
                    || require_amount(dec!("0.75"), controller_badge_address)
            );
            let owner_role = OwnerRole::Fixed(owner_role_access_rule.clone());

            let (market, loan_receipt_address, amm) = Market::instantiate(
                liquidity,
                collateral_address,
                a,
                amm_fee,
                admin_fee_share,
                base_price,
                oracle_address,
                "get_price".to_string(),
                policy_address,
                "get_rate".to_string(),
                controller_badge.take(Decimal::ONE),
            );

            let proxy = Self {
                badge_vault: FungibleVault::with_bucket(controller_badge.as_fungible()),
                market,
                amm,
                loan_receipt_manager: ResourceManager::from_address(loan_receipt_address),
                badge_manager,
            }
            .instantiate()
            .prepare_to_globalize(owner_role)
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Cascade Protocol Proxy".to_string(), updatable;
                    "description" => "A proxy component for the Cascade protocol".to_string(), updatable;
                    "info_url" => Url::of("https://cascadelend.xyz"), updatable;
                }
            })
            .globalize();

            (
                proxy,
                market,
                amm,
                loan_receipt_address,
                controller_badge_to_return,
            )
        }

        //==================================================================
        //                         USER METHODS
        //==================================================================

        /// Opens a new loan.
        ///
        /// # Arguments
        /// * `collateral`: The collateral to back the loan with.
        /// * `debt`: The borrowed-asset amount to take out.
        /// * `n_bands`: How many bands to spread the collateral across, between 4 and 50.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The borrowed assets and the loan receipt NFT.
        pub fn open_loan(
            &mut self,
            collateral: Bucket,
            debt: Decimal,
            n_bands: u32,
        ) -> (Bucket, Bucket) {
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market.create_loan(collateral, debt, n_bands)
            })
        }

        /// Opens a leveraged loan: the borrowed amount is swapped into extra collateral
        /// through the given router before the deposit.
        ///
        /// # Arguments
        /// * `collateral`: The caller's own collateral.
        /// * `debt`: The borrowed-asset amount to take out and route.
        /// * `n_bands`: How many bands to spread the collateral across.
        /// * `router_address` / `router_method`: The swap component to route the debt
        ///   through.
        /// * `min_collateral_out`: Minimum collateral the router must return.
        ///
        /// # Returns
        /// * `Bucket`: The loan receipt NFT.
        pub fn open_loan_leveraged(
            &mut self,
            collateral: Bucket,
            debt: Decimal,
            n_bands: u32,
            router_address: ComponentAddress,
            router_method: String,
            min_collateral_out: Decimal,
        ) -> Bucket {
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market.create_loan_leveraged(
                    collateral,
                    debt,
                    n_bands,
                    router_address,
                    router_method,
                    min_collateral_out,
                )
            })
        }

        /// Adds collateral to the caller's loan.
        /// Requires proof of ownership of the loan receipt NFT.
        pub fn add_collateral(&mut self, collateral: Bucket, receipt_proof: NonFungibleProof) {
            let receipt_id = self.checked_receipt_id(receipt_proof);
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market.add_collateral(receipt_id, collateral)
            })
        }

        /// Removes collateral from the caller's loan.
        /// Requires proof of ownership of the loan receipt NFT.
        ///
        /// # Returns
        /// * `Bucket`: The removed collateral.
        pub fn remove_collateral(
            &mut self,
            amount: Decimal,
            receipt_proof: NonFungibleProof,
        ) -> Bucket {
            let receipt_id = self.checked_receipt_id(receipt_proof);
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market.remove_collateral(receipt_id, amount)
            })
        }

        /// Borrows more against the caller's loan, optionally adding collateral in the
        /// same step. Requires proof of ownership of the loan receipt NFT.
        ///
        /// # Returns
        /// * `Bucket`: The extra borrowed assets.
        pub fn borrow_more(
            &mut self,
            collateral: Bucket,
            extra_debt: Decimal,
            receipt_proof: NonFungibleProof,
        ) -> Bucket {
            let receipt_id = self.checked_receipt_id(receipt_proof);
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market.borrow_more(receipt_id, collateral, extra_debt)
            })
        }

        /// Repays the caller's loan, fully or partially.
        /// Requires proof of ownership of the loan receipt NFT.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Unused payment, borrowed assets recovered beyond
        ///   the debt, and the loan's collateral on a full repayment.
        pub fn repay(
            &mut self,
            payment: Bucket,
            receipt_proof: NonFungibleProof,
        ) -> (Bucket, Bucket, Bucket) {
            let receipt_id = self.checked_receipt_id(receipt_proof);
            self.badge_vault
                .authorize_with_amount(dec!(0.75), || self.market.repay(receipt_id, payment))
        }

        /// Closes the caller's own loan through the liquidation path, at any health.
        /// Requires proof of ownership of the loan receipt NFT.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Unused payment, borrowed assets from the loan's
        ///   bands beyond its debt, and the loan's collateral.
        pub fn self_liquidate(
            &mut self,
            payment: Bucket,
            receipt_proof: NonFungibleProof,
            min_collateral_out: Decimal,
        ) -> (Bucket, Bucket, Bucket) {
            let receipt_id = self.checked_receipt_id(receipt_proof);
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market
                    .self_liquidate(receipt_id, payment, min_collateral_out)
            })
        }

        /// Liquidates an unhealthy loan. Callable by anyone.
        ///
        /// # Arguments
        /// * `payment`: Borrowed assets covering the debt not already converted inside
        ///   the loan's bands.
        /// * `loan_id`: The loan to liquidate.
        /// * `fraction`: The fraction of the loan to liquidate, in `(0, 1]`.
        /// * `min_collateral_out`: Minimum collateral the liquidator will accept.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Unused payment, surplus borrowed assets, and the
        ///   seized collateral.
        pub fn liquidate(
            &mut self,
            payment: Bucket,
            loan_id: NonFungibleLocalId,
            fraction: Decimal,
            min_collateral_out: Decimal,
        ) -> (Bucket, Bucket, Bucket) {
            self.badge_vault.authorize_with_amount(dec!(0.75), || {
                self.market
                    .liquidate(loan_id, payment, fraction, min_collateral_out)
            })
        }

        /// Burns the receipt of a closed loan.
        pub fn burn_loan_receipt(&mut self, receipt: Bucket) {
            self.badge_vault
                .authorize_with_amount(dec!(0.75), || self.market.burn_loan_receipt(receipt))
        }

        //==================================================================
        //                         ADMIN METHODS
        //==================================================================

        /// Allows the Proxy component to receive controller badges back.
        /// Requires OWNER authorization on the Proxy.
        pub fn receive_badges(&mut self, badge_bucket: Bucket) {
            self.badge_vault.put(badge_bucket.as_fungible());
        }

        /// Sends controller badges held by the Proxy to another component.
        /// Requires OWNER authorization on the Proxy.
        /// Assumes the receiving component has a `receive_badges` method.
        ///
        /// # Arguments
        /// * `amount`: The `Decimal` amount of controller badges to send.
        /// * `receiver_address`: The `ComponentAddress` of the recipient.
        pub fn send_badges(&mut self, amount: Decimal, receiver_address: ComponentAddress) {
            let receiver: Global<AnyComponent> = Global::from(receiver_address);
            let badge_bucket: Bucket = self.badge_vault.take(amount).into();
            receiver.call_raw("receive_badges", scrypto_args!(badge_bucket))
        }

        /// Mints more controller badges.
        pub fn mint_controller_badge(&mut self, amount: Decimal) -> Bucket {
            self.badge_manager.mint(amount)
        }

        /// Updates the oracle component address and method name used by the Market and the
        /// AMM. Requires OWNER authorization on the Proxy.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, method_name: String) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.market.set_oracle(oracle_address, method_name.clone());
                self.amm.set_oracle(oracle_address, method_name);
            })
        }

        /// Updates the rate policy component address and method name used by the Market.
        /// Requires OWNER authorization on the Proxy.
        pub fn set_rate_policy(&mut self, policy_address: ComponentAddress, method_name: String) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.market.set_rate_policy(policy_address, method_name)
            })
        }

        /// Changes market parameters. `None` leaves a parameter untouched.
        pub fn set_market_parameters(
            &mut self,
            loan_discount: Option<Decimal>,
            liquidation_discount: Option<Decimal>,
            borrow_fee: Option<Decimal>,
            min_debt: Option<Decimal>,
        ) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.market.set_parameters(
                    loan_discount,
                    liquidation_discount,
                    borrow_fee,
                    min_debt,
                )
            })
        }

        /// Stops or resumes groups of operations across the protocol.
        pub fn set_stops(
            &mut self,
            new_loans: bool,
            adjustments: bool,
            liquidations: bool,
            trading: bool,
        ) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.market.set_stops(new_loans, adjustments, liquidations);
                self.amm.set_trading_enabled(!trading);
            })
        }

        /// Sets the AMM's exchange fee.
        pub fn set_amm_fee(&mut self, fee: Decimal) {
            self.badge_vault
                .authorize_with_amount(dec!("0.75"), || self.amm.set_fee(fee))
        }

        /// Sets the protocol's share of AMM exchange fees.
        pub fn set_amm_admin_fee_share(&mut self, admin_fee_share: Decimal) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.amm.set_admin_fee_share(admin_fee_share)
            })
        }

        /// Installs, replaces or removes the AMM's callback hook.
        pub fn set_amm_hook(
            &mut self,
            hook_address: Option<ComponentAddress>,
            hook_method: String,
        ) {
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.amm.set_hook(hook_address, hook_method)
            })
        }

        /// Adds lendable liquidity to the market.
        pub fn provide_liquidity(&mut self, liquidity: Bucket) {
            self.badge_vault
                .authorize_with_amount(dec!("0.75"), || self.market.provide_liquidity(liquidity))
        }

        /// Removes unborrowed liquidity from the market.
        pub fn withdraw_liquidity(&mut self, amount: Decimal) -> Bucket {
            self.badge_vault
                .authorize_with_amount(dec!("0.75"), || self.market.withdraw_liquidity(amount))
        }

        /// Collects protocol earnings from the market and the AMM.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Market fees in the borrowed asset, AMM fees in
        ///   the borrowed asset, and AMM fees in collateral.
        pub fn collect_fees(&mut self) -> (Bucket, Bucket, Bucket) {
            self.badge_vault
                .authorize_with_amount(dec!("0.75"), || self.market.collect_fees())
        }

        //==================================================================
        //                         HELPER METHODS
        //==================================================================

        /// Checks a loan receipt proof and extracts the loan id.
        fn checked_receipt_id(&self, receipt_proof: NonFungibleProof) -> NonFungibleLocalId {
            let receipt_proof = receipt_proof.check_with_message(
                self.loan_receipt_manager.address(),
                "Incorrect proof! Are you sure this loan is yours?",
            );
            receipt_proof
                .non_fungible::<LoanReceipt>()
                .local_id()
                .clone()
        }
    }
}
