#![allow(deprecated)]

//! # The Market Blueprint
//!
//! This blueprint defines the loan book of the Cascade protocol. It owns the lendable
//! borrowed-asset liquidity, mints loan receipt NFTs, accrues interest, and runs every loan
//! through its lifecycle on top of the `BandAmm` component.
//!
//! ## Overview
//! - **Open a Loan:** Deposit collateral, choose a number of bands and a debt amount. The
//!   sizing math places the collateral into a contiguous band range far enough below the
//!   oracle price that the discounted conversion value covers the debt.
//! - **Manage a Loan:** Add or remove collateral, borrow more, or repay partially. While a
//!   loan is untouched by soft liquidation its bands are re-sized on every change; once the
//!   trading walk has entered its range, only repayment is allowed.
//! - **Soft Liquidation:** Performed by the AMM, not by this component. As the oracle price
//!   moves through a loan's bands, arbitrage converts its collateral into the borrowed
//!   asset and back. No action from the borrower or keepers is needed.
//! - **Hard Liquidation:** When a loan's health goes negative despite soft liquidation,
//!   anyone can repay its debt and take its remaining assets, fully or fractionally.
//!   Owners can close their own loan the same way at any health.
//! - **Interest:** A per-second rate supplied by a policy component compounds lazily into a
//!   global rate multiplier. Each loan snapshots the multiplier when its debt is written;
//!   live debt scales by the multiplier ratio since the snapshot.
//!
//! ## Interaction with Other Components
//! - **`BandAmm`:** Holds all loan collateral. This component is its only liquidity mover,
//!   authorized by controller badges.
//! - **`Proxy`:** The user-facing entry point. Checks receipt proofs and forwards calls.
//! - **Oracle / Policy:** Untyped collaborators answering a price and a per-second rate.
//! - **Router:** An untrusted component used by leveraged loan creation. Its output is
//!   validated; a misbehaving router aborts the transaction.

use crate::amm_component::amm_component::*;
use crate::band_math::*;
use crate::events::*;
use crate::shared_structs::*;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

#[blueprint]
#[types(
    Decimal,
    AvlTree<Decimal, Vec<NonFungibleLocalId>>,
    Vec<NonFungibleLocalId>,
    NonFungibleLocalId,
    LoanReceipt
)]
#[events(
    EventNewLoan,
    EventUpdateLoan,
    EventCloseLoan,
    EventLiquidateLoan,
    EventAccrueInterest,
    EventChangeParameters,
    EventProvideLiquidity,
    EventWithdrawLiquidity,
    EventCollectFees
)]
mod market_component {
    enable_method_auth! {
        methods {
            create_loan => restrict_to: [OWNER];
            create_loan_leveraged => restrict_to: [OWNER];
            add_collateral => restrict_to: [OWNER];
            remove_collateral => restrict_to: [OWNER];
            borrow_more => restrict_to: [OWNER];
            repay => restrict_to: [OWNER];
            liquidate => restrict_to: [OWNER];
            self_liquidate => restrict_to: [OWNER];
            burn_loan_receipt => restrict_to: [OWNER];
            provide_liquidity => restrict_to: [OWNER];
            withdraw_liquidity => restrict_to: [OWNER];
            collect_fees => restrict_to: [OWNER];
            set_parameters => restrict_to: [OWNER];
            set_stops => restrict_to: [OWNER];
            set_rate_policy => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            get_loan_info => PUBLIC;
            get_market_info => PUBLIC;
            get_health => PUBLIC;
            get_total_debt => PUBLIC;
            calculate_debt_n1 => PUBLIC;
            max_borrowable => PUBLIC;
            min_collateral => PUBLIC;
            users_to_liquidate => PUBLIC;
            get_loan_receipt_address => PUBLIC;
            get_amm_address => PUBLIC;
        }
    }

    struct Market {
        /// The band AMM holding all loan collateral.
        amm: Global<BandAmm>,
        /// The amplification parameter, mirrored from the AMM for the sizing math.
        a: Decimal,
        /// The `ResourceManager` for the loan receipt NFTs.
        loan_manager: ResourceManager,
        /// A counter to generate unique ids for new loan receipts.
        loan_counter: u64,
        /// Vault holding controller badges used to authorize calls to the AMM.
        badge_vault: FungibleVault,
        /// Vault holding lendable borrowed-asset liquidity. Doubles as the debt ceiling:
        /// loans can only take what is in here.
        borrowed_vault: Vault,
        /// The collateral asset accepted by this market.
        collateral_address: ResourceAddress,
        /// The per-second interest rate currently applied.
        rate: Decimal,
        /// The global rate multiplier, compounded lazily.
        rate_mul: Decimal,
        /// Timestamp of the last multiplier catch-up, seconds since the unix epoch.
        rate_time: i64,
        /// Aggregate debt in multiplier units. Live total debt is `debt_units * rate_mul`.
        debt_units: Decimal,
        /// The number of open loans.
        open_loans: u64,
        /// Borrowed-asset principal provided by the owner. Anything above this plus
        /// outstanding debt is protocol profit.
        provided_liquidity: Decimal,
        /// The price oracle, shared wiring with the AMM.
        oracle: Global<AnyComponent>,
        /// The method name to call on the oracle.
        oracle_method: String,
        /// The rate policy component, answering a per-second rate.
        policy: Global<AnyComponent>,
        /// The method name to call on the policy.
        policy_method: String,
        /// Adjustable protocol parameters.
        parameters: MarketParameters,
        /// Open loans indexed by their top band, for liquidation scans in price order.
        loans_by_band: AvlTree<Decimal, Vec<NonFungibleLocalId>>,
        /// The oracle price observed at the last accrual, kept for summary views.
        last_oracle_price: Decimal,
    }

    impl Market {
        /// Instantiates the `Market` component together with its `BandAmm`.
        ///
        /// # Arguments
        /// * `liquidity`: Initial lendable borrowed-asset liquidity. May be empty.
        /// * `collateral_address`: The collateral asset accepted by this market.
        /// * `a`: The amplification parameter for the AMM's band grid.
        /// * `amm_fee`: The AMM's exchange fee.
        /// * `admin_fee_share`: The protocol's share of AMM exchange fees.
        /// * `base_price`: The initial grid anchor price.
        /// * `oracle_address` / `oracle_method`: Price oracle wiring, shared with the AMM.
        /// * `policy_address` / `policy_method`: Rate policy wiring.
        /// * `badges`: Controller badges retained to authorize AMM calls.
        ///
        /// # Returns
        /// * `Global<Market>`: A global reference to the newly instantiated component.
        /// * `ResourceAddress`: The loan receipt NFT resource.
        /// * `Global<BandAmm>`: The instantiated `BandAmm`.
        ///
        /// # Logic
        /// Default parameters start with a 9% loan discount, 6% liquidation discount, no
        /// borrow fee and a minimum debt of 100. The AMM is instantiated here so the badge
        /// resource can own both components; the market keeps a typed handle for liquidity
        /// calls and returns the address for direct public access.
        pub fn instantiate(
            liquidity: Bucket,
            collateral_address: ResourceAddress,
            a: Decimal,
            amm_fee: Decimal,
            admin_fee_share: Decimal,
            base_price: Decimal,
            oracle_address: ComponentAddress,
            oracle_method: String,
            policy_address: ComponentAddress,
            policy_method: String,
            badges: Bucket,
        ) -> (Global<Market>, ResourceAddress, Global<BandAmm>) {
            let parameters = MarketParameters {
                loan_discount: dec!("0.09"),
                liquidation_discount: dec!("0.06"),
                borrow_fee: Decimal::ZERO,
                min_debt: dec!(100),
                stop_new_loans: false,
                stop_adjustments: false,
                stop_liquidations: false,
            };

            let (address_reservation, component_address) =
                Runtime::allocate_component_address(Market::blueprint_id());

            let badge_address = badges.resource_address();
            let amm = BandAmm::instantiate(
                liquidity.resource_address(),
                collateral_address,
                a,
                amm_fee,
                admin_fee_share,
                base_price,
                oracle_address,
                oracle_method.clone(),
                badge_address,
            );

            let loan_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<LoanReceipt>(
                    OwnerRole::Fixed(rule!(require_amount(dec!("0.75"), badge_address))),
                )
                .metadata(metadata!(
                    init {
                        "name" => "Cascade Loan Receipt", locked;
                        "symbol" => "cascLOAN", locked;
                        "description" => "A receipt for a loan in the Cascade market.", locked;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address))
                        || require_amount(dec!("0.75"), badge_address));
                    non_fungible_data_updater_updater => rule!(require_amount(
                        dec!("0.75"),
                        badge_address
                    ));
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address))
                        || require_amount(dec!("0.75"), badge_address));
                    minter_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .burn_roles(burn_roles!(
                    burner => rule!(require(global_caller(component_address))
                        || require_amount(dec!("0.75"), badge_address));
                    burner_updater => rule!(require_amount(dec!("0.75"), badge_address));
                ))
                .create_with_no_initial_supply()
                .into();
            let loan_address = loan_manager.address();
            let provided_liquidity = liquidity.amount();

            let market = Self {
                amm,
                a,
                loan_manager,
                loan_counter: 0,
                badge_vault: FungibleVault::with_bucket(badges.as_fungible()),
                borrowed_vault: Vault::with_bucket(liquidity),
                collateral_address,
                rate: Decimal::ZERO,
                rate_mul: Decimal::ONE,
                rate_time: Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch,
                debt_units: Decimal::ZERO,
                open_loans: 0,
                provided_liquidity,
                oracle: Global::from(oracle_address),
                oracle_method,
                policy: Global::from(policy_address),
                policy_method,
                parameters,
                loans_by_band: AvlTree::new(),
                last_oracle_price: Decimal::ZERO,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                badge_address
            ))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Cascade Market".to_string(), updatable;
                    "description" => "The loan book of the Cascade protocol".to_string(), updatable;
                }
            })
            .globalize();

            (market, loan_address, amm)
        }

        /// Opens a new loan, depositing collateral into the AMM and paying out debt.
        ///
        /// # Arguments
        /// * `collateral`: The collateral to back the loan with.
        /// * `debt`: The borrowed-asset amount to take out.
        /// * `n_bands`: How many bands to spread the collateral across, between 4 and 50.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The borrowed assets (minus the borrow fee) and the loan
        ///   receipt NFT.
        ///
        /// # Panics
        /// * If new loans are stopped, the debt is below the minimum or above the lendable
        ///   liquidity, the band count is out of range, or the collateral cannot cover the
        ///   debt at the discounted conversion value (`Debt too high`).
        ///
        /// # Logic
        /// 1. Accrues interest and refreshes the rate.
        /// 2. Sizes the band range: the top band is the highest band fully below the
        ///    oracle price, pushed deeper by however much coverage headroom the collateral
        ///    affords.
        /// 3. Deposits the collateral into the AMM under badge authorization.
        /// 4. Mints the receipt, indexes the loan by its top band, and pays out the debt.
        pub fn create_loan(
            &mut self,
            collateral: Bucket,
            debt: Decimal,
            n_bands: u32,
        ) -> (Bucket, Bucket) {
            assert!(!self.parameters.stop_new_loans, "New loans are stopped");
            assert!(
                collateral.resource_address() == self.collateral_address,
                "Wrong collateral asset"
            );
            self.accrue();
            assert!(
                debt >= self.parameters.min_debt,
                "Debt too small for a loan"
            );
            assert!(
                debt <= self.borrowed_vault.amount(),
                "Debt ceiling exceeded"
            );

            self.loan_counter += 1;
            let loan_id = NonFungibleLocalId::integer(self.loan_counter);
            let collateral_amount = collateral.amount();
            let n1 = self.calculate_debt_n1(collateral_amount, debt, n_bands);
            let n2 = n1 + n_bands as i64 - 1;

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.amm.deposit_range(loan_id.clone(), collateral, n1, n2)
            });

            let receipt = LoanReceipt {
                key_image_url: Url::of("https://cascadelend.xyz/loan-receipt.png"),
                initial_debt: debt,
                rate_mul_snapshot: self.rate_mul,
                n_bands,
                liquidation_discount: self.parameters.liquidation_discount,
                status: LoanStatus::Active,
            };
            let receipt_bucket = self
                .loan_manager
                .mint_non_fungible(&loan_id, receipt.clone());

            self.debt_units += debt / self.rate_mul;
            self.open_loans += 1;
            self.insert_loan_band(n1, loan_id.clone());

            let mut payout = self.borrowed_vault.take(debt);
            let fee = debt * self.parameters.borrow_fee;
            if fee > Decimal::ZERO {
                self.borrowed_vault.put(payout.take(fee));
            }

            Runtime::emit_event(EventNewLoan {
                receipt,
                loan_id,
                debt,
                collateral_amount,
                bands: (n1, n2),
            });
            (payout, receipt_bucket)
        }

        /// Opens a leveraged loan: the debt is swapped into extra collateral through a
        /// caller-chosen router before the deposit, so the position starts larger than the
        /// collateral the caller brought.
        ///
        /// # Arguments
        /// * `collateral`: The caller's own collateral.
        /// * `debt`: The borrowed-asset amount to take out and route.
        /// * `n_bands`: How many bands to spread the collateral across.
        /// * `router_address` / `router_method`: The swap component to route the debt
        ///   through. The router receives the borrowed assets and must return collateral.
        /// * `min_collateral_out`: Minimum collateral the router must return.
        ///
        /// # Returns
        /// * `Bucket`: The loan receipt NFT. The debt itself went to the router.
        ///
        /// # Logic
        /// The router is untrusted: its returned bucket is checked for the right resource
        /// and a minimum amount, and the combined position must satisfy the same sizing
        /// rule as a plain loan. Any violation aborts the whole transaction, so a
        /// misbehaving router cannot leave a half-built position behind.
        pub fn create_loan_leveraged(
            &mut self,
            mut collateral: Bucket,
            debt: Decimal,
            n_bands: u32,
            router_address: ComponentAddress,
            router_method: String,
            min_collateral_out: Decimal,
        ) -> Bucket {
            assert!(!self.parameters.stop_new_loans, "New loans are stopped");
            assert!(
                collateral.resource_address() == self.collateral_address,
                "Wrong collateral asset"
            );
            self.accrue();
            assert!(
                debt >= self.parameters.min_debt,
                "Debt too small for a loan"
            );
            assert!(
                debt <= self.borrowed_vault.amount(),
                "Debt ceiling exceeded"
            );

            let borrowed = self.borrowed_vault.take(debt);
            let router: Global<AnyComponent> = Global::from(router_address);
            let routed: Bucket = router.call_raw(&router_method, scrypto_args!(borrowed));
            assert!(
                routed.resource_address() == self.collateral_address,
                "Router returned the wrong asset"
            );
            assert!(
                routed.amount() >= min_collateral_out,
                "Router returned too little collateral"
            );
            collateral.put(routed);

            self.loan_counter += 1;
            let loan_id = NonFungibleLocalId::integer(self.loan_counter);
            let collateral_amount = collateral.amount();
            let n1 = self.calculate_debt_n1(collateral_amount, debt, n_bands);
            let n2 = n1 + n_bands as i64 - 1;

            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.amm.deposit_range(loan_id.clone(), collateral, n1, n2)
            });

            let receipt = LoanReceipt {
                key_image_url: Url::of("https://cascadelend.xyz/loan-receipt.png"),
                initial_debt: debt,
                rate_mul_snapshot: self.rate_mul,
                n_bands,
                liquidation_discount: self.parameters.liquidation_discount,
                status: LoanStatus::Active,
            };
            let receipt_bucket = self
                .loan_manager
                .mint_non_fungible(&loan_id, receipt.clone());

            self.debt_units += debt / self.rate_mul;
            self.open_loans += 1;
            self.insert_loan_band(n1, loan_id.clone());

            Runtime::emit_event(EventNewLoan {
                receipt,
                loan_id,
                debt,
                collateral_amount,
                bands: (n1, n2),
            });
            receipt_bucket
        }

        /// Adds collateral to an open loan, re-sizing its bands deeper below the price.
        ///
        /// # Panics
        /// * If adjustments are stopped, the loan is not active, or soft liquidation has
        ///   already converted part of the position.
        pub fn add_collateral(&mut self, loan_id: NonFungibleLocalId, collateral: Bucket) {
            assert!(!self.parameters.stop_adjustments, "Adjustments are stopped");
            assert!(
                collateral.resource_address() == self.collateral_address,
                "Wrong collateral asset"
            );
            assert!(collateral.amount() > Decimal::ZERO, "Empty deposit");
            self.accrue();
            let receipt = self.active_receipt(&loan_id);
            let debt = self.live_debt(&receipt);

            let (mut all_collateral, old_n1) = self.pull_untouched_position(&loan_id);
            all_collateral.put(collateral);
            self.redeposit(
                &loan_id,
                all_collateral,
                debt,
                receipt.n_bands,
                old_n1,
            );
            self.relock_discount(&loan_id);

            let receipt = self.receipt_of(&loan_id);
            Runtime::emit_event(EventUpdateLoan { receipt, loan_id });
        }

        /// Removes collateral from an open loan, as long as the remainder still covers the
        /// debt under the sizing rule.
        ///
        /// # Returns
        /// * `Bucket`: The removed collateral.
        pub fn remove_collateral(
            &mut self,
            loan_id: NonFungibleLocalId,
            amount: Decimal,
        ) -> Bucket {
            assert!(!self.parameters.stop_adjustments, "Adjustments are stopped");
            assert!(amount > Decimal::ZERO, "Empty withdrawal");
            self.accrue();
            let receipt = self.active_receipt(&loan_id);
            let debt = self.live_debt(&receipt);

            let (mut all_collateral, old_n1) = self.pull_untouched_position(&loan_id);
            assert!(
                all_collateral.amount() > amount,
                "Not enough collateral in the loan"
            );
            let removed = all_collateral.take(amount);
            self.redeposit(
                &loan_id,
                all_collateral,
                debt,
                receipt.n_bands,
                old_n1,
            );
            self.relock_discount(&loan_id);

            let receipt = self.receipt_of(&loan_id);
            Runtime::emit_event(EventUpdateLoan { receipt, loan_id });
            removed
        }

        /// Borrows more against an open loan, optionally adding collateral in the same
        /// step.
        ///
        /// # Arguments
        /// * `loan_id`: The loan to extend.
        /// * `collateral`: Extra collateral; may be empty.
        /// * `extra_debt`: The additional borrowed-asset amount to take out.
        ///
        /// # Returns
        /// * `Bucket`: The extra borrowed assets, minus the borrow fee.
        pub fn borrow_more(
            &mut self,
            loan_id: NonFungibleLocalId,
            collateral: Bucket,
            extra_debt: Decimal,
        ) -> Bucket {
            assert!(!self.parameters.stop_new_loans, "New loans are stopped");
            assert!(
                collateral.resource_address() == self.collateral_address,
                "Wrong collateral asset"
            );
            assert!(extra_debt > Decimal::ZERO, "Empty borrow");
            self.accrue();
            assert!(
                extra_debt <= self.borrowed_vault.amount(),
                "Debt ceiling exceeded"
            );
            let receipt = self.active_receipt(&loan_id);
            let new_debt = self.live_debt(&receipt) + extra_debt;

            let (mut all_collateral, old_n1) = self.pull_untouched_position(&loan_id);
            all_collateral.put(collateral);
            self.redeposit(&loan_id, all_collateral, new_debt, receipt.n_bands, old_n1);
            self.write_debt(&loan_id, &receipt, new_debt);
            self.relock_discount(&loan_id);

            let mut payout = self.borrowed_vault.take(extra_debt);
            let fee = extra_debt * self.parameters.borrow_fee;
            if fee > Decimal::ZERO {
                self.borrowed_vault.put(payout.take(fee));
            }

            let receipt = self.receipt_of(&loan_id);
            Runtime::emit_event(EventUpdateLoan { receipt, loan_id });
            payout
        }

        /// Repays a loan, fully or partially.
        ///
        /// # Arguments
        /// * `loan_id`: The loan to repay.
        /// * `payment`: Borrowed assets. Anything beyond the outstanding debt is returned.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Unused payment, borrowed assets recovered from the
        ///   loan's bands beyond its debt, and the loan's collateral. The last two are
        ///   empty unless the repayment closes the loan.
        ///
        /// # Logic
        /// Borrowed assets already sitting in the loan's bands (from soft liquidation)
        /// count toward the debt. If payment plus band holdings cover everything, the
        /// position is withdrawn, the debt extinguished and all remaining assets returned.
        /// Otherwise the payment reduces the debt: an untouched position is re-sized
        /// deeper, a partially converted one keeps its bands.
        ///
        /// # Panics
        /// * If the loan is not active, or a partial repayment would leave a debt below the
        ///   minimum.
        pub fn repay(
            &mut self,
            loan_id: NonFungibleLocalId,
            mut payment: Bucket,
        ) -> (Bucket, Bucket, Bucket) {
            assert!(
                payment.resource_address() == self.borrowed_vault.resource_address(),
                "Wrong payment asset"
            );
            self.accrue();
            let receipt = self.active_receipt(&loan_id);
            let debt = self.live_debt(&receipt);
            let (amm_borrowed, _) = self.amm.get_position_reserves(loan_id.clone());

            if payment.amount() + amm_borrowed >= debt {
                // Full repayment: pull the position and settle.
                let (n1, _) = self.amm.get_position_bands(loan_id.clone());
                let (mut borrowed_back, collateral_back) = self
                    .badge_vault
                    .authorize_with_amount(dec!("0.75"), || self.amm.withdraw(loan_id.clone(), Decimal::ONE));

                if borrowed_back.amount() >= debt {
                    self.borrowed_vault.put(borrowed_back.take(debt));
                } else {
                    let shortfall = debt - borrowed_back.amount();
                    self.borrowed_vault.put(borrowed_back.take_all());
                    self.borrowed_vault.put(payment.take(shortfall));
                }

                self.close_loan(&loan_id, &receipt, n1, LoanStatus::Repaid);
                Runtime::emit_event(EventCloseLoan {
                    loan_id,
                    debt_repaid: debt,
                });
                return (payment, borrowed_back, collateral_back);
            }

            // Partial repayment.
            let amount = payment.amount();
            let new_debt = debt - amount;
            assert!(
                new_debt >= self.parameters.min_debt,
                "Debt too small for a loan"
            );
            self.borrowed_vault.put(payment.take_all());
            self.write_debt(&loan_id, &receipt, new_debt);

            if amm_borrowed == Decimal::ZERO {
                // Untouched by soft liquidation: push the bands deeper to match the
                // smaller debt.
                let (all_collateral, old_n1) = self.pull_untouched_position(&loan_id);
                self.redeposit(&loan_id, all_collateral, new_debt, receipt.n_bands, old_n1);
                self.relock_discount(&loan_id);
            }

            let updated = self.receipt_of(&loan_id);
            Runtime::emit_event(EventUpdateLoan {
                receipt: updated,
                loan_id,
            });
            (
                payment,
                Bucket::new(self.borrowed_vault.resource_address()),
                Bucket::new(self.collateral_address),
            )
        }

        /// Liquidates an unhealthy loan.
        ///
        /// # Arguments
        /// * `loan_id`: The loan to liquidate.
        /// * `payment`: Borrowed assets covering the debt not already converted inside the
        ///   loan's bands.
        /// * `fraction`: The fraction of the loan to liquidate, in `(0, 1]`.
        /// * `min_collateral_out`: Minimum collateral the liquidator will accept.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Unused payment, surplus borrowed assets from the
        ///   bands, and the seized collateral.
        ///
        /// # Panics
        /// * If liquidations are stopped, the loan is not active, or its full health
        ///   (counting the above-range premium) is still positive.
        pub fn liquidate(
            &mut self,
            loan_id: NonFungibleLocalId,
            payment: Bucket,
            fraction: Decimal,
            min_collateral_out: Decimal,
        ) -> (Bucket, Bucket, Bucket) {
            assert!(
                !self.parameters.stop_liquidations,
                "Liquidations are stopped"
            );
            self.accrue();
            let receipt = self.active_receipt(&loan_id);
            let health = self.health_of(&loan_id, &receipt, true, self.rate_mul);
            assert!(health <= Decimal::ZERO, "Loan is healthy");
            self.liquidate_internal(loan_id, receipt, payment, fraction, min_collateral_out, false)
        }

        /// Closes the caller's own loan through the liquidation path, at any health. The
        /// proxy verifies receipt ownership before forwarding here.
        pub fn self_liquidate(
            &mut self,
            loan_id: NonFungibleLocalId,
            payment: Bucket,
            min_collateral_out: Decimal,
        ) -> (Bucket, Bucket, Bucket) {
            self.accrue();
            let receipt = self.active_receipt(&loan_id);
            self.liquidate_internal(
                loan_id,
                receipt,
                payment,
                Decimal::ONE,
                min_collateral_out,
                true,
            )
        }

        /// Burns a receipt of a closed loan.
        pub fn burn_loan_receipt(&self, receipt: Bucket) {
            assert!(
                receipt.resource_address() == self.loan_manager.address(),
                "Not a loan receipt"
            );
            let data: LoanReceipt = self
                .loan_manager
                .get_non_fungible_data(&receipt.as_non_fungible().non_fungible_local_id());
            assert!(
                data.status != LoanStatus::Active,
                "Cannot burn an active loan"
            );
            receipt.burn();
        }

        /// Adds lendable liquidity.
        pub fn provide_liquidity(&mut self, liquidity: Bucket) {
            assert!(
                liquidity.resource_address() == self.borrowed_vault.resource_address(),
                "Wrong liquidity asset"
            );
            let amount = liquidity.amount();
            self.provided_liquidity += amount;
            self.borrowed_vault.put(liquidity);
            Runtime::emit_event(EventProvideLiquidity { amount });
        }

        /// Removes unborrowed liquidity.
        pub fn withdraw_liquidity(&mut self, amount: Decimal) -> Bucket {
            assert!(
                amount <= self.provided_liquidity,
                "Withdrawing more than provided"
            );
            assert!(
                amount <= self.borrowed_vault.amount(),
                "Liquidity is lent out"
            );
            self.provided_liquidity -= amount;
            Runtime::emit_event(EventWithdrawLiquidity { amount });
            self.borrowed_vault.take(amount)
        }

        /// Collects protocol earnings: interest and borrow fees from the market plus the
        /// AMM's accrued admin swap fees.
        ///
        /// # Returns
        /// * `(Bucket, Bucket, Bucket)`: Market fees in the borrowed asset, AMM fees in the
        ///   borrowed asset, and AMM fees in collateral.
        pub fn collect_fees(&mut self) -> (Bucket, Bucket, Bucket) {
            self.accrue();
            let outstanding = self.debt_units * self.rate_mul;
            let surplus =
                self.borrowed_vault.amount() + outstanding - self.provided_liquidity;
            let market_fees = if surplus > Decimal::ZERO {
                surplus.min(self.borrowed_vault.amount())
            } else {
                Decimal::ZERO
            };
            let (amm_x, amm_y) = self
                .badge_vault
                .authorize_with_amount(dec!("0.75"), || self.amm.collect_admin_fees());

            Runtime::emit_event(EventCollectFees {
                market_fees,
                amm_fees_borrowed: amm_x.amount(),
                amm_fees_collateral: amm_y.amount(),
            });
            (self.borrowed_vault.take(market_fees), amm_x, amm_y)
        }

        /// Changes market parameters. `None` leaves a parameter untouched.
        pub fn set_parameters(
            &mut self,
            loan_discount: Option<Decimal>,
            liquidation_discount: Option<Decimal>,
            borrow_fee: Option<Decimal>,
            min_debt: Option<Decimal>,
        ) {
            if let Some(value) = loan_discount {
                assert!(
                    value > Decimal::ZERO && value < dec!("0.5"),
                    "Loan discount out of range"
                );
                self.parameters.loan_discount = value;
            }
            if let Some(value) = liquidation_discount {
                assert!(
                    value > Decimal::ZERO && value < dec!("0.5"),
                    "Liquidation discount out of range"
                );
                self.parameters.liquidation_discount = value;
            }
            assert!(
                self.parameters.liquidation_discount < self.parameters.loan_discount,
                "Liquidation discount must stay below loan discount"
            );
            if let Some(value) = borrow_fee {
                assert!(
                    value >= Decimal::ZERO && value < dec!("0.1"),
                    "Borrow fee out of range"
                );
                self.parameters.borrow_fee = value;
            }
            if let Some(value) = min_debt {
                assert!(value > Decimal::ZERO, "Minimum debt must be positive");
                self.parameters.min_debt = value;
            }
            Runtime::emit_event(EventChangeParameters {
                new_loan_discount: loan_discount,
                new_liquidation_discount: liquidation_discount,
                new_borrow_fee: borrow_fee,
                new_min_debt: min_debt,
            });
        }

        /// Stops or resumes groups of operations.
        pub fn set_stops(&mut self, new_loans: bool, adjustments: bool, liquidations: bool) {
            self.parameters.stop_new_loans = new_loans;
            self.parameters.stop_adjustments = adjustments;
            self.parameters.stop_liquidations = liquidations;
        }

        /// Points the market at a different rate policy.
        pub fn set_rate_policy(&mut self, policy_address: ComponentAddress, policy_method: String) {
            self.policy = Global::from(policy_address);
            self.policy_method = policy_method;
        }

        /// Points the market at a different oracle. The AMM's oracle is wired separately.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, oracle_method: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method = oracle_method;
        }

        /// A summarized view of one loan.
        pub fn get_loan_info(&self, loan_id: NonFungibleLocalId) -> LoanInfoReturn {
            let receipt: LoanReceipt = self.loan_manager.get_non_fungible_data(&loan_id);
            if receipt.status != LoanStatus::Active {
                return LoanInfoReturn {
                    loan_id,
                    status: receipt.status,
                    debt: Decimal::ZERO,
                    health: Decimal::ZERO,
                    full_health: Decimal::ZERO,
                    amm_borrowed: Decimal::ZERO,
                    amm_collateral: Decimal::ZERO,
                    bands: (0, 0),
                };
            }
            let rate_mul = self.projected_rate_mul();
            let (amm_borrowed, amm_collateral) =
                self.amm.get_position_reserves(loan_id.clone());
            LoanInfoReturn {
                loan_id: loan_id.clone(),
                status: receipt.status.clone(),
                debt: self.debt_at(&receipt, rate_mul),
                health: self.health_of(&loan_id, &receipt, false, rate_mul),
                full_health: self.health_of(&loan_id, &receipt, true, rate_mul),
                amm_borrowed,
                amm_collateral,
                bands: self.amm.get_position_bands(loan_id),
            }
        }

        /// A summarized view of the whole market.
        pub fn get_market_info(&self) -> MarketInfoReturn {
            let rate_mul = self.projected_rate_mul();
            MarketInfoReturn {
                total_debt: self.debt_units * rate_mul,
                rate: self.rate,
                rate_mul,
                open_loans: self.open_loans,
                lendable: self.borrowed_vault.amount(),
                last_oracle_price: self.last_oracle_price,
                active_band: self.amm.get_active_band(),
                base_price: self.amm.get_base_price(),
            }
        }

        /// A loan's health. With `full`, collateral still priced above the loan's bands
        /// contributes its premium over the top band, the measure liquidation is gated on.
        pub fn get_health(&self, loan_id: NonFungibleLocalId, full: bool) -> Decimal {
            let receipt = self.active_receipt(&loan_id);
            self.health_of(&loan_id, &receipt, full, self.projected_rate_mul())
        }

        /// Total live debt across all loans, including interest up to now.
        pub fn get_total_debt(&self) -> Decimal {
            self.debt_units * self.projected_rate_mul()
        }

        /// The top band a loan with the given shape would be placed at.
        ///
        /// # Arguments
        /// * `collateral`: The collateral amount.
        /// * `debt`: The debt to size for.
        /// * `n_bands`: How many bands the collateral would be spread across.
        ///
        /// # Returns
        /// * `i64`: The top band index.
        ///
        /// # Panics
        /// * `Debt too high`: the discounted conversion value cannot cover the debt even
        ///   in the highest allowed band.
        /// * `Too deep`: the coverage headroom would place the range more than 1024 bands
        ///   below the highest allowed band.
        /// * `Invalid number of bands`: `n_bands` outside 4 to 50.
        pub fn calculate_debt_n1(&self, collateral: Decimal, debt: Decimal, n_bands: u32) -> i64 {
            assert!(
                (MIN_TICKS..=MAX_TICKS).contains(&n_bands),
                "Invalid number of bands"
            );
            assert!(debt > Decimal::ZERO, "Empty debt");
            let p_o = self.price_oracle();
            let (n_base, p_base) = self.max_band_base(p_o);
            let y_eff = y_effective(collateral, n_bands, self.parameters.loan_discount, self.a);
            let offset = band_offset(y_eff * p_base / debt, self.a);
            assert!(offset >= 0, "Debt too high");
            assert!(offset <= MAX_SKIP_BANDS, "Too deep");
            n_base + offset
        }

        /// The most debt the given collateral can back across `n_bands` bands, capped by
        /// the lendable liquidity.
        pub fn max_borrowable(&self, collateral: Decimal, n_bands: u32) -> Decimal {
            assert!(
                (MIN_TICKS..=MAX_TICKS).contains(&n_bands),
                "Invalid number of bands"
            );
            let p_o = self.price_oracle();
            let (_, p_base) = self.max_band_base(p_o);
            let y_eff = y_effective(collateral, n_bands, self.parameters.loan_discount, self.a);
            (y_eff * p_base).min(self.borrowed_vault.amount())
        }

        /// The least collateral that can back the given debt across `n_bands` bands.
        /// Rounded up slightly so the result always passes the sizing rule.
        pub fn min_collateral(&self, debt: Decimal, n_bands: u32) -> Decimal {
            assert!(
                (MIN_TICKS..=MAX_TICKS).contains(&n_bands),
                "Invalid number of bands"
            );
            assert!(debt > Decimal::ZERO, "Empty debt");
            let p_o = self.price_oracle();
            let (_, p_base) = self.max_band_base(p_o);
            let per_unit = y_effective(Decimal::ONE, n_bands, self.parameters.loan_discount, self.a);
            debt / (p_base * per_unit) * (Decimal::ONE + dec!("0.000000001"))
        }

        /// Scans open loans in band order and returns up to `max_loans` whose full health
        /// has dropped to zero or below, together with that health.
        pub fn users_to_liquidate(&self, max_loans: u32) -> Vec<(NonFungibleLocalId, Decimal)> {
            let rate_mul = self.projected_rate_mul();
            let mut unhealthy: Vec<(NonFungibleLocalId, Decimal)> = vec![];
            for (_n1, loan_ids, _next) in self
                .loans_by_band
                .range(Decimal::from(-1_000_000)..Decimal::from(1_000_000))
            {
                for loan_id in loan_ids {
                    let receipt: LoanReceipt = self.loan_manager.get_non_fungible_data(&loan_id);
                    let health = self.health_of(&loan_id, &receipt, true, rate_mul);
                    if health <= Decimal::ZERO {
                        unhealthy.push((loan_id, health));
                        if unhealthy.len() as u32 >= max_loans {
                            return unhealthy;
                        }
                    }
                }
            }
            unhealthy
        }

        pub fn get_loan_receipt_address(&self) -> ResourceAddress {
            self.loan_manager.address()
        }

        pub fn get_amm_address(&self) -> ComponentAddress {
            self.amm.address()
        }

        /// Compounds the rate multiplier up to now, refreshes the rate from the policy and
        /// pushes rate changes into the AMM's anchor drift.
        fn accrue(&mut self) {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            let dt = now - self.rate_time;
            if dt <= 0 {
                return;
            }
            self.rate_mul *= compound_factor(self.rate, dt);
            self.rate_time = now;
            self.last_oracle_price = self.price_oracle();

            let total_debt = self.debt_units * self.rate_mul;
            let new_rate: Decimal = self.policy.call_raw(
                &self.policy_method,
                scrypto_args!(total_debt, self.borrowed_vault.amount()),
            );
            assert!(
                new_rate >= Decimal::ZERO && new_rate < dec!("0.000001"),
                "Policy returned an unreasonable rate"
            );
            if new_rate != self.rate {
                self.rate = new_rate;
                self.badge_vault
                    .authorize_with_amount(dec!("0.75"), || self.amm.set_rate(new_rate));
            }
            Runtime::emit_event(EventAccrueInterest {
                rate: self.rate,
                rate_mul: self.rate_mul,
                total_debt,
            });
        }

        /// The rate multiplier as it would be after an accrual right now.
        fn projected_rate_mul(&self) -> Decimal {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            self.rate_mul * compound_factor(self.rate, now - self.rate_time)
        }

        /// A loan's live debt at the given multiplier, rounded up by one atto.
        fn debt_at(&self, receipt: &LoanReceipt, rate_mul: Decimal) -> Decimal {
            receipt.initial_debt * rate_mul / receipt.rate_mul_snapshot + ATTO
        }

        /// A loan's live debt at the current multiplier. Call after `accrue`.
        fn live_debt(&self, receipt: &LoanReceipt) -> Decimal {
            self.debt_at(receipt, self.rate_mul)
        }

        /// Reads a receipt and asserts the loan is open.
        fn active_receipt(&self, loan_id: &NonFungibleLocalId) -> LoanReceipt {
            let receipt: LoanReceipt = self.loan_manager.get_non_fungible_data(loan_id);
            assert!(receipt.status == LoanStatus::Active, "Loan is not active");
            receipt
        }

        fn receipt_of(&self, loan_id: &NonFungibleLocalId) -> LoanReceipt {
            self.loan_manager.get_non_fungible_data(loan_id)
        }

        /// Health of a loan: discounted conversion value over debt, minus one. The full
        /// variant adds the premium of collateral still priced above the loan's top band.
        fn health_of(
            &self,
            loan_id: &NonFungibleLocalId,
            receipt: &LoanReceipt,
            full: bool,
            rate_mul: Decimal,
        ) -> Decimal {
            let debt = self.debt_at(receipt, rate_mul);
            let value = self.amm.get_value_down(loan_id.clone());
            let mut health =
                value * (Decimal::ONE - receipt.liquidation_discount) / debt - Decimal::ONE;
            if full {
                let (n1, _) = self.amm.get_position_bands(loan_id.clone());
                if n1 > self.amm.get_active_band() {
                    let p_o = self.price_oracle();
                    let p_up = self.amm.get_p_oracle_up(n1);
                    if p_o > p_up {
                        let (_, collateral) = self.amm.get_position_reserves(loan_id.clone());
                        health += (p_o - p_up) * collateral / debt;
                    }
                }
            }
            health
        }

        /// Reads the oracle price.
        fn price_oracle(&self) -> Decimal {
            let price: Decimal = self.oracle.call_raw(&self.oracle_method, scrypto_args!());
            assert!(price > Decimal::ZERO, "Oracle returned a non-positive price");
            price
        }

        /// The highest band fully below the oracle price that deposits may use, and its
        /// upper grid price.
        fn max_band_base(&self, p_o: Decimal) -> (i64, Decimal) {
            let base = self.amm.get_base_price();
            let active = self.amm.get_active_band();
            // Logarithmic first guess, then nudged by direct grid comparisons to absorb
            // fixed-point truncation.
            let mut n = (band_offset(base / p_o, self.a) + 1).max(active + 1);
            while p_oracle_up(base, self.a, n) >= p_o {
                n += 1;
            }
            while n > active + 1 && p_oracle_up(base, self.a, n - 1) < p_o {
                n -= 1;
            }
            (n, p_oracle_up(base, self.a, n))
        }

        /// Withdraws a loan's full, unconverted position from the AMM. Panics if soft
        /// liquidation has already reached the loan's bands.
        fn pull_untouched_position(&mut self, loan_id: &NonFungibleLocalId) -> (Bucket, i64) {
            let (n1, _) = self.amm.get_position_bands(loan_id.clone());
            let (borrowed_back, collateral_back) = self
                .badge_vault
                .authorize_with_amount(dec!("0.75"), || self.amm.withdraw(loan_id.clone(), Decimal::ONE));
            assert!(
                borrowed_back.amount() == Decimal::ZERO,
                "Loan is in soft liquidation"
            );
            self.borrowed_vault.put(borrowed_back);
            (collateral_back, n1)
        }

        /// Re-sizes and re-deposits a loan's collateral for the given debt, updating the
        /// band index.
        fn redeposit(
            &mut self,
            loan_id: &NonFungibleLocalId,
            collateral: Bucket,
            debt: Decimal,
            n_bands: u32,
            old_n1: i64,
        ) {
            let n1 = self.calculate_debt_n1(collateral.amount(), debt, n_bands);
            let n2 = n1 + n_bands as i64 - 1;
            self.badge_vault.authorize_with_amount(dec!("0.75"), || {
                self.amm.deposit_range(loan_id.clone(), collateral, n1, n2)
            });
            if n1 != old_n1 {
                self.remove_loan_band(old_n1, loan_id);
                self.insert_loan_band(n1, loan_id.clone());
            }
        }

        /// Re-locks the liquidation discount at the current parameter value. Runs on every
        /// owner adjustment, like the sizing discount does implicitly.
        fn relock_discount(&self, loan_id: &NonFungibleLocalId) {
            self.loan_manager.update_non_fungible_data(
                loan_id,
                "liquidation_discount",
                self.parameters.liquidation_discount,
            );
        }

        /// Writes a loan's debt: updates the receipt snapshot and the aggregate units.
        fn write_debt(&mut self, loan_id: &NonFungibleLocalId, receipt: &LoanReceipt, new_debt: Decimal) {
            self.debt_units +=
                new_debt / self.rate_mul - receipt.initial_debt / receipt.rate_mul_snapshot;
            self.loan_manager
                .update_non_fungible_data(loan_id, "initial_debt", new_debt);
            self.loan_manager
                .update_non_fungible_data(loan_id, "rate_mul_snapshot", self.rate_mul);
        }

        /// Removes a loan from the books and marks its receipt. Callers capture `n1`
        /// before the AMM position is withdrawn.
        fn close_loan(
            &mut self,
            loan_id: &NonFungibleLocalId,
            receipt: &LoanReceipt,
            n1: i64,
            status: LoanStatus,
        ) {
            self.debt_units -= receipt.initial_debt / receipt.rate_mul_snapshot;
            self.open_loans -= 1;
            self.remove_loan_band(n1, loan_id);
            self.loan_manager
                .update_non_fungible_data(loan_id, "initial_debt", Decimal::ZERO);
            self.loan_manager
                .update_non_fungible_data(loan_id, "status", status);
        }

        /// Core of both liquidation entry points. Health gating happens in the callers.
        fn liquidate_internal(
            &mut self,
            loan_id: NonFungibleLocalId,
            receipt: LoanReceipt,
            mut payment: Bucket,
            fraction: Decimal,
            min_collateral_out: Decimal,
            by_owner: bool,
        ) -> (Bucket, Bucket, Bucket) {
            assert!(
                payment.resource_address() == self.borrowed_vault.resource_address(),
                "Wrong payment asset"
            );
            assert!(
                fraction > Decimal::ZERO && fraction <= Decimal::ONE,
                "Fraction out of range"
            );
            let debt = self.live_debt(&receipt);
            let debt_portion = if fraction == Decimal::ONE {
                debt
            } else {
                debt * fraction
            };

            let (n1, _) = self.amm.get_position_bands(loan_id.clone());
            let (mut borrowed_back, collateral_back) = self
                .badge_vault
                .authorize_with_amount(dec!("0.75"), || self.amm.withdraw(loan_id.clone(), fraction));
            assert!(
                collateral_back.amount() >= min_collateral_out,
                "Slippage limit exceeded"
            );

            if borrowed_back.amount() >= debt_portion {
                self.borrowed_vault.put(borrowed_back.take(debt_portion));
            } else {
                let shortfall = debt_portion - borrowed_back.amount();
                assert!(
                    payment.amount() >= shortfall,
                    "Insufficient payment for liquidation"
                );
                self.borrowed_vault.put(borrowed_back.take_all());
                self.borrowed_vault.put(payment.take(shortfall));
            }

            if fraction == Decimal::ONE {
                self.close_loan(&loan_id, &receipt, n1, LoanStatus::Liquidated);
            } else {
                let new_debt = debt - debt_portion;
                assert!(
                    new_debt >= self.parameters.min_debt,
                    "Debt too small for a loan"
                );
                self.write_debt(&loan_id, &receipt, new_debt);
            }

            Runtime::emit_event(EventLiquidateLoan {
                loan_id,
                fraction,
                debt_repaid: debt_portion,
                collateral_paid_out: collateral_back.amount(),
                by_owner,
            });
            (payment, borrowed_back, collateral_back)
        }

        /// Adds a loan id to the band index.
        fn insert_loan_band(&mut self, n1: i64, loan_id: NonFungibleLocalId) {
            let key = Decimal::from(n1);
            if self.loans_by_band.get(&key).is_some() {
                let mut loan_ids: Vec<NonFungibleLocalId> =
                    self.loans_by_band.get(&key).unwrap().to_vec();
                loan_ids.push(loan_id);
                self.loans_by_band.insert(key, loan_ids);
            } else {
                self.loans_by_band.insert(key, vec![loan_id]);
            }
        }

        /// Removes a loan id from the band index, dropping empty entries.
        fn remove_loan_band(&mut self, n1: i64, loan_id: &NonFungibleLocalId) {
            let key = Decimal::from(n1);
            let mut loan_ids: Vec<NonFungibleLocalId> =
                self.loans_by_band.get(&key).unwrap().to_vec();
            loan_ids.retain(|id| id != loan_id);
            if loan_ids.is_empty() {
                self.loans_by_band.remove(&key);
            } else {
                self.loans_by_band.insert(key, loan_ids);
            }
        }
    }
}
