#![allow(deprecated)]

//! # The Band AMM Blueprint
//!
//! This blueprint defines the band ledger of the Cascade protocol. Both market assets sit in
//! this component, organized into discrete price bands on a geometric grid anchored to an
//! external oracle.
//!
//! ## Overview
//! - **Bands:** Band `n` covers oracle prices between `p_oracle_up(n)` and
//!   `p_oracle_up(n + 1)`, with prices falling as `n` grows. Each band holds some mix of the
//!   borrowed asset and collateral; outside the active band a band holds only one of the two.
//! - **Exchanges:** Anyone can trade against the ledger. The quoted price is a function of
//!   the oracle price cubed, which makes the AMM quote worse than the open market inside the
//!   active band and better just outside it. Arbitrage therefore drags band composition
//!   along as the oracle moves: falling prices convert collateral into the borrowed asset
//!   band by band (soft liquidation), recovering prices convert it back.
//! - **Positions:** The `Market` component deposits each loan's collateral into a
//!   contiguous band range and withdraws it again on repayment or liquidation. Per-band
//!   shares track ownership, so trading losses and fees are socialized within a band.
//! - **Fees:** A fee on the input side of every exchange stays mostly inside the band it
//!   was earned in; a configurable share accrues to the protocol.
//!
//! ## Interaction with Other Components
//! - **`Market`:** The only caller allowed to move position liquidity. Holds controller
//!   badges and authorizes against the OWNER role.
//! - **Oracle:** Any component answering the configured price method with a `Decimal`.
//! - **Hook:** An optional component notified after exchanges and liquidity changes.

use crate::band_math::*;
use crate::events::*;
use scrypto::prelude::*;

#[blueprint]
#[types(i64, Band, NonFungibleLocalId, PositionTicks, Decimal)]
#[events(EventDepositRange, EventWithdraw, EventExchange, EventSetAmmRate)]
mod amm_component {
    enable_method_auth! {
        methods {
            deposit_range => restrict_to: [OWNER];
            withdraw => restrict_to: [OWNER];
            set_rate => restrict_to: [OWNER];
            set_fee => restrict_to: [OWNER];
            set_admin_fee_share => restrict_to: [OWNER];
            set_trading_enabled => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            set_hook => restrict_to: [OWNER];
            collect_admin_fees => restrict_to: [OWNER];
            exchange => PUBLIC;
            exchange_exact_out => PUBLIC;
            get_dxdy => PUBLIC;
            get_dydx => PUBLIC;
            get_amount_for_price => PUBLIC;
            get_band_reserves => PUBLIC;
            get_active_band => PUBLIC;
            get_min_band => PUBLIC;
            get_max_band => PUBLIC;
            get_base_price => PUBLIC;
            get_p_oracle_up => PUBLIC;
            get_spot_price => PUBLIC;
            get_rate => PUBLIC;
            get_position_bands => PUBLIC;
            get_position_reserves => PUBLIC;
            get_value_down => PUBLIC;
            get_admin_fees => PUBLIC;
        }
    }

    struct BandAmm {
        /// The amplification parameter. A band covers a relative price width of `1 / a`.
        a: Decimal,
        /// The grid anchor price as of `rate_time`. The live anchor drifts upward with the
        /// borrow rate, see `base_price()`.
        base_price_0: Decimal,
        /// The per-second rate the anchor price drifts with, kept in sync with the market's
        /// borrow rate so bands track the growing debt.
        rate: Decimal,
        /// Timestamp of the last anchor catch-up, in seconds since the unix epoch.
        rate_time: i64,
        /// The band the last exchange ended in. Only trading moves this pointer.
        active_band: i64,
        /// The lowest band index any deposit has touched. `i64::MAX` before the first
        /// deposit.
        min_band: i64,
        /// The highest band index any deposit has touched. `i64::MIN` before the first
        /// deposit.
        max_band: i64,
        /// Reserves and share supply of each band, keyed by band index. Bands the walk has
        /// never needed are simply absent.
        bands: KeyValueStore<i64, Band>,
        /// Per-position band ranges and share balances, keyed by the loan receipt's local id.
        positions: KeyValueStore<NonFungibleLocalId, PositionTicks>,
        /// Vault holding the borrowed asset side of every band plus accrued admin fees.
        borrowed_vault: Vault,
        /// Vault holding the collateral side of every band plus accrued admin fees.
        collateral_vault: Vault,
        /// Admin fee claim against `borrowed_vault`, not owned by any band.
        admin_fees_x: Decimal,
        /// Admin fee claim against `collateral_vault`, not owned by any band.
        admin_fees_y: Decimal,
        /// Fee charged on the input side of exchanges.
        fee: Decimal,
        /// The share of each fee that accrues to the protocol instead of the band.
        admin_fee_share: Decimal,
        /// The price oracle, any component answering `oracle_method` with a `Decimal`.
        oracle: Global<AnyComponent>,
        /// The method name to call on the oracle.
        oracle_method: String,
        /// Optional component notified after exchanges and liquidity changes.
        hook: Option<Global<AnyComponent>>,
        /// The method name to call on the hook.
        hook_method: String,
        /// Stop for public exchanges.
        trading_enabled: bool,
    }

    impl BandAmm {
        /// Instantiates the `BandAmm` component.
        ///
        /// # Arguments
        /// * `borrowed_address`: Resource address of the borrowed asset.
        /// * `collateral_address`: Resource address of the collateral asset.
        /// * `a`: The amplification parameter, at least 2.
        /// * `fee`: Exchange fee on the input side.
        /// * `admin_fee_share`: The protocol's share of each fee.
        /// * `base_price`: The initial grid anchor, the upper price of band 0.
        /// * `oracle_address`: Component to query for the oracle price.
        /// * `oracle_method`: Method name to call on the oracle.
        /// * `controller_badge_address`: Badge resource whose holders own this component.
        ///   The `Market` component and the proxy hold these badges.
        ///
        /// # Returns
        /// * `Global<BandAmm>`: A global reference to the newly instantiated component.
        ///
        /// # Panics
        /// * If either asset is not a fungible with 18 decimals.
        /// * If `a < 2`, `fee >= 0.1`, `admin_fee_share > 1` or `base_price <= 0`.
        pub fn instantiate(
            borrowed_address: ResourceAddress,
            collateral_address: ResourceAddress,
            a: Decimal,
            fee: Decimal,
            admin_fee_share: Decimal,
            base_price: Decimal,
            oracle_address: ComponentAddress,
            oracle_method: String,
            controller_badge_address: ResourceAddress,
        ) -> Global<BandAmm> {
            assert!(a >= Decimal::from(2), "Amplification must be at least 2");
            assert!(a <= Decimal::from(10000), "Amplification too large");
            assert!(
                fee >= Decimal::ZERO && fee < dec!("0.1"),
                "Fee must be below 10%"
            );
            assert!(
                admin_fee_share >= Decimal::ZERO && admin_fee_share <= Decimal::ONE,
                "Admin fee share must be at most 1"
            );
            assert!(base_price > Decimal::ZERO, "Base price must be positive");
            assert!(
                matches!(
                    ResourceManager::from_address(borrowed_address).resource_type(),
                    ResourceType::Fungible {
                        divisibility: DIVISIBILITY_MAXIMUM
                    }
                ),
                "Borrowed asset must be fungible with 18 decimals"
            );
            assert!(
                matches!(
                    ResourceManager::from_address(collateral_address).resource_type(),
                    ResourceType::Fungible {
                        divisibility: DIVISIBILITY_MAXIMUM
                    }
                ),
                "Collateral asset must be fungible with 18 decimals"
            );

            Self {
                a,
                base_price_0: base_price,
                rate: Decimal::ZERO,
                rate_time: Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch,
                active_band: 0,
                min_band: i64::MAX,
                max_band: i64::MIN,
                bands: KeyValueStore::new_with_registered_type(),
                positions: KeyValueStore::new_with_registered_type(),
                borrowed_vault: Vault::new(borrowed_address),
                collateral_vault: Vault::new(collateral_address),
                admin_fees_x: Decimal::ZERO,
                admin_fees_y: Decimal::ZERO,
                fee,
                admin_fee_share,
                oracle: Global::from(oracle_address),
                oracle_method,
                hook: None,
                hook_method: String::new(),
                trading_enabled: true,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require_amount(
                dec!("0.75"),
                controller_badge_address
            ))))
            .metadata(metadata! {
                init {
                    "name" => "Cascade Band AMM".to_string(), updatable;
                    "description" => "Band-organized AMM performing continuous liquidation for the Cascade market".to_string(), updatable;
                }
            })
            .globalize()
        }

        /// Deposits collateral into a contiguous band range for a position.
        ///
        /// # Arguments
        /// * `position_id`: The loan receipt id the deposit belongs to. One position per id.
        /// * `collateral`: The collateral to deposit.
        /// * `n1`: The top band of the range (highest price, lowest index).
        /// * `n2`: The bottom band of the range.
        ///
        /// # Logic
        /// The amount is split across the bands with geometrically decaying weights, so the
        /// bands closest to the oracle price carry the most collateral. Per-band shares are
        /// minted pro rata against the band's current collateral. The whole range must sit
        /// below the active band; bands the trading walk has reached can no longer accept
        /// deposits.
        ///
        /// # Panics
        /// * If the bucket is not the collateral asset, is empty, or exceeds the size bound.
        /// * If the range is inverted, too wide, or not strictly below the active band.
        /// * If a position with this id already exists.
        pub fn deposit_range(
            &mut self,
            position_id: NonFungibleLocalId,
            collateral: Bucket,
            n1: i64,
            n2: i64,
        ) {
            assert!(
                collateral.resource_address() == self.collateral_vault.resource_address(),
                "Wrong collateral asset"
            );
            let amount = collateral.amount();
            assert!(amount > Decimal::ZERO, "Empty deposit");
            assert!(amount <= dec!("1000000000000"), "Amount too large");
            assert!(n1 <= n2, "Inverted band range");
            let n_bands = (n2 - n1 + 1) as u32;
            assert!(n_bands <= MAX_TICKS, "Too many bands");
            assert!(n1 > self.active_band, "Range not below the active band");
            assert!(
                self.positions.get(&position_id).is_none(),
                "Position already exists"
            );

            let slices = deposit_slices(amount, n_bands, self.a);
            let mut shares: Vec<Decimal> = Vec::with_capacity(n_bands as usize);
            for (i, slice) in slices.iter().enumerate() {
                let n = n1 + i as i64;
                let (x, y, total_shares) = self.band_state(n);
                let minted = if total_shares == Decimal::ZERO {
                    *slice
                } else {
                    total_shares * *slice / y
                };
                shares.push(minted);
                self.write_band(n, x, y + *slice, total_shares + minted);
            }

            self.min_band = self.min_band.min(n1);
            self.max_band = self.max_band.max(n2);
            self.positions
                .insert(position_id.clone(), PositionTicks { n1, n2, shares });
            self.collateral_vault.put(collateral);

            self.fire_hook("deposit", Some(position_id.clone()), Decimal::ZERO, amount);
            Runtime::emit_event(EventDepositRange {
                position_id,
                amount,
                bands: (n1, n2),
            });
        }

        /// Withdraws a fraction of a position's assets from its bands.
        ///
        /// # Arguments
        /// * `position_id`: The position to withdraw from.
        /// * `fraction`: The fraction of the position's shares to burn, in `(0, 1]`.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The borrowed asset and collateral withdrawn. Both sides are
        ///   returned because bands the walk has crossed hold the borrowed asset.
        ///
        /// # Panics
        /// * If the position is unknown or `fraction` is out of range.
        pub fn withdraw(
            &mut self,
            position_id: NonFungibleLocalId,
            fraction: Decimal,
        ) -> (Bucket, Bucket) {
            assert!(
                fraction > Decimal::ZERO && fraction <= Decimal::ONE,
                "Fraction out of range"
            );
            let ticks = self
                .positions
                .get(&position_id)
                .expect("Unknown position")
                .clone();

            let mut out_x = Decimal::ZERO;
            let mut out_y = Decimal::ZERO;
            let mut remaining: Vec<Decimal> = Vec::with_capacity(ticks.shares.len());
            for (i, share) in ticks.shares.iter().enumerate() {
                let n = ticks.n1 + i as i64;
                if *share == Decimal::ZERO {
                    remaining.push(Decimal::ZERO);
                    continue;
                }
                let (x, y, total_shares) = self.band_state(n);
                let burned = if fraction == Decimal::ONE {
                    *share
                } else {
                    *share * fraction
                };
                let dx = x * burned / total_shares;
                let dy = y * burned / total_shares;
                out_x += dx;
                out_y += dy;
                remaining.push(*share - burned);
                self.write_band(n, x - dx, y - dy, total_shares - burned);
            }

            if fraction == Decimal::ONE {
                self.positions.remove(&position_id);
            } else {
                let mut ticks_entry = self.positions.get_mut(&position_id).unwrap();
                ticks_entry.shares = remaining;
            }

            self.fire_hook("withdraw", Some(position_id.clone()), out_x, out_y);
            Runtime::emit_event(EventWithdraw {
                position_id,
                fraction,
                borrowed_out: out_x,
                collateral_out: out_y,
            });
            (
                self.borrowed_vault.take(out_x),
                self.collateral_vault.take(out_y),
            )
        }

        /// Exchanges against the band ledger.
        ///
        /// # Arguments
        /// * `input`: Either market asset. Supplying the borrowed asset buys collateral
        ///   ("pump") and walks toward lower price bands; supplying collateral buys the
        ///   borrowed asset ("dump") and walks toward higher price bands.
        /// * `min_output`: Minimum acceptable output.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: Unused input and the output. Input is left unused when the
        ///   walk runs out of liquidity or hits its band limit.
        ///
        /// # Logic
        /// The oracle price is read once at the start. Bands are walked from the active band
        /// outward; in each band the invariant for the current oracle price decides how much
        /// output the remaining input buys. The fee is charged on the input side, the
        /// protocol's share is parked as an admin fee claim and the rest stays in the band.
        /// The active band pointer ends wherever the walk stops.
        ///
        /// # Panics
        /// * If trading is stopped, the input is empty or unknown, or the output is below
        ///   `min_output`.
        pub fn exchange(&mut self, mut input: Bucket, min_output: Decimal) -> (Bucket, Bucket) {
            assert!(self.trading_enabled, "Exchanges are stopped");
            let pump = self.direction_of(&input);
            assert!(input.amount() > Decimal::ZERO, "Empty input");
            assert!(input.amount() <= dec!("1000000000000"), "Amount too large");

            let p_o = self.price_oracle();
            let outcome = self.calc_exchange(pump, input.amount(), p_o);
            assert!(outcome.out >= min_output, "Slippage limit exceeded");

            self.apply_outcome(&outcome, pump);
            let used = input.take(outcome.in_gross);
            let out = if pump {
                self.borrowed_vault.put(used);
                self.collateral_vault.take(outcome.out)
            } else {
                self.collateral_vault.put(used);
                self.borrowed_vault.take(outcome.out)
            };

            let (hook_x, hook_y) = if pump {
                (outcome.in_gross, outcome.out)
            } else {
                (outcome.out, outcome.in_gross)
            };
            self.fire_hook("exchange", None, hook_x, hook_y);
            Runtime::emit_event(EventExchange {
                pump,
                amount_in: outcome.in_gross,
                amount_out: outcome.out,
                fee: outcome.fee_total,
                active_band: self.active_band,
            });
            (input, out)
        }

        /// Exchanges targeting an exact output amount.
        ///
        /// # Arguments
        /// * `input`: Either market asset; its amount is the input cap.
        /// * `desired_out`: The output amount to aim for.
        /// * `min_output`: Minimum acceptable output, for when liquidity or the input cap
        ///   cuts the fill short.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: Unused input and the output.
        pub fn exchange_exact_out(
            &mut self,
            mut input: Bucket,
            desired_out: Decimal,
            min_output: Decimal,
        ) -> (Bucket, Bucket) {
            assert!(self.trading_enabled, "Exchanges are stopped");
            let pump = self.direction_of(&input);
            assert!(input.amount() > Decimal::ZERO, "Empty input");
            assert!(input.amount() <= dec!("1000000000000"), "Amount too large");
            assert!(desired_out > Decimal::ZERO, "Empty output request");

            let p_o = self.price_oracle();
            let outcome = self.calc_exchange_out(pump, desired_out, input.amount(), p_o);
            assert!(outcome.out >= min_output, "Slippage limit exceeded");

            self.apply_outcome(&outcome, pump);
            let used = input.take(outcome.in_gross);
            let out = if pump {
                self.borrowed_vault.put(used);
                self.collateral_vault.take(outcome.out)
            } else {
                self.collateral_vault.put(used);
                self.borrowed_vault.take(outcome.out)
            };

            let (hook_x, hook_y) = if pump {
                (outcome.in_gross, outcome.out)
            } else {
                (outcome.out, outcome.in_gross)
            };
            self.fire_hook("exchange", None, hook_x, hook_y);
            Runtime::emit_event(EventExchange {
                pump,
                amount_in: outcome.in_gross,
                amount_out: outcome.out,
                fee: outcome.fee_total,
                active_band: self.active_band,
            });
            (input, out)
        }

        /// Previews an exchange for a given input amount.
        ///
        /// Runs the exact arithmetic `exchange` would run, against current state, and
        /// discards the band updates.
        ///
        /// # Arguments
        /// * `pump`: True to quote borrowed asset in, collateral out.
        /// * `in_amount`: The input amount, fee included.
        ///
        /// # Returns
        /// * `(Decimal, Decimal)`: Input that would be consumed and output paid.
        pub fn get_dxdy(&self, pump: bool, in_amount: Decimal) -> (Decimal, Decimal) {
            let p_o = self.price_oracle();
            let outcome = self.calc_exchange(pump, in_amount, p_o);
            (outcome.in_gross, outcome.out)
        }

        /// Previews an exchange for a desired output amount, without an input cap.
        ///
        /// # Arguments
        /// * `pump`: True to quote borrowed asset in, collateral out.
        /// * `out_amount`: The desired output.
        ///
        /// # Returns
        /// * `(Decimal, Decimal)`: Input that would be consumed and output paid. The output
        ///   falls short of `out_amount` when the ledger does not hold enough.
        pub fn get_dydx(&self, pump: bool, out_amount: Decimal) -> (Decimal, Decimal) {
            let p_o = self.price_oracle();
            let outcome = self.calc_exchange_out(pump, out_amount, Decimal::MAX, p_o);
            (outcome.in_gross, outcome.out)
        }

        /// The gross input needed to move the AMM's spot price to `target`.
        ///
        /// # Returns
        /// * `(Decimal, bool)`: The input amount and the direction, true for pump. Returns
        ///   the amount accumulated so far if liquidity runs out before the target.
        pub fn get_amount_for_price(&self, target: Decimal) -> (Decimal, bool) {
            assert!(target > Decimal::ZERO, "Target price must be positive");
            let p_o = self.price_oracle();
            let base = self.base_price();
            let r = band_factor(self.a);

            let mut n = self.active_band;
            let mut p_up = p_oracle_up(base, self.a, n);
            let pump = target >= self.spot_price_in(n, p_up, p_o);
            let mut amount = Decimal::ZERO;

            for _ in 0..MAX_BANDS_PER_EXCHANGE {
                let (x, y, _) = self.band_state(n);
                if x > Decimal::ZERO || y > Decimal::ZERO {
                    let y0 = get_y0(x, y, p_o, p_up, self.a);
                    let (f, g) = virtual_reserves(y0, p_o, p_up, self.a);
                    let inv = (f + x) * (g + y);
                    if pump {
                        // Draining all collateral pushes the spot to inv / g^2.
                        if target <= inv / (g * g) {
                            let dx = (inv * target).checked_sqrt().unwrap() - (f + x);
                            if dx > Decimal::ZERO {
                                amount += dx / (Decimal::ONE - self.fee);
                            }
                            return (amount, pump);
                        }
                        amount += (inv / g - f - x) / (Decimal::ONE - self.fee);
                    } else {
                        // Draining all borrowed asset drops the spot to f^2 / inv.
                        if target >= f * f / inv {
                            let dy = (inv / target).checked_sqrt().unwrap() - (g + y);
                            if dy > Decimal::ZERO {
                                amount += dy / (Decimal::ONE - self.fee);
                            }
                            return (amount, pump);
                        }
                        amount += (inv / f - g - y) / (Decimal::ONE - self.fee);
                    }
                }
                if pump {
                    if n >= self.max_band {
                        break;
                    }
                    n += 1;
                    p_up *= r;
                } else {
                    if n <= self.min_band {
                        break;
                    }
                    n -= 1;
                    p_up /= r;
                }
            }
            (amount, pump)
        }

        /// Reserves of band `n` as `(borrowed, collateral)`.
        pub fn get_band_reserves(&self, n: i64) -> (Decimal, Decimal) {
            let (x, y, _) = self.band_state(n);
            (x, y)
        }

        pub fn get_active_band(&self) -> i64 {
            self.active_band
        }

        pub fn get_min_band(&self) -> i64 {
            self.min_band
        }

        pub fn get_max_band(&self) -> i64 {
            self.max_band
        }

        /// The grid anchor price including rate drift since the last catch-up.
        pub fn get_base_price(&self) -> Decimal {
            self.base_price()
        }

        /// The upper grid price of band `n`.
        pub fn get_p_oracle_up(&self, n: i64) -> Decimal {
            p_oracle_up(self.base_price(), self.a, n)
        }

        /// The AMM's instantaneous price in the active band, in borrowed asset per unit of
        /// collateral. Falls back to the oracle price when the active band is empty.
        pub fn get_spot_price(&self) -> Decimal {
            let p_o = self.price_oracle();
            let p_up = p_oracle_up(self.base_price(), self.a, self.active_band);
            self.spot_price_in(self.active_band, p_up, p_o)
        }

        pub fn get_rate(&self) -> Decimal {
            self.rate
        }

        /// The band range of a position, highest price band first.
        pub fn get_position_bands(&self, position_id: NonFungibleLocalId) -> (i64, i64) {
            let ticks = self.positions.get(&position_id).expect("Unknown position");
            (ticks.n1, ticks.n2)
        }

        /// A position's share of its bands' reserves, as `(borrowed, collateral)`.
        pub fn get_position_reserves(&self, position_id: NonFungibleLocalId) -> (Decimal, Decimal) {
            let ticks = self.positions.get(&position_id).expect("Unknown position");
            let mut out_x = Decimal::ZERO;
            let mut out_y = Decimal::ZERO;
            for (i, share) in ticks.shares.iter().enumerate() {
                if *share == Decimal::ZERO {
                    continue;
                }
                let (x, y, total_shares) = self.band_state(ticks.n1 + i as i64);
                out_x += x * *share / total_shares;
                out_y += y * *share / total_shares;
            }
            (out_x, out_y)
        }

        /// The borrowed asset value a position's bands would realize if the oracle price
        /// swept down through all of them.
        ///
        /// # Logic
        /// Per band: borrowed reserves count at face value. Collateral in bands the price
        /// has not reached counts at the geometric mean of the band's bounds, collateral in
        /// the active band at the geometric mean of the oracle price and the band floor,
        /// and stray collateral in crossed bands at the band floor. This is the
        /// conversion-value measure backing the market's health checks.
        pub fn get_value_down(&self, position_id: NonFungibleLocalId) -> Decimal {
            let ticks = self.positions.get(&position_id).expect("Unknown position");
            let p_o = self.price_oracle();
            let base = self.base_price();
            let r = band_factor(self.a);

            let mut value = Decimal::ZERO;
            let mut p_up = p_oracle_up(base, self.a, ticks.n1);
            for (i, share) in ticks.shares.iter().enumerate() {
                let p_down = p_up * r;
                if *share > Decimal::ZERO {
                    let (x, y, total_shares) = self.band_state(ticks.n1 + i as i64);
                    let x_u = x * *share / total_shares;
                    let y_u = y * *share / total_shares;
                    value += x_u;
                    if y_u > Decimal::ZERO {
                        value += if p_o >= p_up {
                            sweep_value(y_u, p_up, p_down)
                        } else if p_o <= p_down {
                            y_u * p_down
                        } else {
                            sweep_value(y_u, p_o, p_down)
                        };
                    }
                }
                p_up = p_down;
            }
            value
        }

        /// Accrued admin fees as `(borrowed, collateral)`.
        pub fn get_admin_fees(&self) -> (Decimal, Decimal) {
            (self.admin_fees_x, self.admin_fees_y)
        }

        /// Sets the per-second drift rate of the grid anchor, first compounding the anchor
        /// up to now at the old rate. Returns the caught-up anchor price.
        pub fn set_rate(&mut self, rate: Decimal) -> Decimal {
            self.tick_base_price();
            self.rate = rate;
            let base_price = self.base_price_0;
            Runtime::emit_event(EventSetAmmRate { rate, base_price });
            base_price
        }

        /// Sets the exchange fee.
        pub fn set_fee(&mut self, fee: Decimal) {
            assert!(
                fee >= Decimal::ZERO && fee < dec!("0.1"),
                "Fee must be below 10%"
            );
            self.fee = fee;
        }

        /// Sets the protocol's share of each exchange fee.
        pub fn set_admin_fee_share(&mut self, admin_fee_share: Decimal) {
            assert!(
                admin_fee_share >= Decimal::ZERO && admin_fee_share <= Decimal::ONE,
                "Admin fee share must be at most 1"
            );
            self.admin_fee_share = admin_fee_share;
        }

        /// Stops or resumes public exchanges.
        pub fn set_trading_enabled(&mut self, enabled: bool) {
            self.trading_enabled = enabled;
        }

        /// Points the AMM at a different oracle component and method.
        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, oracle_method: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method = oracle_method;
        }

        /// Installs, replaces or removes the hook component.
        pub fn set_hook(&mut self, hook_address: Option<ComponentAddress>, hook_method: String) {
            self.hook = hook_address.map(Global::from);
            self.hook_method = hook_method;
        }

        /// Takes the accrued admin fees out of the vaults.
        pub fn collect_admin_fees(&mut self) -> (Bucket, Bucket) {
            let fees_x = self.admin_fees_x;
            let fees_y = self.admin_fees_y;
            self.admin_fees_x = Decimal::ZERO;
            self.admin_fees_y = Decimal::ZERO;
            (
                self.borrowed_vault.take(fees_x),
                self.collateral_vault.take(fees_y),
            )
        }

        /// Reads the oracle price.
        fn price_oracle(&self) -> Decimal {
            let price: Decimal = self.oracle.call_raw(&self.oracle_method, scrypto_args!());
            assert!(price > Decimal::ZERO, "Oracle returned a non-positive price");
            price
        }

        /// The grid anchor compounded up to now at the current rate.
        fn base_price(&self) -> Decimal {
            let now = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
            self.base_price_0 * compound_factor(self.rate, now - self.rate_time)
        }

        /// Writes the drifted anchor back and resets the drift clock.
        fn tick_base_price(&mut self) {
            self.base_price_0 = self.base_price();
            self.rate_time = Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch;
        }

        /// Trade direction for an input bucket: true for pump (borrowed asset in).
        fn direction_of(&self, input: &Bucket) -> bool {
            let address = input.resource_address();
            if address == self.borrowed_vault.resource_address() {
                true
            } else if address == self.collateral_vault.resource_address() {
                false
            } else {
                panic!("Unknown input asset");
            }
        }

        /// Reserves and share supply of band `n`, zeroes if the band has never been used.
        fn band_state(&self, n: i64) -> (Decimal, Decimal, Decimal) {
            match self.bands.get(&n) {
                Some(band) => (band.x, band.y, band.total_shares),
                None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            }
        }

        /// Creates or updates band `n`.
        fn write_band(&mut self, n: i64, x: Decimal, y: Decimal, total_shares: Decimal) {
            if self.bands.get(&n).is_some() {
                let mut band = self.bands.get_mut(&n).unwrap();
                band.x = x;
                band.y = y;
                band.total_shares = total_shares;
            } else {
                self.bands.insert(
                    n,
                    Band {
                        x,
                        y,
                        total_shares,
                    },
                );
            }
        }

        /// Spot price of band `n`, falling back to the oracle price when the band is empty.
        fn spot_price_in(&self, n: i64, p_up: Decimal, p_o: Decimal) -> Decimal {
            let (x, y, _) = self.band_state(n);
            let y0 = get_y0(x, y, p_o, p_up, self.a);
            if y0 == Decimal::ZERO {
                return p_o;
            }
            let (f, g) = virtual_reserves(y0, p_o, p_up, self.a);
            spot_price(x, y, f, g)
        }

        /// Walks the bands for an input-capped exchange. Shared verbatim between `exchange`
        /// and `get_dxdy` so previews and trades can never disagree.
        fn calc_exchange(&self, pump: bool, in_gross_limit: Decimal, p_o: Decimal) -> ExchangeOutcome {
            let r = band_factor(self.a);
            let mut n = self.active_band;
            let mut p_up = p_oracle_up(self.base_price(), self.a, n);

            let mut gross_left = in_gross_limit;
            let mut outcome = ExchangeOutcome {
                in_gross: Decimal::ZERO,
                out: Decimal::ZERO,
                fee_total: Decimal::ZERO,
                admin_fee: Decimal::ZERO,
                active_band: n,
                touched: Vec::new(),
            };

            for _ in 0..MAX_BANDS_PER_EXCHANGE {
                if gross_left == Decimal::ZERO {
                    break;
                }
                let (x, y, total_shares) = self.band_state(n);
                let available = if pump { y } else { x };
                if available == Decimal::ZERO {
                    if !self.advance(pump, &mut n, &mut p_up, r) {
                        break;
                    }
                    continue;
                }

                let y0 = get_y0(x, y, p_o, p_up, self.a);
                let (f, g) = virtual_reserves(y0, p_o, p_up, self.a);
                let net_left = gross_left * (Decimal::ONE - self.fee);
                if net_left == Decimal::ZERO {
                    break;
                }
                let step = if pump {
                    pump_step(x, y, f, g, net_left)
                } else {
                    dump_step(x, y, f, g, net_left)
                };

                let gross_used = if step.drained {
                    step.in_used / (Decimal::ONE - self.fee)
                } else {
                    gross_left
                };
                let fee_amount = gross_used - step.in_used;
                let admin_part = fee_amount * self.admin_fee_share;
                let kept = fee_amount - admin_part;
                let (new_x, new_y) = if pump {
                    (step.new_x + kept, step.new_y)
                } else {
                    (step.new_x, step.new_y + kept)
                };
                outcome.touched.push((n, new_x, new_y, total_shares));
                outcome.out += step.out;
                outcome.fee_total += fee_amount;
                outcome.admin_fee += admin_part;
                gross_left -= gross_used;

                if !step.drained {
                    break;
                }
                if !self.advance(pump, &mut n, &mut p_up, r) {
                    break;
                }
            }

            outcome.in_gross = in_gross_limit - gross_left;
            outcome.active_band = n;
            outcome
        }

        /// Walks the bands for an output-targeted exchange, capped by available input.
        /// Shared between `exchange_exact_out` and `get_dydx`.
        fn calc_exchange_out(
            &self,
            pump: bool,
            out_target: Decimal,
            in_gross_limit: Decimal,
            p_o: Decimal,
        ) -> ExchangeOutcome {
            let r = band_factor(self.a);
            let mut n = self.active_band;
            let mut p_up = p_oracle_up(self.base_price(), self.a, n);

            let mut gross_left = in_gross_limit;
            let mut out_left = out_target;
            let mut outcome = ExchangeOutcome {
                in_gross: Decimal::ZERO,
                out: Decimal::ZERO,
                fee_total: Decimal::ZERO,
                admin_fee: Decimal::ZERO,
                active_band: n,
                touched: Vec::new(),
            };

            for _ in 0..MAX_BANDS_PER_EXCHANGE {
                if out_left == Decimal::ZERO || gross_left == Decimal::ZERO {
                    break;
                }
                let (x, y, total_shares) = self.band_state(n);
                let available = if pump { y } else { x };
                if available == Decimal::ZERO {
                    if !self.advance(pump, &mut n, &mut p_up, r) {
                        break;
                    }
                    continue;
                }

                let y0 = get_y0(x, y, p_o, p_up, self.a);
                let (f, g) = virtual_reserves(y0, p_o, p_up, self.a);
                let mut step = if pump {
                    pump_step_out(x, y, f, g, out_left)
                } else {
                    dump_step_out(x, y, f, g, out_left)
                };
                let mut gross_used = step.in_used / (Decimal::ONE - self.fee);
                if gross_used > gross_left {
                    // The input cap binds first; refill the band with what is left.
                    let net_left = gross_left * (Decimal::ONE - self.fee);
                    step = if pump {
                        pump_step(x, y, f, g, net_left)
                    } else {
                        dump_step(x, y, f, g, net_left)
                    };
                    step.drained = false;
                    gross_used = gross_left;
                }

                let fee_amount = gross_used - step.in_used;
                let admin_part = fee_amount * self.admin_fee_share;
                let kept = fee_amount - admin_part;
                let (new_x, new_y) = if pump {
                    (step.new_x + kept, step.new_y)
                } else {
                    (step.new_x, step.new_y + kept)
                };
                outcome.touched.push((n, new_x, new_y, total_shares));
                outcome.out += step.out;
                outcome.fee_total += fee_amount;
                outcome.admin_fee += admin_part;
                gross_left -= gross_used;
                out_left -= step.out;

                if !step.drained {
                    break;
                }
                if !self.advance(pump, &mut n, &mut p_up, r) {
                    break;
                }
            }

            outcome.in_gross = in_gross_limit - gross_left;
            outcome.active_band = n;
            outcome
        }

        /// Moves the walk pointer one band in the trade direction. Returns false at the
        /// edge of ever-used bands.
        fn advance(&self, pump: bool, n: &mut i64, p_up: &mut Decimal, r: Decimal) -> bool {
            if pump {
                if *n >= self.max_band {
                    return false;
                }
                *n += 1;
                *p_up *= r;
            } else {
                if *n <= self.min_band {
                    return false;
                }
                *n -= 1;
                *p_up /= r;
            }
            true
        }

        /// Writes a walk outcome back into band state and fee counters.
        fn apply_outcome(&mut self, outcome: &ExchangeOutcome, pump: bool) {
            for (n, new_x, new_y, total_shares) in &outcome.touched {
                self.write_band(*n, *new_x, *new_y, *total_shares);
            }
            self.active_band = outcome.active_band;
            if pump {
                self.admin_fees_x += outcome.admin_fee;
            } else {
                self.admin_fees_y += outcome.admin_fee;
            }
        }

        /// Notifies the hook component, if one is installed, after a state change.
        /// Runs inline: a panicking hook aborts the operation that triggered it.
        fn fire_hook(
            &self,
            action: &str,
            position_id: Option<NonFungibleLocalId>,
            amount_x: Decimal,
            amount_y: Decimal,
        ) {
            if let Some(hook) = &self.hook {
                hook.call_raw::<()>(
                    &self.hook_method,
                    scrypto_args!(
                        action.to_string(),
                        position_id,
                        amount_x,
                        amount_y,
                        self.active_band
                    ),
                );
            }
        }
    }
}

/// Reserves and share supply of a single price band.
#[derive(ScryptoSbor, Clone)]
pub struct Band {
    /// Borrowed asset reserve.
    pub x: Decimal,
    /// Collateral reserve.
    pub y: Decimal,
    /// Total shares issued against this band's collateral.
    pub total_shares: Decimal,
}

/// A position's band range and per-band share balances.
#[derive(ScryptoSbor, Clone)]
pub struct PositionTicks {
    /// Top band of the range (highest price).
    pub n1: i64,
    /// Bottom band of the range (lowest price).
    pub n2: i64,
    /// Shares held per band, indexed from `n1`.
    pub shares: Vec<Decimal>,
}

/// Result of a band walk, shared by the mutating exchanges and their previews.
struct ExchangeOutcome {
    /// Input consumed, fee included.
    in_gross: Decimal,
    /// Output owed to the trader.
    out: Decimal,
    /// Total fee charged on the input side.
    fee_total: Decimal,
    /// The protocol's share of the fee.
    admin_fee: Decimal,
    /// Where the walk stopped.
    active_band: i64,
    /// Band states to write back: `(band, new_x, new_y, total_shares)`.
    touched: Vec<(i64, Decimal, Decimal, Decimal)>,
}
