//! # Cascade Protocol Crate
//!
//! This crate contains the core Scrypto blueprints for the Cascade protocol, a collateralized
//! lending market in which liquidation is a continuous process: collateral backing a loan is
//! deposited into a range of price bands inside an AMM, and as the oracle price moves through
//! those bands arbitrage trades convert the collateral into the borrowed asset (and back),
//! instead of a one-shot auction selling the whole position.
//!
//! ## Modules
//!
//! The crate is organized into the following modules:
//!
//! - `band_math`: Pure fixed-point math for the band geometry: the price grid, the band
//!   invariant and its quadratic solve, in-band swap steps, adiabatic sweep valuation, and
//!   the deposit weight schedule. No component state lives here.
//! - `amm_component`: Defines the `BandAmm` component, the band ledger itself. It custodies
//!   both market assets, tracks per-band reserves and shares, executes the band-walking
//!   exchanges, and anchors its pricing to the external oracle.
//! - `market_component`: Defines the `Market` component, the loan book. It mints loan
//!   receipt NFTs, accrues interest through a lazily compounded rate multiplier, sizes new
//!   loans into bands, and runs the create/adjust/repay/liquidate state machine on top of
//!   the AMM.
//! - `proxy`: Defines the `Proxy` component that acts as the main entry point for user
//!   interactions. It checks loan receipt proofs, routes calls to the `Market` under badge
//!   authorization, and lets the owner retarget the oracle, rate policy, and hook wiring.
//! - `events`: Defines the events emitted by the protocol components, allowing off-ledger
//!   services to track state changes.
//! - `shared_structs`: Contains data structures shared across multiple components, such as
//!   `LoanReceipt`, `MarketParameters`, and the info structs returned by view methods.

pub mod amm_component;
pub mod band_math;
pub mod events;
pub mod market_component;
pub mod proxy;
pub mod shared_structs;
