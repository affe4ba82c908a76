//! # Proxy, Market and BandAmm shared structs
//! Structs used by more than one of the protocol's components

use scrypto::prelude::*;

/// Data struct of a loan receipt, gained when opening a loan.
///
/// The receipt does not carry the loan's collateral balance: the collateral lives inside the
/// AMM's bands and its composition changes as soft liquidation trades through them. The
/// receipt carries the debt bookkeeping and the discounts that were locked in when the loan
/// was last resized.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct LoanReceipt {
    /// Image of the NFT
    #[mutable]
    pub key_image_url: Url,
    /// Debt denominated in rate-multiplier units. The live debt is
    /// `initial_debt * current_rate_mul / rate_mul_snapshot`.
    #[mutable]
    pub initial_debt: Decimal,
    /// The global rate multiplier at the moment this loan's debt was last written.
    #[mutable]
    pub rate_mul_snapshot: Decimal,
    /// The number of price bands the loan's collateral is spread across. Fixed for the
    /// lifetime of the loan.
    pub n_bands: u32,
    /// The liquidation discount locked in when the loan was opened or last resized.
    #[mutable]
    pub liquidation_discount: Decimal,
    /// The current status of the loan.
    #[mutable]
    pub status: LoanStatus,
}

/// Represents the possible states of a loan.
#[derive(ScryptoSbor, PartialEq, Clone, Debug)]
pub enum LoanStatus {
    /// The loan is open and backed by collateral in the AMM.
    Active,
    /// The loan has been fully paid off and closed by the borrower.
    Repaid,
    /// The loan has been closed by liquidation.
    Liquidated,
}

/// Adjustable parameters of the `Market` component.
#[derive(ScryptoSbor, Clone)]
pub struct MarketParameters {
    /// Discount applied to collateral value when sizing a new loan into bands. Larger values
    /// move the bands further below the oracle price.
    pub loan_discount: Decimal,
    /// Discount applied to collateral value when measuring health. Must stay below
    /// `loan_discount` so fresh loans start healthy.
    pub liquidation_discount: Decimal,
    /// One-off fee charged on newly created debt, kept in the borrowed asset vault for the
    /// protocol.
    pub borrow_fee: Decimal,
    /// Smallest debt a loan may carry. Repayments that would leave a smaller, non-zero debt
    /// are rejected.
    pub min_debt: Decimal,
    /// Stop for opening new loans and borrowing more against existing ones.
    pub stop_new_loans: bool,
    /// Stop for collateral adjustments on existing loans.
    pub stop_adjustments: bool,
    /// Stop for liquidations by parties other than the loan's owner.
    pub stop_liquidations: bool,
}

/// A summarized view of a single loan, returned by getter methods.
#[derive(ScryptoSbor, Clone)]
pub struct LoanInfoReturn {
    /// The local id of the loan receipt NFT.
    pub loan_id: NonFungibleLocalId,
    /// The current status of the loan.
    pub status: LoanStatus,
    /// The live debt including interest accrued up to now.
    pub debt: Decimal,
    /// Health measured against convertible collateral value only.
    pub health: Decimal,
    /// Health including the above-range premium of collateral still priced above its bands.
    pub full_health: Decimal,
    /// Borrowed asset sitting in the loan's bands (already converted by soft liquidation).
    pub amm_borrowed: Decimal,
    /// Collateral sitting in the loan's bands (not yet converted).
    pub amm_collateral: Decimal,
    /// The loan's band range, highest price band first.
    pub bands: (i64, i64),
}

/// A summarized view of the whole market, returned by getter methods.
#[derive(ScryptoSbor, Clone)]
pub struct MarketInfoReturn {
    /// Total live debt across all loans, including accrued interest.
    pub total_debt: Decimal,
    /// The per-second interest rate currently applied.
    pub rate: Decimal,
    /// The global rate multiplier as of the last accrual.
    pub rate_mul: Decimal,
    /// The number of open loans.
    pub open_loans: u64,
    /// Borrowed asset available for new loans.
    pub lendable: Decimal,
    /// The oracle price at the last accrual.
    pub last_oracle_price: Decimal,
    /// The AMM's active band.
    pub active_band: i64,
    /// The AMM's base price, including rate drift.
    pub base_price: Decimal,
}
