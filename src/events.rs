//! Defines events emitted by the Cascade protocol components.

use crate::shared_structs::*;
use scrypto::prelude::*;

/// Event emitted when a new loan is opened.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewLoan {
    /// The data associated with the newly created loan receipt.
    pub receipt: LoanReceipt,
    /// The unique `NonFungibleLocalId` identifying the new loan receipt NFT.
    pub loan_id: NonFungibleLocalId,
    /// The debt taken out, before the borrow fee.
    pub debt: Decimal,
    /// The collateral deposited into the AMM.
    pub collateral_amount: Decimal,
    /// The band range the collateral was deposited into, highest price band first.
    pub bands: (i64, i64),
}

/// Event emitted when an existing loan is changed by its owner.
/// This could happen due to borrowing more, repaying partially, or adding/removing collateral.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventUpdateLoan {
    /// The updated data of the loan receipt.
    pub receipt: LoanReceipt,
    /// The `NonFungibleLocalId` identifying the updated loan receipt NFT.
    pub loan_id: NonFungibleLocalId,
}

/// Event emitted when a loan is fully repaid and closed by its owner.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventCloseLoan {
    /// The `NonFungibleLocalId` identifying the closed loan receipt NFT.
    pub loan_id: NonFungibleLocalId,
    /// The debt extinguished, including accrued interest.
    pub debt_repaid: Decimal,
}

/// Event emitted when a loan is liquidated, fully or partially.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidateLoan {
    /// The `NonFungibleLocalId` identifying the liquidated loan receipt NFT.
    pub loan_id: NonFungibleLocalId,
    /// The fraction of the loan that was liquidated.
    pub fraction: Decimal,
    /// The debt extinguished by this liquidation.
    pub debt_repaid: Decimal,
    /// Collateral withdrawn from the bands and paid to the liquidator.
    pub collateral_paid_out: Decimal,
    /// Whether the loan's owner performed the liquidation themselves.
    pub by_owner: bool,
}

/// Event emitted when interest is accrued onto the global rate multiplier.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventAccrueInterest {
    /// The per-second rate that was applied for the elapsed period.
    pub rate: Decimal,
    /// The global rate multiplier after accrual.
    pub rate_mul: Decimal,
    /// Total live debt after accrual.
    pub total_debt: Decimal,
}

/// Event emitted when collateral is deposited into a band range.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventDepositRange {
    /// The id of the position the deposit belongs to.
    pub position_id: NonFungibleLocalId,
    /// The amount of collateral deposited.
    pub amount: Decimal,
    /// The band range, highest price band first.
    pub bands: (i64, i64),
}

/// Event emitted when a position's assets are withdrawn from its bands.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventWithdraw {
    /// The id of the position withdrawn from.
    pub position_id: NonFungibleLocalId,
    /// The fraction of the position that was withdrawn.
    pub fraction: Decimal,
    /// Borrowed asset withdrawn.
    pub borrowed_out: Decimal,
    /// Collateral withdrawn.
    pub collateral_out: Decimal,
}

/// Event emitted on every exchange against the band ledger.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventExchange {
    /// True if the trade sold borrowed asset into the AMM for collateral.
    pub pump: bool,
    /// Amount of the input asset taken, fee included.
    pub amount_in: Decimal,
    /// Amount of the output asset paid out.
    pub amount_out: Decimal,
    /// Fee retained, denominated in the input asset.
    pub fee: Decimal,
    /// The active band after the trade.
    pub active_band: i64,
}

/// Event emitted when the AMM's interest rate is changed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventSetAmmRate {
    /// The new per-second rate.
    pub rate: Decimal,
    /// The rate-drifted base price at the moment of the change.
    pub base_price: Decimal,
}

/// Event emitted when market parameters are changed by the owner.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventChangeParameters {
    /// The new loan discount, if changed.
    pub new_loan_discount: Option<Decimal>,
    /// The new liquidation discount, if changed.
    pub new_liquidation_discount: Option<Decimal>,
    /// The new borrow fee, if changed.
    pub new_borrow_fee: Option<Decimal>,
    /// The new minimum debt, if changed.
    pub new_min_debt: Option<Decimal>,
}

/// Event emitted when lendable liquidity is added to the market.
#[derive(ScryptoSbor, ScryptoEvent)]
pub struct EventProvideLiquidity {
    pub amount: Decimal,
}

/// Event emitted when lendable liquidity is removed from the market.
#[derive(ScryptoSbor, ScryptoEvent)]
pub struct EventWithdrawLiquidity {
    pub amount: Decimal,
}

/// Event emitted when accumulated protocol fees are collected.
#[derive(ScryptoSbor, ScryptoEvent)]
pub struct EventCollectFees {
    /// Interest and borrow fees collected from the market, in the borrowed asset.
    pub market_fees: Decimal,
    /// Admin swap fees collected from the AMM, in the borrowed asset.
    pub amm_fees_borrowed: Decimal,
    /// Admin swap fees collected from the AMM, in the collateral asset.
    pub amm_fees_collateral: Decimal,
}
