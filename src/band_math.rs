//! Pure fixed-point math for the band geometry.
//!
//! Everything in this module is stateless: the price grid, the band invariant and its
//! quadratic solve, single-band swap steps, adiabatic sweep valuation and the deposit
//! weight schedule. The `BandAmm` and `Market` components call into these helpers so that
//! previews and mutations run the exact same arithmetic.
//!
//! Conventions used throughout:
//! - `x` is the borrowed asset reserve of a band, `y` its collateral reserve.
//! - `a` is the amplification parameter. A band covers a relative price width of
//!   `1/a`, and the grid factor between adjacent bands is `(a - 1) / a`.
//! - `p_o` is the external oracle price, `p_up` the upper grid price of the band under
//!   consideration.
//! - Band indices grow as prices fall. The "pump" direction sells borrowed asset into the
//!   AMM for collateral and walks toward larger indices; "dump" is the reverse.

use scrypto::prelude::*;
use scrypto_math::*;

/// The smallest number of bands a loan may be spread across.
pub const MIN_TICKS: u32 = 4;
/// The largest number of bands a loan may be spread across.
pub const MAX_TICKS: u32 = 50;
/// How far below the active band a loan's top band may start.
pub const MAX_SKIP_BANDS: i64 = 1024;
/// Upper bound on bands crossed in a single exchange. Trades that would walk further are
/// filled partially and return the unused input.
pub const MAX_BANDS_PER_EXCHANGE: usize = 128;

/// One atto, the smallest representable `Decimal` step. Used to round swap outputs in the
/// ledger's favour so truncating division can never pay out more than the invariant allows.
pub const ATTO: Decimal = Decimal(I192::ONE);

/// The grid factor between adjacent bands, `(a - 1) / a`.
pub fn band_factor(a: Decimal) -> Decimal {
    (a - Decimal::ONE) / a
}

/// `base^n` for a signed exponent.
fn powi_signed(base: Decimal, n: i64) -> Decimal {
    if n >= 0 {
        base.checked_powi(n).unwrap()
    } else {
        (Decimal::ONE / base).checked_powi(-n).unwrap()
    }
}

/// The upper price bound of band `n` on the oracle grid.
///
/// # Arguments
/// * `base_price`: The grid anchor, the upper price of band 0.
/// * `a`: The amplification parameter.
/// * `n`: The band index. Indices grow as prices fall, so negative indices lie above the
///   anchor price.
///
/// # Returns
/// * `Decimal`: `base_price * ((a - 1) / a)^n`.
pub fn p_oracle_up(base_price: Decimal, a: Decimal, n: i64) -> Decimal {
    base_price * powi_signed(band_factor(a), n)
}

/// The lower price bound of band `n`, identical to the upper bound of band `n + 1`.
pub fn p_oracle_down(base_price: Decimal, a: Decimal, n: i64) -> Decimal {
    p_oracle_up(base_price, a, n + 1)
}

/// Solves the band invariant for the balanced collateral mass `y0`.
///
/// `y0` is the collateral the band would hold if the oracle price sat exactly at the
/// band's upper bound. It is the positive root of
///
/// `a * p_o * y0^2 - y0 * (x * (a-1) * p_up / p_o + y * a * p_o^2 / p_up) - x * y = 0`
///
/// and everything else about the band (virtual reserves, invariant, swap bounds) derives
/// from it. The root is computed in the normalized form `y0 = b' + sqrt(b'^2 + c')` with
/// `b' = b / (2 a p_o)` and `c' = x y / (a p_o)` so no intermediate squares the raw
/// reserve terms.
///
/// # Arguments
/// * `x`: The band's borrowed asset reserve.
/// * `y`: The band's collateral reserve.
/// * `p_o`: The current oracle price.
/// * `p_up`: The band's upper grid price.
/// * `a`: The amplification parameter.
///
/// # Panics
/// * If `p_o` or `p_up` is not positive.
pub fn get_y0(x: Decimal, y: Decimal, p_o: Decimal, p_up: Decimal, a: Decimal) -> Decimal {
    assert!(p_o > Decimal::ZERO, "Oracle price must be positive");
    assert!(p_up > Decimal::ZERO, "Band price must be positive");

    if x == Decimal::ZERO && y == Decimal::ZERO {
        return Decimal::ZERO;
    }

    let b_half = (x * (a - Decimal::ONE) * p_up / p_o + y * a * p_o * p_o / p_up)
        / (Decimal::from(2) * a * p_o);
    let c_term = x * y / (a * p_o);
    b_half + (b_half * b_half + c_term).checked_sqrt().unwrap()
}

/// The virtual reserves `(f, g)` of a band.
///
/// The band trades on the invariant `(f + x) * (g + y) = const`, where
/// `f = a * y0 * p_o^2 / p_up` and `g = (a - 1) * y0 * p_up / p_o`. Both shift with the
/// oracle price, which is what concentrates liquidity around it.
pub fn virtual_reserves(y0: Decimal, p_o: Decimal, p_up: Decimal, a: Decimal) -> (Decimal, Decimal) {
    let f = a * y0 * p_o * p_o / p_up;
    let g = (a - Decimal::ONE) * y0 * p_up / p_o;
    (f, g)
}

/// The band's instantaneous price, `(f + x) / (g + y)`, in borrowed asset per collateral.
pub fn spot_price(x: Decimal, y: Decimal, f: Decimal, g: Decimal) -> Decimal {
    (f + x) / (g + y)
}

/// Outcome of a single-band swap step.
pub struct BandStep {
    /// Net input consumed inside this band, fee excluded.
    pub in_used: Decimal,
    /// Output paid from this band's reserves.
    pub out: Decimal,
    /// The band's borrowed reserve after the step.
    pub new_x: Decimal,
    /// The band's collateral reserve after the step.
    pub new_y: Decimal,
    /// True if the output side of the band was fully drained.
    pub drained: bool,
}

/// Executes one pump step: borrowed asset in, collateral out, against a single band.
///
/// # Arguments
/// * `x`, `y`: The band's current reserves.
/// * `f`, `g`: Virtual reserves for the prevailing oracle price, from [`virtual_reserves`].
/// * `in_net_left`: Net input still available after fees.
///
/// # Logic
/// The invariant `inv = (f + x) * (g + y)` is held constant. If the available input is
/// enough to take all the band's collateral the band is drained and `drained` is set;
/// otherwise the band absorbs the whole input. Output is rounded down by one atto so the
/// reserves can never fall short of the invariant.
pub fn pump_step(x: Decimal, y: Decimal, f: Decimal, g: Decimal, in_net_left: Decimal) -> BandStep {
    let inv = (f + x) * (g + y);
    let x_drain = inv / g - f - x + ATTO;
    if in_net_left < x_drain {
        let new_x = x + in_net_left;
        let mut new_y = inv / (f + new_x) - g + ATTO;
        if new_y > y {
            new_y = y;
        }
        BandStep {
            in_used: in_net_left,
            out: y - new_y,
            new_x,
            new_y,
            drained: false,
        }
    } else {
        BandStep {
            in_used: x_drain,
            out: y,
            new_x: x + x_drain,
            new_y: Decimal::ZERO,
            drained: true,
        }
    }
}

/// Executes one dump step: collateral in, borrowed asset out, against a single band.
/// Mirror image of [`pump_step`].
pub fn dump_step(x: Decimal, y: Decimal, f: Decimal, g: Decimal, in_net_left: Decimal) -> BandStep {
    let inv = (f + x) * (g + y);
    let y_drain = inv / f - g - y + ATTO;
    if in_net_left < y_drain {
        let new_y = y + in_net_left;
        let mut new_x = inv / (g + new_y) - f + ATTO;
        if new_x > x {
            new_x = x;
        }
        BandStep {
            in_used: in_net_left,
            out: x - new_x,
            new_x,
            new_y,
            drained: false,
        }
    } else {
        BandStep {
            in_used: y_drain,
            out: x,
            new_x: Decimal::ZERO,
            new_y: y + y_drain,
            drained: true,
        }
    }
}

/// Executes one pump step targeting an exact output amount of collateral.
///
/// The required net input is rounded up by one atto. `drained` is set when the band cannot
/// cover the remaining target on its own.
pub fn pump_step_out(x: Decimal, y: Decimal, f: Decimal, g: Decimal, out_left: Decimal) -> BandStep {
    let inv = (f + x) * (g + y);
    if out_left >= y {
        let in_used = inv / g - f - x + ATTO;
        BandStep {
            in_used,
            out: y,
            new_x: x + in_used,
            new_y: Decimal::ZERO,
            drained: true,
        }
    } else {
        let new_y = y - out_left;
        let new_x = inv / (g + new_y) - f + ATTO;
        BandStep {
            in_used: new_x - x,
            out: out_left,
            new_x,
            new_y,
            drained: false,
        }
    }
}

/// Executes one dump step targeting an exact output amount of borrowed asset.
/// Mirror image of [`pump_step_out`].
pub fn dump_step_out(x: Decimal, y: Decimal, f: Decimal, g: Decimal, out_left: Decimal) -> BandStep {
    let inv = (f + x) * (g + y);
    if out_left >= x {
        let in_used = inv / f - g - y + ATTO;
        BandStep {
            in_used,
            out: x,
            new_x: Decimal::ZERO,
            new_y: y + in_used,
            drained: true,
        }
    } else {
        let new_x = x - out_left;
        let new_y = inv / (f + new_x) - g + ATTO;
        BandStep {
            in_used: new_y - y,
            out: out_left,
            new_x,
            new_y,
            drained: false,
        }
    }
}

/// Value, in borrowed asset, realized by collateral that is swept from price `p_hi` down to
/// `p_lo` by arbitrage trades tracking the oracle.
///
/// The band sells continuously along the way, so the proceeds equal the geometric mean of
/// the two prices times the collateral mass.
pub fn sweep_value(y: Decimal, p_hi: Decimal, p_lo: Decimal) -> Decimal {
    y * (p_hi * p_lo).checked_sqrt().unwrap()
}

/// `sqrt(a / (a - 1))`, the per-band price ratio under the adiabatic sweep.
pub fn sqrt_band_ratio(a: Decimal) -> Decimal {
    (a / (a - Decimal::ONE)).checked_sqrt().unwrap()
}

/// Splits a collateral amount across `n` bands with geometrically decaying weights.
///
/// Band `i` (counting from the highest price band) receives weight `((a-1)/a)^i`. The
/// last slice takes the remainder so the slices always sum to `amount` exactly.
///
/// # Panics
/// * If `n` is zero or any slice rounds to zero.
pub fn deposit_slices(amount: Decimal, n: u32, a: Decimal) -> Vec<Decimal> {
    assert!(n > 0, "Number of bands must be positive");
    let r = band_factor(a);

    let mut weights: Vec<Decimal> = Vec::with_capacity(n as usize);
    let mut w = Decimal::ONE;
    let mut total = Decimal::ZERO;
    for _ in 0..n {
        weights.push(w);
        total += w;
        w *= r;
    }

    let mut slices: Vec<Decimal> = Vec::with_capacity(n as usize);
    let mut assigned = Decimal::ZERO;
    for (i, weight) in weights.iter().enumerate() {
        let slice = if i == (n - 1) as usize {
            amount - assigned
        } else {
            amount * *weight / total
        };
        assert!(slice > Decimal::ZERO, "Amount too low");
        assigned += slice;
        slices.push(slice);
    }
    slices
}

/// The collateral mass that counts toward debt coverage when sizing a loan.
///
/// # Arguments
/// * `collateral`: The raw collateral amount.
/// * `n`: The number of bands the collateral will be spread across.
/// * `discount`: The valuation discount to apply.
/// * `a`: The amplification parameter.
///
/// # Returns
/// * `Decimal`: `y_eff` such that a loan is fully covered when
///   `y_eff * p_oracle_up(n1) >= debt`, assuming the deposit split of
///   [`deposit_slices`] and full-band sweep proceeds of `p_up / sqrt(a / (a-1))` per band.
pub fn y_effective(collateral: Decimal, n: u32, discount: Decimal, a: Decimal) -> Decimal {
    assert!(n > 0, "Number of bands must be positive");
    let r = band_factor(a);
    let r2 = r * r;

    // Sum of r^(2i) over the deposit weights r^i: deeper slices are both smaller and
    // realize at lower prices, so each contributes a factor r^(2i).
    let mut w = Decimal::ONE;
    let mut w2 = Decimal::ONE;
    let mut sum_w = Decimal::ZERO;
    let mut sum_w2 = Decimal::ZERO;
    for _ in 0..n {
        sum_w += w;
        sum_w2 += w2;
        w *= r;
        w2 *= r2;
    }

    collateral * (Decimal::ONE - discount) / sqrt_band_ratio(a) * sum_w2 / sum_w
}

/// How many whole bands of headroom a coverage ratio buys.
///
/// # Arguments
/// * `ratio`: `y_effective * p_base / debt`, the coverage at the base candidate band.
/// * `a`: The amplification parameter.
///
/// # Returns
/// * `i64`: `floor(ln(ratio) / ln(a / (a - 1)))`. Negative when the debt is not covered
///   even at the base band.
pub fn band_offset(ratio: Decimal, a: Decimal) -> i64 {
    assert!(ratio > Decimal::ZERO, "Coverage ratio must be positive");
    let ln_ratio = ratio.ln().unwrap();
    let ln_step = (a / (a - Decimal::ONE)).ln().unwrap();
    decimal_to_i64_floor(ln_ratio / ln_step)
}

/// The compounding factor `(1 + rate)^seconds` for a per-second rate.
pub fn compound_factor(rate: Decimal, seconds: i64) -> Decimal {
    assert!(seconds >= 0, "Time moved backwards");
    (Decimal::ONE + rate).checked_powi(seconds).unwrap()
}

/// Largest `i64` less than or equal to `d`. Works on the underlying atto units.
fn decimal_to_i64_floor(d: Decimal) -> i64 {
    let scale = I192::from(10).pow(Decimal::SCALE);
    let mut whole = d.attos() / scale;
    if d.attos() % scale < I192::from(0) {
        whole -= I192::from(1);
    }
    i64::try_from(whole).unwrap()
}
