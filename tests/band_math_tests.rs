use cascade_protocol::band_math::*;
use scrypto_test::prelude::*;

fn assert_close(actual: Decimal, expected: Decimal, tolerance: Decimal) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "expected {} within {} of {}, difference was {}",
        actual,
        tolerance,
        expected,
        diff
    );
}

#[test]
fn test_band_factor() {
    assert_eq!(band_factor(dec!(100)), dec!("0.99"));
    assert_eq!(band_factor(dec!(2)), dec!("0.5"));
}

#[test]
fn test_price_grid() {
    let base = dec!(1000);
    let a = dec!(100);

    assert_eq!(p_oracle_up(base, a, 0), dec!(1000));
    assert_eq!(p_oracle_up(base, a, 1), dec!(990));
    assert_eq!(p_oracle_up(base, a, 2), dec!("980.1"));
    assert_eq!(p_oracle_up(base, a, 3), dec!("970.299"));

    // Negative indices climb above the anchor.
    assert_close(
        p_oracle_up(base, a, -1),
        dec!("1010.101010101010101"),
        dec!("0.000000000001"),
    );

    for n in -3..6 {
        assert!(p_oracle_up(base, a, n) > p_oracle_up(base, a, n + 1));
        assert_eq!(p_oracle_down(base, a, n), p_oracle_up(base, a, n + 1));
    }
}

#[test]
fn test_y0_empty_band() {
    assert_eq!(
        get_y0(Decimal::ZERO, Decimal::ZERO, dec!(1000), dec!(1000), dec!(100)),
        Decimal::ZERO
    );
}

#[test]
fn test_y0_balanced_band() {
    // With the oracle sitting exactly on the band's upper bound and no borrowed asset in
    // the band, the balanced mass equals the raw collateral.
    let y0 = get_y0(Decimal::ZERO, dec!(100), dec!(3000), dec!(3000), dec!(100));
    assert_eq!(y0, dec!(100));
}

#[test]
fn test_y0_solves_invariant() {
    let x = dec!(500);
    let y = dec!(2);
    let p_o = dec!(1010);
    let p_up = dec!(1000);
    let a = dec!(100);

    let y0 = get_y0(x, y, p_o, p_up, a);
    assert!(y0 > Decimal::ZERO);

    // a * p_o * y0^2 - y0 * (x * (a-1) * p_up / p_o + y * a * p_o^2 / p_up) - x * y = 0
    let b = x * (a - Decimal::ONE) * p_up / p_o + y * a * p_o * p_o / p_up;
    let residual = a * p_o * y0 * y0 - y0 * b - x * y;
    assert_close(residual, Decimal::ZERO, dec!("0.001"));
}

#[test]
fn test_virtual_reserves() {
    // y0 = 10, p_o = p_up = 1000, a = 100: f = a * y0 * p_o, g = (a - 1) * y0.
    let (f, g) = virtual_reserves(dec!(10), dec!(1000), dec!(1000), dec!(100));
    assert_eq!(f, dec!(1000000));
    assert_eq!(g, dec!(990));
}

#[test]
fn test_pure_collateral_spot_price() {
    let a = dec!(100);

    // Oracle on the upper bound: spot equals the oracle price exactly.
    let y0 = get_y0(Decimal::ZERO, dec!(100), dec!(3000), dec!(3000), a);
    let (f, g) = virtual_reserves(y0, dec!(3000), dec!(3000), a);
    assert_eq!(spot_price(Decimal::ZERO, dec!(100), f, g), dec!(3000));

    // Oracle below the upper bound: spot is p_o^3 / p_up^2.
    let y0 = get_y0(Decimal::ZERO, dec!(10), dec!(990), dec!(1000), a);
    let (f, g) = virtual_reserves(y0, dec!(990), dec!(1000), a);
    assert_eq!(spot_price(Decimal::ZERO, dec!(10), f, g), dec!("970.299"));
}

#[test]
fn test_pump_step_partial() {
    // Band with 10 collateral, oracle on the upper bound at 1000.
    let (f, g) = (dec!(1000000), dec!(990));
    let step = pump_step(Decimal::ZERO, dec!(10), f, g, dec!(1000));

    assert_eq!(step.in_used, dec!(1000));
    assert_eq!(step.out, dec!("0.999000999000999"));
    assert_eq!(step.new_x, dec!(1000));
    assert!(!step.drained);

    // Reserves may never fall below the invariant.
    let inv = f * (g + dec!(10));
    assert!((f + step.new_x) * (g + step.new_y) >= inv);
}

#[test]
fn test_pump_step_drain() {
    let (f, g) = (dec!(1000000), dec!(990));
    let step = pump_step(Decimal::ZERO, dec!(10), f, g, dec!(20000));

    assert!(step.drained);
    assert_eq!(step.out, dec!(10));
    assert_eq!(step.new_y, Decimal::ZERO);
    assert_eq!(step.in_used, dec!("10101.010101010101010102"));
}

#[test]
fn test_dump_step_partial() {
    // Band with 1000 borrowed asset, oracle on the upper bound at 1000.
    let (f, g) = (dec!(99000), dec!("98.01"));
    let step = dump_step(dec!(1000), Decimal::ZERO, f, g, dec!("0.5"));

    assert_eq!(step.in_used, dec!("0.5"));
    assert_close(step.out, dec!("507.56"), dec!("0.01"));
    assert!(!step.drained);

    let inv = (f + dec!(1000)) * g;
    assert!((f + step.new_x) * (g + step.new_y) >= inv);
}

#[test]
fn test_dump_step_drain() {
    let (f, g) = (dec!(99000), dec!("98.01"));
    let step = dump_step(dec!(1000), Decimal::ZERO, f, g, dec!(2));

    assert!(step.drained);
    assert_eq!(step.out, dec!(1000));
    assert_eq!(step.new_x, Decimal::ZERO);
    assert_eq!(step.in_used, dec!("0.99") + ATTO);
}

#[test]
fn test_exact_out_steps_match_forward_steps() {
    let (f, g) = (dec!(1000000), dec!(990));
    let out_step = pump_step_out(Decimal::ZERO, dec!(10), f, g, dec!(1));
    assert_eq!(out_step.out, dec!(1));
    assert!(!out_step.drained);

    // Feeding the quoted input through the forward step pays the requested output back
    // out, up to the one-atto roundings.
    let fwd = pump_step(Decimal::ZERO, dec!(10), f, g, out_step.in_used);
    assert_close(fwd.out, dec!(1), dec!("0.000000000001"));

    let (f, g) = (dec!(99000), dec!("98.01"));
    let out_step = dump_step_out(dec!(1000), Decimal::ZERO, f, g, dec!(200));
    assert_eq!(out_step.out, dec!(200));
    let fwd = dump_step(dec!(1000), Decimal::ZERO, f, g, out_step.in_used);
    assert_close(fwd.out, dec!(200), dec!("0.000001"));
}

#[test]
fn test_exact_out_drains_band_when_short() {
    let (f, g) = (dec!(1000000), dec!(990));
    let step = pump_step_out(Decimal::ZERO, dec!(10), f, g, dec!(50));

    assert!(step.drained);
    assert_eq!(step.out, dec!(10));
    assert_eq!(step.new_y, Decimal::ZERO);
}

#[test]
fn test_sweep_value() {
    assert_eq!(sweep_value(dec!(10), dec!(900), dec!(900)), dec!(9000));
    assert_close(
        sweep_value(dec!(1), dec!(1000), dec!(990)),
        dec!("994.987437"),
        dec!("0.000001"),
    );
}

#[test]
fn test_sqrt_band_ratio() {
    let r = sqrt_band_ratio(dec!(100));
    assert_close(r * r, dec!(100) / dec!(99), dec!("0.000000000001"));
}

#[test]
fn test_deposit_slices() {
    let slices = deposit_slices(dec!(100), 4, dec!(100));
    assert_eq!(slices.len(), 4);

    // Slices sum to the deposit exactly and decay by the grid factor.
    let total: Decimal = slices.iter().copied().reduce(|acc, s| acc + s).unwrap();
    assert_eq!(total, dec!(100));
    for i in 1..slices.len() {
        assert!(slices[i] < slices[i - 1]);
        assert_close(slices[i] / slices[i - 1], dec!("0.99"), dec!("0.000000001"));
    }

    assert_eq!(deposit_slices(dec!(100), 1, dec!(100)), vec![dec!(100)]);
}

#[test]
#[should_panic(expected = "Amount too low")]
fn test_deposit_slices_rejects_dust() {
    deposit_slices(Decimal::ZERO, 4, dec!(100));
}

#[test]
fn test_y_effective() {
    let a = dec!(100);

    // One band: collateral * (1 - discount) / sqrt(a / (a - 1)).
    let single = y_effective(dec!(1), 1, dec!("0.09"), a);
    assert_close(single, dec!("0.905439"), dec!("0.00001"));

    // Spreading over more bands realizes at lower prices.
    let four = y_effective(dec!(1), 4, dec!("0.09"), a);
    let fifty = y_effective(dec!(1), 50, dec!("0.09"), a);
    assert!(four < single);
    assert!(fifty < four);

    // A larger discount counts less collateral.
    assert!(y_effective(dec!(1), 4, dec!("0.06"), a) > four);

    // Linear in the collateral amount.
    assert_close(
        y_effective(dec!(2), 4, dec!("0.09"), a),
        dec!(2) * four,
        dec!("0.000000000000001"),
    );
}

#[test]
fn test_band_offset() {
    let a = dec!(100);

    assert_eq!(band_offset(Decimal::ONE, a), 0);
    assert_eq!(band_offset(dec!("1.01"), a), 0);
    assert_eq!(band_offset(dec!("1.0202"), a), 1);
    assert_eq!(band_offset(dec!("1.5"), a), 40);
    assert_eq!(band_offset(dec!("0.5"), a), -69);
}

#[test]
#[should_panic(expected = "Coverage ratio must be positive")]
fn test_band_offset_rejects_zero_ratio() {
    band_offset(Decimal::ZERO, dec!(100));
}

#[test]
fn test_compound_factor() {
    assert_eq!(compound_factor(Decimal::ZERO, 1000), Decimal::ONE);
    assert_eq!(compound_factor(dec!("0.000000001"), 0), Decimal::ONE);

    let day = compound_factor(dec!("0.000000001"), 86400);
    assert_close(day, dec!("1.000086403"), dec!("0.00000001"));
    assert!(compound_factor(dec!("0.000000001"), 172800) > day);
}

#[test]
#[should_panic(expected = "Time moved backwards")]
fn test_compound_factor_rejects_negative_time() {
    compound_factor(dec!("0.000000001"), -1);
}

#[test]
#[should_panic(expected = "Oracle price must be positive")]
fn test_y0_rejects_non_positive_oracle_price() {
    get_y0(dec!(1), dec!(1), Decimal::ZERO, dec!(1000), dec!(100));
}
