
use helper::Helper;
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
fn test_deposit_and_withdraw_round_trip() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let id = NonFungibleLocalId::integer(1);

    // Empty active band: the spot price falls back to the oracle.
    assert_eq!(helper.amm.get_spot_price(&mut helper.env)?, dec!(1000));
    assert_eq!(helper.amm.get_base_price(&mut helper.env)?, dec!(1000));
    assert_eq!(helper.amm.get_p_oracle_up(1, &mut helper.env)?, dec!(990));

    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper
        .amm
        .deposit_range(id.clone(), collateral, 1, 4, &mut helper.env)?;
    helper.env.enable_auth_module();

    assert_eq!(helper.amm.get_active_band(&mut helper.env)?, 0);
    assert_eq!(helper.amm.get_min_band(&mut helper.env)?, 1);
    assert_eq!(helper.amm.get_max_band(&mut helper.env)?, 4);
    assert_eq!(
        helper.amm.get_position_bands(id.clone(), &mut helper.env)?,
        (1, 4)
    );

    // The collateral is split over the four bands with decaying weights and no loss.
    let mut total = Decimal::ZERO;
    let mut previous = Decimal::MAX;
    for n in 1..5 {
        let (x, y) = helper.amm.get_band_reserves(n, &mut helper.env)?;
        assert_eq!(x, Decimal::ZERO);
        assert!(y < previous);
        previous = y;
        total += y;
    }
    assert_eq!(total, dec!(100));
    // Share accounting truncates toward zero, so the position's view may sit a few
    // attos below the raw band sum.
    let (x, y) = helper
        .amm
        .get_position_reserves(id.clone(), &mut helper.env)?;
    assert_eq!(x, Decimal::ZERO);
    assert_close(y, dec!(100), dec!("0.000000001"));
    assert_close(
        helper.amm.get_band_reserves(1, &mut helper.env)?.1,
        dec!("25.378"),
        dec!("0.001"),
    );

    // A full withdrawal returns every unit of collateral and forgets the position.
    helper.env.disable_auth_module();
    let (x_out, y_out) = helper.amm.withdraw(id.clone(), dec!(1), &mut helper.env)?;
    assert_eq!(x_out.amount(&mut helper.env)?, Decimal::ZERO);
    assert_close(y_out.amount(&mut helper.env)?, dec!(100), dec!("0.000000001"));
    assert!(helper.amm.get_band_reserves(1, &mut helper.env)?.1 < dec!("0.000000001"));
    let gone = helper.amm.get_position_bands(id, &mut helper.env);
    assert!(gone.is_err(), "Withdrawn position should be forgotten");
    Ok(())
}

#[test]
fn test_five_band_deposit_split() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let id = NonFungibleLocalId::integer(1);

    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(5), &mut helper.env)?;
    helper
        .amm
        .deposit_range(id.clone(), collateral, 1, 5, &mut helper.env)?;
    helper.env.enable_auth_module();

    assert_eq!(helper.amm.get_active_band(&mut helper.env)?, 0);
    assert_eq!(helper.amm.get_min_band(&mut helper.env)?, 1);
    assert_eq!(helper.amm.get_max_band(&mut helper.env)?, 5);
    assert_eq!(helper.amm.get_position_bands(id, &mut helper.env)?, (1, 5));

    // Five units over five bands: geometric weights with the top band just over
    // a unit, and nothing lost to the split.
    let mut total = Decimal::ZERO;
    let mut previous = Decimal::MAX;
    for n in 1..6 {
        let (x, y) = helper.amm.get_band_reserves(n, &mut helper.env)?;
        assert_eq!(x, Decimal::ZERO);
        assert!(y < previous);
        previous = y;
        total += y;
    }
    assert_eq!(total, dec!(5));
    assert_close(
        helper.amm.get_band_reserves(1, &mut helper.env)?.1,
        dec!("1.0181"),
        dec!("0.001"),
    );
    Ok(())
}

#[test]
fn test_deposit_validation() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();

    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;

    // Not below the active band.
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    let result = helper.amm.deposit_range(
        NonFungibleLocalId::integer(2),
        collateral,
        0,
        3,
        &mut helper.env,
    );
    assert!(result.is_err(), "Deposit at the active band should fail");

    // Inverted range.
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    let result = helper.amm.deposit_range(
        NonFungibleLocalId::integer(2),
        collateral,
        5,
        2,
        &mut helper.env,
    );
    assert!(result.is_err(), "Inverted band range should fail");

    // Too wide.
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    let result = helper.amm.deposit_range(
        NonFungibleLocalId::integer(2),
        collateral,
        1,
        60,
        &mut helper.env,
    );
    assert!(result.is_err(), "Sixty bands should be too many");

    // Wrong asset.
    let stable = helper.stable.take(dec!(100), &mut helper.env)?;
    let result = helper.amm.deposit_range(
        NonFungibleLocalId::integer(2),
        stable,
        1,
        4,
        &mut helper.env,
    );
    assert!(result.is_err(), "Borrowed asset is not collateral");

    // Duplicate position id.
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    let result = helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        5,
        8,
        &mut helper.env,
    );
    assert!(result.is_err(), "Duplicate position id should fail");
    Ok(())
}

#[test]
fn test_withdraw_validation() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();

    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;

    let result = helper
        .amm
        .withdraw(NonFungibleLocalId::integer(99), dec!(1), &mut helper.env);
    assert!(result.is_err(), "Unknown position should fail");

    let result = helper
        .amm
        .withdraw(NonFungibleLocalId::integer(1), dec!(2), &mut helper.env);
    assert!(result.is_err(), "Fraction above one should fail");
    Ok(())
}

#[test]
fn test_exchange_previews_match_execution() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();
    helper.set_price(dec!(960))?;

    // The preview and the exchange run the same arithmetic over the same state, so the
    // numbers must agree to the atto.
    let (in_used, out_expected) = helper.amm.get_dxdy(true, dec!(30000), &mut helper.env)?;
    assert!(in_used > Decimal::ZERO && in_used <= dec!(30000));

    let input = helper.stable.take(dec!(30000), &mut helper.env)?;
    let (unused, out) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;
    assert_eq!(out.amount(&mut helper.env)?, out_expected);
    assert_eq!(unused.amount(&mut helper.env)?, dec!(30000) - in_used);
    assert!(out_expected > dec!(30) && out_expected < dec!(35));

    // The walk drained band 1 dry and stopped inside band 2.
    assert_eq!(helper.amm.get_active_band(&mut helper.env)?, 2);
    let (x1, y1) = helper.amm.get_band_reserves(1, &mut helper.env)?;
    assert!(x1 > Decimal::ZERO);
    assert_eq!(y1, Decimal::ZERO);
    let (x2, y2) = helper.amm.get_band_reserves(2, &mut helper.env)?;
    assert!(x2 > Decimal::ZERO && y2 > Decimal::ZERO);

    // Exact-output trades pay out precisely the requested amount.
    let (in_needed, out_preview) = helper.amm.get_dydx(true, dec!(10), &mut helper.env)?;
    assert_eq!(out_preview, dec!(10));
    let input = helper.stable.take(dec!(12000), &mut helper.env)?;
    let (unused, out) =
        helper
            .amm
            .exchange_exact_out(input, dec!(10), dec!("9.9"), &mut helper.env)?;
    assert_eq!(out.amount(&mut helper.env)?, dec!(10));
    assert_eq!(unused.amount(&mut helper.env)?, dec!(12000) - in_needed);
    Ok(())
}

#[test]
fn test_exchange_slippage_and_stops() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();
    helper.set_price(dec!(960))?;

    // Asking for more output than the quote fails, asking for the quote passes.
    let (_, out_expected) = helper.amm.get_dxdy(true, dec!(10000), &mut helper.env)?;
    let input = helper.stable.take(dec!(10000), &mut helper.env)?;
    let result = helper
        .amm
        .exchange(input, out_expected + dec!(1), &mut helper.env);
    assert!(result.is_err(), "Slippage guard should reject the trade");

    let input = helper.stable.take(dec!(10000), &mut helper.env)?;
    let (_, out) = helper.amm.exchange(input, out_expected, &mut helper.env)?;
    assert_eq!(out.amount(&mut helper.env)?, out_expected);

    // Stopping trading blocks exchanges until it is lifted again.
    helper.set_stops(false, false, false, true)?;
    let input = helper.stable.take(dec!(1000), &mut helper.env)?;
    let result = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env);
    assert!(result.is_err(), "Exchanges should be stopped");

    helper.set_stops(false, false, false, false)?;
    let input = helper.stable.take(dec!(1000), &mut helper.env)?;
    let (_, out) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;
    assert!(out.amount(&mut helper.env)? > Decimal::ZERO);
    Ok(())
}

#[test]
fn test_exchange_rejects_unknown_asset() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    let input = helper.admin_badge.take(dec!(1), &mut helper.env)?;
    let result = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env);
    assert!(result.is_err(), "Foreign assets cannot be exchanged");
    Ok(())
}

#[test]
fn test_exchange_rejects_oversized_input() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    // Both entry points refuse buckets past the trade size cap before touching
    // any band.
    let input = helper.stable.take(dec!(1000000000001), &mut helper.env)?;
    let result = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env);
    assert!(result.is_err(), "Oversized input should fail");

    let input = helper.stable.take(dec!(1000000000001), &mut helper.env)?;
    let result = helper
        .amm
        .exchange_exact_out(input, dec!(1), Decimal::ZERO, &mut helper.env);
    assert!(result.is_err(), "Oversized input cap should fail");

    // A sane input still trades on both paths.
    let input = helper.stable.take(dec!(1000), &mut helper.env)?;
    let (_, out) =
        helper
            .amm
            .exchange_exact_out(input, dec!("0.5"), Decimal::ZERO, &mut helper.env)?;
    assert_eq!(out.amount(&mut helper.env)?, dec!("0.5"));
    Ok(())
}

#[test]
fn test_arb_walk_drains_bands_toward_oracle() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    helper.set_price(dec!(960))?;
    let bought = helper.arb_to_price(dec!(960))?;
    assert!(bought > Decimal::ZERO);

    // Bands 1 to 3 sold out on the way down; the walk stopped inside band 4.
    assert_eq!(helper.amm.get_active_band(&mut helper.env)?, 4);
    for n in 1..4 {
        let (x, y) = helper.amm.get_band_reserves(n, &mut helper.env)?;
        assert!(x > Decimal::ZERO);
        assert_eq!(y, Decimal::ZERO);
    }
    let (x4, y4) = helper.amm.get_band_reserves(4, &mut helper.env)?;
    assert!(x4 > Decimal::ZERO && y4 > Decimal::ZERO);
    assert_close(
        helper.amm.get_spot_price(&mut helper.env)?,
        dec!(960),
        dec!("0.5"),
    );

    // Once the spot sits on the oracle there is nothing left to arb.
    let (amount, _) = helper.amm.get_amount_for_price(dec!(960), &mut helper.env)?;
    assert!(amount < dec!("0.5"));
    Ok(())
}

#[test]
fn test_dump_walk_restores_collateral() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let id = NonFungibleLocalId::integer(1);
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper
        .amm
        .deposit_range(id.clone(), collateral, 1, 4, &mut helper.env)?;
    helper.env.enable_auth_module();

    helper.set_price(dec!(960))?;
    helper.arb_to_price(dec!(960))?;

    // The price recovers: arbitrage sells the collateral back into the bands and the
    // borrowed asset leaves the ledger completely.
    helper.set_price(dec!(1000))?;
    helper.arb_to_price(dec!(1000))?;

    assert_eq!(helper.amm.get_active_band(&mut helper.env)?, 1);
    let (x, y) = helper.amm.get_position_reserves(id, &mut helper.env)?;
    assert!(x < dec!("0.000000001"), "Borrowed dust left over: {}", x);
    assert!(y > dec!(97) && y < dec!(101));
    Ok(())
}

#[test]
fn test_round_trip_is_not_profitable() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    // Park some borrowed asset in band 1 first so the measured trades stay well
    // inside the band.
    helper.set_amm_fee(Decimal::ZERO)?;
    let input = helper.stable.take(dec!(12000), &mut helper.env)?;
    let (_, _) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;

    // With the fee off, selling the proceeds straight back retraces the same
    // curve: the trader recovers the input up to rounding and never more.
    let input = helper.stable.take(dec!(5000), &mut helper.env)?;
    let (unused, bought) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;
    assert_eq!(unused.amount(&mut helper.env)?, Decimal::ZERO);
    let (_, returned) = helper.amm.exchange(bought, Decimal::ZERO, &mut helper.env)?;
    let returned = returned.amount(&mut helper.env)?;
    assert!(
        returned <= dec!(5000) + dec!("0.000000001"),
        "Round trip made money: {}",
        returned
    );
    assert_close(returned, dec!(5000), dec!("0.000001"));

    // With the fee on, the trader pays it in both directions.
    helper.set_amm_fee(dec!("0.006"))?;
    let input = helper.stable.take(dec!(5000), &mut helper.env)?;
    let (_, bought) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;
    let (_, returned) = helper.amm.exchange(bought, Decimal::ZERO, &mut helper.env)?;
    let returned = returned.amount(&mut helper.env)?;
    assert!(returned < dec!(4950), "Fees were not charged: {}", returned);
    assert!(returned > dec!(4900));
    Ok(())
}

#[test]
fn test_amount_for_price_moves_spot() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();
    helper.set_price(dec!(985))?;

    let (amount, pump) = helper.amm.get_amount_for_price(dec!(985), &mut helper.env)?;
    assert!(pump);
    assert!(amount > Decimal::ZERO);

    let input = helper.stable.take(amount, &mut helper.env)?;
    let (unused, _) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;
    assert!(unused.amount(&mut helper.env)? < dec!("0.000001"));
    assert_close(
        helper.amm.get_spot_price(&mut helper.env)?,
        dec!(985),
        dec!("0.5"),
    );
    Ok(())
}

#[test]
fn test_deposit_blocked_at_or_below_active_band() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    helper.set_price(dec!(975))?;
    helper.arb_to_price(dec!(975))?;
    assert_eq!(helper.amm.get_active_band(&mut helper.env)?, 2);

    // Fresh liquidity may only sit strictly below the active band.
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(50), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(2),
        collateral,
        3,
        6,
        &mut helper.env,
    )?;

    let collateral = helper.collateral.take(dec!(50), &mut helper.env)?;
    let result = helper.amm.deposit_range(
        NonFungibleLocalId::integer(3),
        collateral,
        1,
        4,
        &mut helper.env,
    );
    assert!(result.is_err(), "Range crossing the active band should fail");
    Ok(())
}

#[test]
fn test_hook_callbacks() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    let hook_address = helper.hook_address;
    helper.set_amm_hook(Some(hook_address), "on_amm_event".to_string())?;

    let (_payout, receipt) = helper.open_loan(dec!(1), dec!(500), 4)?;
    assert_eq!(helper.hook.call_count(&mut helper.env)?, 1);

    let input = helper.stable.take(dec!(100), &mut helper.env)?;
    let (_, _) = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env)?;
    assert_eq!(helper.hook.call_count(&mut helper.env)?, 2);

    let proof = helper.receipt_proof(&receipt)?;
    let payment = helper.stable.take(dec!(520), &mut helper.env)?;
    let (_, _, _) = helper.proxy.repay(payment, proof, &mut helper.env)?;
    assert_eq!(helper.hook.call_count(&mut helper.env)?, 3);

    let calls = helper.hook.get_calls(&mut helper.env)?;
    assert_eq!(calls[0].0, "deposit".to_string());
    assert_eq!(calls[0].1, Some(NonFungibleLocalId::integer(1)));
    assert_eq!(calls[0].3, dec!(1));
    assert_eq!(calls[1].0, "exchange".to_string());
    assert_eq!(calls[1].1, None);
    assert_eq!(calls[2].0, "withdraw".to_string());
    assert_eq!(calls[2].1, Some(NonFungibleLocalId::integer(1)));

    // A panicking hook aborts the whole operation.
    helper.env.disable_auth_module();
    helper.hook.set_panic_on_call(true, &mut helper.env)?;
    helper.env.enable_auth_module();
    let input = helper.stable.take(dec!(100), &mut helper.env)?;
    let result = helper.amm.exchange(input, Decimal::ZERO, &mut helper.env);
    assert!(result.is_err(), "Hook panics should abort the exchange");
    Ok(())
}

#[test]
fn test_admin_fee_split_and_collection() -> Result<(), RuntimeError> {
    let mut helper = Helper::new().unwrap();
    helper.env.disable_auth_module();
    let collateral = helper.collateral.take(dec!(100), &mut helper.env)?;
    helper.amm.deposit_range(
        NonFungibleLocalId::integer(1),
        collateral,
        1,
        4,
        &mut helper.env,
    )?;
    helper.env.enable_auth_module();

    // Pump fees are charged on the borrowed asset side.
    helper.set_price(dec!(960))?;
    helper.arb_to_price(dec!(960))?;
    let (fees_x, fees_y) = helper.amm.get_admin_fees(&mut helper.env)?;
    assert!(fees_x > Decimal::ZERO);
    assert_eq!(fees_y, Decimal::ZERO);

    let (market_fees, amm_x, amm_y) = helper.collect_fees()?;
    assert_eq!(market_fees.amount(&mut helper.env)?, Decimal::ZERO);
    assert_eq!(amm_x.amount(&mut helper.env)?, fees_x);
    assert_eq!(amm_y.amount(&mut helper.env)?, Decimal::ZERO);
    assert_eq!(
        helper.amm.get_admin_fees(&mut helper.env)?,
        (Decimal::ZERO, Decimal::ZERO)
    );

    // Dump fees are charged on the collateral side.
    helper.set_price(dec!(1000))?;
    helper.arb_to_price(dec!(1000))?;
    let (fees_x, fees_y) = helper.amm.get_admin_fees(&mut helper.env)?;
    assert_eq!(fees_x, Decimal::ZERO);
    assert!(fees_y > Decimal::ZERO);

    let (_, _, amm_y) = helper.collect_fees()?;
    assert_eq!(amm_y.amount(&mut helper.env)?, fees_y);
    Ok(())
}
