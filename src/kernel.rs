//! Decimal & formula kernel (C1).
//!
//! Fixed-precision arithmetic only — `rust_decimal::Decimal` carries 28-29
//! significant digits of working precision internally, which is what every
//! formula below relies on before rounding to its output scale. No floating
//! point touches a quoted or fee value anywhere in this module.

use crate::domain::{FeeBreakdown, FeeType};
use crate::error::PricingError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

const RATE_SCALE: u32 = 6;
const MONEY_SCALE: u32 = 4;

fn year_days() -> Decimal {
    Decimal::from(360)
}

fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Formula 1: adjusted annualized borrow rate.
///
/// `adj = max(base_rate * (1 + volatility_index * v_factor) + (event_risk / 10) * e_factor, min_borrow_rate)`
pub fn adjusted_rate(
    base_rate: Decimal,
    volatility_index: Decimal,
    event_risk: Decimal,
    min_borrow_rate: Decimal,
    v_factor: Decimal,
    e_factor: Decimal,
) -> Result<Decimal, PricingError> {
    if base_rate < Decimal::ZERO {
        return Err(PricingError::InvalidInput("base_rate must be >= 0".into()));
    }
    if volatility_index < Decimal::ZERO || volatility_index > Decimal::from(100) {
        return Err(PricingError::InvalidInput(
            "volatility_index out of range [0, 100]".into(),
        ));
    }
    if event_risk < Decimal::ZERO || event_risk > Decimal::from(10) {
        return Err(PricingError::InvalidInput(
            "event_risk out of range [0, 10]".into(),
        ));
    }

    let volatility_term = base_rate * (Decimal::ONE + volatility_index * v_factor);
    let event_term = (event_risk / Decimal::from(10)) * e_factor;
    let raw = volatility_term + event_term;
    let clamped = raw.max(min_borrow_rate);
    Ok(round_half_up(clamped, RATE_SCALE))
}

/// Formula 2: base borrow cost, daily-prorated over a 360-day year.
pub fn borrow_cost(
    position_value: Decimal,
    adj_rate: Decimal,
    loan_days: u32,
) -> Result<Decimal, PricingError> {
    if position_value <= Decimal::ZERO {
        return Err(PricingError::InvalidInput(
            "position_value must be > 0".into(),
        ));
    }
    if loan_days == 0 || loan_days > 365 {
        return Err(PricingError::InvalidInput(
            "loan_days must be in [1, 365]".into(),
        ));
    }

    let proration = Decimal::from(loan_days) / year_days();
    Ok(position_value * adj_rate * proration)
}

/// Formula 3: markup, transaction fee, and total fee. Returns an unrounded
/// breakdown plus the rounded total; callers round each component to
/// `MONEY_SCALE` for display, but the invariant `total == borrow_cost +
/// markup + transaction_fees` is checked against the *rounded* values.
pub fn total_fee(
    borrow_cost: Decimal,
    markup_pct: Decimal,
    fee_type: FeeType,
    fee_amount: Decimal,
    position_value: Decimal,
) -> Result<(Decimal, FeeBreakdown), PricingError> {
    if markup_pct < Decimal::ZERO {
        return Err(PricingError::InvalidInput("markup_pct must be >= 0".into()));
    }
    if fee_amount < Decimal::ZERO {
        return Err(PricingError::InvalidInput("fee_amount must be >= 0".into()));
    }

    let markup = borrow_cost * markup_pct;
    let transaction_fee = match fee_type {
        FeeType::Flat => fee_amount,
        FeeType::Percentage => position_value * fee_amount,
    };

    let borrow_cost_r = round_half_up(borrow_cost, MONEY_SCALE);
    let markup_r = round_half_up(markup, MONEY_SCALE);
    let transaction_fee_r = round_half_up(transaction_fee, MONEY_SCALE);
    let total = round_half_up(borrow_cost_r + markup_r + transaction_fee_r, MONEY_SCALE);

    Ok((
        total,
        FeeBreakdown {
            borrow_cost: borrow_cost_r,
            markup: markup_r,
            transaction_fees: transaction_fee_r,
        },
    ))
}

pub fn parse_decimal(s: &str, field: &str) -> Result<Decimal, PricingError> {
    Decimal::from_str(s).map_err(|_| PricingError::InvalidInput(format!("invalid {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn baseline_scenario() {
        let adj = adjusted_rate(dec!(0.05), dec!(20.0), dec!(0), dec!(0), dec!(0.01), dec!(0.05))
            .unwrap();
        assert_eq!(adj, dec!(0.060000));

        let cost = borrow_cost(dec!(100000), adj, 30).unwrap();
        let (total, breakdown) =
            total_fee(cost, dec!(0.05), FeeType::Flat, dec!(25.00), dec!(100000)).unwrap();

        assert_eq!(breakdown.borrow_cost, dec!(500.0000));
        assert_eq!(breakdown.markup, dec!(25.0000));
        assert_eq!(breakdown.transaction_fees, dec!(25.0000));
        assert_eq!(total, dec!(550.0000));
    }

    #[test]
    fn high_volatility_event_risk_scenario() {
        let adj = adjusted_rate(dec!(0.10), dec!(30.0), dec!(5), dec!(0), dec!(0.01), dec!(0.05))
            .unwrap();
        assert_eq!(adj, dec!(0.155000));

        let cost = borrow_cost(dec!(100000), adj, 30).unwrap();
        let (total, breakdown) = total_fee(
            cost,
            dec!(0.10),
            FeeType::Percentage,
            dec!(0.0003),
            dec!(100000),
        )
        .unwrap();

        assert_eq!(breakdown.borrow_cost, dec!(1291.6667));
        assert_eq!(breakdown.markup, dec!(129.1667));
        assert_eq!(breakdown.transaction_fees, dec!(30.0000));
        assert_eq!(total, dec!(1450.8334));
    }

    #[test]
    fn fallback_ladder_scenario() {
        let adj = adjusted_rate(
            dec!(0.30),
            dec!(55.0),
            dec!(10),
            dec!(0.30),
            dec!(0.01),
            dec!(0.05),
        )
        .unwrap();
        assert_eq!(adj, dec!(0.515000));
    }

    #[test]
    fn rejects_invalid_inputs() {
        assert!(adjusted_rate(dec!(-1), dec!(0), dec!(0), dec!(0), dec!(0.01), dec!(0.05)).is_err());
        assert!(adjusted_rate(dec!(0.05), dec!(101), dec!(0), dec!(0), dec!(0.01), dec!(0.05))
            .is_err());
        assert!(borrow_cost(dec!(0), dec!(0.05), 30).is_err());
        assert!(borrow_cost(dec!(100), dec!(0.05), 0).is_err());
        assert!(borrow_cost(dec!(100), dec!(0.05), 366).is_err());
    }

    #[test]
    fn enforces_min_borrow_rate_floor() {
        let adj = adjusted_rate(dec!(0.01), dec!(0), dec!(0), dec!(0.30), dec!(0.01), dec!(0.05))
            .unwrap();
        assert_eq!(adj, dec!(0.300000));
    }

    #[test]
    fn boundary_position_values_do_not_overflow() {
        let adj = dec!(0.06);
        assert!(borrow_cost(dec!(1), adj, 1).is_ok());
        assert!(borrow_cost(dec!(1000000000), adj, 365).is_ok());
    }
}
