use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

/// A decimal amount as printed on a receipt.
///
/// Values are kept exactly as extracted; nothing is rounded on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn amount(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a money amount: '{0}'")]
pub struct ParseMoneyError(pub String);

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Accepts `3.50`, `$3.50`, `1,234.56` and a leading minus sign.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let clean: String = rest
            .trim_start_matches('$')
            .chars()
            .filter(|c| *c != ',')
            .collect();
        let dec = Decimal::from_str(&clean).map_err(|_| ParseMoneyError(s.to_string()))?;
        Ok(Money(if negative { -dec } else { dec }))
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_dollar_amounts() {
        assert_eq!("3.50".parse::<Money>().unwrap(), Money::from_cents(350));
        assert_eq!("$2.25".parse::<Money>().unwrap(), Money::from_cents(225));
        assert_eq!("1,234.56".parse::<Money>().unwrap(), Money::from_cents(123456));
        assert_eq!("-0.99".parse::<Money>().unwrap(), Money::from_cents(-99));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("abc".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn parse_keeps_extra_precision() {
        let m: Money = "0.125".parse().unwrap();
        assert_eq!(m.amount(), Decimal::new(125, 3));
    }

    #[test]
    fn display_two_places() {
        assert_eq!(Money::from_cents(350).to_string(), "$3.50");
        assert_eq!(Money::new(Decimal::from(2)).to_string(), "$2.00");
    }

    #[test]
    fn sum_of_items() {
        let total: Money = [Money::from_cents(350), Money::from_cents(225)].into_iter().sum();
        assert_eq!(total, Money::from_cents(575));
        assert_eq!(std::iter::empty::<Money>().sum::<Money>(), Money::zero());
        let precise: Money = ["1.239".parse::<Money>().unwrap(), Money::from_cents(1)].into_iter().sum();
        assert_eq!(precise.amount().to_string(), "1.249");
    }
}
