use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// -- Roles --

/// Closed set of account roles. Parsed at every boundary that mutates a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Seller => "seller",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Invalid role. Must be: user, seller, or admin")]
pub struct UnknownRole;

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "seller" => Ok(Self::Seller),
            "admin" => Ok(Self::Admin),
            _ => Err(UnknownRole),
        }
    }
}

// -- Transaction status --

/// Lifecycle of an escrow transaction.
///
/// `pending_payment -> pending_delivery -> completed`, with `failed` reachable
/// from either pending state. `disputed` is carried as a data shape only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    PendingPayment,
    PendingDelivery,
    Completed,
    Failed,
    Disputed,
}

impl TransactionStatus {
    pub const ALL: [Self; 5] = [
        Self::PendingPayment,
        Self::PendingDelivery,
        Self::Completed,
        Self::Failed,
        Self::Disputed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::PendingDelivery => "pending_delivery",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disputed => "disputed",
        }
    }

    /// No transition is permitted out of a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown transaction status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(Self::PendingPayment),
            "pending_delivery" => Ok(Self::PendingDelivery),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "disputed" => Ok(Self::Disputed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// -- Money --

/// A monetary amount with exactly two decimal places, held as integer cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("amount is empty")]
    Empty,
    #[error("amount is not a decimal number")]
    Malformed,
    #[error("amount has more than two decimal places")]
    TooPrecise,
    #[error("amount is out of range")]
    Overflow,
}

impl Amount {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) || (digits.contains('.') && frac.is_empty()) {
            return Err(AmountParseError::Malformed);
        }
        if frac.len() > 2 {
            return Err(AmountParseError::TooPrecise);
        }

        let whole: i64 = whole.parse().map_err(|_| AmountParseError::Overflow)?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| AmountParseError::Malformed)? * 10,
            _ => frac.parse().map_err(|_| AmountParseError::Malformed)?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or(AmountParseError::Overflow)?;

        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Clients send either "100.00" or 100.0
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Integer(i64),
            Float(f64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Integer(i) => i.to_string(),
            Raw::Float(f) => f.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parses_two_decimal_places() {
        assert_eq!("100.00".parse::<Amount>().unwrap(), Amount::from_cents(10_000));
        assert_eq!("0.5".parse::<Amount>().unwrap(), Amount::from_cents(50));
        assert_eq!("12".parse::<Amount>().unwrap(), Amount::from_cents(1_200));
        assert_eq!("-3.10".parse::<Amount>().unwrap(), Amount::from_cents(-310));
    }

    #[test]
    fn amount_rejects_bad_input() {
        assert_eq!("".parse::<Amount>(), Err(AmountParseError::Empty));
        assert_eq!("1.234".parse::<Amount>(), Err(AmountParseError::TooPrecise));
        assert_eq!("abc".parse::<Amount>(), Err(AmountParseError::Malformed));
        assert_eq!("1.".parse::<Amount>(), Err(AmountParseError::Malformed));
        assert_eq!("1e5".parse::<Amount>(), Err(AmountParseError::Malformed));
    }

    #[test]
    fn amount_displays_with_cents() {
        assert_eq!(Amount::from_cents(10_000).to_string(), "100.00");
        assert_eq!(Amount::from_cents(7).to_string(), "0.07");
        assert_eq!(Amount::from_cents(-150).to_string(), "-1.50");
    }

    #[test]
    fn amount_deserializes_from_number_or_string() {
        let a: Amount = serde_json::from_str("100.5").unwrap();
        assert_eq!(a.cents(), 10_050);
        let b: Amount = serde_json::from_str("\"42.00\"").unwrap();
        assert_eq!(b.cents(), 4_200);
        let c: Amount = serde_json::from_str("7").unwrap();
        assert_eq!(c.cents(), 700);
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"42.00\"");
    }

    #[test]
    fn role_is_a_closed_set() {
        assert_eq!("seller".parse::<Role>().unwrap(), Role::Seller);
        assert!("superuser".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::PendingPayment.is_terminal());
        assert!(!TransactionStatus::Disputed.is_terminal());
    }
}
