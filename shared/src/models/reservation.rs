//! Reservation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LedgerReference, PositionKey};

/// A hold against available quantity that does not move physical stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: PositionKey,
    pub quantity: Decimal,
    pub status: ReservationStatus,
    /// Document the hold was placed for, if any
    pub reference: Option<LedgerReference>,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new(
        key: PositionKey,
        quantity: Decimal,
        reference: Option<LedgerReference>,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            quantity,
            status: ReservationStatus::Active,
            reference,
            actor_id,
            created_at: now,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn close(&mut self, status: ReservationStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}

/// Reservation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
        }
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "released" => Ok(ReservationStatus::Released),
            "consumed" => Ok(ReservationStatus::Consumed),
            _ => Err("Unknown reservation status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_close_records_status_and_time() {
        let now = Utc::now();
        let key = PositionKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut reservation = Reservation::new(
            key,
            Decimal::from(3),
            None,
            Uuid::new_v4(),
            now - Duration::hours(2),
        );
        assert!(reservation.is_active());

        reservation.close(ReservationStatus::Released, now);
        assert!(!reservation.is_active());
        assert_eq!(reservation.closed_at, Some(now));
    }
}
