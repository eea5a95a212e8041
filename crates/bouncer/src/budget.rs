//! Budget ledgers: cost windows and call rates per identity.
//!
//! Session spend is bound to the instance and lives as long as the engine;
//! daily and monthly spend are bound to `(org, asset)` and roll at UTC
//! wall-clock boundaries; calls-per-minute is a fixed window per instance.
//! All accounting for one check happens under a single short lock so two
//! concurrent calls can never both squeeze past a cap.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use aigos_identity::types::CapabilitiesManifest;

/// Warning threshold as a fraction of the cap.
pub const WARN_RATIO: f64 = 0.8;

/// Which cap a denial or warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindowKind {
    Session,
    Daily,
    Monthly,
    CallsPerMinute,
}

/// A cap that would be exceeded by this charge.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetDenial {
    pub kind: BudgetWindowKind,
    pub cap: f64,
    pub attempted: f64,
}

/// An 80% threshold crossing produced by a successful charge.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetWarning {
    pub kind: BudgetWindowKind,
    pub cap: f64,
    pub spent: f64,
}

/// Successful charge outcome.
#[derive(Debug, Clone, Default)]
pub struct BudgetCharge {
    pub warnings: Vec<BudgetWarning>,
}

#[derive(Debug, Clone, Copy)]
struct DayWindow {
    day: NaiveDate,
    spent: f64,
}

#[derive(Debug, Clone, Copy)]
struct MonthWindow {
    year: i32,
    month: u32,
    spent: f64,
}

#[derive(Debug, Clone, Copy)]
struct MinuteWindow {
    started_at: DateTime<Utc>,
    count: u32,
}

#[derive(Debug, Default)]
struct Inner {
    session: HashMap<Uuid, f64>,
    daily: HashMap<(String, String), DayWindow>,
    monthly: HashMap<(String, String), MonthWindow>,
    calls: HashMap<Uuid, MinuteWindow>,
}

/// Keys identifying whose budgets a charge lands on.
#[derive(Debug, Clone)]
pub struct BudgetKeys {
    pub instance_id: Uuid,
    pub org_id: String,
    pub asset_id: String,
}

/// The shared budget ledger.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    inner: Mutex<Inner>,
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically admit-and-record one call costing `cost`. Rejection
    /// leaves every window untouched.
    pub fn try_charge(
        &self,
        keys: &BudgetKeys,
        manifest: &CapabilitiesManifest,
        cost: f64,
    ) -> Result<BudgetCharge, BudgetDenial> {
        self.try_charge_at(keys, manifest, cost, Utc::now())
    }

    /// Clock-injected variant for tests.
    pub fn try_charge_at(
        &self,
        keys: &BudgetKeys,
        manifest: &CapabilitiesManifest,
        cost: f64,
        now: DateTime<Utc>,
    ) -> Result<BudgetCharge, BudgetDenial> {
        let mut inner = self.inner.lock();
        let org_asset = (keys.org_id.clone(), keys.asset_id.clone());

        // Roll stale windows lazily before reading them.
        let session_spent = *inner.session.get(&keys.instance_id).unwrap_or(&0.0);

        let today = now.date_naive();
        let daily_spent = match inner.daily.get(&org_asset) {
            Some(w) if w.day == today => w.spent,
            _ => 0.0,
        };
        let monthly_spent = match inner.monthly.get(&org_asset) {
            Some(w) if w.year == now.year() && w.month == now.month() => w.spent,
            _ => 0.0,
        };
        let call_count = match inner.calls.get(&keys.instance_id) {
            Some(w) if now - w.started_at < Duration::seconds(60) => w.count,
            _ => 0,
        };

        if call_count + 1 > manifest.max_calls_per_minute {
            return Err(BudgetDenial {
                kind: BudgetWindowKind::CallsPerMinute,
                cap: manifest.max_calls_per_minute as f64,
                attempted: (call_count + 1) as f64,
            });
        }
        if session_spent + cost > manifest.max_cost_per_session {
            return Err(BudgetDenial {
                kind: BudgetWindowKind::Session,
                cap: manifest.max_cost_per_session,
                attempted: session_spent + cost,
            });
        }
        if daily_spent + cost > manifest.max_cost_per_day {
            return Err(BudgetDenial {
                kind: BudgetWindowKind::Daily,
                cap: manifest.max_cost_per_day,
                attempted: daily_spent + cost,
            });
        }
        if monthly_spent + cost > manifest.max_cost_per_month {
            return Err(BudgetDenial {
                kind: BudgetWindowKind::Monthly,
                cap: manifest.max_cost_per_month,
                attempted: monthly_spent + cost,
            });
        }

        // Commit.
        inner.session.insert(keys.instance_id, session_spent + cost);
        inner.daily.insert(
            org_asset.clone(),
            DayWindow { day: today, spent: daily_spent + cost },
        );
        inner.monthly.insert(
            org_asset,
            MonthWindow {
                year: now.year(),
                month: now.month(),
                spent: monthly_spent + cost,
            },
        );
        let window = inner.calls.entry(keys.instance_id).or_insert(MinuteWindow {
            started_at: now,
            count: 0,
        });
        if now - window.started_at >= Duration::seconds(60) {
            window.started_at = now;
            window.count = 0;
        }
        window.count += 1;

        // 80% crossings, reported once per window per cap.
        let mut warnings = Vec::new();
        let mut warn = |kind, cap: f64, before: f64, after: f64| {
            if cap > 0.0 && before < cap * WARN_RATIO && after >= cap * WARN_RATIO {
                warnings.push(BudgetWarning { kind, cap, spent: after });
            }
        };
        warn(BudgetWindowKind::Session, manifest.max_cost_per_session, session_spent, session_spent + cost);
        warn(BudgetWindowKind::Daily, manifest.max_cost_per_day, daily_spent, daily_spent + cost);
        warn(BudgetWindowKind::Monthly, manifest.max_cost_per_month, monthly_spent, monthly_spent + cost);

        Ok(BudgetCharge { warnings })
    }

    /// Session spend for one instance. Observability hook.
    pub fn session_spent(&self, instance_id: Uuid) -> f64 {
        *self.inner.lock().session.get(&instance_id).unwrap_or(&0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> CapabilitiesManifest {
        CapabilitiesManifest {
            max_cost_per_session: 10.0,
            max_cost_per_day: 20.0,
            max_cost_per_month: 50.0,
            max_calls_per_minute: 3,
            ..Default::default()
        }
    }

    fn keys() -> BudgetKeys {
        BudgetKeys {
            instance_id: Uuid::new_v4(),
            org_id: "acme".to_string(),
            asset_id: "acme/bot".to_string(),
        }
    }

    #[test]
    fn test_session_cap_enforced() {
        let ledger = BudgetLedger::new();
        let k = keys();
        let m = manifest();
        let now = Utc::now();

        assert!(ledger.try_charge_at(&k, &m, 6.0, now).is_ok());
        let denial = ledger.try_charge_at(&k, &m, 6.0, now).unwrap_err();
        assert_eq!(denial.kind, BudgetWindowKind::Session);
        // Rejection did not consume budget.
        assert_eq!(ledger.session_spent(k.instance_id), 6.0);
    }

    #[test]
    fn test_calls_per_minute_window() {
        let ledger = BudgetLedger::new();
        let k = keys();
        let m = manifest();
        let now = Utc::now();

        for _ in 0..3 {
            assert!(ledger.try_charge_at(&k, &m, 0.0, now).is_ok());
        }
        let denial = ledger.try_charge_at(&k, &m, 0.0, now).unwrap_err();
        assert_eq!(denial.kind, BudgetWindowKind::CallsPerMinute);

        // A minute later the window rolled.
        assert!(ledger
            .try_charge_at(&k, &m, 0.0, now + Duration::seconds(61))
            .is_ok());
    }

    #[test]
    fn test_daily_rolls_at_utc_boundary() {
        let ledger = BudgetLedger::new();
        let k = keys();
        let m = manifest();
        let day1 = "2026-03-01T23:50:00Z".parse().unwrap();
        let day2 = "2026-03-02T00:10:00Z".parse().unwrap();

        // Two sessions' worth on day one reaches the daily cap.
        assert!(ledger.try_charge_at(&k, &m, 10.0, day1).is_ok());
        let k2 = BudgetKeys { instance_id: Uuid::new_v4(), ..k.clone() };
        assert!(ledger.try_charge_at(&k2, &m, 10.0, day1).is_ok());
        let k3 = BudgetKeys { instance_id: Uuid::new_v4(), ..k.clone() };
        let denial = ledger.try_charge_at(&k3, &m, 1.0, day1).unwrap_err();
        assert_eq!(denial.kind, BudgetWindowKind::Daily);

        // Past midnight UTC the daily window resets; monthly keeps counting.
        assert!(ledger.try_charge_at(&k3, &m, 1.0, day2).is_ok());
    }

    #[test]
    fn test_monthly_cap_spans_days() {
        let ledger = BudgetLedger::new();
        let m = manifest();
        let mut day = "2026-03-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();

        // 20/day for two days reaches 40 of the 50 monthly cap.
        for _ in 0..2 {
            let k = keys();
            assert!(ledger.try_charge_at(&k, &m, 10.0, day).is_ok());
            let k2 = BudgetKeys { instance_id: Uuid::new_v4(), ..k };
            assert!(ledger.try_charge_at(&k2, &m, 10.0, day).is_ok());
            day += Duration::days(1);
        }
        // Day three: 10 more lands exactly on the monthly cap...
        let k = keys();
        assert!(ledger.try_charge_at(&k, &m, 10.0, day).is_ok());
        // ...and the next charge crosses it, within session and daily room.
        let k2 = BudgetKeys { instance_id: Uuid::new_v4(), ..k };
        let denial = ledger.try_charge_at(&k2, &m, 1.0, day).unwrap_err();
        assert_eq!(denial.kind, BudgetWindowKind::Monthly);
    }

    #[test]
    fn test_warning_fires_once_at_80_percent() {
        let ledger = BudgetLedger::new();
        let k = keys();
        let m = manifest();
        let now = Utc::now();

        let charge = ledger.try_charge_at(&k, &m, 7.0, now).unwrap();
        assert!(charge.warnings.is_empty());

        // 7 -> 8.5 crosses 80% of the 10.0 session cap.
        let charge = ledger.try_charge_at(&k, &m, 1.5, now).unwrap();
        assert!(charge
            .warnings
            .iter()
            .any(|w| w.kind == BudgetWindowKind::Session));

        // Already past the threshold; no duplicate warning.
        let charge = ledger.try_charge_at(&k, &m, 0.5, now).unwrap();
        assert!(charge.warnings.is_empty());
    }
}
