// src/analyzer.rs
//! Stock aggregation and expiry/low-stock alerting.
//!
//! Every function here is pure: callers pass the snapshot of medicines and
//! the reference instant on each call, nothing is cached between calls and
//! no input is mutated.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{Batch, MedicineWithBatches};

/// Batches expiring within this many days of `now` are flagged.
pub const EXPIRY_WARNING_DAYS: i64 = 45;

/// Batches expiring further out than this are never surfaced.
pub const ATTENTION_HORIZON_DAYS: i64 = 365;

const SECONDS_PER_DAY: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryClass {
    Expired,
    ExpiringSoon,
    Normal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpiryAlert {
    pub batch: Batch,
    pub medicine_id: String,
    pub medicine_name: String,
    pub classification: ExpiryClass,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MedicineStock {
    pub medicine_id: String,
    pub name: String,
    pub total_stock: i64,
    pub min_stock: i64,
    pub low_stock: bool,
}

impl From<&MedicineWithBatches> for MedicineStock {
    fn from(medicine: &MedicineWithBatches) -> Self {
        let total_stock = total_stock(medicine);
        Self {
            medicine_id: medicine.medicine.id.clone(),
            name: medicine.medicine.name.clone(),
            total_stock,
            min_stock: medicine.medicine.min_stock,
            low_stock: total_stock < medicine.medicine.min_stock,
        }
    }
}

/// The three derived views the dashboard renders.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StockReport {
    pub generated_at: DateTime<Utc>,
    pub total_stock: i64,
    pub totals: Vec<MedicineStock>,
    pub low_stock: Vec<MedicineStock>,
    pub expiry_alerts: Vec<ExpiryAlert>,
}

pub fn total_stock(medicine: &MedicineWithBatches) -> i64 {
    medicine
        .batches
        .iter()
        .fold(0i64, |acc, b| acc.saturating_add(b.quantity))
}

/// Strictly below the threshold: zero stock against a zero minimum is fine.
pub fn is_low_stock(medicine: &MedicineWithBatches) -> bool {
    total_stock(medicine) < medicine.medicine.min_stock
}

pub fn classify_batch_expiry(batch: &Batch, now: DateTime<Utc>) -> ExpiryClass {
    let Some(expiry) = batch.expiry_date else {
        return ExpiryClass::Normal;
    };

    // Exhausted batches carry no urgency whatever their date.
    if batch.quantity <= 0 {
        return ExpiryClass::Normal;
    }

    if expiry < now {
        return ExpiryClass::Expired;
    }

    if expiry > now + Duration::days(ATTENTION_HORIZON_DAYS) {
        return ExpiryClass::Normal;
    }

    if expiry <= now + Duration::days(EXPIRY_WARNING_DAYS) {
        ExpiryClass::ExpiringSoon
    } else {
        ExpiryClass::Normal
    }
}

/// Whole days until expiry, rounded up; negative once overdue.
pub fn days_until_expiry(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (expiry - now).num_seconds();
    if seconds > 0 {
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    } else {
        seconds / SECONDS_PER_DAY
    }
}

/// Expired batches first, then expiring ones, each group soonest date first.
pub fn build_expiry_alert_list(
    medicines: &[MedicineWithBatches],
    now: DateTime<Utc>,
) -> Vec<ExpiryAlert> {
    let mut alerts: Vec<ExpiryAlert> = medicines
        .iter()
        .flat_map(|m| m.batches.iter().map(move |b| (m, b)))
        .filter_map(|(medicine, batch)| {
            let classification = classify_batch_expiry(batch, now);
            if classification == ExpiryClass::Normal {
                return None;
            }
            let expiry = batch.expiry_date?;
            Some(ExpiryAlert {
                batch: batch.clone(),
                medicine_id: medicine.medicine.id.clone(),
                medicine_name: medicine.medicine.name.clone(),
                classification,
                days_until_expiry: days_until_expiry(expiry, now),
            })
        })
        .collect();

    alerts.sort_by(|a, b| {
        a.classification
            .cmp(&b.classification)
            .then_with(|| a.batch.expiry_date.cmp(&b.batch.expiry_date))
    });
    alerts
}

pub fn build_low_stock_list(medicines: &[MedicineWithBatches]) -> Vec<&MedicineWithBatches> {
    medicines.iter().filter(|m| is_low_stock(m)).collect()
}

pub fn build_stock_report(medicines: &[MedicineWithBatches], now: DateTime<Utc>) -> StockReport {
    let totals: Vec<MedicineStock> = medicines.iter().map(MedicineStock::from).collect();
    let low_stock = totals.iter().filter(|t| t.low_stock).cloned().collect();

    StockReport {
        generated_at: now,
        total_stock: totals.iter().fold(0i64, |acc, t| acc.saturating_add(t.total_stock)),
        totals,
        low_stock,
        expiry_alerts: build_expiry_alert_list(medicines, now),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::Medicine;
    use chrono::TimeZone;

    pub fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 9, 30, 0).unwrap()
    }

    pub fn batch(id: &str, quantity: i64, expiry: Option<DateTime<Utc>>) -> Batch {
        let now = fixed_now();
        Batch {
            id: id.to_string(),
            medicine_id: "med".to_string(),
            batch_number: format!("LOT-{}", id),
            quantity,
            purchase_price: 1.0,
            sell_price: 2.0,
            manufacturing_date: None,
            expiry_date: expiry,
            received_date: Some(now),
            supplier_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn medicine(id: &str, name: &str, min_stock: i64, batches: Vec<Batch>) -> MedicineWithBatches {
        let now = fixed_now();
        MedicineWithBatches {
            medicine: Medicine {
                id: id.to_string(),
                name: name.to_string(),
                generic_name: None,
                dosage: None,
                form: None,
                category: None,
                min_stock,
                created_at: now,
                updated_at: now,
            },
            batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn in_days(days: i64) -> Option<DateTime<Utc>> {
        Some(fixed_now() + Duration::days(days))
    }

    #[test]
    fn test_total_stock_sums_batches() {
        let empty = medicine("m0", "Empty", 10, vec![]);
        assert_eq!(total_stock(&empty), 0);

        let stocked = medicine(
            "m1",
            "Amoxicillin",
            10,
            vec![batch("a", 12, None), batch("b", 0, in_days(3)), batch("c", 30, in_days(90))],
        );
        assert_eq!(total_stock(&stocked), 42);
    }

    #[test]
    fn test_total_stock_saturates() {
        let huge = medicine(
            "m1",
            "Saline",
            10,
            vec![batch("a", i64::MAX, None), batch("b", 1, None)],
        );
        assert_eq!(total_stock(&huge), i64::MAX);
        assert!(!is_low_stock(&huge));

        let report = build_stock_report(&[huge.clone(), huge], fixed_now());
        assert_eq!(report.total_stock, i64::MAX);
    }

    #[test]
    fn test_paracetamol_below_minimum() {
        let paracetamol = medicine("m1", "Paracetamol", 50, vec![batch("p1", 30, in_days(200))]);
        assert_eq!(total_stock(&paracetamol), 30);
        assert!(is_low_stock(&paracetamol));
    }

    #[test]
    fn test_low_stock_is_strict() {
        assert!(!is_low_stock(&medicine("m", "Saline", 0, vec![])));
        assert!(!is_low_stock(&medicine("m", "Saline", 5, vec![batch("s", 5, None)])));
        assert!(!is_low_stock(&medicine("m", "Saline", 5, vec![batch("s", 6, None)])));
        assert!(is_low_stock(&medicine("m", "Saline", 5, vec![batch("s", 4, None)])));
    }

    #[test]
    fn test_expiry_window_boundaries() {
        let now = fixed_now();
        assert_eq!(classify_batch_expiry(&batch("b", 10, in_days(45)), now), ExpiryClass::ExpiringSoon);
        assert_eq!(classify_batch_expiry(&batch("b", 10, in_days(46)), now), ExpiryClass::Normal);
        assert_eq!(classify_batch_expiry(&batch("b", 10, in_days(0)), now), ExpiryClass::ExpiringSoon);
        assert_eq!(classify_batch_expiry(&batch("b", 10, in_days(-1)), now), ExpiryClass::Expired);
        assert_eq!(
            classify_batch_expiry(&batch("b", 10, Some(now - Duration::seconds(1))), now),
            ExpiryClass::Expired
        );
    }

    #[test]
    fn test_empty_or_undated_batches_never_alert() {
        let now = fixed_now();
        for days in [-400, -1, 0, 10, 45] {
            assert_eq!(classify_batch_expiry(&batch("b", 0, in_days(days)), now), ExpiryClass::Normal);
        }
        assert_eq!(classify_batch_expiry(&batch("b", 25, None), now), ExpiryClass::Normal);
    }

    #[test]
    fn test_far_future_batch_excluded() {
        let now = fixed_now();
        let far = batch("far", 10, in_days(400));
        assert_eq!(classify_batch_expiry(&far, now), ExpiryClass::Normal);

        let meds = vec![medicine("m", "Vitamin C", 1, vec![far])];
        assert!(build_expiry_alert_list(&meds, now).is_empty());
    }

    #[test]
    fn test_alert_list_ordering() {
        let now = fixed_now();
        let meds = vec![
            medicine(
                "m1",
                "Ibuprofen",
                10,
                vec![batch("i1", 5, in_days(30)), batch("i2", 5, in_days(-2)), batch("i3", 5, in_days(100))],
            ),
            medicine(
                "m2",
                "Cetirizine",
                10,
                vec![batch("c1", 5, in_days(-20)), batch("c2", 5, in_days(2)), batch("c3", 0, in_days(-5))],
            ),
        ];

        let alerts = build_expiry_alert_list(&meds, now);
        let ids: Vec<&str> = alerts.iter().map(|a| a.batch.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "i2", "c2", "i1"]);

        let first_soon = alerts
            .iter()
            .position(|a| a.classification == ExpiryClass::ExpiringSoon)
            .unwrap();
        assert!(alerts[..first_soon].iter().all(|a| a.classification == ExpiryClass::Expired));
        assert!(alerts[first_soon..].iter().all(|a| a.classification == ExpiryClass::ExpiringSoon));
        for pair in alerts[..first_soon].windows(2).chain(alerts[first_soon..].windows(2)) {
            assert!(pair[0].batch.expiry_date <= pair[1].batch.expiry_date);
        }

        assert_eq!(alerts[0].medicine_name, "Cetirizine");
        assert_eq!(alerts[0].days_until_expiry, -20);
        assert_eq!(alerts[3].days_until_expiry, 30);
    }

    #[test]
    fn test_days_until_expiry_rounds_up() {
        let now = fixed_now();
        assert_eq!(days_until_expiry(now + Duration::hours(1), now), 1);
        assert_eq!(days_until_expiry(now + Duration::days(2), now), 2);
        assert_eq!(days_until_expiry(now, now), 0);
        assert_eq!(days_until_expiry(now - Duration::hours(30), now), -1);
    }

    #[test]
    fn test_low_stock_list_keeps_input_order() {
        let meds = vec![
            medicine("m1", "Zinc", 10, vec![batch("z", 1, None)]),
            medicine("m2", "Aspirin", 10, vec![batch("a", 50, None)]),
            medicine("m3", "Betadine", 10, vec![]),
        ];
        let low: Vec<&str> = build_low_stock_list(&meds)
            .into_iter()
            .map(|m| m.medicine.name.as_str())
            .collect();
        assert_eq!(low, vec!["Zinc", "Betadine"]);
    }

    #[test]
    fn test_stock_report_bundles_views() {
        let now = fixed_now();
        let meds = vec![
            medicine("m1", "Paracetamol", 50, vec![batch("p1", 30, in_days(10))]),
            medicine("m2", "Omeprazole", 5, vec![batch("o1", 8, in_days(300)), batch("o2", 4, in_days(-1))]),
        ];

        let report = build_stock_report(&meds, now);
        assert_eq!(report.generated_at, now);
        assert_eq!(report.total_stock, 42);
        assert_eq!(report.totals.len(), 2);
        assert_eq!(report.totals[1].total_stock, 12);
        assert_eq!(report.low_stock.len(), 1);
        assert_eq!(report.low_stock[0].name, "Paracetamol");
        assert_eq!(report.expiry_alerts.len(), 2);
        assert_eq!(report.expiry_alerts[0].batch.id, "o2");

        // Recomputed from scratch on each call.
        assert_eq!(build_stock_report(&meds, now), report);
    }

    #[test]
    fn test_serialized_classification() {
        assert_eq!(serde_json::to_string(&ExpiryClass::ExpiringSoon).unwrap(), "\"expiring_soon\"");
    }
}
