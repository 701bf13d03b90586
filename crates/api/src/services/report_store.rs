//! In-memory registry of report definitions, keyed by user and dashboard.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use domain::models::{SharedReport, UserKey};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

type DashboardKey = (UserKey, i32);
type DashboardReports = Arc<Mutex<BTreeMap<i32, SharedReport>>>;

/// Report definitions of every dashboard, ordered by report id.
///
/// Each dashboard has its own lock; the outer map is only locked to find or
/// create a dashboard entry. Entries are never removed, so a guard always
/// points at the live map for its key.
#[derive(Default)]
pub struct ReportStore {
    dashboards: RwLock<HashMap<DashboardKey, DashboardReports>>,
}

/// Exclusive access to one dashboard's reports.
///
/// Held across the check and the scheduler call of a mutation so two writers
/// to the same dashboard cannot interleave. Other dashboards stay available.
pub struct DashboardGuard {
    reports: OwnedMutexGuard<BTreeMap<i32, SharedReport>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn reports(&self, user: &UserKey, dashboard_id: i32) -> Option<DashboardReports> {
        let dashboards = self.dashboards.read().await;
        dashboards.get(&(user.clone(), dashboard_id)).cloned()
    }

    pub async fn get(&self, user: &UserKey, dashboard_id: i32, report_id: i32) -> Option<SharedReport> {
        let reports = self.reports(user, dashboard_id).await?;
        let reports = reports.lock().await;
        reports.get(&report_id).cloned()
    }

    /// All reports of a dashboard in id order.
    pub async fn list(&self, user: &UserKey, dashboard_id: i32) -> Vec<SharedReport> {
        let Some(reports) = self.reports(user, dashboard_id).await else {
            return Vec::new();
        };
        let reports = reports.lock().await;
        reports.values().cloned().collect()
    }

    /// Number of reports across every dashboard.
    pub async fn len(&self) -> usize {
        let all: Vec<DashboardReports> = self.dashboards.read().await.values().cloned().collect();
        let mut total = 0;
        for reports in all {
            total += reports.lock().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Locks one dashboard for a mutation.
    pub async fn dashboard(&self, user: &UserKey, dashboard_id: i32) -> DashboardGuard {
        let reports = match self.reports(user, dashboard_id).await {
            Some(reports) => reports,
            None => {
                let mut dashboards = self.dashboards.write().await;
                Arc::clone(dashboards.entry((user.clone(), dashboard_id)).or_default())
            }
        };
        DashboardGuard {
            reports: reports.lock_owned().await,
        }
    }
}

impl DashboardGuard {
    pub fn get(&self, report_id: i32) -> Option<&SharedReport> {
        self.reports.get(&report_id)
    }

    pub fn contains(&self, report_id: i32) -> bool {
        self.reports.contains_key(&report_id)
    }

    /// Stores `report` under `report_id`, returning the definition it replaced.
    pub fn insert(&mut self, report_id: i32, report: SharedReport) -> Option<SharedReport> {
        self.reports.insert(report_id, report)
    }

    pub fn remove(&mut self, report_id: i32) -> Option<SharedReport> {
        self.reports.remove(&report_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{Report, ReportPeriod};
    use std::time::Duration;

    fn report(id: i32) -> SharedReport {
        let json = format!(
            r#"{{"id":{},"name":"r{}","recipients":"a@b.com","reportType":{{"type":"ONE_TIME","rangeMillis":1000}}}}"#,
            id, id
        );
        let report: Report = serde_json::from_str(&json).unwrap();
        assert!(matches!(report.report_type, ReportPeriod::OneTime { .. }));
        report.into_shared()
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = ReportStore::new();
        let user = UserKey::new("a@b.com", "Blynk");

        {
            let mut dashboard = store.dashboard(&user, 1).await;
            assert!(dashboard.insert(2, report(2)).is_none());
            assert!(dashboard.insert(1, report(1)).is_none());
            assert!(dashboard.contains(1));
        }

        assert!(store.get(&user, 1, 2).await.is_some());
        assert!(store.get(&user, 2, 2).await.is_none());
        assert_eq!(store.len().await, 2);

        let mut ids = Vec::new();
        for shared in store.list(&user, 1).await {
            ids.push(shared.read().await.id);
        }
        assert_eq!(ids, vec![1, 2]);

        {
            let mut dashboard = store.dashboard(&user, 1).await;
            assert!(dashboard.remove(1).is_some());
            assert!(dashboard.remove(1).is_none());
            assert!(dashboard.remove(2).is_some());
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_dashboards_are_isolated_per_user() {
        let store = ReportStore::new();
        let alice = UserKey::new("alice@b.com", "Blynk");
        let bob = UserKey::new("bob@b.com", "Blynk");

        store.dashboard(&alice, 1).await.insert(1, report(1));

        assert!(store.get(&alice, 1, 1).await.is_some());
        assert!(store.get(&bob, 1, 1).await.is_none());
        assert!(store.list(&bob, 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_locked_dashboard_does_not_block_others() {
        let store = ReportStore::new();
        let alice = UserKey::new("alice@b.com", "Blynk");
        let bob = UserKey::new("bob@b.com", "Blynk");
        store.dashboard(&alice, 2).await.insert(1, report(1));
        store.dashboard(&bob, 1).await.insert(1, report(1));

        let _held = store.dashboard(&alice, 1).await;
        let wait = Duration::from_millis(200);

        let other_dashboard = tokio::time::timeout(wait, store.get(&alice, 2, 1)).await;
        assert!(other_dashboard.unwrap().is_some());
        let other_user = tokio::time::timeout(wait, store.list(&bob, 1)).await;
        assert_eq!(other_user.unwrap().len(), 1);
        let other_writer = tokio::time::timeout(wait, store.dashboard(&bob, 2)).await;
        assert!(other_writer.is_ok());

        let same_dashboard = tokio::time::timeout(wait, store.get(&alice, 1, 1)).await;
        assert!(same_dashboard.is_err());
    }
}
