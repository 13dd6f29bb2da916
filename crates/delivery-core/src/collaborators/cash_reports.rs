//! Rider cash reports.
//!
//! Riders submit cash reports through a separate workflow; the core only
//! counts the ones still waiting for review.

use async_trait::async_trait;
use delivery_storage::{StorageError, StorageService};
use delivery_types::{CashReport, CashReportStatus, StorageKey};
use std::sync::Arc;

#[async_trait]
pub trait CashReportSource: Send + Sync {
	/// Number of reports in `pending` status, optionally for one city.
	async fn pending_count(&self, city_id: Option<&str>) -> Result<u64, StorageError>;
}

/// Reads cash reports from the storage service.
pub struct StorageCashReportSource {
	storage: Arc<StorageService>,
}

impl StorageCashReportSource {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}
}

#[async_trait]
impl CashReportSource for StorageCashReportSource {
	async fn pending_count(&self, city_id: Option<&str>) -> Result<u64, StorageError> {
		let listing = self
			.storage
			.list::<CashReport>(StorageKey::CashReports.as_str(), "")
			.await?;
		if !listing.is_complete() {
			return Err(StorageError::Serialization(format!(
				"{} unreadable cash reports",
				listing.skipped.len()
			)));
		}
		let count = listing
			.items
			.iter()
			.filter(|(_, report)| report.status == CashReportStatus::Pending)
			.filter(|(_, report)| match city_id {
				Some(city) => report.city_id.as_deref() == Some(city),
				None => true,
			})
			.count();
		Ok(count as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::storage;
	use delivery_types::current_time;

	fn report(id: &str, city: &str, status: CashReportStatus) -> CashReport {
		CashReport {
			id: id.into(),
			rider_id: "rider-1".into(),
			city_id: Some(city.into()),
			amount_cents: 5000,
			status,
			submitted_at: current_time(),
		}
	}

	#[tokio::test]
	async fn test_counts_pending_reports() {
		let storage = storage();
		let ns = StorageKey::CashReports.as_str();
		for r in [
			report("a", "lima", CashReportStatus::Pending),
			report("b", "lima", CashReportStatus::Approved),
			report("c", "cusco", CashReportStatus::Pending),
		] {
			storage.store(ns, &r.id.clone(), &r).await.unwrap();
		}
		let source = StorageCashReportSource::new(storage);
		assert_eq!(source.pending_count(None).await.unwrap(), 2);
		assert_eq!(source.pending_count(Some("lima")).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_unreadable_report_is_an_error() {
		let storage = storage();
		storage
			.store(StorageKey::CashReports.as_str(), "bad", &serde_json::json!({"id": 1}))
			.await
			.unwrap();
		let source = StorageCashReportSource::new(storage);
		assert!(source.pending_count(None).await.is_err());
	}
}
