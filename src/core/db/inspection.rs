use serde::Serialize;
use time::OffsetDateTime;

use crate::core::db::model::InspectionStatus;

/// Stored outcome of one reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct InspectionRecord {
    pub id: i64,
    pub toolkit_id: i64,
    pub status: InspectionStatus,
    pub found_class_ids: Vec<u32>,
    pub image_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub(super) _guard: (),
}

#[derive(Debug, Clone)]
pub struct NewInspectionRecord {
    pub toolkit_id: i64,
    pub status: InspectionStatus,
    pub found_class_ids: Vec<u32>,
    pub image_ref: Option<String>,
}

pub trait InspectionRepository {
    fn record_inspection(
        &self,
        record: &NewInspectionRecord,
    ) -> impl Future<Output = anyhow::Result<InspectionRecord>>;
    /// Newest first
    fn get_inspections(&self, toolkit_id: i64) -> impl Future<Output = anyhow::Result<Vec<InspectionRecord>>>;
}
