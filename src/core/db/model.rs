use serde::Serialize;

/// Outcome stored with each inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    Ok,
    ManualCheck,
}

impl InspectionStatus {
    pub fn from_manual_review(manual_review: bool) -> Self {
        if manual_review {
            InspectionStatus::ManualCheck
        } else {
            InspectionStatus::Ok
        }
    }
}

impl TryFrom<&str> for InspectionStatus {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "ok" => Ok(InspectionStatus::Ok),
            "manual_check" => Ok(InspectionStatus::ManualCheck),
            _ => Err(anyhow::anyhow!("Invalid InspectionStatus value: {}", value)),
        }
    }
}

impl From<InspectionStatus> for &'static str {
    fn from(status: InspectionStatus) -> Self {
        match status {
            InspectionStatus::Ok => "ok",
            InspectionStatus::ManualCheck => "manual_check",
        }
    }
}
