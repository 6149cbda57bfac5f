mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from kitcheck for tests
pub use kitcheck::core::db::{
    InspectionRecord, InspectionRepository, InspectionStatus, InventoryDb, NewInspectionRecord,
    NewTool, NewToolkit, Tool, ToolRepository, ToolUpdate, Toolkit, ToolkitItem, ToolkitRepository,
    ToolkitUpdate,
};
pub use kitcheck::{
    BatchOrchestrator, CheckError, Detection, DetectorPool, ExpectedInventory, ImageInput,
    ItemOutcome, ThresholdMap, ToolClass,
};
