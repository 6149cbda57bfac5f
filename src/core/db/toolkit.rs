use serde::Serialize;

use crate::core::db::tool::Tool;
use crate::reconcile::ExpectedInventory;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toolkit {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip)]
    pub(super) _guard: (),
}

#[derive(Debug, Clone)]
pub struct NewToolkit {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolkitUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

/// One declared tool of a toolkit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolkitItem {
    pub id: i64,
    pub toolkit_id: i64,
    pub quantity: u32,
    pub tool: Tool,
    #[serde(skip)]
    pub(super) _guard: (),
}

pub trait ToolkitRepository {
    fn get_toolkits(&self) -> impl Future<Output = anyhow::Result<Vec<Toolkit>>>;
    fn get_toolkit(&self, id: i64) -> impl Future<Output = anyhow::Result<Option<Toolkit>>>;
    fn add_toolkit(&self, toolkit: &NewToolkit) -> impl Future<Output = anyhow::Result<Toolkit>>;
    fn update_toolkit(
        &self,
        toolkit: &Toolkit,
        update: &ToolkitUpdate,
    ) -> impl Future<Output = anyhow::Result<Toolkit>>;
    fn delete_toolkit(&self, toolkit: Toolkit) -> impl Future<Output = anyhow::Result<()>>;

    /// Items of a toolkit ordered by tool id
    fn get_items(&self, toolkit_id: i64) -> impl Future<Output = anyhow::Result<Vec<ToolkitItem>>>;
    /// Insert the tool into the toolkit, or replace its quantity if present
    fn set_item(
        &self,
        toolkit_id: i64,
        tool_id: i64,
        quantity: u32,
    ) -> impl Future<Output = anyhow::Result<ToolkitItem>>;
    fn remove_item(&self, toolkit_id: i64, item_id: i64) -> impl Future<Output = anyhow::Result<()>>;

    /// Expected class set of a toolkit; `None` if the toolkit does not exist
    fn expected_inventory(
        &self,
        toolkit_id: i64,
    ) -> impl Future<Output = anyhow::Result<Option<ExpectedInventory>>>;
}
