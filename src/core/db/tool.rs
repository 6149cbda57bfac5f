use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub id: i64,
    pub name: String,
    pub serial_number: String,
    pub category: String,
    /// Detector class this tool is recognised as
    pub class_id: u32,
    #[serde(skip)]
    pub(super) _guard: (),
}

#[derive(Debug, Clone)]
pub struct NewTool {
    pub name: String,
    pub serial_number: String,
    pub category: String,
    pub class_id: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ToolUpdate {
    pub name: Option<String>,
    pub serial_number: Option<String>,
    pub category: Option<String>,
    pub class_id: Option<u32>,
}

pub trait ToolRepository {
    fn get_tools(&self) -> impl Future<Output = anyhow::Result<Vec<Tool>>>;
    fn get_tool_by_id(&self, id: i64) -> impl Future<Output = anyhow::Result<Option<Tool>>>;
    fn add_tool(&self, tool: &NewTool) -> impl Future<Output = anyhow::Result<Tool>>;
    fn update_tool(&self, tool: &Tool, update: &ToolUpdate) -> impl Future<Output = anyhow::Result<Tool>>;
    fn delete_tool(&self, tool: Tool) -> impl Future<Output = anyhow::Result<()>>;
}
