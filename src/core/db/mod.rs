mod inspection;
mod model;
mod state;
mod tool;
mod toolkit;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use sqlx::FromRow;
use state::DbState;
use time::OffsetDateTime;

pub use inspection::{InspectionRecord, InspectionRepository, NewInspectionRecord};
pub use model::InspectionStatus;
pub use tool::{NewTool, Tool, ToolRepository, ToolUpdate};
pub use toolkit::{NewToolkit, Toolkit, ToolkitItem, ToolkitRepository, ToolkitUpdate};

use crate::models::ToolClass;
use crate::reconcile::ExpectedInventory;

/// SQLite-backed store of tools, toolkits and inspection history
#[derive(Debug, Clone)]
pub struct InventoryDb {
    state: Arc<DbState>,
}

impl InventoryDb {
    pub async fn open<P: AsRef<Path>>(db_file: P) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(DbState::new(db_file).await?),
        })
    }

    pub fn db_file(&self) -> &Path {
        self.state.db_file()
    }

    pub async fn close(&self) {
        self.state.close().await;
    }

    /// Insert one tool per known class and a toolkit holding all of them.
    ///
    /// Does nothing if any toolkit already exists. Returns the toolkit id
    /// when one was created.
    pub async fn seed_default_catalog(&self) -> anyhow::Result<Option<i64>> {
        if !self.get_toolkits().await?.is_empty() {
            return Ok(None);
        }

        let toolkit = self
            .add_toolkit(&NewToolkit {
                name: "Standard toolkit".to_string(),
                description: Some("One of every recognised tool".to_string()),
            })
            .await?;

        for class in ToolClass::ALL {
            let tool = self
                .add_tool(&NewTool {
                    name: class.display_name().to_string(),
                    serial_number: format!("SN{:03}", class.id()),
                    category: "hand_tools".to_string(),
                    class_id: class.id(),
                })
                .await?;
            self.set_item(toolkit.id, tool.id, 1).await?;
        }

        tracing::info!(toolkit_id = toolkit.id, tools = ToolClass::COUNT, "seeded default catalog");
        Ok(Some(toolkit.id))
    }
}

#[derive(FromRow)]
struct ToolRow {
    id: i64,
    name: String,
    serial_number: String,
    category: String,
    class_id: i64,
}

impl TryFrom<ToolRow> for Tool {
    type Error = anyhow::Error;

    fn try_from(row: ToolRow) -> Result<Self, Self::Error> {
        Ok(Tool {
            id: row.id,
            name: row.name,
            serial_number: row.serial_number,
            category: row.category,
            class_id: u32::try_from(row.class_id)
                .with_context(|| format!("Invalid class id {} for tool {}", row.class_id, row.id))?,
            _guard: (),
        })
    }
}

#[derive(FromRow)]
struct ToolkitRow {
    id: i64,
    name: String,
    description: Option<String>,
}

impl From<ToolkitRow> for Toolkit {
    fn from(row: ToolkitRow) -> Self {
        Toolkit {
            id: row.id,
            name: row.name,
            description: row.description,
            _guard: (),
        }
    }
}

#[derive(FromRow)]
struct ToolkitItemRow {
    item_id: i64,
    toolkit_id: i64,
    quantity: i64,
    id: i64,
    name: String,
    serial_number: String,
    category: String,
    class_id: i64,
}

impl TryFrom<ToolkitItemRow> for ToolkitItem {
    type Error = anyhow::Error;

    fn try_from(row: ToolkitItemRow) -> Result<Self, Self::Error> {
        let tool = Tool::try_from(ToolRow {
            id: row.id,
            name: row.name,
            serial_number: row.serial_number,
            category: row.category,
            class_id: row.class_id,
        })?;
        Ok(ToolkitItem {
            id: row.item_id,
            toolkit_id: row.toolkit_id,
            quantity: u32::try_from(row.quantity)
                .with_context(|| format!("Invalid quantity {} for item {}", row.quantity, row.item_id))?,
            tool,
            _guard: (),
        })
    }
}

#[derive(FromRow)]
struct InspectionRow {
    id: i64,
    toolkit_id: i64,
    status: String,
    found_class_ids: String,
    image_ref: Option<String>,
    created_at: String,
}

impl TryFrom<InspectionRow> for InspectionRecord {
    type Error = anyhow::Error;

    fn try_from(row: InspectionRow) -> Result<Self, Self::Error> {
        Ok(InspectionRecord {
            id: row.id,
            toolkit_id: row.toolkit_id,
            status: InspectionStatus::try_from(row.status.as_str())?,
            found_class_ids: serde_json::from_str(&row.found_class_ids)
                .with_context(|| format!("Invalid class id list for inspection {}", row.id))?,
            image_ref: row.image_ref,
            created_at: OffsetDateTime::parse(
                &row.created_at,
                &time::format_description::well_known::Rfc3339,
            )?,
            _guard: (),
        })
    }
}

const TOOL_COLUMNS: &str = "id, name, serial_number, category, class_id";

const ITEM_QUERY: &str = r#"SELECT
        ti.id AS item_id,
        ti.toolkit_id,
        ti.quantity,
        t.id,
        t.name,
        t.serial_number,
        t.category,
        t.class_id
    FROM toolkit_item ti
    JOIN tool t ON ti.tool_id = t.id"#;

fn check_class_id(class_id: u32) -> anyhow::Result<()> {
    if ToolClass::from_id(class_id).is_none() {
        anyhow::bail!("Unknown detector class id: {}", class_id);
    }
    Ok(())
}

impl ToolRepository for InventoryDb {
    async fn get_tools(&self) -> anyhow::Result<Vec<Tool>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, ToolRow>(&format!("SELECT {TOOL_COLUMNS} FROM tool ORDER BY id ASC"))
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(Tool::try_from)
            .collect()
    }

    async fn get_tool_by_id(&self, id: i64) -> anyhow::Result<Option<Tool>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, ToolRow>(&format!("SELECT {TOOL_COLUMNS} FROM tool WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .map(Tool::try_from)
            .transpose()
    }

    async fn add_tool(&self, tool: &NewTool) -> anyhow::Result<Tool> {
        check_class_id(tool.class_id)?;
        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, ToolRow>(&format!(
            "INSERT INTO tool (name, serial_number, category, class_id) VALUES ($1, $2, $3, $4) RETURNING {TOOL_COLUMNS}"
        ))
        .bind(&tool.name)
        .bind(&tool.serial_number)
        .bind(&tool.category)
        .bind(tool.class_id as i64)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to add tool {}", tool.serial_number))?;
        Tool::try_from(row)
    }

    async fn update_tool(&self, tool: &Tool, update: &ToolUpdate) -> anyhow::Result<Tool> {
        let class_id = update.class_id.unwrap_or(tool.class_id);
        check_class_id(class_id)?;

        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, ToolRow>(&format!(
            "UPDATE tool SET name = $1, serial_number = $2, category = $3, class_id = $4 WHERE id = $5 RETURNING {TOOL_COLUMNS}"
        ))
        .bind(update.name.as_ref().unwrap_or(&tool.name))
        .bind(update.serial_number.as_ref().unwrap_or(&tool.serial_number))
        .bind(update.category.as_ref().unwrap_or(&tool.category))
        .bind(class_id as i64)
        .bind(tool.id)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to update tool {}", tool.id))?;
        Tool::try_from(row)
    }

    async fn delete_tool(&self, tool: Tool) -> anyhow::Result<()> {
        let mut conn = self.state.conn().await?;
        let result = sqlx::query("DELETE FROM tool WHERE id = $1")
            .bind(tool.id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Tool {} does not exist", tool.id);
        }
        Ok(())
    }
}

impl ToolkitRepository for InventoryDb {
    async fn get_toolkits(&self) -> anyhow::Result<Vec<Toolkit>> {
        let mut conn = self.state.conn().await?;
        Ok(sqlx::query_as::<_, ToolkitRow>("SELECT id, name, description FROM toolkit ORDER BY id ASC")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(Toolkit::from)
            .collect())
    }

    async fn get_toolkit(&self, id: i64) -> anyhow::Result<Option<Toolkit>> {
        let mut conn = self.state.conn().await?;
        Ok(sqlx::query_as::<_, ToolkitRow>("SELECT id, name, description FROM toolkit WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .map(Toolkit::from))
    }

    async fn add_toolkit(&self, toolkit: &NewToolkit) -> anyhow::Result<Toolkit> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, ToolkitRow>(
            "INSERT INTO toolkit (name, description) VALUES ($1, $2) RETURNING id, name, description",
        )
        .bind(&toolkit.name)
        .bind(&toolkit.description)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to add toolkit {}", toolkit.name))?;
        Ok(Toolkit::from(row))
    }

    async fn update_toolkit(&self, toolkit: &Toolkit, update: &ToolkitUpdate) -> anyhow::Result<Toolkit> {
        let description = match &update.description {
            Some(description) => description.clone(),
            None => toolkit.description.clone(),
        };
        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, ToolkitRow>(
            "UPDATE toolkit SET name = $1, description = $2 WHERE id = $3 RETURNING id, name, description",
        )
        .bind(update.name.as_ref().unwrap_or(&toolkit.name))
        .bind(description)
        .bind(toolkit.id)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to update toolkit {}", toolkit.id))?;
        Ok(Toolkit::from(row))
    }

    async fn delete_toolkit(&self, toolkit: Toolkit) -> anyhow::Result<()> {
        let mut conn = self.state.conn().await?;
        let result = sqlx::query("DELETE FROM toolkit WHERE id = $1")
            .bind(toolkit.id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Toolkit {} does not exist", toolkit.id);
        }
        Ok(())
    }

    async fn get_items(&self, toolkit_id: i64) -> anyhow::Result<Vec<ToolkitItem>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, ToolkitItemRow>(&format!(
            "{ITEM_QUERY} WHERE ti.toolkit_id = $1 ORDER BY t.id ASC"
        ))
        .bind(toolkit_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(ToolkitItem::try_from)
        .collect()
    }

    async fn set_item(&self, toolkit_id: i64, tool_id: i64, quantity: u32) -> anyhow::Result<ToolkitItem> {
        let mut conn = self.state.conn().await?;
        let item_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO toolkit_item (toolkit_id, tool_id, quantity) VALUES ($1, $2, $3)
            ON CONFLICT (toolkit_id, tool_id) DO UPDATE SET quantity = EXCLUDED.quantity
            RETURNING id"#,
        )
        .bind(toolkit_id)
        .bind(tool_id)
        .bind(quantity as i64)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to add tool {} to toolkit {}", tool_id, toolkit_id))?;

        let row = sqlx::query_as::<_, ToolkitItemRow>(&format!("{ITEM_QUERY} WHERE ti.id = $1"))
            .bind(item_id)
            .fetch_one(&mut *conn)
            .await?;
        ToolkitItem::try_from(row)
    }

    async fn remove_item(&self, toolkit_id: i64, item_id: i64) -> anyhow::Result<()> {
        let mut conn = self.state.conn().await?;
        let result = sqlx::query("DELETE FROM toolkit_item WHERE id = $1 AND toolkit_id = $2")
            .bind(item_id)
            .bind(toolkit_id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Item {} is not part of toolkit {}", item_id, toolkit_id);
        }
        Ok(())
    }

    async fn expected_inventory(&self, toolkit_id: i64) -> anyhow::Result<Option<ExpectedInventory>> {
        if self.get_toolkit(toolkit_id).await?.is_none() {
            return Ok(None);
        }
        let items = self.get_items(toolkit_id).await?;
        Ok(Some(ExpectedInventory::new(
            toolkit_id,
            items.iter().map(|item| item.tool.class_id),
        )))
    }
}

impl InspectionRepository for InventoryDb {
    async fn record_inspection(&self, record: &NewInspectionRecord) -> anyhow::Result<InspectionRecord> {
        let status: &'static str = record.status.into();
        let found = serde_json::to_string(&record.found_class_ids)?;
        let created_at = OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339)?;

        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, InspectionRow>(
            r#"INSERT INTO inspection (toolkit_id, status, found_class_ids, image_ref, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, toolkit_id, status, found_class_ids, image_ref, created_at"#,
        )
        .bind(record.toolkit_id)
        .bind(status)
        .bind(found)
        .bind(&record.image_ref)
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to record inspection for toolkit {}", record.toolkit_id))?;
        InspectionRecord::try_from(row)
    }

    async fn get_inspections(&self, toolkit_id: i64) -> anyhow::Result<Vec<InspectionRecord>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, InspectionRow>(
            r#"SELECT id, toolkit_id, status, found_class_ids, image_ref, created_at
            FROM inspection WHERE toolkit_id = $1 ORDER BY id DESC"#,
        )
        .bind(toolkit_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(InspectionRecord::try_from)
        .collect()
    }
}
