use serde::{Deserialize, Serialize};

/// Axis-aligned box in original image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Build a box from corner coordinates, clamped to the image
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, img_width: u32, img_height: u32) -> Self {
        let max_x = img_width.saturating_sub(1) as f32;
        let max_y = img_height.saturating_sub(1) as f32;
        // NaN would make the clamps below panic
        let finite = |v: f32| if v.is_nan() { 0.0 } else { v };
        let (x1, y1, x2, y2) = (finite(x1), finite(y1), finite(x2), finite(y2));
        let x1 = x1.clamp(0.0, max_x);
        let y1 = y1.clamp(0.0, max_y);
        let x2 = x2.clamp(x1, max_x);
        let y2 = y2.clamp(y1, max_y);

        Self {
            x: x1.round() as u32,
            y: y1.round() as u32,
            width: ((x2 - x1).round() as u32).max(1),
            height: ((y2 - y1).round() as u32).max(1),
        }
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

/// One raw candidate object reported by the detector for a single image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
            bbox: None,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Known tool class for this detection, if the id is in the catalog
    pub fn tool_class(&self) -> Option<ToolClass> {
        ToolClass::from_id(self.class_id)
    }
}

/// Tool classes the detector was trained on, in training-label order.
///
/// The discriminant is the detector class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    FlatScrewdriver = 0,
    OpenEndWrench = 1,
    SideCutters = 2,
    PhillipsScrewdriver = 3,
    OffsetCrossScrewdriver = 4,
    Brace = 5,
    SafetyWirePliers = 6,
    Pliers = 7,
    Shernitsa = 8,
    AdjustableWrench = 9,
    OilCanOpener = 10,
}

impl ToolClass {
    pub const ALL: [ToolClass; 11] = [
        ToolClass::FlatScrewdriver,
        ToolClass::OpenEndWrench,
        ToolClass::SideCutters,
        ToolClass::PhillipsScrewdriver,
        ToolClass::OffsetCrossScrewdriver,
        ToolClass::Brace,
        ToolClass::SafetyWirePliers,
        ToolClass::Pliers,
        ToolClass::Shernitsa,
        ToolClass::AdjustableWrench,
        ToolClass::OilCanOpener,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Config key, matching the serde representation
    pub fn key(self) -> &'static str {
        match self {
            ToolClass::FlatScrewdriver => "flat_screwdriver",
            ToolClass::OpenEndWrench => "open_end_wrench",
            ToolClass::SideCutters => "side_cutters",
            ToolClass::PhillipsScrewdriver => "phillips_screwdriver",
            ToolClass::OffsetCrossScrewdriver => "offset_cross_screwdriver",
            ToolClass::Brace => "brace",
            ToolClass::SafetyWirePliers => "safety_wire_pliers",
            ToolClass::Pliers => "pliers",
            ToolClass::Shernitsa => "shernitsa",
            ToolClass::AdjustableWrench => "adjustable_wrench",
            ToolClass::OilCanOpener => "oil_can_opener",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ToolClass::FlatScrewdriver => "Screwdriver (flat)",
            ToolClass::OpenEndWrench => "Open-end/box wrench 3/4",
            ToolClass::SideCutters => "Side cutters",
            ToolClass::PhillipsScrewdriver => "Screwdriver (phillips)",
            ToolClass::OffsetCrossScrewdriver => "Offset cross screwdriver",
            ToolClass::Brace => "Brace",
            ToolClass::SafetyWirePliers => "Safety-wire pliers",
            ToolClass::Pliers => "Pliers",
            ToolClass::Shernitsa => "Shernitsa",
            ToolClass::AdjustableWrench => "Adjustable wrench",
            ToolClass::OilCanOpener => "Oil can opener",
        }
    }
}

impl std::fmt::Display for ToolClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for ToolClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|class| class.key() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool class: {}", s))
    }
}
