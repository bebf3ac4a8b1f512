use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural role of a frame member, derived from its object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Foundation,
    Columns,
    Beams,
    Roof,
    Unclassified,
}

impl Category {
    /// Categories that get a group, in the order groups are created.
    pub const GROUPED: [Category; 4] = [
        Category::Foundation,
        Category::Columns,
        Category::Beams,
        Category::Roof,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::Columns => "columns",
            Self::Beams => "beams",
            Self::Roof => "roof",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First matching keyword wins: Footing, then Column/Post, then Beam, then Rafter.
pub fn categorize(object_name: &str) -> Category {
    if object_name.contains("Footing") {
        Category::Foundation
    } else if object_name.contains("Column") || object_name.contains("Post") {
        Category::Columns
    } else if object_name.contains("Beam") {
        Category::Beams
    } else if object_name.contains("Rafter") {
        Category::Roof
    } else {
        Category::Unclassified
    }
}
