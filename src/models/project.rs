//! Project model: a directory-rooted grouping of sessions.

use uuid::Uuid;

/// A project the user has opened; sessions belong to exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Unique identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Root directory new sessions default to.
    pub base_path: Option<String>,
}

impl Project {
    /// Construct a new project with a generated identifier.
    #[must_use]
    pub fn new(title: String, base_path: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            base_path,
        }
    }
}
