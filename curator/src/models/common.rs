use serde::{Deserialize, Serialize};

/// Lifecycle state of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Still relevant; returned by default.
    #[default]
    Active,
    /// Task or commitment that has been resolved.
    Completed,
    /// Kept for the record but no longer actionable.
    Archived,
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Unknown memory status: {s}")),
        }
    }
}

/// What kind of thing a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    #[default]
    General,
    /// A task or commitment with an expected follow-up.
    Task,
    /// User preference or choice.
    Preference,
    /// A decision that was made and agreed on.
    Decision,
    /// Objective information about a person, project, or system.
    Fact,
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Task => write!(f, "task"),
            Self::Preference => write!(f, "preference"),
            Self::Decision => write!(f, "decision"),
            Self::Fact => write!(f, "fact"),
        }
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "task" => Ok(Self::Task),
            "preference" => Ok(Self::Preference),
            "decision" => Ok(Self::Decision),
            "fact" => Ok(Self::Fact),
            _ => Err(format!("Unknown memory category: {s}")),
        }
    }
}
