use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a user turn asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    /// Reports the result of a test that was run.
    Save,
    /// Asks for a test idea.
    Idea,
    /// Asks what is already stored.
    Memory,
    /// Anything else.
    Chat,
}

impl Intent {
    pub const ALL: [Intent; 4] = [Intent::Save, Intent::Idea, Intent::Memory, Intent::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Save => "SAVE",
            Intent::Idea => "IDEA",
            Intent::Memory => "MEMORY",
            Intent::Chat => "CHAT",
        }
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_uppercase();
        Intent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == label)
            .ok_or(label)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
