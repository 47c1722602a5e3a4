//! Model capability flags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A capability a chat model may advertise.
///
/// Inputs that need a capability the current model lacks fail the turn
/// before any context mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    /// Accepts image inputs.
    ImageIn,
    /// Accepts audio inputs.
    AudioIn,
    /// Accepts video inputs.
    VideoIn,
    /// Supports a togglable thinking mode.
    Thinking,
    /// Thinking cannot be turned off.
    AlwaysThinking,
}

impl ModelCapability {
    /// All known capabilities.
    pub const ALL: [Self; 5] = [
        Self::ImageIn,
        Self::AudioIn,
        Self::VideoIn,
        Self::Thinking,
        Self::AlwaysThinking,
    ];

    /// The snake_case name used in config files and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageIn => "image_in",
            Self::AudioIn => "audio_in",
            Self::VideoIn => "video_in",
            Self::Thinking => "thinking",
            Self::AlwaysThinking => "always_thinking",
        }
    }
}

impl fmt::Display for ModelCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelCapability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == s)
            .ok_or(())
    }
}
