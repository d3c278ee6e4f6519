//! Media types, generation scenes, and the AI task status machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Media types
// ---------------------------------------------------------------------------

/// Kind of media a generation request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Music,
}

impl MediaType {
    pub const ALL: [MediaType; 2] = [MediaType::Image, MediaType::Music];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Music => "music",
        }
    }

    /// Scenes accepted for this media type.
    pub fn scenes(self) -> &'static [&'static str] {
        match self {
            MediaType::Image => &[SCENE_TEXT_TO_IMAGE, SCENE_IMAGE_TO_IMAGE],
            MediaType::Music => &[SCENE_TEXT_TO_MUSIC],
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "music" => Ok(MediaType::Music),
            other => Err(CoreError::Validation(format!(
                "Invalid media type '{other}'. Must be one of: image, music"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation scenes
// ---------------------------------------------------------------------------

pub const SCENE_TEXT_TO_IMAGE: &str = "text-to-image";
pub const SCENE_IMAGE_TO_IMAGE: &str = "image-to-image";
pub const SCENE_TEXT_TO_MUSIC: &str = "text-to-music";

/// Validate that `scene` is allowed for `media_type`.
pub fn validate_scene(media_type: MediaType, scene: &str) -> Result<(), CoreError> {
    let allowed = media_type.scenes();
    if allowed.contains(&scene) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid scene '{scene}' for {media_type} media type. Must be one of: {}",
            allowed.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Lifecycle status of an AI task.
///
/// `Pending -> Processing -> {Success, Failed}`. Providers that expose polling
/// may report any state directly, but nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Whether a task in `self` may move to `next`.
    ///
    /// Same-state "transitions" are allowed so that a provider re-reporting
    /// `processing` with fresh progress info can still be merged.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Success | TaskStatus::Failed => false,
            TaskStatus::Processing => next != TaskStatus::Pending,
            TaskStatus::Pending => true,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::Validation(format!(
                "Invalid task status '{other}'"
            ))),
        }
    }
}
