//! Commands: client → worker
//!
//! A `Command` is one requested operation. It carries the request id used to
//! correlate the answering message (`FIRE_AND_FORGET` when the caller does
//! not observe the result) and a tagged operation payload. Payloads carry
//! only value types — byte buffers, strings, primitives and handles — so no
//! native pointer ever crosses the channel.
//!
//! Handles for created resources are allocated by the client *before*
//! enqueueing, which is what makes "create then immediately use" sequences
//! race-free: both are commands in the same FIFO order.

use serde::{Deserialize, Serialize};

use crate::handles::{
    ArtboardHandle, AudioHandle, BindableInstanceHandle, DrawKeyHandle, FileHandle, FontHandle,
    ImageHandle, RenderTargetHandle, StateMachineHandle, SurfaceHandle,
};
use crate::properties::{PropertyKind, PropertyValue};

/// Request id of commands whose result the caller does not observe
pub const FIRE_AND_FORGET: u64 = 0;

/// One requested operation, enqueued by a client thread and executed by the
/// worker thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Correlates the answering message; `FIRE_AND_FORGET` (0) when the
    /// caller does not await a result
    pub request_id: u64,
    pub op: CommandOp,
}

impl Command {
    pub fn fire_and_forget(op: CommandOp) -> Self {
        Self {
            request_id: FIRE_AND_FORGET,
            op,
        }
    }

    pub fn request(request_id: u64, op: CommandOp) -> Self {
        Self { request_id, op }
    }

    /// Whether a continuation is waiting on this command
    pub fn expects_response(&self) -> bool {
        self.request_id != FIRE_AND_FORGET
    }
}

/// Selects which artboard or state machine to instantiate from its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceSelector {
    /// The parent's default instance
    Default,
    ByName { name: String },
    ByIndex { index: u32 },
}

/// Asset category for decode/register operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Audio,
    Font,
}

/// A decoded asset referenced by its typed handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetRef {
    Image { handle: ImageHandle },
    Audio { handle: AudioHandle },
    Font { handle: FontHandle },
}

impl AssetRef {
    pub fn kind(&self) -> AssetKind {
        match self {
            AssetRef::Image { .. } => AssetKind::Image,
            AssetRef::Audio { .. } => AssetKind::Audio,
            AssetRef::Font { .. } => AssetKind::Font,
        }
    }
}

// =============================================================================
// Draw configuration
// =============================================================================

/// How an artboard is fitted into its target rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fit {
    #[default]
    Contain,
    Cover,
    Fill,
    FitWidth,
    FitHeight,
    ScaleDown,
    None,
}

/// Where the fitted artboard sits inside its target rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    #[default]
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

/// Per-entry draw configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawOptions {
    pub fit: Fit,
    pub alignment: Alignment,
    pub scale: f32,
    /// Optional 2x3 affine transform applied after fit/alignment,
    /// row-major `[a, b, c, d, tx, ty]`
    pub transform: Option<[f32; 6]>,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            fit: Fit::default(),
            alignment: Alignment::default(),
            scale: 1.0,
            transform: None,
        }
    }
}

/// Where a batch draws to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawTarget {
    Surface { handle: SurfaceHandle },
    RenderTarget { handle: RenderTargetHandle },
}

/// One independent draw within a batch
///
/// The optional draw key gives the entry a stable identity in error
/// reports; it is an allocated id, never a registry resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawEntry {
    pub artboard: ArtboardHandle,
    pub state_machine: Option<StateMachineHandle>,
    pub draw_key: Option<DrawKeyHandle>,
    pub options: DrawOptions,
}

// =============================================================================
// Command operations
// =============================================================================

/// All operations the worker can execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOp {
    // =========================================================================
    // Scene files
    // =========================================================================
    /// Import a scene file from bytes and bind it under `handle`
    LoadFile { handle: FileHandle, bytes: Vec<u8> },

    /// Release a scene file
    ReleaseFile { handle: FileHandle },

    /// Enumerate artboard names in a file
    ListArtboards { file: FileHandle },

    // =========================================================================
    // Artboards
    // =========================================================================
    /// Instantiate an artboard from a file and bind it under `handle`
    InstantiateArtboard {
        handle: ArtboardHandle,
        file: FileHandle,
        selector: InstanceSelector,
    },

    /// Release an artboard instance
    ReleaseArtboard { handle: ArtboardHandle },

    /// Enumerate state machine names on an artboard
    ListStateMachines { artboard: ArtboardHandle },

    // =========================================================================
    // State machines
    // =========================================================================
    /// Instantiate a state machine from an artboard and bind it under
    /// `handle`
    InstantiateStateMachine {
        handle: StateMachineHandle,
        artboard: ArtboardHandle,
        selector: InstanceSelector,
    },

    /// Release a state machine instance
    ReleaseStateMachine { handle: StateMachineHandle },

    /// Advance a state machine by `elapsed_secs`; settling is reported as
    /// an unsolicited message
    AdvanceStateMachine {
        handle: StateMachineHandle,
        elapsed_secs: f32,
    },

    // =========================================================================
    // Data binding
    // =========================================================================
    /// Create a bindable data instance from a file's view model (`name` =
    /// None for the default) and bind it under `handle`
    BindInstance {
        handle: BindableInstanceHandle,
        file: FileHandle,
        name: Option<String>,
    },

    /// Release a bindable instance
    ReleaseInstance { handle: BindableInstanceHandle },

    /// Read a property by dotted path, checked against the expected kind
    GetProperty {
        instance: BindableInstanceHandle,
        path: String,
        kind: PropertyKind,
    },

    /// Write a property by dotted path
    SetProperty {
        instance: BindableInstanceHandle,
        path: String,
        value: PropertyValue,
    },

    /// Fire a one-shot trigger property
    FireTrigger {
        instance: BindableInstanceHandle,
        path: String,
    },

    // =========================================================================
    // Assets
    // =========================================================================
    /// Decode an image asset from bytes and bind it under `handle`
    DecodeImage { handle: ImageHandle, bytes: Vec<u8> },

    /// Decode an audio asset from bytes and bind it under `handle`
    DecodeAudio { handle: AudioHandle, bytes: Vec<u8> },

    /// Decode a font asset from bytes and bind it under `handle`
    DecodeFont { handle: FontHandle, bytes: Vec<u8> },

    /// Register a decoded asset under a referenced name so files resolve
    /// it at load time
    RegisterAsset { name: String, asset: AssetRef },

    /// Remove a named asset registration
    UnregisterAsset { name: String },

    ReleaseImage { handle: ImageHandle },
    ReleaseAudio { handle: AudioHandle },
    ReleaseFont { handle: FontHandle },

    // =========================================================================
    // Draw targets
    // =========================================================================
    /// Create a window-backed surface and bind it under `handle`
    CreateSurface {
        handle: SurfaceHandle,
        width: u32,
        height: u32,
    },

    ReleaseSurface { handle: SurfaceHandle },

    /// Create an offscreen render target and bind it under `handle`
    CreateRenderTarget {
        handle: RenderTargetHandle,
        width: u32,
        height: u32,
    },

    ResizeRenderTarget {
        handle: RenderTargetHandle,
        width: u32,
        height: u32,
    },

    ReleaseRenderTarget { handle: RenderTargetHandle },

    // =========================================================================
    // Drawing
    // =========================================================================
    /// Draw an ordered list of independent entries in one worker dispatch.
    /// One command per frame regardless of scene object count.
    Draw {
        target: DrawTarget,
        /// Packed 0xAARRGGBB; None leaves the target unclear
        clear_color: Option<u32>,
        entries: Vec<DrawEntry>,
    },

    // =========================================================================
    // Lifecycle
    // =========================================================================
    /// Stop the worker: finish this command, abort the rest of the queue,
    /// tear down the native context. Enqueued by the session on last
    /// release; idempotent if already draining.
    Shutdown,
}

impl CommandOp {
    /// Stable name of the operation, for log fields
    pub fn name(&self) -> &'static str {
        match self {
            CommandOp::LoadFile { .. } => "load_file",
            CommandOp::ReleaseFile { .. } => "release_file",
            CommandOp::ListArtboards { .. } => "list_artboards",
            CommandOp::InstantiateArtboard { .. } => "instantiate_artboard",
            CommandOp::ReleaseArtboard { .. } => "release_artboard",
            CommandOp::ListStateMachines { .. } => "list_state_machines",
            CommandOp::InstantiateStateMachine { .. } => "instantiate_state_machine",
            CommandOp::ReleaseStateMachine { .. } => "release_state_machine",
            CommandOp::AdvanceStateMachine { .. } => "advance_state_machine",
            CommandOp::BindInstance { .. } => "bind_instance",
            CommandOp::ReleaseInstance { .. } => "release_instance",
            CommandOp::GetProperty { .. } => "get_property",
            CommandOp::SetProperty { .. } => "set_property",
            CommandOp::FireTrigger { .. } => "fire_trigger",
            CommandOp::DecodeImage { .. } => "decode_image",
            CommandOp::DecodeAudio { .. } => "decode_audio",
            CommandOp::DecodeFont { .. } => "decode_font",
            CommandOp::RegisterAsset { .. } => "register_asset",
            CommandOp::UnregisterAsset { .. } => "unregister_asset",
            CommandOp::ReleaseImage { .. } => "release_image",
            CommandOp::ReleaseAudio { .. } => "release_audio",
            CommandOp::ReleaseFont { .. } => "release_font",
            CommandOp::CreateSurface { .. } => "create_surface",
            CommandOp::ReleaseSurface { .. } => "release_surface",
            CommandOp::CreateRenderTarget { .. } => "create_render_target",
            CommandOp::ResizeRenderTarget { .. } => "resize_render_target",
            CommandOp::ReleaseRenderTarget { .. } => "release_render_target",
            CommandOp::Draw { .. } => "draw",
            CommandOp::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_and_forget_uses_request_id_zero() {
        let cmd = Command::fire_and_forget(CommandOp::ReleaseFile {
            handle: FileHandle::from_raw(1),
        });
        assert_eq!(cmd.request_id, FIRE_AND_FORGET);
        assert!(!cmd.expects_response());
    }

    #[test]
    fn serde_tag_is_stable() {
        let cmd = Command::request(
            9,
            CommandOp::ListArtboards {
                file: FileHandle::from_raw(2),
            },
        );
        let json = serde_json::to_string(&cmd).expect("serialize");
        assert_eq!(json, r#"{"request_id":9,"op":{"type":"list_artboards","file":2}}"#);
    }
}
