//! Native engine boundary
//!
//! The rendering/animation engine itself is an external collaborator: an
//! opaque, thread-affine library the worker drives through this trait. All
//! of its objects are created, mutated and destroyed on the worker thread;
//! the associated types never cross it.
//!
//! Implementations must not block on anything but their own computation -
//! the worker thread's only blocking point is the command channel.

use motiv_protocol::{AssetKind, DrawOptions, InstanceSelector, PropertyKind, PropertyValue};
use thiserror::Error;

/// Failure reported by the native engine
///
/// `PropertyPath` is distinguished so the dispatcher can map it to the
/// bridge's property-path error; everything else surfaces as a native
/// operation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// Input bytes could not be parsed (scene file, asset data)
    #[error("malformed content: {0}")]
    Malformed(String),

    /// A named artboard, state machine, view model or asset does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A dotted property path failed to resolve or resolved to a
    /// different kind
    #[error("property path '{path}': {message}")]
    PropertyPath { path: String, message: String },

    /// Any other engine-level rejection
    #[error("{0}")]
    Operation(String),
}

/// Mutable reference to the target a draw batch renders into
pub enum DrawSurface<'a, E: NativeEngine + ?Sized> {
    Surface(&'a mut E::Surface),
    RenderTarget(&'a mut E::RenderTarget),
}

/// One draw entry with its handles already resolved to native objects
pub struct ResolvedDraw<'a, E: NativeEngine + ?Sized> {
    pub artboard: &'a E::Artboard,
    pub state_machine: Option<&'a E::StateMachine>,
    pub options: &'a DrawOptions,
}

/// Operation surface of the native engine
///
/// `Send` is required so the engine value can move onto the worker thread
/// at spawn; after that it never moves again.
pub trait NativeEngine: Send + 'static {
    type File: Send;
    type Artboard: Send;
    type StateMachine: Send;
    type Instance: Send;
    type Asset: Send;
    type Surface: Send;
    type RenderTarget: Send;

    /// Initialize the rendering context. Called exactly once, on the
    /// worker thread, before any other operation.
    fn initialize(&mut self) -> Result<(), NativeError>;

    /// Destroy the rendering context. Called exactly once, after the last
    /// operation; registry objects are dropped before this.
    fn teardown(&mut self);

    fn load_file(&mut self, bytes: &[u8]) -> Result<Self::File, NativeError>;

    fn artboard_names(&mut self, file: &Self::File) -> Vec<String>;

    fn instantiate_artboard(
        &mut self,
        file: &Self::File,
        selector: &InstanceSelector,
    ) -> Result<Self::Artboard, NativeError>;

    fn state_machine_names(&mut self, artboard: &Self::Artboard) -> Vec<String>;

    fn instantiate_state_machine(
        &mut self,
        artboard: &Self::Artboard,
        selector: &InstanceSelector,
    ) -> Result<Self::StateMachine, NativeError>;

    /// Advance a state machine; returns true once the machine has settled
    /// (no further animation pending)
    fn advance(&mut self, machine: &mut Self::StateMachine, elapsed_secs: f32) -> bool;

    /// Create a bindable data instance from a file's view model; `None`
    /// selects the default view model
    fn bind_instance(
        &mut self,
        file: &Self::File,
        name: Option<&str>,
    ) -> Result<Self::Instance, NativeError>;

    fn get_property(
        &mut self,
        instance: &Self::Instance,
        path: &str,
        kind: PropertyKind,
    ) -> Result<PropertyValue, NativeError>;

    fn set_property(
        &mut self,
        instance: &mut Self::Instance,
        path: &str,
        value: &PropertyValue,
    ) -> Result<(), NativeError>;

    fn decode_asset(&mut self, kind: AssetKind, bytes: &[u8]) -> Result<Self::Asset, NativeError>;

    /// Register a decoded asset under a referenced name so subsequently
    /// loaded files resolve it
    fn register_asset(&mut self, name: &str, asset: &Self::Asset) -> Result<(), NativeError>;

    fn unregister_asset(&mut self, name: &str) -> Result<(), NativeError>;

    fn create_surface(&mut self, width: u32, height: u32) -> Result<Self::Surface, NativeError>;

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Self::RenderTarget, NativeError>;

    fn resize_render_target(
        &mut self,
        target: &mut Self::RenderTarget,
        width: u32,
        height: u32,
    ) -> Result<(), NativeError>;

    /// Draw all entries into the target in order, as one dispatch
    fn draw(
        &mut self,
        target: DrawSurface<'_, Self>,
        clear_color: Option<u32>,
        entries: &[ResolvedDraw<'_, Self>],
    ) -> Result<(), NativeError>;
}
