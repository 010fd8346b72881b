//! Motiv Protocol - the in-process contract between client sessions and the
//! render worker
//!
//! This crate contains every value type that crosses the thread boundary:
//! - Typed handles standing in for worker-owned native objects
//! - The `Command` enum (client → worker) and `Message` enum (worker →
//!   client), both with stable serde tags
//! - The property value vocabulary for data-bound instances
//! - The `BridgeError` taxonomy
//!
//! # Design Principles
//!
//! 1. **Values only** - byte buffers, primitives, strings and handles; no
//!    native pointers and no shared mutable references
//! 2. **No business logic** - pure data types and serialization
//! 3. **Stable tags** - every command and message variant carries a type
//!    discriminator and a request id (possibly zero)

pub mod commands;
pub mod errors;
pub mod handles;
pub mod messages;
pub mod properties;

pub use commands::{
    AssetKind, AssetRef, Alignment, Command, CommandOp, DrawEntry, DrawOptions, DrawTarget, Fit,
    InstanceSelector, FIRE_AND_FORGET,
};
pub use errors::{BridgeError, ErrorKind};
pub use handles::{
    ArtboardHandle, AudioHandle, BindableInstanceHandle, DrawKeyHandle, FileHandle, FontHandle,
    Handle, HandleAllocator, HandleKind, ImageHandle, RenderTargetHandle, StateMachineHandle,
    SurfaceHandle,
};
pub use messages::{Message, MessagePayload, ResponsePayload};
pub use properties::{PropertyKind, PropertyValue};
