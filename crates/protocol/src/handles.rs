//! Strongly-typed handles for worker-owned native objects
//!
//! Clients never see native pointers; every native object lives behind an
//! opaque 64-bit id scoped to one handle kind. Handles are allocated on the
//! client side *before* the creating command is enqueued, so a caller can
//! chain "create, then use" without waiting for the creation to complete —
//! the command queue's FIFO order guarantees the bind happens first.
//!
//! Id 0 is never allocated; optional handles are expressed as `Option<T>`
//! in payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The kinds of native objects the worker can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    File,
    Artboard,
    StateMachine,
    BindableInstance,
    Image,
    Audio,
    Font,
    Surface,
    DrawKey,
    RenderTarget,
}

impl HandleKind {
    /// Short label used in Display output and log fields
    pub fn label(&self) -> &'static str {
        match self {
            HandleKind::File => "file",
            HandleKind::Artboard => "artboard",
            HandleKind::StateMachine => "state_machine",
            HandleKind::BindableInstance => "instance",
            HandleKind::Image => "image",
            HandleKind::Audio => "audio",
            HandleKind::Font => "font",
            HandleKind::Surface => "surface",
            HandleKind::DrawKey => "draw_key",
            HandleKind::RenderTarget => "render_target",
        }
    }

    const COUNT: usize = 10;

    fn index(self) -> usize {
        match self {
            HandleKind::File => 0,
            HandleKind::Artboard => 1,
            HandleKind::StateMachine => 2,
            HandleKind::BindableInstance => 3,
            HandleKind::Image => 4,
            HandleKind::Audio => 5,
            HandleKind::Font => 6,
            HandleKind::Surface => 7,
            HandleKind::DrawKey => 8,
            HandleKind::RenderTarget => 9,
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An untyped (kind, id) pair, used where handles of any kind must be
/// reported uniformly (error payloads, logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub kind: HandleKind,
    pub id: u64,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Macro to define a strongly-typed handle wrapper around a u64 id
macro_rules! define_handle {
    ($name:ident, $kind:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The handle kind this type is scoped to
            pub const KIND: HandleKind = HandleKind::$kind;

            /// Wrap an existing raw id
            pub fn from_raw(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw id
            pub fn raw(&self) -> u64 {
                self.0
            }

            /// Convert to the untyped form for error reporting
            pub fn untyped(&self) -> Handle {
                Handle {
                    kind: Self::KIND,
                    id: self.0,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.untyped())
            }
        }

        impl From<$name> for Handle {
            fn from(handle: $name) -> Handle {
                handle.untyped()
            }
        }
    };
}

define_handle!(FileHandle, File);
define_handle!(ArtboardHandle, Artboard);
define_handle!(StateMachineHandle, StateMachine);
define_handle!(BindableInstanceHandle, BindableInstance);
define_handle!(ImageHandle, Image);
define_handle!(AudioHandle, Audio);
define_handle!(FontHandle, Font);
define_handle!(SurfaceHandle, Surface);
define_handle!(DrawKeyHandle, DrawKey);
define_handle!(RenderTargetHandle, RenderTarget);

/// Client-side handle id allocator
///
/// One counter per kind, starting at 1 and strictly monotonic for the
/// lifetime of the owning session. Ids are never reused, so a released
/// handle can never be confused with a live one.
#[derive(Debug)]
pub struct HandleAllocator {
    counters: [AtomicU64; HandleKind::COUNT],
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(1)),
        }
    }

    fn next(&self, kind: HandleKind) -> u64 {
        self.counters[kind.index()].fetch_add(1, Ordering::Relaxed)
    }

    pub fn file(&self) -> FileHandle {
        FileHandle::from_raw(self.next(HandleKind::File))
    }

    pub fn artboard(&self) -> ArtboardHandle {
        ArtboardHandle::from_raw(self.next(HandleKind::Artboard))
    }

    pub fn state_machine(&self) -> StateMachineHandle {
        StateMachineHandle::from_raw(self.next(HandleKind::StateMachine))
    }

    pub fn bindable_instance(&self) -> BindableInstanceHandle {
        BindableInstanceHandle::from_raw(self.next(HandleKind::BindableInstance))
    }

    pub fn image(&self) -> ImageHandle {
        ImageHandle::from_raw(self.next(HandleKind::Image))
    }

    pub fn audio(&self) -> AudioHandle {
        AudioHandle::from_raw(self.next(HandleKind::Audio))
    }

    pub fn font(&self) -> FontHandle {
        FontHandle::from_raw(self.next(HandleKind::Font))
    }

    pub fn surface(&self) -> SurfaceHandle {
        SurfaceHandle::from_raw(self.next(HandleKind::Surface))
    }

    pub fn draw_key(&self) -> DrawKeyHandle {
        DrawKeyHandle::from_raw(self.next(HandleKind::DrawKey))
    }

    pub fn render_target(&self) -> RenderTargetHandle {
        RenderTargetHandle::from_raw(self.next(HandleKind::RenderTarget))
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
