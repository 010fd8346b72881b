//! Resource registry: worker-owned native objects keyed by handle
//!
//! One partition per handle kind. The registry lives on the worker thread
//! and is never touched from anywhere else - that confinement is what
//! satisfies the native engine's single-thread-affinity requirement without
//! per-object locks.
//!
//! Handle ids are allocated client-side before the creating command is
//! enqueued; the registry only binds, resolves and removes. An id that was
//! never bound (or whose creation failed, or that was already released)
//! resolves to an `InvalidHandle` error, never a crash.

use std::collections::HashMap;

use motiv_protocol::{
    ArtboardHandle, AudioHandle, BindableInstanceHandle, BridgeError, FileHandle, FontHandle,
    ImageHandle, RenderTargetHandle, StateMachineHandle, SurfaceHandle,
};

use crate::native::NativeEngine;

/// A state machine entry plus the settled flag used for edge-triggered
/// settle notifications
pub struct StateMachineSlot<M> {
    pub machine: M,
    pub settled: bool,
}

/// Worker-thread ownership of all native objects
pub struct ResourceRegistry<E: NativeEngine> {
    pub(crate) files: HashMap<u64, E::File>,
    pub(crate) artboards: HashMap<u64, E::Artboard>,
    pub(crate) state_machines: HashMap<u64, StateMachineSlot<E::StateMachine>>,
    pub(crate) instances: HashMap<u64, E::Instance>,
    pub(crate) images: HashMap<u64, E::Asset>,
    pub(crate) audio: HashMap<u64, E::Asset>,
    pub(crate) fonts: HashMap<u64, E::Asset>,
    pub(crate) surfaces: HashMap<u64, E::Surface>,
    pub(crate) render_targets: HashMap<u64, E::RenderTarget>,
}

/// Generates bind/get/get_mut/remove for one partition
macro_rules! partition {
    ($field:ident, $handle:ty, $obj:ty, $bind:ident, $get:ident, $get_mut:ident, $remove:ident) => {
        pub fn $bind(&mut self, handle: $handle, object: $obj) {
            // Client-side ids are monotonic, so an occupied slot cannot
            // occur outside of a client bug; last bind wins.
            if self.$field.insert(handle.raw(), object).is_some() {
                tracing::warn!(handle = %handle, "rebinding an occupied handle slot");
            }
        }

        pub fn $get(&self, handle: $handle) -> Result<&$obj, BridgeError> {
            self.$field
                .get(&handle.raw())
                .ok_or_else(|| BridgeError::unbound(handle))
        }

        pub fn $get_mut(&mut self, handle: $handle) -> Result<&mut $obj, BridgeError> {
            self.$field
                .get_mut(&handle.raw())
                .ok_or_else(|| BridgeError::unbound(handle))
        }

        pub fn $remove(&mut self, handle: $handle) -> Result<$obj, BridgeError> {
            self.$field
                .remove(&handle.raw())
                .ok_or_else(|| BridgeError::unbound(handle))
        }
    };
}

impl<E: NativeEngine> ResourceRegistry<E> {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            artboards: HashMap::new(),
            state_machines: HashMap::new(),
            instances: HashMap::new(),
            images: HashMap::new(),
            audio: HashMap::new(),
            fonts: HashMap::new(),
            surfaces: HashMap::new(),
            render_targets: HashMap::new(),
        }
    }

    partition!(files, FileHandle, E::File, bind_file, file, file_mut, remove_file);
    partition!(
        artboards,
        ArtboardHandle,
        E::Artboard,
        bind_artboard,
        artboard,
        artboard_mut,
        remove_artboard
    );
    partition!(
        instances,
        BindableInstanceHandle,
        E::Instance,
        bind_instance,
        instance,
        instance_mut,
        remove_instance
    );
    partition!(images, ImageHandle, E::Asset, bind_image, image, image_mut, remove_image);
    partition!(audio, AudioHandle, E::Asset, bind_audio, audio, audio_mut, remove_audio);
    partition!(fonts, FontHandle, E::Asset, bind_font, font, font_mut, remove_font);
    partition!(
        surfaces,
        SurfaceHandle,
        E::Surface,
        bind_surface,
        surface,
        surface_mut,
        remove_surface
    );
    partition!(
        render_targets,
        RenderTargetHandle,
        E::RenderTarget,
        bind_render_target,
        render_target,
        render_target_mut,
        remove_render_target
    );

    // State machines carry a settled flag, so their accessors are written
    // out against the slot type.

    pub fn bind_state_machine(&mut self, handle: StateMachineHandle, machine: E::StateMachine) {
        let slot = StateMachineSlot {
            machine,
            settled: false,
        };
        if self.state_machines.insert(handle.raw(), slot).is_some() {
            tracing::warn!(handle = %handle, "rebinding an occupied handle slot");
        }
    }

    pub fn state_machine(
        &self,
        handle: StateMachineHandle,
    ) -> Result<&StateMachineSlot<E::StateMachine>, BridgeError> {
        self.state_machines
            .get(&handle.raw())
            .ok_or_else(|| BridgeError::unbound(handle))
    }

    pub fn state_machine_mut(
        &mut self,
        handle: StateMachineHandle,
    ) -> Result<&mut StateMachineSlot<E::StateMachine>, BridgeError> {
        self.state_machines
            .get_mut(&handle.raw())
            .ok_or_else(|| BridgeError::unbound(handle))
    }

    pub fn remove_state_machine(
        &mut self,
        handle: StateMachineHandle,
    ) -> Result<StateMachineSlot<E::StateMachine>, BridgeError> {
        self.state_machines
            .remove(&handle.raw())
            .ok_or_else(|| BridgeError::unbound(handle))
    }

    /// Total live objects across all partitions, for drain logging
    pub fn live_objects(&self) -> usize {
        self.files.len()
            + self.artboards.len()
            + self.state_machines.len()
            + self.instances.len()
            + self.images.len()
            + self.audio.len()
            + self.fonts.len()
            + self.surfaces.len()
            + self.render_targets.len()
    }
}

impl<E: NativeEngine> Default for ResourceRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use motiv_protocol::ErrorKind;

    fn registry() -> ResourceRegistry<FakeEngine> {
        ResourceRegistry::new()
    }

    #[test]
    fn unknown_handle_is_a_typed_error() {
        let reg = registry();
        let err = reg.surface(SurfaceHandle::from_raw(5)).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn remove_twice_fails_the_second_time() {
        let mut reg = registry();
        let handle = SurfaceHandle::from_raw(1);
        reg.bind_surface(handle, crate::testing::FakeSurface { width: 4, height: 4 });
        assert!(reg.remove_surface(handle).is_ok());
        assert!(reg.remove_surface(handle).is_err());
    }

    #[test]
    fn state_machines_start_unsettled() {
        let mut reg = registry();
        let handle = StateMachineHandle::from_raw(1);
        reg.bind_state_machine(handle, crate::testing::FakeStateMachine::immediate());
        let slot = reg.state_machine(handle).expect("bound");
        assert!(!slot.settled);
    }
}
