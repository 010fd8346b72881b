//! Command server: the render worker thread
//!
//! Exactly one OS thread owns the native engine context and every registry
//! object. Client threads enqueue `Command` values; the worker pops them in
//! FIFO order, validates every referenced handle before touching the
//! engine, and pushes `Message` values back. The worker's only blocking
//! point is the command channel.
//!
//! Lifecycle: `Stopped → Starting → Running → Draining → Stopped`. During
//! `Draining` the remaining queue is aborted with lifecycle errors rather
//! than executed, then the native context is destroyed on this thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;

use motiv_protocol::{
    BridgeError, Command, CommandOp, DrawEntry, DrawTarget, Handle, Message, MessagePayload,
    PropertyValue, ResponsePayload, FIRE_AND_FORGET,
};

use crate::config::BridgeConfig;
use crate::native::{DrawSurface, NativeEngine, NativeError, ResolvedDraw};
use crate::registry::ResourceRegistry;
use crate::subscriptions::SubscriptionRegistry;

// =============================================================================
// Lifecycle state
// =============================================================================

/// Worker thread lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl ServerState {
    fn as_u8(self) -> u8 {
        match self {
            ServerState::Stopped => 0,
            ServerState::Starting => 1,
            ServerState::Running => 2,
            ServerState::Draining => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Draining,
            _ => ServerState::Stopped,
        }
    }
}

/// State shared between client threads and the worker
///
/// The worker advances the lifecycle state; clients read it and share the
/// subscription registry. Everything else the worker owns exclusively.
pub struct ServerShared {
    state: AtomicU8,
    pub subscriptions: SubscriptionRegistry,
}

impl ServerShared {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            state: AtomicU8::new(ServerState::Stopped.as_u8()),
            subscriptions: SubscriptionRegistry::new(config.broadcast_capacity),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ServerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

// =============================================================================
// Spawning
// =============================================================================

/// Channel endpoints and join handle of a spawned worker
pub struct SpawnedServer {
    /// Enqueue side of the command channel; any client thread may send
    pub commands: mpsc::UnboundedSender<Command>,
    /// Drain side of the message channel; polled by the session
    pub messages: mpsc::UnboundedReceiver<Message>,
    /// Joined after the shutdown command is processed
    pub join: thread::JoinHandle<()>,
}

/// Start the worker thread and hand back its channel endpoints
///
/// The engine value moves onto the new thread and its context is
/// initialized there, honoring thread affinity. If initialization fails the
/// worker reports it on the error broadcast and stops without entering
/// `Running`.
pub fn spawn<E: NativeEngine>(
    engine: E,
    shared: Arc<ServerShared>,
    config: &BridgeConfig,
) -> Result<SpawnedServer, BridgeError> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    let server = CommandServer {
        engine,
        registry: ResourceRegistry::new(),
        shared: Arc::clone(&shared),
        messages: message_tx,
        settle_notifications: config.settle_notifications,
    };

    shared.set_state(ServerState::Starting);
    let join = thread::Builder::new()
        .name(config.worker_thread_name.clone())
        .spawn(move || server.run(command_rx))
        .map_err(|e| BridgeError::lifecycle(format!("failed to spawn worker thread: {e}")))?;

    Ok(SpawnedServer {
        commands: command_tx,
        messages: message_rx,
        join,
    })
}

// =============================================================================
// The worker
// =============================================================================

struct CommandServer<E: NativeEngine> {
    engine: E,
    registry: ResourceRegistry<E>,
    shared: Arc<ServerShared>,
    messages: mpsc::UnboundedSender<Message>,
    settle_notifications: bool,
}

impl<E: NativeEngine> CommandServer<E> {
    fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!("render worker starting");
        if let Err(err) = self.engine.initialize() {
            tracing::error!(error = %err, "native context initialization failed");
            self.emit(Message::broadcast_failure(BridgeError::NativeOperationFailed {
                message: err.to_string(),
            }));
            // Anything enqueued while we were Starting can never run.
            self.shared.set_state(ServerState::Draining);
            self.abort_queued(&mut commands);
            self.shared.set_state(ServerState::Stopped);
            return;
        }
        self.shared.set_state(ServerState::Running);
        tracing::info!("render worker running");

        // The loop's only blocking point. A closed channel (session dropped
        // its sender) drains the same way an explicit shutdown does.
        while let Some(command) = commands.blocking_recv() {
            if matches!(command.op, CommandOp::Shutdown) {
                break;
            }
            self.execute(command);
        }

        self.shared.set_state(ServerState::Draining);
        let aborted = self.abort_queued(&mut commands);

        let live = self.registry.live_objects();
        if live > 0 {
            tracing::debug!(live, "dropping live native objects at teardown");
        }
        // Registry objects must die on this thread, before the context.
        drop(std::mem::take(&mut self.registry));
        self.engine.teardown();
        self.shared.set_state(ServerState::Stopped);
        tracing::info!(aborted, "render worker stopped");
    }

    /// Refuse everything still queued: typed lifecycle errors instead of
    /// execution, so no continuation is left hanging
    fn abort_queued(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> usize {
        let mut aborted = 0usize;
        while let Ok(command) = commands.try_recv() {
            if matches!(command.op, CommandOp::Shutdown) {
                continue;
            }
            aborted += 1;
            if command.expects_response() {
                self.emit(Message::failed(
                    command.request_id,
                    BridgeError::lifecycle("worker draining; command aborted"),
                ));
            } else {
                self.emit(Message::broadcast_failure(BridgeError::lifecycle(format!(
                    "{} aborted during drain",
                    command.op.name()
                ))));
            }
        }
        aborted
    }

    fn execute(&mut self, command: Command) {
        let request_id = command.request_id;
        let op = command.op.name();
        tracing::debug!(request_id, op, "dispatch");

        match self.handle(command.op) {
            Ok(data) => {
                if request_id != FIRE_AND_FORGET {
                    self.emit(Message::completed(request_id, data));
                }
            }
            Err(error) => {
                tracing::warn!(request_id, op, error = %error, "command failed");
                if request_id != FIRE_AND_FORGET {
                    self.emit(Message::failed(request_id, error));
                } else {
                    self.emit(Message::broadcast_failure(error));
                }
            }
        }
    }

    /// Per-command handler. Validates handles, then calls into the engine.
    /// Every failure path returns a typed error; nothing here may panic.
    fn handle(&mut self, op: CommandOp) -> Result<ResponsePayload, BridgeError> {
        match op {
            // ----- scene files ------------------------------------------------
            CommandOp::LoadFile { handle, bytes } => {
                let file = self.engine.load_file(&bytes).map_err(native_err)?;
                self.registry.bind_file(handle, file);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseFile { handle } => {
                self.registry.remove_file(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ListArtboards { file } => {
                let file = self.registry.file(file)?;
                let names = self.engine.artboard_names(file);
                Ok(ResponsePayload::Names { names })
            }

            // ----- artboards --------------------------------------------------
            CommandOp::InstantiateArtboard {
                handle,
                file,
                selector,
            } => {
                let file = self.registry.file(file)?;
                let artboard = self
                    .engine
                    .instantiate_artboard(file, &selector)
                    .map_err(native_err)?;
                self.registry.bind_artboard(handle, artboard);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseArtboard { handle } => {
                self.registry.remove_artboard(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ListStateMachines { artboard } => {
                let artboard = self.registry.artboard(artboard)?;
                let names = self.engine.state_machine_names(artboard);
                Ok(ResponsePayload::Names { names })
            }

            // ----- state machines ---------------------------------------------
            CommandOp::InstantiateStateMachine {
                handle,
                artboard,
                selector,
            } => {
                let artboard = self.registry.artboard(artboard)?;
                let machine = self
                    .engine
                    .instantiate_state_machine(artboard, &selector)
                    .map_err(native_err)?;
                self.registry.bind_state_machine(handle, machine);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseStateMachine { handle } => {
                self.registry.remove_state_machine(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::AdvanceStateMachine {
                handle,
                elapsed_secs,
            } => {
                let slot = self.registry.state_machine_mut(handle)?;
                let settled = self.engine.advance(&mut slot.machine, elapsed_secs);
                let newly_settled = settled && !slot.settled;
                slot.settled = settled;
                if newly_settled && self.settle_notifications {
                    self.emit(Message {
                        request_id: FIRE_AND_FORGET,
                        payload: MessagePayload::StateMachineSettled {
                            state_machine: handle,
                        },
                    });
                }
                Ok(ResponsePayload::Ack)
            }

            // ----- data binding -----------------------------------------------
            CommandOp::BindInstance { handle, file, name } => {
                let file = self.registry.file(file)?;
                let instance = self
                    .engine
                    .bind_instance(file, name.as_deref())
                    .map_err(native_err)?;
                self.registry.bind_instance(handle, instance);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseInstance { handle } => {
                self.registry.remove_instance(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::GetProperty {
                instance,
                path,
                kind,
            } => {
                let inst = self.registry.instance(instance)?;
                let value = self
                    .engine
                    .get_property(inst, &path, kind)
                    .map_err(native_err)?;
                Ok(ResponsePayload::Property { value })
            }
            CommandOp::SetProperty {
                instance,
                path,
                value,
            } => {
                let inst = self.registry.instance_mut(instance)?;
                self.engine
                    .set_property(inst, &path, &value)
                    .map_err(native_err)?;
                self.notify_property_changed(instance, path, value);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::FireTrigger { instance, path } => {
                let inst = self.registry.instance_mut(instance)?;
                self.engine
                    .set_property(inst, &path, &PropertyValue::Trigger)
                    .map_err(native_err)?;
                self.notify_property_changed(instance, path, PropertyValue::Trigger);
                Ok(ResponsePayload::Ack)
            }

            // ----- assets -----------------------------------------------------
            CommandOp::DecodeImage { handle, bytes } => {
                let asset = self
                    .engine
                    .decode_asset(motiv_protocol::AssetKind::Image, &bytes)
                    .map_err(native_err)?;
                self.registry.bind_image(handle, asset);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::DecodeAudio { handle, bytes } => {
                let asset = self
                    .engine
                    .decode_asset(motiv_protocol::AssetKind::Audio, &bytes)
                    .map_err(native_err)?;
                self.registry.bind_audio(handle, asset);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::DecodeFont { handle, bytes } => {
                let asset = self
                    .engine
                    .decode_asset(motiv_protocol::AssetKind::Font, &bytes)
                    .map_err(native_err)?;
                self.registry.bind_font(handle, asset);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::RegisterAsset { name, asset } => {
                let asset_ref = match asset {
                    motiv_protocol::AssetRef::Image { handle } => self.registry.image(handle)?,
                    motiv_protocol::AssetRef::Audio { handle } => self.registry.audio(handle)?,
                    motiv_protocol::AssetRef::Font { handle } => self.registry.font(handle)?,
                };
                self.engine
                    .register_asset(&name, asset_ref)
                    .map_err(native_err)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::UnregisterAsset { name } => {
                self.engine.unregister_asset(&name).map_err(native_err)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseImage { handle } => {
                self.registry.remove_image(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseAudio { handle } => {
                self.registry.remove_audio(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseFont { handle } => {
                self.registry.remove_font(handle)?;
                Ok(ResponsePayload::Ack)
            }

            // ----- draw targets -----------------------------------------------
            CommandOp::CreateSurface {
                handle,
                width,
                height,
            } => {
                let surface = self
                    .engine
                    .create_surface(width, height)
                    .map_err(native_err)?;
                self.registry.bind_surface(handle, surface);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseSurface { handle } => {
                self.registry.remove_surface(handle)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::CreateRenderTarget {
                handle,
                width,
                height,
            } => {
                let target = self
                    .engine
                    .create_render_target(width, height)
                    .map_err(native_err)?;
                self.registry.bind_render_target(handle, target);
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ResizeRenderTarget {
                handle,
                width,
                height,
            } => {
                let target = self.registry.render_target_mut(handle)?;
                self.engine
                    .resize_render_target(target, width, height)
                    .map_err(native_err)?;
                Ok(ResponsePayload::Ack)
            }
            CommandOp::ReleaseRenderTarget { handle } => {
                self.registry.remove_render_target(handle)?;
                Ok(ResponsePayload::Ack)
            }

            // ----- drawing ----------------------------------------------------
            CommandOp::Draw {
                target,
                clear_color,
                entries,
            } => self.handle_draw(target, clear_color, entries),

            // Shutdown is consumed by the run loop; reaching dispatch means
            // a second shutdown raced in ahead of the drain. Idempotent.
            CommandOp::Shutdown => Ok(ResponsePayload::Ack),
        }
    }

    /// Execute a whole draw batch as one dispatch
    ///
    /// A missing target fails the batch; entries are independent, so an
    /// entry with an unbound handle is skipped and reported on the error
    /// broadcast while the rest still draw. Exactly one terminal message
    /// answers the batch regardless of entry count.
    fn handle_draw(
        &mut self,
        target: DrawTarget,
        clear_color: Option<u32>,
        entries: Vec<DrawEntry>,
    ) -> Result<ResponsePayload, BridgeError> {
        let ResourceRegistry {
            artboards,
            state_machines,
            surfaces,
            render_targets,
            ..
        } = &mut self.registry;

        let surface = match target {
            DrawTarget::Surface { handle } => DrawSurface::Surface(
                surfaces
                    .get_mut(&handle.raw())
                    .ok_or_else(|| BridgeError::unbound(handle))?,
            ),
            DrawTarget::RenderTarget { handle } => DrawSurface::RenderTarget(
                render_targets
                    .get_mut(&handle.raw())
                    .ok_or_else(|| BridgeError::unbound(handle))?,
            ),
        };

        let mut resolved = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();
        for entry in &entries {
            let artboard = match artboards.get(&entry.artboard.raw()) {
                Some(artboard) => artboard,
                None => {
                    skipped.push(draw_entry_error(entry, entry.artboard.untyped()));
                    continue;
                }
            };
            let state_machine = match entry.state_machine {
                Some(handle) => match state_machines.get(&handle.raw()) {
                    Some(slot) => Some(&slot.machine),
                    None => {
                        skipped.push(draw_entry_error(entry, handle.untyped()));
                        continue;
                    }
                },
                None => None,
            };
            resolved.push(ResolvedDraw {
                artboard,
                state_machine,
                options: &entry.options,
            });
        }

        let drawn = resolved.len() as u32;
        let outcome = self
            .engine
            .draw(surface, clear_color, &resolved)
            .map_err(native_err);
        drop(resolved);

        for error in skipped {
            self.emit(Message::broadcast_failure(error));
        }
        outcome?;
        Ok(ResponsePayload::DrawCompleted { drawn })
    }

    /// Emit a property-change message if anyone subscribed to the pair
    fn notify_property_changed(
        &self,
        instance: motiv_protocol::BindableInstanceHandle,
        path: String,
        value: PropertyValue,
    ) {
        if self.shared.subscriptions.is_subscribed(instance, &path) {
            self.emit(Message {
                request_id: FIRE_AND_FORGET,
                payload: MessagePayload::PropertyChanged {
                    instance,
                    path,
                    value,
                },
            });
        }
    }

    fn emit(&self, message: Message) {
        // The send only fails when the session already dropped its
        // receiver mid-teardown; the worker is exiting at that point.
        if self.messages.send(message).is_err() {
            tracing::debug!("message channel closed; dropping message");
        }
    }
}

fn native_err(err: NativeError) -> BridgeError {
    match err {
        NativeError::PropertyPath { path, message } => BridgeError::PropertyPath { path, message },
        other => BridgeError::NativeOperationFailed {
            message: other.to_string(),
        },
    }
}

fn draw_entry_error(entry: &DrawEntry, missing: Handle) -> BridgeError {
    let message = match entry.draw_key {
        Some(key) => format!("draw entry {key} skipped: handle not bound"),
        None => "draw entry skipped: handle not bound".to_string(),
    };
    BridgeError::InvalidHandle {
        handle: missing,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use motiv_protocol::{ErrorKind, FileHandle, HandleAllocator};

    fn start() -> (SpawnedServer, Arc<ServerShared>) {
        let config = BridgeConfig::default();
        let shared = Arc::new(ServerShared::new(&config));
        let server =
            spawn(FakeEngine::new(), Arc::clone(&shared), &config).expect("spawn worker");
        (server, shared)
    }

    fn manifest() -> Vec<u8> {
        crate::testing::sample_manifest()
    }

    #[test]
    fn load_then_list_resolves_in_fifo_order() {
        let (mut server, _shared) = start();
        let alloc = HandleAllocator::new();
        let file = alloc.file();

        server
            .commands
            .send(Command::request(1, CommandOp::LoadFile {
                handle: file,
                bytes: manifest(),
            }))
            .expect("send");
        server
            .commands
            .send(Command::request(2, CommandOp::ListArtboards { file }))
            .expect("send");

        let first = server.messages.blocking_recv().expect("load response");
        assert_eq!(first.request_id, 1);
        let second = server.messages.blocking_recv().expect("list response");
        assert_eq!(second.request_id, 2);
        match second.payload {
            MessagePayload::Completed {
                data: ResponsePayload::Names { names },
            } => assert!(!names.is_empty()),
            other => panic!("unexpected payload: {other:?}"),
        }

        server
            .commands
            .send(Command::fire_and_forget(CommandOp::Shutdown))
            .expect("send shutdown");
        server.join.join().expect("worker exits cleanly");
    }

    #[test]
    fn unknown_handle_yields_typed_error_not_crash() {
        let (mut server, _shared) = start();

        server
            .commands
            .send(Command::request(7, CommandOp::ListArtboards {
                file: FileHandle::from_raw(999),
            }))
            .expect("send");

        let msg = server.messages.blocking_recv().expect("response");
        assert_eq!(msg.request_id, 7);
        match msg.payload {
            MessagePayload::Failed { error } => {
                assert_eq!(error.kind(), ErrorKind::InvalidHandle);
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        server
            .commands
            .send(Command::fire_and_forget(CommandOp::Shutdown))
            .expect("send shutdown");
        server.join.join().expect("worker exits cleanly");
    }

    #[test]
    fn failed_initialization_reports_and_stops() {
        let config = BridgeConfig::default();
        let shared = Arc::new(ServerShared::new(&config));
        let engine = FakeEngine::new().with_failing_init();
        let mut server = spawn(engine, Arc::clone(&shared), &config).expect("spawn worker");

        let msg = server.messages.blocking_recv().expect("failure broadcast");
        assert!(msg.is_unsolicited());
        assert!(matches!(msg.payload, MessagePayload::Failed { .. }));

        server.join.join().expect("worker exits cleanly");
        assert_eq!(shared.state(), ServerState::Stopped);
    }

    #[test]
    fn commands_queued_behind_shutdown_are_aborted_with_lifecycle_errors() {
        let config = BridgeConfig::default();
        let shared = Arc::new(ServerShared::new(&config));
        let engine = FakeEngine::new().with_gated_loads();
        let probe = engine.probe();
        let mut server = spawn(engine, Arc::clone(&shared), &config).expect("spawn worker");
        let alloc = HandleAllocator::new();

        // The gate holds the load in flight while shutdown and a straggler
        // pile up behind it.
        server
            .commands
            .send(Command::request(1, CommandOp::LoadFile {
                handle: alloc.file(),
                bytes: manifest(),
            }))
            .expect("send");
        server
            .commands
            .send(Command::fire_and_forget(CommandOp::Shutdown))
            .expect("send shutdown");
        server
            .commands
            .send(Command::request(3, CommandOp::ListArtboards {
                file: FileHandle::from_raw(999),
            }))
            .expect("send");
        probe.open_gate();

        server.join.join().expect("worker exits cleanly");
        assert_eq!(shared.state(), ServerState::Stopped);

        // The in-flight load still completed...
        let first = server.messages.blocking_recv().expect("load response");
        assert_eq!(first.request_id, 1);
        assert!(matches!(first.payload, MessagePayload::Completed { .. }));

        // ...but the straggler was aborted, not executed.
        let second = server.messages.blocking_recv().expect("abort message");
        assert_eq!(second.request_id, 3);
        match second.payload {
            MessagePayload::Failed { error } => assert_eq!(error.kind(), ErrorKind::Lifecycle),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
