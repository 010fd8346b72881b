//! Session: the public facade of the bridge
//!
//! A `Session` translates typed calls into commands, owns the reference
//! count that gates the worker thread's lifetime, and is the single place
//! where worker messages become client-observable effects:
//!
//! - Async operations enqueue a command and return a [`Pending`]
//!   immediately; the continuation resumes during a later
//!   [`poll_messages`](Session::poll_messages), never inside the enqueue.
//! - Fire-and-forget operations enqueue and return nothing. **Their
//!   failures only surface on [`error_events`](Session::error_events)** -
//!   callers that need confirmation must use an async query instead.
//! - Resource creation allocates the handle synchronously, before the
//!   command is enqueued. The handle is usable in follow-up calls at once;
//!   FIFO command order guarantees the bind executes first.
//!
//! The worker starts on the first `acquire` and stops on the last
//! `release`; re-acquiring afterwards starts a fresh worker with empty
//! registries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::{broadcast, mpsc};

use motiv_engine::{server, BridgeConfig, NativeEngine, ServerShared, ServerState};
use motiv_protocol::{
    ArtboardHandle, AssetRef, AudioHandle, BindableInstanceHandle, BridgeError, Command,
    CommandOp, DrawEntry, DrawKeyHandle, DrawTarget, FileHandle, FontHandle, HandleAllocator,
    ImageHandle, InstanceSelector, Message, MessagePayload, PropertyKind, PropertyValue,
    RenderTargetHandle, StateMachineHandle, SurfaceHandle,
};

use crate::correlator::Correlator;
use crate::pending::{map_ack, map_drawn, map_names, map_property, Mapper, Pending};
use crate::streams::{ErrorStream, PropertyStream, SettleStream};

/// One worker incarnation's channel endpoints
struct Runtime {
    commands: mpsc::UnboundedSender<Command>,
    /// Locked only during a poll; the worker holds the other end
    messages: Mutex<mpsc::UnboundedReceiver<Message>>,
    shared: Arc<ServerShared>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Reference count and the current worker, guarded together
struct Lifecycle {
    refs: HashMap<String, usize>,
    total: usize,
    runtime: Option<Arc<Runtime>>,
}

/// The client facade; share it across threads behind an `Arc`
pub struct Session<E: NativeEngine> {
    config: BridgeConfig,
    engine_factory: Box<dyn Fn() -> E + Send + Sync>,
    lifecycle: Mutex<Lifecycle>,
    handles: HandleAllocator,
    correlator: Arc<Correlator>,
    errors: broadcast::Sender<BridgeError>,
    settles: broadcast::Sender<StateMachineHandle>,
}

impl<E: NativeEngine> Session<E> {
    /// Create a session; no worker runs until the first `acquire`
    ///
    /// The factory is invoked once per acquire cycle, so a re-acquired
    /// session gets a fresh engine.
    pub fn new<F>(config: BridgeConfig, engine_factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        let (errors, _) = broadcast::channel(config.error_channel_capacity.max(1));
        let (settles, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            config,
            engine_factory: Box::new(engine_factory),
            lifecycle: Mutex::new(Lifecycle {
                refs: HashMap::new(),
                total: 0,
                runtime: None,
            }),
            handles: HandleAllocator::new(),
            correlator: Arc::new(Correlator::new()),
            errors,
            settles,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Take a reference under `tag`; the worker starts on the 0→1
    /// transition
    pub fn acquire(&self, tag: &str) -> Result<(), BridgeError> {
        let mut lifecycle = self.lock_lifecycle()?;
        if lifecycle.total == 0 {
            let engine = (self.engine_factory)();
            let shared = Arc::new(ServerShared::new(&self.config));
            let spawned = server::spawn(engine, Arc::clone(&shared), &self.config)?;
            lifecycle.runtime = Some(Arc::new(Runtime {
                commands: spawned.commands,
                messages: Mutex::new(spawned.messages),
                shared,
                join: Mutex::new(Some(spawned.join)),
            }));
            tracing::info!(tag, "session acquired; worker started");
        } else {
            tracing::debug!(tag, total = lifecycle.total + 1, "session acquired");
        }
        *lifecycle.refs.entry(tag.to_string()).or_insert(0) += 1;
        lifecycle.total += 1;
        Ok(())
    }

    /// Drop the reference taken under `tag`; the worker stops on the 1→0
    /// transition
    ///
    /// Releasing a tag that holds no reference fails loudly with a
    /// lifecycle error and changes nothing.
    pub fn release(&self, tag: &str) -> Result<(), BridgeError> {
        let mut lifecycle = self.lock_lifecycle()?;
        let count = lifecycle.refs.get_mut(tag).ok_or_else(|| {
            BridgeError::lifecycle(format!("release without matching acquire (tag '{tag}')"))
        })?;
        *count -= 1;
        if *count == 0 {
            lifecycle.refs.remove(tag);
        }
        lifecycle.total -= 1;

        if lifecycle.total == 0 {
            if let Some(runtime) = lifecycle.runtime.take() {
                self.teardown(&runtime)?;
            }
            tracing::info!(tag, "session released; worker stopped");
        } else {
            tracing::debug!(tag, total = lifecycle.total, "session released");
        }
        Ok(())
    }

    /// Stop the worker: drain in order, join, deliver what the drain
    /// produced, then fail whatever is still pending.
    fn teardown(&self, runtime: &Arc<Runtime>) -> Result<(), BridgeError> {
        // Send may fail if the worker already exited (init failure); the
        // join below settles it either way.
        let _ = runtime
            .commands
            .send(Command::fire_and_forget(CommandOp::Shutdown));

        let join = {
            let mut slot = runtime
                .join
                .lock()
                .map_err(|_| BridgeError::lifecycle("worker join handle poisoned"))?;
            slot.take()
        };
        if let Some(join) = join {
            join.join()
                .map_err(|_| BridgeError::lifecycle("worker thread panicked"))?;
        }

        // The worker is gone; deliver its final messages (drain aborts,
        // straggler responses) to their continuations.
        {
            let mut receiver = runtime
                .messages
                .lock()
                .map_err(|_| BridgeError::lifecycle("message channel poisoned"))?;
            while let Ok(message) = receiver.try_recv() {
                self.dispatch_message(&runtime.shared, message);
            }
        }

        self.correlator
            .fail_all(&BridgeError::lifecycle("session released"));
        runtime.shared.subscriptions.clear();
        Ok(())
    }

    /// Current worker lifecycle state; `Stopped` when not acquired
    pub fn server_state(&self) -> ServerState {
        match self.lock_lifecycle() {
            Ok(lifecycle) => lifecycle
                .runtime
                .as_ref()
                .map(|rt| rt.shared.state())
                .unwrap_or(ServerState::Stopped),
            Err(_) => ServerState::Stopped,
        }
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Drain the message channel: resume continuations, fan out property
    /// broadcasts, surface fire-and-forget failures
    ///
    /// This is the *only* point where any of those happen - call it once
    /// per scheduling tick (typically once per rendered frame). Returns
    /// the number of messages handled; 0 when the session is not acquired.
    pub fn poll_messages(&self) -> Result<usize, BridgeError> {
        let runtime = {
            let lifecycle = self.lock_lifecycle()?;
            match &lifecycle.runtime {
                Some(runtime) => Arc::clone(runtime),
                None => return Ok(0),
            }
        };

        let mut receiver = runtime
            .messages
            .lock()
            .map_err(|_| BridgeError::lifecycle("message channel poisoned"))?;
        let mut handled = 0usize;
        while let Ok(message) = receiver.try_recv() {
            self.dispatch_message(&runtime.shared, message);
            handled += 1;
        }
        Ok(handled)
    }

    fn dispatch_message(&self, shared: &ServerShared, message: Message) {
        let is_unsolicited = message.is_unsolicited();
        match message.payload {
            MessagePayload::Completed { data } => {
                if !self.correlator.resolve(message.request_id, Ok(data)) {
                    tracing::debug!(
                        request_id = message.request_id,
                        "dropping response for cancelled request"
                    );
                }
            }
            MessagePayload::Failed { error } => {
                if is_unsolicited {
                    // Fire-and-forget failure: broadcast is the only
                    // observer.
                    tracing::warn!(error = %error, "fire-and-forget command failed");
                    let _ = self.errors.send(error);
                } else if !self.correlator.resolve(message.request_id, Err(error)) {
                    tracing::debug!(
                        request_id = message.request_id,
                        "dropping failure for cancelled request"
                    );
                }
            }
            MessagePayload::PropertyChanged {
                instance,
                path,
                value,
            } => {
                shared.subscriptions.publish(instance, &path, value);
            }
            MessagePayload::StateMachineSettled { state_machine } => {
                let _ = self.settles.send(state_machine);
            }
        }
    }

    // =========================================================================
    // Subscriptions & broadcasts
    // =========================================================================

    /// Register a listener on one (instance, path) pair
    ///
    /// Independent listeners per pair are supported; each gets its own
    /// bounded buffer with drop-oldest overflow.
    pub fn subscribe(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
        kind: PropertyKind,
    ) -> Result<PropertyStream, BridgeError> {
        let runtime = self.runtime()?;
        let receiver = runtime.shared.subscriptions.subscribe(instance, path, kind);
        Ok(PropertyStream::new(instance, path.to_string(), receiver))
    }

    /// Remove the pair's subscription; all of its listeners end
    pub fn unsubscribe(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
    ) -> Result<bool, BridgeError> {
        let runtime = self.runtime()?;
        Ok(runtime.shared.subscriptions.unsubscribe(instance, path))
    }

    /// Failures of fire-and-forget commands land here
    pub fn error_events(&self) -> ErrorStream {
        ErrorStream::new(self.errors.subscribe())
    }

    /// State machines observed settling land here
    pub fn settle_events(&self) -> SettleStream {
        SettleStream::new(self.settles.subscribe())
    }

    // =========================================================================
    // Scene files
    // =========================================================================

    /// Import a scene file from bytes
    ///
    /// The handle is valid for follow-up calls immediately; the pending
    /// operation confirms whether the import actually succeeded.
    pub fn load_file(&self, bytes: Vec<u8>) -> Result<(FileHandle, Pending<()>), BridgeError> {
        let handle = self.handles.file();
        let pending = self.submit(CommandOp::LoadFile { handle, bytes }, map_ack)?;
        Ok((handle, pending))
    }

    pub fn release_file(&self, handle: FileHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseFile { handle })
    }

    pub fn list_artboards(&self, file: FileHandle) -> Result<Pending<Vec<String>>, BridgeError> {
        self.submit(CommandOp::ListArtboards { file }, map_names)
    }

    // =========================================================================
    // Artboards & state machines
    // =========================================================================

    pub fn instantiate_artboard(
        &self,
        file: FileHandle,
        selector: InstanceSelector,
    ) -> Result<(ArtboardHandle, Pending<()>), BridgeError> {
        let handle = self.handles.artboard();
        let pending = self.submit(
            CommandOp::InstantiateArtboard {
                handle,
                file,
                selector,
            },
            map_ack,
        )?;
        Ok((handle, pending))
    }

    pub fn release_artboard(&self, handle: ArtboardHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseArtboard { handle })
    }

    pub fn list_state_machines(
        &self,
        artboard: ArtboardHandle,
    ) -> Result<Pending<Vec<String>>, BridgeError> {
        self.submit(CommandOp::ListStateMachines { artboard }, map_names)
    }

    pub fn instantiate_state_machine(
        &self,
        artboard: ArtboardHandle,
        selector: InstanceSelector,
    ) -> Result<(StateMachineHandle, Pending<()>), BridgeError> {
        let handle = self.handles.state_machine();
        let pending = self.submit(
            CommandOp::InstantiateStateMachine {
                handle,
                artboard,
                selector,
            },
            map_ack,
        )?;
        Ok((handle, pending))
    }

    pub fn release_state_machine(&self, handle: StateMachineHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseStateMachine { handle })
    }

    /// Advance a state machine; settling surfaces on
    /// [`settle_events`](Self::settle_events)
    pub fn advance_state_machine(
        &self,
        handle: StateMachineHandle,
        elapsed_secs: f32,
    ) -> Result<(), BridgeError> {
        self.fire(CommandOp::AdvanceStateMachine {
            handle,
            elapsed_secs,
        })
    }

    // =========================================================================
    // Data binding
    // =========================================================================

    /// Create a bindable data instance from a file's view model (`None`
    /// selects the default)
    pub fn bind_instance(
        &self,
        file: FileHandle,
        name: Option<String>,
    ) -> Result<(BindableInstanceHandle, Pending<()>), BridgeError> {
        let handle = self.handles.bindable_instance();
        let pending = self.submit(CommandOp::BindInstance { handle, file, name }, map_ack)?;
        Ok((handle, pending))
    }

    pub fn release_instance(&self, handle: BindableInstanceHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseInstance { handle })
    }

    pub fn get_property(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
        kind: PropertyKind,
    ) -> Result<Pending<PropertyValue>, BridgeError> {
        self.submit(
            CommandOp::GetProperty {
                instance,
                path: path.to_string(),
                kind,
            },
            map_property,
        )
    }

    pub fn set_property(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
        value: PropertyValue,
    ) -> Result<(), BridgeError> {
        self.fire(CommandOp::SetProperty {
            instance,
            path: path.to_string(),
            value,
        })
    }

    pub fn fire_trigger(
        &self,
        instance: BindableInstanceHandle,
        path: &str,
    ) -> Result<(), BridgeError> {
        self.fire(CommandOp::FireTrigger {
            instance,
            path: path.to_string(),
        })
    }

    // =========================================================================
    // Assets
    // =========================================================================

    pub fn decode_image(&self, bytes: Vec<u8>) -> Result<(ImageHandle, Pending<()>), BridgeError> {
        let handle = self.handles.image();
        let pending = self.submit(CommandOp::DecodeImage { handle, bytes }, map_ack)?;
        Ok((handle, pending))
    }

    pub fn decode_audio(&self, bytes: Vec<u8>) -> Result<(AudioHandle, Pending<()>), BridgeError> {
        let handle = self.handles.audio();
        let pending = self.submit(CommandOp::DecodeAudio { handle, bytes }, map_ack)?;
        Ok((handle, pending))
    }

    pub fn decode_font(&self, bytes: Vec<u8>) -> Result<(FontHandle, Pending<()>), BridgeError> {
        let handle = self.handles.font();
        let pending = self.submit(CommandOp::DecodeFont { handle, bytes }, map_ack)?;
        Ok((handle, pending))
    }

    /// Register a decoded asset under a referenced name; files loaded
    /// afterwards resolve it
    pub fn register_asset(&self, name: &str, asset: AssetRef) -> Result<(), BridgeError> {
        self.fire(CommandOp::RegisterAsset {
            name: name.to_string(),
            asset,
        })
    }

    pub fn unregister_asset(&self, name: &str) -> Result<(), BridgeError> {
        self.fire(CommandOp::UnregisterAsset {
            name: name.to_string(),
        })
    }

    pub fn release_image(&self, handle: ImageHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseImage { handle })
    }

    pub fn release_audio(&self, handle: AudioHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseAudio { handle })
    }

    pub fn release_font(&self, handle: FontHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseFont { handle })
    }

    // =========================================================================
    // Draw targets & drawing
    // =========================================================================

    pub fn create_surface(
        &self,
        width: u32,
        height: u32,
    ) -> Result<(SurfaceHandle, Pending<()>), BridgeError> {
        let handle = self.handles.surface();
        let pending = self.submit(
            CommandOp::CreateSurface {
                handle,
                width,
                height,
            },
            map_ack,
        )?;
        Ok((handle, pending))
    }

    pub fn release_surface(&self, handle: SurfaceHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseSurface { handle })
    }

    pub fn create_render_target(
        &self,
        width: u32,
        height: u32,
    ) -> Result<(RenderTargetHandle, Pending<()>), BridgeError> {
        let handle = self.handles.render_target();
        let pending = self.submit(
            CommandOp::CreateRenderTarget {
                handle,
                width,
                height,
            },
            map_ack,
        )?;
        Ok((handle, pending))
    }

    pub fn resize_render_target(
        &self,
        handle: RenderTargetHandle,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        self.fire(CommandOp::ResizeRenderTarget {
            handle,
            width,
            height,
        })
    }

    pub fn release_render_target(&self, handle: RenderTargetHandle) -> Result<(), BridgeError> {
        self.fire(CommandOp::ReleaseRenderTarget { handle })
    }

    /// Allocate a draw key: a stable identity for one recurring entry in
    /// draw batches. Pure allocation - no command is enqueued.
    pub fn draw_key(&self) -> DrawKeyHandle {
        self.handles.draw_key()
    }

    /// Draw a whole batch of independent entries as one worker dispatch;
    /// resolves to the number of entries actually drawn
    pub fn draw(
        &self,
        target: DrawTarget,
        clear_color: Option<u32>,
        entries: Vec<DrawEntry>,
    ) -> Result<Pending<u32>, BridgeError> {
        self.submit(
            CommandOp::Draw {
                target,
                clear_color,
                entries,
            },
            map_drawn,
        )
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn lock_lifecycle(&self) -> Result<std::sync::MutexGuard<'_, Lifecycle>, BridgeError> {
        self.lifecycle
            .lock()
            .map_err(|_| BridgeError::lifecycle("session lifecycle poisoned"))
    }

    /// The current runtime, if the worker can still accept commands
    fn runtime(&self) -> Result<Arc<Runtime>, BridgeError> {
        let lifecycle = self.lock_lifecycle()?;
        let runtime = lifecycle
            .runtime
            .as_ref()
            .ok_or_else(|| BridgeError::lifecycle("session is not acquired"))?;
        match runtime.shared.state() {
            ServerState::Starting | ServerState::Running => Ok(Arc::clone(runtime)),
            state => Err(BridgeError::lifecycle(format!(
                "worker is not accepting commands (state: {state:?})"
            ))),
        }
    }

    /// Enqueue a request-bearing command and park its continuation
    fn submit<T>(&self, op: CommandOp, map: Mapper<T>) -> Result<Pending<T>, BridgeError> {
        let runtime = self.runtime()?;
        let (request_id, receiver) = self.correlator.register();
        let command = Command::request(request_id, op);
        tracing::debug!(request_id, op = command.op.name(), "enqueue");
        if runtime.commands.send(command).is_err() {
            self.correlator.cancel(request_id);
            return Err(BridgeError::lifecycle("worker stopped"));
        }
        Ok(Pending::new(
            request_id,
            receiver,
            Arc::clone(&self.correlator),
            map,
        ))
    }

    /// Enqueue a fire-and-forget command
    fn fire(&self, op: CommandOp) -> Result<(), BridgeError> {
        let runtime = self.runtime()?;
        let command = Command::fire_and_forget(op);
        tracing::debug!(op = command.op.name(), "enqueue (fire-and-forget)");
        runtime
            .commands
            .send(command)
            .map_err(|_| BridgeError::lifecycle("worker stopped"))
    }
}
