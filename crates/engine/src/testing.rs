//! Deterministic `NativeEngine` double for tests
//!
//! `FakeEngine` parses scene "files" from a small JSON manifest, so tests
//! can script artboards, state machines and view-model properties without a
//! real rendering context:
//!
//! ```json
//! {
//!   "artboards": [
//!     { "name": "Main", "state_machines": [ { "name": "intro", "settle_after": 0.5 } ] }
//!   ],
//!   "view_models": [
//!     { "name": "hud", "properties": { "score": { "type": "number", "value": 0.0 } } }
//!   ]
//! }
//! ```
//!
//! An `EngineProbe` (cloneable, thread-safe) observes init/teardown/draw
//! counts from the test side, and `with_gated_loads` makes `load_file`
//! block until the probe opens the gate - used to hold a command in flight
//! deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::ThreadId;

use serde::Deserialize;

use motiv_protocol::{AssetKind, InstanceSelector, PropertyKind, PropertyValue};

use crate::native::{DrawSurface, NativeEngine, NativeError, ResolvedDraw};

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    #[serde(default)]
    artboards: Vec<ArtboardDef>,
    #[serde(default)]
    view_models: Vec<ViewModelDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArtboardDef {
    name: String,
    #[serde(default)]
    state_machines: Vec<StateMachineDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct StateMachineDef {
    name: String,
    /// Seconds of advancement after which the machine reports settled
    #[serde(default)]
    settle_after: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ViewModelDef {
    name: String,
    #[serde(default)]
    properties: HashMap<String, PropertyValue>,
}

/// A ready-made manifest with one artboard, one state machine and one view
/// model covering every property kind
pub fn sample_manifest() -> Vec<u8> {
    let manifest = serde_json::json!({
        "artboards": [
            {
                "name": "Main",
                "state_machines": [
                    { "name": "intro", "settle_after": 0.2 }
                ]
            }
        ],
        "view_models": [
            {
                "name": "hud",
                "properties": {
                    "score": { "type": "number", "value": 0.0 },
                    "label": { "type": "text", "value": "ready" },
                    "live": { "type": "boolean", "value": false },
                    "theme": { "type": "enum_option", "value": "dark" },
                    "accent": { "type": "color", "value": 4278255360u32 },
                    "ping": { "type": "trigger" }
                }
            }
        ]
    });
    serde_json::to_vec(&manifest).expect("static manifest serializes")
}

// =============================================================================
// Native object doubles
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeFile {
    manifest: Manifest,
}

#[derive(Debug, Clone)]
pub struct FakeArtboard {
    pub name: String,
    state_machines: Vec<StateMachineDef>,
}

#[derive(Debug, Clone)]
pub struct FakeStateMachine {
    pub name: String,
    settle_after: f32,
    elapsed: f32,
}

impl FakeStateMachine {
    /// A machine that settles on its first advance
    pub fn immediate() -> Self {
        Self {
            name: "immediate".to_string(),
            settle_after: 0.0,
            elapsed: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeInstance {
    properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Clone)]
pub struct FakeAsset {
    pub kind: AssetKind,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct FakeSurface {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct FakeRenderTarget {
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// Probe
// =============================================================================

#[derive(Default)]
struct ProbeInner {
    init_count: AtomicUsize,
    teardown_count: AtomicUsize,
    advances: AtomicUsize,
    draw_batches: Mutex<Vec<usize>>,
    gate: Mutex<Option<mpsc::Sender<()>>>,
}

/// Test-side view of a `FakeEngine`'s activity; cloneable and thread-safe
#[derive(Clone, Default)]
pub struct EngineProbe {
    inner: Arc<ProbeInner>,
}

impl EngineProbe {
    pub fn init_count(&self) -> usize {
        self.inner.init_count.load(Ordering::SeqCst)
    }

    pub fn teardown_count(&self) -> usize {
        self.inner.teardown_count.load(Ordering::SeqCst)
    }

    pub fn advance_count(&self) -> usize {
        self.inner.advances.load(Ordering::SeqCst)
    }

    /// Entry counts of every draw batch dispatched so far
    pub fn draw_batches(&self) -> Vec<usize> {
        self.inner
            .draw_batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    /// Let one gated `load_file` proceed
    pub fn open_gate(&self) {
        if let Ok(gate) = self.inner.gate.lock() {
            if let Some(sender) = gate.as_ref() {
                let _ = sender.send(());
            }
        }
    }
}

// =============================================================================
// The engine double
// =============================================================================

pub struct FakeEngine {
    probe: EngineProbe,
    registered_assets: HashSet<String>,
    gate: Option<mpsc::Receiver<()>>,
    fail_init: bool,
    affinity: Option<ThreadId>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            probe: EngineProbe::default(),
            registered_assets: HashSet::new(),
            gate: None,
            fail_init: false,
            affinity: None,
        }
    }

    /// Every `load_file` call blocks until the probe opens the gate once
    pub fn with_gated_loads(self) -> Self {
        let (sender, receiver) = mpsc::channel();
        if let Ok(mut gate) = self.probe.inner.gate.lock() {
            *gate = Some(sender);
        }
        Self {
            gate: Some(receiver),
            ..self
        }
    }

    /// Initialization reports failure, so the worker never enters Running
    pub fn with_failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    fn check_affinity(&self) {
        debug_assert_eq!(
            self.affinity,
            Some(std::thread::current().id()),
            "native object touched off the worker thread"
        );
    }

    fn resolve_artboard<'a>(
        manifest: &'a Manifest,
        selector: &InstanceSelector,
    ) -> Result<&'a ArtboardDef, NativeError> {
        match selector {
            InstanceSelector::Default => manifest
                .artboards
                .first()
                .ok_or_else(|| NativeError::NotFound("file has no artboards".to_string())),
            InstanceSelector::ByName { name } => manifest
                .artboards
                .iter()
                .find(|a| &a.name == name)
                .ok_or_else(|| NativeError::NotFound(format!("artboard '{name}'"))),
            InstanceSelector::ByIndex { index } => manifest
                .artboards
                .get(*index as usize)
                .ok_or_else(|| NativeError::NotFound(format!("artboard index {index}"))),
        }
    }

    fn resolve_state_machine<'a>(
        artboard: &'a FakeArtboard,
        selector: &InstanceSelector,
    ) -> Result<&'a StateMachineDef, NativeError> {
        match selector {
            InstanceSelector::Default => artboard.state_machines.first().ok_or_else(|| {
                NativeError::NotFound(format!("artboard '{}' has no state machines", artboard.name))
            }),
            InstanceSelector::ByName { name } => artboard
                .state_machines
                .iter()
                .find(|m| &m.name == name)
                .ok_or_else(|| NativeError::NotFound(format!("state machine '{name}'"))),
            InstanceSelector::ByIndex { index } => artboard
                .state_machines
                .get(*index as usize)
                .ok_or_else(|| NativeError::NotFound(format!("state machine index {index}"))),
        }
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for FakeEngine {
    type File = FakeFile;
    type Artboard = FakeArtboard;
    type StateMachine = FakeStateMachine;
    type Instance = FakeInstance;
    type Asset = FakeAsset;
    type Surface = FakeSurface;
    type RenderTarget = FakeRenderTarget;

    fn initialize(&mut self) -> Result<(), NativeError> {
        if self.fail_init {
            return Err(NativeError::Operation(
                "initialization forced to fail".to_string(),
            ));
        }
        self.affinity = Some(std::thread::current().id());
        self.probe.inner.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn teardown(&mut self) {
        self.check_affinity();
        self.probe
            .inner
            .teardown_count
            .fetch_add(1, Ordering::SeqCst);
    }

    fn load_file(&mut self, bytes: &[u8]) -> Result<FakeFile, NativeError> {
        self.check_affinity();
        if let Some(gate) = &self.gate {
            // Hold the command in flight until the test opens the gate; a
            // dropped probe releases it.
            let _ = gate.recv();
        }
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| NativeError::Malformed(format!("scene manifest: {e}")))?;
        Ok(FakeFile { manifest })
    }

    fn artboard_names(&mut self, file: &FakeFile) -> Vec<String> {
        self.check_affinity();
        file.manifest.artboards.iter().map(|a| a.name.clone()).collect()
    }

    fn instantiate_artboard(
        &mut self,
        file: &FakeFile,
        selector: &InstanceSelector,
    ) -> Result<FakeArtboard, NativeError> {
        self.check_affinity();
        let def = Self::resolve_artboard(&file.manifest, selector)?;
        Ok(FakeArtboard {
            name: def.name.clone(),
            state_machines: def.state_machines.clone(),
        })
    }

    fn state_machine_names(&mut self, artboard: &FakeArtboard) -> Vec<String> {
        self.check_affinity();
        artboard.state_machines.iter().map(|m| m.name.clone()).collect()
    }

    fn instantiate_state_machine(
        &mut self,
        artboard: &FakeArtboard,
        selector: &InstanceSelector,
    ) -> Result<FakeStateMachine, NativeError> {
        self.check_affinity();
        let def = Self::resolve_state_machine(artboard, selector)?;
        Ok(FakeStateMachine {
            name: def.name.clone(),
            settle_after: def.settle_after,
            elapsed: 0.0,
        })
    }

    fn advance(&mut self, machine: &mut FakeStateMachine, elapsed_secs: f32) -> bool {
        self.check_affinity();
        self.probe.inner.advances.fetch_add(1, Ordering::SeqCst);
        machine.elapsed += elapsed_secs;
        machine.elapsed >= machine.settle_after
    }

    fn bind_instance(
        &mut self,
        file: &FakeFile,
        name: Option<&str>,
    ) -> Result<FakeInstance, NativeError> {
        self.check_affinity();
        let def = match name {
            Some(name) => file
                .manifest
                .view_models
                .iter()
                .find(|v| v.name == name)
                .ok_or_else(|| NativeError::NotFound(format!("view model '{name}'")))?,
            None => match file.manifest.view_models.first() {
                Some(def) => def,
                // A file with no view models still binds an empty default
                // instance; every property read then fails by path.
                None => {
                    return Ok(FakeInstance {
                        properties: HashMap::new(),
                    })
                }
            },
        };
        Ok(FakeInstance {
            properties: def.properties.clone(),
        })
    }

    fn get_property(
        &mut self,
        instance: &FakeInstance,
        path: &str,
        kind: PropertyKind,
    ) -> Result<PropertyValue, NativeError> {
        self.check_affinity();
        let value = instance.properties.get(path).ok_or_else(|| {
            NativeError::PropertyPath {
                path: path.to_string(),
                message: "no such property".to_string(),
            }
        })?;
        if value.kind() != kind {
            return Err(NativeError::PropertyPath {
                path: path.to_string(),
                message: format!("expected {kind}, found {}", value.kind()),
            });
        }
        Ok(value.clone())
    }

    fn set_property(
        &mut self,
        instance: &mut FakeInstance,
        path: &str,
        value: &PropertyValue,
    ) -> Result<(), NativeError> {
        self.check_affinity();
        let slot = instance.properties.get_mut(path).ok_or_else(|| {
            NativeError::PropertyPath {
                path: path.to_string(),
                message: "no such property".to_string(),
            }
        })?;
        if slot.kind() != value.kind() {
            return Err(NativeError::PropertyPath {
                path: path.to_string(),
                message: format!("expected {}, found {}", slot.kind(), value.kind()),
            });
        }
        *slot = value.clone();
        Ok(())
    }

    fn decode_asset(&mut self, kind: AssetKind, bytes: &[u8]) -> Result<FakeAsset, NativeError> {
        self.check_affinity();
        if bytes.is_empty() {
            return Err(NativeError::Malformed("empty asset data".to_string()));
        }
        Ok(FakeAsset {
            kind,
            len: bytes.len(),
        })
    }

    fn register_asset(&mut self, name: &str, _asset: &FakeAsset) -> Result<(), NativeError> {
        self.check_affinity();
        self.registered_assets.insert(name.to_string());
        Ok(())
    }

    fn unregister_asset(&mut self, name: &str) -> Result<(), NativeError> {
        self.check_affinity();
        if !self.registered_assets.remove(name) {
            return Err(NativeError::NotFound(format!("asset '{name}'")));
        }
        Ok(())
    }

    fn create_surface(&mut self, width: u32, height: u32) -> Result<FakeSurface, NativeError> {
        self.check_affinity();
        if width == 0 || height == 0 {
            return Err(NativeError::Operation("zero-sized surface".to_string()));
        }
        Ok(FakeSurface { width, height })
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<FakeRenderTarget, NativeError> {
        self.check_affinity();
        if width == 0 || height == 0 {
            return Err(NativeError::Operation("zero-sized render target".to_string()));
        }
        Ok(FakeRenderTarget { width, height })
    }

    fn resize_render_target(
        &mut self,
        target: &mut FakeRenderTarget,
        width: u32,
        height: u32,
    ) -> Result<(), NativeError> {
        self.check_affinity();
        if width == 0 || height == 0 {
            return Err(NativeError::Operation("zero-sized render target".to_string()));
        }
        target.width = width;
        target.height = height;
        Ok(())
    }

    fn draw(
        &mut self,
        _target: DrawSurface<'_, Self>,
        _clear_color: Option<u32>,
        entries: &[ResolvedDraw<'_, Self>],
    ) -> Result<(), NativeError> {
        self.check_affinity();
        if let Ok(mut batches) = self.probe.inner.draw_batches.lock() {
            batches.push(entries.len());
        }
        Ok(())
    }
}
