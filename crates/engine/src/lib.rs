//! Motiv Engine - the render worker and everything it owns
//!
//! One dedicated OS thread owns the native rendering context, every native
//! object (behind the resource registry) and the command dispatch loop.
//! Client threads talk to it exclusively through the command channel and
//! read results off the message channel; the subscription registry is the
//! one other sanctioned point of cross-thread sharing.
//!
//! The native engine itself is an external collaborator behind the
//! [`native::NativeEngine`] trait; [`testing::FakeEngine`] is a
//! deterministic double of it for tests.

pub mod config;
pub mod native;
pub mod registry;
pub mod server;
pub mod subscriptions;
pub mod testing;

pub use config::BridgeConfig;
pub use native::{DrawSurface, NativeEngine, NativeError, ResolvedDraw};
pub use registry::{ResourceRegistry, StateMachineSlot};
pub use server::{spawn, ServerShared, ServerState, SpawnedServer};
pub use subscriptions::{PropertyEvent, SubscriptionRegistry};
