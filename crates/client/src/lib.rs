//! Motiv Client - the session facade over the render worker
//!
//! Client threads are free-threaded and never block on the worker: async
//! calls return a [`Pending`] future immediately, fire-and-forget calls
//! return nothing, and all completions, broadcasts and errors are delivered
//! during an explicit once-per-tick [`Session::poll_messages`] call.
//!
//! ```no_run
//! use motiv_client::Session;
//! use motiv_engine::{testing::FakeEngine, BridgeConfig};
//!
//! # async fn example() -> Result<(), motiv_protocol::BridgeError> {
//! let session = Session::new(BridgeConfig::default(), FakeEngine::new);
//! session.acquire("app")?;
//!
//! let (file, _loaded) = session.load_file(b"...".to_vec())?;
//! // The handle is usable immediately; commands execute in enqueue order.
//! let _artboards = session.list_artboards(file)?;
//!
//! // Once per frame:
//! session.poll_messages()?;
//! # Ok(())
//! # }
//! ```

pub mod correlator;
pub mod pending;
pub mod session;
pub mod streams;

pub use correlator::{CommandResult, Correlator};
pub use pending::Pending;
pub use session::Session;
pub use streams::{ErrorStream, PropertyStream, SettleStream};
