//! `cmdseq-engine` — asynchronous execution engine for compiled command
//! sequences.
//!
//! # Architecture
//!
//! ```text
//! Sequencer        ← operator surface: validate / run / start / step /
//!     │              cancel / joint_wait; owns mode + current sequence
//!     ▼
//! RunRegistry      ← identity-keyed handles, one lock, map ops only
//!     │
//!     ▼
//! SequenceMachine  ← one task per loaded sequence; select! over operator
//!     │              commands, dispatch results, and a scheduler tick
//!     ▼
//! DispatchGateway  ← mpsc to the external command router; correlation-id
//!                    demux; bounded wait with synthetic timeouts
//! ```
//!
//! Within one sequence, records dispatch in strictly increasing index
//! order and never overlap: record N+1 waits for record N's result.
//! Across sequences there is no ordering; `joint_wait` is the only
//! aggregation point.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use cmdseq_core::{BlockMode, CommandDictionary};
//! use cmdseq_engine::{DispatchGateway, EngineConfig, Sequencer};
//!
//! let config = EngineConfig::default();
//! let gateway = DispatchGateway::loopback(config.channel_capacity, config.dispatch_timeout());
//! let sequencer = Sequencer::new(gateway, dictionary, config);
//!
//! let outcome = sequencer.run(path, BlockMode::Block).await?;
//! println!("sequence finished: {outcome}");
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod registry;
pub mod scheduler;
pub mod sequencer;

pub(crate) mod machine;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{StatusBus, StatusStream};
pub use gateway::{
    CommandRequest, DispatchGateway, DispatchOutcome, DispatchResult, PendingDispatch,
    RouterChannel, RouterReply,
};
pub use registry::{RunRegistry, SequenceHandle};
pub use sequencer::Sequencer;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, EngineError>;
