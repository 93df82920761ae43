//! # tl-tuner
//!
//! Client-side controller for a remote hyperparameter tuning experiment.
//!
//! A [`Tuner`] keeps a [`LocalCache`] of the experiment's jobs in step with
//! a [`tl_remote::RemoteStore`], hands out suggestions from the remote
//! optimizer and reports outcomes back.
//!
//! ```no_run
//! use tl_remote::MemoryStore;
//! use tl_tuner::{Tuner, TunerOptions};
//! use tl_types::ExperimentSpec;
//!
//! # async fn run() -> tl_types::TlResult<()> {
//! let spec = ExperimentSpec::new("glmnet", "Negative deviance")
//!     .add_float("Lambda", 1e-4, 0.75)
//!     .add_float("Alpha", 1e-4, 1.0);
//! let tuner = Tuner::create(MemoryStore::with_defaults(), spec, TunerOptions::default()).await?;
//!
//! let job = tuner.suggest().await?;
//! tuner.update(&job, -0.42).await?;
//! let best = tuner.best().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod logging;
pub mod poll;
pub mod sync;
pub mod tuner;

pub use cache::{CacheSnapshot, CacheStats, LocalCache};
pub use logging::{init_logging, parse_filter, LogFormat, DEFAULT_LOG_LEVEL};
pub use poll::{await_suggestion, PollPolicy};
pub use sync::{decode_result, SyncOptions, Synchronizer, UNBOUNDED_PAGE_SIZE};
pub use tuner::{Tuner, TunerOptions};
