//! Cross-thread cells shared between the block path and the model fitter.
//!
//! The block path only ever tries the snapshot lock and never waits on the
//! fitter. Coefficients travel through a lock-free double buffer.

pub mod coefficients;
pub mod snapshot;
pub mod state;

pub use coefficients::CoefficientCell;
pub use snapshot::SnapshotCell;
pub use state::{ChannelState, StateCell};
