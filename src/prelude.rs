//! Prelude module that re-exports commonly used types and traits.
//!
//! Instead of importing each type individually, you can use:
//!
//! ```rust
//! use sequencer_rs::prelude::*;
//! ```

// Engine
pub use crate::sequencer::{Sequencer, Status};

// Configuration
pub use crate::sequencer::{Params, RetryPolicy};

// Errors
pub use crate::sequencer::{SequencerError, StorageError};

// Storage
pub use crate::sequencer::{MemStorage, SeqStorage, StorageOp};

// Value types
pub use crate::sequencer::{Number, NumberKey, PLogOffset, SeqId, SeqValue, WsId, WsKind};
