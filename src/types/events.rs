//! Domain events: a closed enum delivered over a typed broadcast channel.
//!
//! Replaces string-keyed pub/sub: every observable state change in the
//! engine is one of these variants, so consumers match exhaustively and the
//! compiler catches a missed event kind.

use super::CircuitState;
use serde::{Deserialize, Serialize};

/// Events emitted by the engine's components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// An analysis pass for one stream finished and its report was cached.
    AnalysisComplete { stream_id: String },
    /// The circuit breaker changed state. Flow control, not an error.
    CircuitTransition {
        from: CircuitState,
        to: CircuitState,
    },
    /// A stream was unregistered; its matrix entries were purged.
    StreamRemoved { stream_id: String },
    /// The backpressure controller shed samples in the last batch.
    SamplesShed { count: u64 },
}
