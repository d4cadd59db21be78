// Artifacts
// Canonical naming, on-disk encoding and the create-if-absent gate

pub mod codec;
pub mod gate;
pub mod naming;

pub use codec::{CodecError, DatasetCodec, JsonCodec};
pub use gate::{ArtifactGate, GateError, WriteOutcome};
pub use naming::{ArtifactKey, Member, NamingError, Period, Resolution, StageDir};
