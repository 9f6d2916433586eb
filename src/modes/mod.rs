//! Channel modes: descriptors, the registry that applies them, and the
//! merge-time conflict resolver.

mod descriptor;
mod registry;
pub mod resolver;

pub use descriptor::{
    HALFOP_RANK, ListPolicy, ModeDescriptor, ModeKind, OP_RANK, ParamPolicy, PrefixPolicy,
    VOICE_RANK, ValueKind,
};
pub use registry::{Actor, ApplyOutcome, ModeChange, ModeRegistry, ModeRequest};
pub use resolver::{ConflictPolicy, merge_lists, merge_param, resolve};
