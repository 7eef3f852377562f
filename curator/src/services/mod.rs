mod context;
mod memory;

pub use context::{AssembledContext, ContextAssembler};
pub use memory::{BatchUpsertError, MemoryService};
