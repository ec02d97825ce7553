mod registry;
mod selectors;

pub use registry::{Capability, ModelCatalog, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
