mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, ModelTier, DRYRUN_PREFIX, FLASH_MODEL, PRO_MODEL, REFINE_MODEL,
};
pub use selectors::{distribute_models, ModelSelection, ModelSelector};
