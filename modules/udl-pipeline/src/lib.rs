mod plugin;
mod runner;

pub use plugin::{Plugin, UpdateStrategy};
pub use runner::SourcePipeline;
