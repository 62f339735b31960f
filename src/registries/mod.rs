mod command_checker;
mod http_generator;
mod process_generator;
mod prompt_registry;
pub mod subprocess;

pub use command_checker::CommandChecker;
pub use http_generator::HttpGenerator;
pub use process_generator::ProcessGenerator;
pub use prompt_registry::{fill_placeholders, PromptRegistry};

use crate::config::{EngineConfig, GeneratorKind};
use crate::contexts::{CachedGenerator, FileCompletionCache};
use crate::data::TextGenerator;
use crate::error::ServiceError;
use std::path::Path;

/// Builds the configured text generator, wrapped in the completion cache when enabled.
pub fn generator_from_config(
    config: &EngineConfig,
    root: &Path,
) -> Result<Box<dyn TextGenerator>, ServiceError> {
    let generator: Box<dyn TextGenerator> = match config.generator.kind {
        GeneratorKind::Http => Box::new(HttpGenerator::new(&config.generator)?),
        GeneratorKind::Command => Box::new(
            ProcessGenerator::from_config(&config.generator).ok_or_else(|| {
                ServiceError::Transport("generator kind 'command' needs a command".to_string())
            })?,
        ),
    };

    if !config.cache.enabled {
        return Ok(generator);
    }
    let folder = root.join(&config.cache.folder);
    tracing::debug!(folder = %folder.display(), "completion cache enabled");
    Ok(Box::new(CachedGenerator::new(
        generator,
        FileCompletionCache::new(folder, &config.generator.model),
    )))
}

/// Checker for the project at `root`, writing its temporary copies under the state directory.
pub fn checker_from_config(config: &EngineConfig, root: &Path) -> CommandChecker {
    CommandChecker::from_config(&config.checker)
        .with_work_dir(root.join(crate::config::STATE_DIR).join("check"))
}
