//! Assembly of an engine from a configuration.

use log::info;

use super::ReconEngine;
use crate::config::ReconConfig;
use crate::error::ReconResult;
use crate::interactor::Interactor;
use crate::module::{ModuleItem, ModuleRegistry};
use crate::reader::ProjectionReader;

pub struct EngineFactory;

impl EngineFactory {

    /// An engine holding the modules named in `config`, looked up in
    /// `registry`, with a copy of `config` as its configuration.
    pub fn build_engine(
        config    : &ReconConfig,
        registry  : &ModuleRegistry,
        reader    : Box<dyn ProjectionReader>,
        interactor: Box<dyn Interactor>,
    ) -> ReconResult<ReconEngine> {
        config.validate()?;
        let mut engine = ReconEngine::new(reader, interactor);
        for stage in &config.preprocessing {
            let module = registry.preprocessor(&stage.name)?;
            engine.add_preproc_module(ModuleItem::new(module, stage.parameters.clone()));
        }
        let bp = &config.backprojector;
        engine.set_back_projector(ModuleItem::new(registry.back_projector(&bp.name)?, bp.parameters.clone()));
        engine.set_config(config.clone());

        let chain = config.preprocessing.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(" -> ");
        info!("Engine built: {chain} => {}", bp.name);
        Ok(engine)
    }
}
