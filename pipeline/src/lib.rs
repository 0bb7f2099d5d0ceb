//! The ordered sequence of semantic rewrites applied to every tenant's
//! parsed fragment before it is written to disk.

pub mod context;
pub mod stages;
pub mod walk;

pub use context::{bridge_name, ContainerInfo, GenerationContext, Mount, TenantContext, BRIDGE_PREFIX};

use fluentd::Fragment;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Message(String),
}

impl StageError {
    pub fn new(msg: impl Into<String>) -> Self {
        StageError::Message(msg.into())
    }
}

/// A single ordered step of the pipeline. Every stage implements all three
/// phases, most as no-ops: `prepare` may emit entrypoint-level directives
/// and mutate the shared generation context; `process` produces the
/// tenant's own rewritten tree; `validation_trailer` supplies directives
/// appended only when validating the tenant in isolation.
pub trait Stage {
    fn name(&self) -> &'static str;

    fn prepare(
        &mut self,
        _input: &Fragment,
        _tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        input: Fragment,
        tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError>;

    fn validation_trailer(&self, _tenant: &TenantContext, _gen: &GenerationContext) -> Fragment {
        Vec::new()
    }
}

/// Builds the pipeline in its fixed, spec-mandated order.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(stages::plugin_alias::PluginAliasStage::default()),
        Box::new(stages::tag_expansion::TagExpansionStage::default()),
        Box::new(stages::thisns::ThisNsStage),
        Box::new(stages::destinations::DestinationsStage),
        Box::new(stages::labels::LabelSelectorStage),
        Box::new(stages::retag::RetagStage),
        Box::new(stages::mounted_file::MountedFileStage),
        Box::new(stages::detect_exceptions::DetectExceptionsStage),
        Box::new(stages::relabel::RelabelStage),
        Box::new(stages::share::ShareStage),
    ]
}

/// Runs Prepare over every stage for one tenant, in pipeline order,
/// collecting the directives destined for the entrypoint file.
pub fn prepare_tenant(
    stages: &mut [Box<dyn Stage>],
    input: &Fragment,
    tenant: &TenantContext,
    gen: &mut GenerationContext,
) -> Result<Fragment, StageError> {
    let mut preamble = Vec::new();
    for stage in stages.iter_mut() {
        preamble.extend(stage.prepare(input, tenant, gen)?);
    }
    Ok(preamble)
}

/// Runs Process over every stage for one tenant, in pipeline order,
/// threading the rewritten tree from one stage into the next.
pub fn process_tenant(
    stages: &mut [Box<dyn Stage>],
    mut input: Fragment,
    tenant: &TenantContext,
    gen: &mut GenerationContext,
) -> Result<Fragment, StageError> {
    for stage in stages.iter_mut() {
        input = stage.process(input, tenant, gen)?;
    }
    Ok(input)
}

/// Collects every stage's validation trailer for one tenant, in pipeline
/// order.
pub fn validation_trailer(
    stages: &[Box<dyn Stage>],
    tenant: &TenantContext,
    gen: &GenerationContext,
) -> Fragment {
    stages
        .iter()
        .flat_map(|s| s.validation_trailer(tenant, gen))
        .collect()
}
