//! Legacy type-name registry for artifact loading
//!
//! Exporters from earlier pipeline epochs wrote the module path of the
//! preprocessing classes into the manifest. Those modules have been renamed
//! several times; this registry maps every name ever emitted onto the
//! stand-in definitions the loader understands. It is only consulted while
//! an artifact is loaded.

use std::collections::HashMap;
use tracing::debug;

use crate::artifact::{ArtifactFormatError, Manifest, TransformSpec};

/// Newest manifest epoch this build can read
pub const CURRENT_EPOCH: u32 = 3;

/// Preprocessing transform stand-ins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// Resize to the model input size
    Resize,
    /// Convert u8 channels to f32, dividing by a constant
    IntToFloat,
    /// Per-channel mean/std normalization
    Normalize,
    /// Layout marker; the loader always produces NCHW tensors
    ToTensor,
}

impl TransformKind {
    pub fn canonical_name(&self) -> &'static str {
        match self {
            TransformKind::Resize => "Resize",
            TransformKind::IntToFloat => "IntToFloatTensor",
            TransformKind::Normalize => "Normalize",
            TransformKind::ToTensor => "ToTensor",
        }
    }
}

/// What a serialized type name stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandIn {
    /// Ordered composition of transforms
    Pipeline,
    Transform(TransformKind),
}

impl StandIn {
    pub fn canonical_name(&self) -> &'static str {
        match self {
            StandIn::Pipeline => "Pipeline",
            StandIn::Transform(kind) => kind.canonical_name(),
        }
    }
}

const CANONICAL: [StandIn; 5] = [
    StandIn::Pipeline,
    StandIn::Transform(TransformKind::Resize),
    StandIn::Transform(TransformKind::IntToFloat),
    StandIn::Transform(TransformKind::Normalize),
    StandIn::Transform(TransformKind::ToTensor),
];

/// Names written by epoch 1 (fastai2 preview) and epoch 2 (fastcore split) exporters
const LEGACY: &[(&str, StandIn)] = &[
    ("fastai2.core.transform.Pipeline", StandIn::Pipeline),
    ("fastai2.vision.augment.Resize", StandIn::Transform(TransformKind::Resize)),
    ("fastai2.data.transforms.IntToFloatTensor", StandIn::Transform(TransformKind::IntToFloat)),
    ("fastai2.data.transforms.Normalize", StandIn::Transform(TransformKind::Normalize)),
    ("fastai2.vision.core.ToTensor", StandIn::Transform(TransformKind::ToTensor)),
    ("fastcore.transform.Pipeline", StandIn::Pipeline),
    ("fastai.vision.augment.Resize", StandIn::Transform(TransformKind::Resize)),
    ("fastai.data.transforms.IntToFloatTensor", StandIn::Transform(TransformKind::IntToFloat)),
    ("fastai.data.transforms.Normalize", StandIn::Transform(TransformKind::Normalize)),
    ("fastai.vision.core.ToTensor", StandIn::Transform(TransformKind::ToTensor)),
    ("fastai.data.transforms.ToTensor", StandIn::Transform(TransformKind::ToTensor)),
];

/// Manifest pipeline after name resolution
#[derive(Debug)]
pub struct ResolvedPipeline<'a> {
    /// Transforms in application order
    pub transforms: Vec<(TransformKind, &'a TransformSpec)>,
    /// Number of names that needed a legacy alias
    pub legacy_names: usize,
}

/// Maps serialized type names to stand-ins
#[derive(Debug, Clone)]
pub struct ShimRegistry {
    entries: HashMap<String, StandIn>,
}

impl ShimRegistry {
    /// Registry that only knows the current names
    pub fn current() -> Self {
        let entries = CANONICAL
            .iter()
            .map(|s| (s.canonical_name().to_string(), *s))
            .collect();
        Self { entries }
    }

    /// Current names plus every legacy alias
    pub fn builtin() -> Self {
        let mut registry = Self::current();
        for (name, stand_in) in LEGACY {
            registry.register(*name, *stand_in);
        }
        registry
    }

    /// Add or replace an alias
    pub fn register(&mut self, name: impl Into<String>, stand_in: StandIn) {
        self.entries.insert(name.into(), stand_in);
    }

    pub fn lookup(&self, name: &str) -> Option<StandIn> {
        self.entries.get(name).copied()
    }

    /// Resolve the manifest's pipeline and transform names
    pub fn resolve<'a>(
        &self,
        manifest: &'a Manifest,
    ) -> Result<ResolvedPipeline<'a>, ArtifactFormatError> {
        if manifest.epoch == 0 || manifest.epoch > CURRENT_EPOCH {
            return Err(ArtifactFormatError::UnsupportedEpoch {
                epoch: manifest.epoch,
                current: CURRENT_EPOCH,
            });
        }

        let mut legacy_names = 0;
        let mut resolve_name = |name: &str| -> Result<StandIn, ArtifactFormatError> {
            let stand_in = self
                .lookup(name)
                .ok_or_else(|| ArtifactFormatError::UnknownType(name.to_string()))?;
            if name != stand_in.canonical_name() {
                debug!("Resolved legacy type {} -> {}", name, stand_in.canonical_name());
                legacy_names += 1;
            }
            Ok(stand_in)
        };

        let pipeline_type = &manifest.pipeline.type_name;
        if resolve_name(pipeline_type)? != StandIn::Pipeline {
            return Err(ArtifactFormatError::Pipeline(format!(
                "{} is not a pipeline type",
                pipeline_type
            )));
        }

        let mut transforms = Vec::with_capacity(manifest.pipeline.transforms.len());
        for spec in &manifest.pipeline.transforms {
            match resolve_name(&spec.type_name)? {
                StandIn::Transform(kind) => transforms.push((kind, spec)),
                StandIn::Pipeline => {
                    return Err(ArtifactFormatError::Pipeline(
                        "nested pipelines are not supported".to_string(),
                    ))
                }
            }
        }

        Ok(ResolvedPipeline {
            transforms,
            legacy_names,
        })
    }
}

impl Default for ShimRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
