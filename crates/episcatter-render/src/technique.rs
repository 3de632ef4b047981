//! Technique table and compiled-technique cache.
//!
//! Each pass is a technique: a shader program specialized by a set of
//! compile-time macros derived from the configuration. The table below
//! declares, per technique, which configuration fields feed its macros,
//! how it uses the tag (stencil) surface, and its blend mode. A technique is
//! compiled lazily on first use and dropped from the cache when any field it
//! depends on changes. A cache bound to a device also builds the WGSL
//! program and its pipelines.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use episcatter_core::{ConfigDiff, ConfigField, PostProcessConfig};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{build_program, programs, GpuDevice, GpuProgram};
use crate::quad::{BlendMode, TagRule};
use crate::surface::{PixelTag, SampleTag};

use ConfigField as F;

/// Identifies one pass program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TechniqueId {
    ReconstructCameraSpaceZ,
    RenderSliceEndpoints,
    RenderCoordinateTexture,
    RefineSampleLocations,
    MarkRayMarchingSamples,
    RenderSliceUvDirection,
    InitializeMinMaxShadowMap,
    ComputeMinMaxShadowMapLevel,
    RayMarch,
    RayMarchMinMax,
    InterpolateIrradiance,
    UnwarpEpipolarScattering,
    ApplyInscatteredRadiance,
    FixInscattering,
    FixAndApplyInscattering,
    UpscaleInscattering,
    RenderSampleLocations,
    PrecomputePointLightInscattering,
}

impl TechniqueId {
    pub const ALL: [TechniqueId; 18] = [
        TechniqueId::ReconstructCameraSpaceZ,
        TechniqueId::RenderSliceEndpoints,
        TechniqueId::RenderCoordinateTexture,
        TechniqueId::RefineSampleLocations,
        TechniqueId::MarkRayMarchingSamples,
        TechniqueId::RenderSliceUvDirection,
        TechniqueId::InitializeMinMaxShadowMap,
        TechniqueId::ComputeMinMaxShadowMapLevel,
        TechniqueId::RayMarch,
        TechniqueId::RayMarchMinMax,
        TechniqueId::InterpolateIrradiance,
        TechniqueId::UnwarpEpipolarScattering,
        TechniqueId::ApplyInscatteredRadiance,
        TechniqueId::FixInscattering,
        TechniqueId::FixAndApplyInscattering,
        TechniqueId::UpscaleInscattering,
        TechniqueId::RenderSampleLocations,
        TechniqueId::PrecomputePointLightInscattering,
    ];

    /// Static description of this technique.
    pub fn desc(self) -> &'static TechniqueDesc {
        &TECHNIQUES[self as usize]
    }
}

/// Which pipeline stages a technique's program runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Compute,
    /// Rasterized sprites composited by a compute kernel.
    PointSprite,
}

/// How a technique uses one of the tag surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilRule {
    Disabled,
    Sample(TagRule<SampleTag>),
    Pixel(TagRule<PixelTag>),
}

/// Static description of a technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechniqueDesc {
    pub id: TechniqueId,
    pub entry_point: &'static str,
    pub program: &'static str,
    pub kind: ProgramKind,
    /// Configuration fields baked into the program as macros.
    pub defines: &'static [ConfigField],
    pub stencil: StencilRule,
    pub blend: BlendMode,
}

const fn sample_rule(require: Option<SampleTag>, write: Option<SampleTag>) -> StencilRule {
    StencilRule::Sample(TagRule { require, write })
}

const fn pixel_rule(require: Option<PixelTag>, write: Option<PixelTag>) -> StencilRule {
    StencilRule::Pixel(TagRule { require, write })
}

/// Indexed by `TechniqueId as usize`.
pub static TECHNIQUES: [TechniqueDesc; 18] = [
    TechniqueDesc {
        id: TechniqueId::ReconstructCameraSpaceZ,
        entry_point: "reconstruct_camera_space_z",
        program: "camera_z",
        kind: ProgramKind::Compute,
        defines: &[],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RenderSliceEndpoints,
        entry_point: "generate_slice_endpoints",
        program: "slice_endpoints",
        kind: ProgramKind::Compute,
        defines: &[
            F::NumEpipolarSlices,
            F::MaxSamplesInSlice,
            F::OptimizeSampleLocations,
            F::ScreenResolution,
        ],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RenderCoordinateTexture,
        entry_point: "generate_coordinate_texture",
        program: "coordinates",
        kind: ProgramKind::Compute,
        defines: &[F::MaxSamplesInSlice],
        stencil: sample_rule(None, Some(SampleTag::Interpolated)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RefineSampleLocations,
        entry_point: "refine_sample_locations",
        program: "refinement",
        kind: ProgramKind::Compute,
        defines: &[F::MaxSamplesInSlice, F::InitialSampleStep],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::MarkRayMarchingSamples,
        entry_point: "mark_ray_marching_samples",
        program: "mark_samples",
        kind: ProgramKind::Compute,
        defines: &[],
        stencil: sample_rule(Some(SampleTag::Interpolated), Some(SampleTag::Reference)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RenderSliceUvDirection,
        entry_point: "render_slice_uv_direction",
        program: "slice_uv_direction",
        kind: ProgramKind::Compute,
        defines: &[F::LightType],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::InitializeMinMaxShadowMap,
        entry_point: "initialize_min_max_shadow_map",
        program: "min_max",
        kind: ProgramKind::Compute,
        defines: &[F::AccelStruct],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::ComputeMinMaxShadowMapLevel,
        entry_point: "compute_min_max_shadow_map_level",
        program: "min_max",
        kind: ProgramKind::Compute,
        defines: &[F::AccelStruct],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RayMarch,
        entry_point: "ray_march",
        program: "ray_march",
        kind: ProgramKind::Compute,
        defines: &[
            F::StainedGlass,
            F::LightType,
            F::AccelStruct,
            F::InscatteringMethod,
            F::AnisotropicPhaseFunction,
        ],
        stencil: sample_rule(Some(SampleTag::Reference), None),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RayMarchMinMax,
        entry_point: "ray_march_min_max",
        program: "ray_march",
        kind: ProgramKind::Compute,
        defines: &[
            F::StainedGlass,
            F::LightType,
            F::AccelStruct,
            F::InscatteringMethod,
            F::AnisotropicPhaseFunction,
        ],
        stencil: sample_rule(Some(SampleTag::Reference), None),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::InterpolateIrradiance,
        entry_point: "interpolate_irradiance",
        program: "interpolate",
        kind: ProgramKind::Compute,
        defines: &[],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::UnwarpEpipolarScattering,
        entry_point: "unwarp_epipolar_scattering",
        program: "unwarp",
        kind: ProgramKind::Compute,
        defines: &[
            F::NumEpipolarSlices,
            F::MaxSamplesInSlice,
            F::LightType,
            F::ScreenResolution,
        ],
        stencil: pixel_rule(None, Some(PixelTag::Resolved)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::ApplyInscatteredRadiance,
        entry_point: "apply_inscattered_radiance",
        program: "unwarp",
        kind: ProgramKind::Compute,
        defines: &[
            F::NumEpipolarSlices,
            F::MaxSamplesInSlice,
            F::LightType,
            F::ScreenResolution,
        ],
        stencil: pixel_rule(None, Some(PixelTag::Resolved)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::FixInscattering,
        entry_point: "fix_inscattering",
        program: "fix",
        kind: ProgramKind::Compute,
        defines: &[
            F::StainedGlass,
            F::LightType,
            F::InscatteringMethod,
            F::AnisotropicPhaseFunction,
        ],
        stencil: pixel_rule(Some(PixelTag::Unresolved), Some(PixelTag::Resolved)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::FixAndApplyInscattering,
        entry_point: "fix_and_apply_inscattering",
        program: "fix",
        kind: ProgramKind::Compute,
        defines: &[
            F::StainedGlass,
            F::LightType,
            F::InscatteringMethod,
            F::AnisotropicPhaseFunction,
        ],
        stencil: pixel_rule(Some(PixelTag::Unresolved), Some(PixelTag::Resolved)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::UpscaleInscattering,
        entry_point: "upscale_inscattering",
        program: "upscale",
        kind: ProgramKind::Compute,
        defines: &[F::LightType],
        stencil: pixel_rule(None, Some(PixelTag::Resolved)),
        blend: BlendMode::Replace,
    },
    TechniqueDesc {
        id: TechniqueId::RenderSampleLocations,
        entry_point: "render_sample_locations",
        program: "sample_locations",
        kind: ProgramKind::PointSprite,
        defines: &[
            F::ScreenResolution,
            F::NumEpipolarSlices,
            F::MaxSamplesInSlice,
        ],
        stencil: StencilRule::Disabled,
        blend: BlendMode::AlphaOver,
    },
    TechniqueDesc {
        id: TechniqueId::PrecomputePointLightInscattering,
        entry_point: "precompute_point_light_inscattering",
        program: "precompute_inscattering",
        kind: ProgramKind::Compute,
        defines: &[F::InscatteringMethod, F::AnisotropicPhaseFunction],
        stencil: StencilRule::Disabled,
        blend: BlendMode::Replace,
    },
];

/// Screen size the macros are specialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Compile-time macro definitions of a technique.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MacroSet(BTreeMap<&'static str, u32>);

impl MacroSet {
    /// Macros for `desc` under `config`.
    pub fn for_technique(desc: &TechniqueDesc, config: &PostProcessConfig, screen: ScreenSize) -> Self {
        let mut macros = BTreeMap::new();
        for field in desc.defines {
            match field {
                F::NumEpipolarSlices => {
                    macros.insert("NUM_EPIPOLAR_SLICES", config.num_epipolar_slices);
                }
                F::MaxSamplesInSlice => {
                    macros.insert("MAX_SAMPLES_IN_SLICE", config.max_samples_in_slice);
                }
                F::InitialSampleStep => {
                    macros.insert("INITIAL_SAMPLE_STEP", config.initial_sample_step_in_slice);
                }
                F::OptimizeSampleLocations => {
                    macros.insert(
                        "OPTIMIZE_SAMPLE_LOCATIONS",
                        u32::from(config.optimize_sample_locations),
                    );
                }
                F::LightType => {
                    macros.insert("LIGHT_TYPE", config.light_type.macro_value());
                }
                F::StainedGlass => {
                    macros.insert("STAINED_GLASS", u32::from(config.stained_glass));
                }
                F::AccelStruct => {
                    macros.insert("ACCEL_STRUCT", config.accel_struct.macro_value());
                }
                F::InscatteringMethod => {
                    macros.insert(
                        "INSCTR_INTGL_EVAL_METHOD",
                        config.inscattering_method.macro_value(),
                    );
                }
                F::AnisotropicPhaseFunction => {
                    macros.insert(
                        "ANISOTROPIC_PHASE_FUNCTION",
                        u32::from(config.anisotropic_phase_function),
                    );
                }
                F::ScreenResolution => {
                    macros.insert("SCREEN_WIDTH", screen.width);
                    macros.insert("SCREEN_HEIGHT", screen.height);
                }
                _ => {}
            }
        }
        if desc.id == TechniqueId::RefineSampleLocations {
            macros.insert(
                "THREAD_GROUP_SIZE",
                refinement_group_size(config.max_samples_in_slice, config.initial_sample_step_in_slice),
            );
        }
        Self(macros)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Number of samples refined together: `min(max(128, step), samples)`.
pub fn refinement_group_size(samples_in_slice: u32, initial_step: u32) -> u32 {
    initial_step.max(128).min(samples_in_slice)
}

/// A technique specialized for one set of macros.
#[derive(Debug)]
pub struct CompiledTechnique {
    pub desc: &'static TechniqueDesc,
    pub macros: MacroSet,
    /// Device program, when compiled for a device.
    pub program: Option<GpuProgram>,
}

impl CompiledTechnique {
    pub fn id(&self) -> TechniqueId {
        self.desc.id
    }

    pub fn blend(&self) -> BlendMode {
        self.desc.blend
    }

    /// Sample-tag rule; `always` when the technique does not use sample tags.
    pub fn sample_rule(&self) -> TagRule<SampleTag> {
        match self.desc.stencil {
            StencilRule::Sample(rule) => rule,
            _ => TagRule::always(),
        }
    }

    /// Pixel-tag rule; `always` when the technique does not use pixel tags.
    pub fn pixel_rule(&self) -> TagRule<PixelTag> {
        match self.desc.stencil {
            StencilRule::Pixel(rule) => rule,
            _ => TagRule::always(),
        }
    }

    fn macro_or_err(&self, name: &str) -> RenderResult<u32> {
        self.macros.get(name).ok_or_else(|| {
            RenderError::ShaderCompilationFailed(format!(
                "{}: undefined macro {name}",
                self.desc.entry_point
            ))
        })
    }
}

/// Specializes `desc` for `macros`, rejecting combinations the program
/// cannot be built for. With a device, the WGSL program is assembled and
/// its pipelines created; any error the device reports fails the compile.
pub fn compile(
    desc: &'static TechniqueDesc,
    macros: MacroSet,
    gpu: Option<&GpuDevice>,
) -> RenderResult<CompiledTechnique> {
    let mut technique = CompiledTechnique {
        desc,
        macros,
        program: None,
    };
    let fail = |msg: String| {
        Err(RenderError::ShaderCompilationFailed(format!(
            "{}: {msg}",
            desc.entry_point
        )))
    };
    for (name, value) in technique.macros.iter() {
        let must_be_positive = matches!(
            name,
            "NUM_EPIPOLAR_SLICES" | "SCREEN_WIDTH" | "SCREEN_HEIGHT" | "INITIAL_SAMPLE_STEP"
        );
        if must_be_positive && value == 0 {
            return fail(format!("{name} must be positive"));
        }
    }
    if let Some(samples) = technique.macros.get("MAX_SAMPLES_IN_SLICE") {
        if samples < 2 {
            return fail(format!("MAX_SAMPLES_IN_SLICE = {samples} is below 2"));
        }
        if samples > u32::from(u16::MAX) + 1 {
            return fail(format!(
                "MAX_SAMPLES_IN_SLICE = {samples} does not fit 16-bit sample indices"
            ));
        }
    }
    if desc.id == TechniqueId::RefineSampleLocations {
        let samples = technique.macro_or_err("MAX_SAMPLES_IN_SLICE")?;
        let step = technique.macro_or_err("INITIAL_SAMPLE_STEP")?;
        let group = technique.macro_or_err("THREAD_GROUP_SIZE")?;
        if !step.is_power_of_two() {
            return fail(format!("INITIAL_SAMPLE_STEP = {step} is not a power of two"));
        }
        if group % step != 0 {
            return fail(format!(
                "THREAD_GROUP_SIZE = {group} is not a multiple of INITIAL_SAMPLE_STEP = {step}"
            ));
        }
        if samples % group != 0 {
            return fail(format!(
                "THREAD_GROUP_SIZE = {group} does not divide MAX_SAMPLES_IN_SLICE = {samples}"
            ));
        }
    }
    if let Some(gpu) = gpu {
        let source = programs::assemble(desc, &technique.macros)?;
        technique.program = Some(build_program(gpu, desc, &source)?);
    }
    Ok(technique)
}

/// Lazily compiled techniques keyed by id.
#[derive(Debug, Default)]
pub struct TechniqueCache {
    gpu: Option<Arc<GpuDevice>>,
    compiled: HashMap<TechniqueId, CompiledTechnique>,
    compile_counts: HashMap<TechniqueId, u32>,
}

impl TechniqueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose techniques carry device programs.
    pub fn for_device(gpu: Arc<GpuDevice>) -> Self {
        Self {
            gpu: Some(gpu),
            ..Self::default()
        }
    }

    /// Returns the compiled technique, compiling it first if needed.
    pub fn get_or_compile(
        &mut self,
        id: TechniqueId,
        config: &PostProcessConfig,
        screen: ScreenSize,
    ) -> RenderResult<&CompiledTechnique> {
        if !self.compiled.contains_key(&id) {
            let desc = id.desc();
            let macros = MacroSet::for_technique(desc, config, screen);
            let technique = compile(desc, macros, self.gpu.as_deref())?;
            log::info!(
                "compiled technique {:?} ({} macros)",
                id,
                technique.macros.len()
            );
            *self.compile_counts.entry(id).or_insert(0) += 1;
            self.compiled.insert(id, technique);
        }
        self.get(id)
    }

    /// Returns an already compiled technique.
    pub fn get(&self, id: TechniqueId) -> RenderResult<&CompiledTechnique> {
        self.compiled
            .get(&id)
            .ok_or_else(|| RenderError::TechniqueNotCompiled(format!("{id:?}")))
    }

    pub fn is_compiled(&self, id: TechniqueId) -> bool {
        self.compiled.contains_key(&id)
    }

    /// Drops every technique whose macros depend on a changed field.
    /// Returns the number of techniques dropped.
    pub fn invalidate(&mut self, diff: ConfigDiff) -> usize {
        let before = self.compiled.len();
        self.compiled
            .retain(|id, _| !diff.intersects(id.desc().defines));
        let dropped = before - self.compiled.len();
        if dropped > 0 {
            log::debug!("invalidated {dropped} techniques");
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.compiled.clear();
    }

    /// Number of times `id` has been compiled.
    pub fn compile_count(&self, id: TechniqueId) -> u32 {
        self.compile_counts.get(&id).copied().unwrap_or(0)
    }

    pub fn total_compiles(&self) -> u32 {
        self.compile_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen() -> ScreenSize {
        ScreenSize {
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_table_is_indexed_by_id() {
        for id in TechniqueId::ALL {
            assert_eq!(id.desc().id, id);
        }
    }

    #[test]
    fn test_refinement_macros() {
        let config = PostProcessConfig::default().with_samples(512).with_initial_step(16);
        let macros = MacroSet::for_technique(TechniqueId::RefineSampleLocations.desc(), &config, screen());
        assert_eq!(macros.get("THREAD_GROUP_SIZE"), Some(128));
        assert_eq!(macros.get("INITIAL_SAMPLE_STEP"), Some(16));
        assert_eq!(macros.get("NUM_EPIPOLAR_SLICES"), None);
        assert_eq!(refinement_group_size(64, 16), 64);
        assert_eq!(refinement_group_size(1024, 256), 256);
    }

    #[test]
    fn test_refinement_compile_rejects_bad_group() {
        let config = PostProcessConfig::default().with_samples(64).with_initial_step(24);
        let mut cache = TechniqueCache::new();
        let err = cache
            .get_or_compile(TechniqueId::RefineSampleLocations, &config, screen())
            .unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(_)));
        assert_eq!(cache.compile_count(TechniqueId::RefineSampleLocations), 0);

        let config = PostProcessConfig::default().with_samples(192).with_initial_step(16);
        assert!(cache
            .get_or_compile(TechniqueId::RefineSampleLocations, &config, screen())
            .is_err());
    }

    #[test]
    fn test_cache_compiles_once() {
        let config = PostProcessConfig::default();
        let mut cache = TechniqueCache::new();
        cache
            .get_or_compile(TechniqueId::RayMarch, &config, screen())
            .unwrap();
        cache
            .get_or_compile(TechniqueId::RayMarch, &config, screen())
            .unwrap();
        assert_eq!(cache.compile_count(TechniqueId::RayMarch), 1);
        assert!(cache.get(TechniqueId::UpscaleInscattering).is_err());
    }

    #[test]
    fn test_invalidate_follows_dependencies() {
        let config = PostProcessConfig::default();
        let mut cache = TechniqueCache::new();
        for id in TechniqueId::ALL {
            cache.get_or_compile(id, &config, screen()).unwrap();
        }
        let dropped = cache.invalidate(ConfigDiff::empty().with(ConfigField::AccelStruct));
        assert_eq!(dropped, 4);
        assert!(!cache.is_compiled(TechniqueId::InitializeMinMaxShadowMap));
        assert!(!cache.is_compiled(TechniqueId::RayMarch));
        assert!(cache.is_compiled(TechniqueId::UnwarpEpipolarScattering));

        let dropped = cache.invalidate(ConfigDiff::empty().with(ConfigField::Exposure));
        assert_eq!(dropped, 0);

        cache.invalidate(ConfigDiff::empty().with(ConfigField::ScreenResolution));
        assert!(!cache.is_compiled(TechniqueId::RenderSliceEndpoints));
        assert!(!cache.is_compiled(TechniqueId::RenderSampleLocations));
        assert!(cache.is_compiled(TechniqueId::RenderCoordinateTexture));
    }

    #[test]
    fn test_device_cache_builds_programs() {
        let Ok(gpu) = pollster::block_on(GpuDevice::new_headless()) else {
            return;
        };
        let config = PostProcessConfig::default().with_show_sampling(true);
        let mut cache = TechniqueCache::for_device(gpu);
        for id in TechniqueId::ALL {
            let technique = cache.get_or_compile(id, &config, screen()).unwrap();
            assert!(technique.program.is_some(), "{id:?}");
        }
        let sprites = cache.get(TechniqueId::RenderSampleLocations).unwrap();
        assert!(matches!(
            sprites.program.as_ref().map(|p| &p.kernel),
            Some(crate::gpu::Kernel::Sprites { .. })
        ));
        assert!(TechniqueCache::new()
            .get_or_compile(TechniqueId::RayMarch, &config, screen())
            .unwrap()
            .program
            .is_none());
    }

    #[test]
    fn test_stencil_rules() {
        let config = PostProcessConfig::default();
        let mut cache = TechniqueCache::new();
        let mark = cache
            .get_or_compile(TechniqueId::MarkRayMarchingSamples, &config, screen())
            .unwrap();
        assert_eq!(mark.sample_rule().require, Some(SampleTag::Interpolated));
        assert_eq!(mark.sample_rule().write, Some(SampleTag::Reference));
        assert_eq!(mark.pixel_rule(), TagRule::always());
    }
}
