//! The light scattering post-process.
//!
//! [`LightScatteringPipeline`] is the only component that keeps state from
//! one frame to the next. Each call diffs the configuration against the
//! previous one, drops the techniques and surfaces that depend on changed
//! fields, compiles and allocates what the frame needs, and then runs the
//! stages in order.

use glam::{Vec2, Vec4};

use episcatter_core::{
    AccelStruct, CameraAttribs, ConfigDiff, ConfigField, LightAttribs, LightScatteringTechnique,
    MediaInputs, MediaParams, PostProcessConfig,
};

use crate::context::{FrameConstants, PassRecord, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::resources::ResourceGroup;
use crate::stages::{
    camera_z, epipolar, fix, integral, interpolate, min_max, overlay, ray_march, refinement,
    unwarp, upscale, FrameView,
};
use crate::surface::{
    InterpolationSource, MinMaxDepth, PingPong, Radiance16, SampleTag, Surface,
};
use crate::technique::{ScreenSize, TechniqueId};

/// Per-frame inputs and the destination color target.
#[derive(Debug)]
pub struct FrameAttribs<'a> {
    pub light: &'a LightAttribs,
    pub camera: &'a CameraAttribs,
    pub src_color: &'a Surface<Vec4>,
    /// Non-linear depth, same size as `src_color`.
    pub src_depth: &'a Surface<f32>,
    /// Square light-space depth map.
    pub shadow_map: &'a Surface<f32>,
    /// Light-space colored transmittance (rgb) and its depth (w).
    pub stained_glass: Option<&'a Surface<Vec4>>,
    /// Composited in place; same size as `src_color`.
    pub dst_color: &'a mut Surface<Vec4>,
}

/// What a frame did.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub technique: LightScatteringTechnique,
    /// Passes in execution order.
    pub passes: Vec<PassRecord>,
    /// Techniques compiled during this frame.
    pub compiled: u32,
    /// Surface groups released because the configuration changed.
    pub released: Vec<ResourceGroup>,
    pub light_screen_pos: Vec2,
    pub is_light_on_screen: bool,
    /// Levels of the min/max trees, 0 when they were not built.
    pub min_max_levels: u32,
}

impl FrameReport {
    pub fn passes_of(&self, technique: TechniqueId) -> usize {
        self.passes
            .iter()
            .filter(|p| p.technique == technique)
            .count()
    }

    pub fn executed(&self, technique: TechniqueId) -> bool {
        self.passes_of(technique) > 0
    }
}

/// What the previous frame ran with.
///
/// Shared by the host and device pipelines so that both react to the same
/// configuration changes.
#[derive(Debug, Default)]
pub(crate) struct ConfigTracker {
    media: Option<(MediaInputs, MediaParams)>,
    prev_config: Option<PostProcessConfig>,
    screen_size: Option<(u32, u32)>,
    shadow_map_resolution: Option<u32>,
    media_updates: u32,
}

impl ConfigTracker {
    /// Fields that differ from the previous frame; every field on the first.
    pub(crate) fn diff(
        &mut self,
        config: &PostProcessConfig,
        screen: (u32, u32),
        shadow_map_resolution: u32,
    ) -> ConfigDiff {
        let mut diff = match &self.prev_config {
            Some(prev) => config.diff(prev),
            None => ConfigDiff::all(),
        };
        if self.screen_size != Some(screen) {
            diff.insert(ConfigField::ScreenResolution);
        }
        if self.shadow_map_resolution != Some(shadow_map_resolution) {
            diff.insert(ConfigField::MinMaxShadowMapResolution);
        }
        if !diff.is_empty() {
            log::debug!("configuration changed: {:?}", diff.iter().collect::<Vec<_>>());
        }
        self.prev_config = Some(config.clone());
        self.screen_size = Some(screen);
        self.shadow_map_resolution = Some(shadow_map_resolution);
        diff
    }

    /// Recomputes the media coefficients when their inputs changed.
    pub(crate) fn update_media(&mut self, config: &PostProcessConfig) -> MediaParams {
        let inputs = MediaInputs::from(config);
        match self.media {
            Some((cached, params)) if cached == inputs => params,
            _ => {
                let params = MediaParams::compute(config);
                log::debug!("recomputed media coefficients: {params:?}");
                self.media = Some((inputs, params));
                self.media_updates += 1;
                params
            }
        }
    }

    /// Forgets the previous frame so that the next one rebuilds everything.
    pub(crate) fn reset(&mut self) {
        self.prev_config = None;
        self.screen_size = None;
        self.shadow_map_resolution = None;
    }

    pub(crate) fn media(&self) -> Option<&MediaParams> {
        self.media.as_ref().map(|(_, params)| params)
    }

    pub(crate) fn media_updates(&self) -> u32 {
        self.media_updates
    }
}

/// Epipolar light scattering post-process.
#[derive(Debug, Default)]
pub struct LightScatteringPipeline {
    ctx: RenderContext,
    tracker: ConfigTracker,
}

impl LightScatteringPipeline {
    pub fn new() -> Self {
        log::info!("creating light scattering pipeline");
        Self::default()
    }

    /// Computes scattered light for one frame and composites it into
    /// `frame.dst_color`.
    ///
    /// Every technique and surface the frame needs is prepared before the
    /// first pass runs, so on error the destination is left untouched.
    pub fn perform_post_processing(
        &mut self,
        frame: FrameAttribs<'_>,
        config: &PostProcessConfig,
    ) -> RenderResult<FrameReport> {
        let result = self.run_frame(frame, config);
        if let Err(err) = &result {
            log::error!("light scattering frame abandoned: {err}");
        }
        result
    }

    fn run_frame(&mut self, frame: FrameAttribs<'_>, config: &PostProcessConfig) -> RenderResult<FrameReport> {
        let FrameAttribs {
            light,
            camera,
            src_color,
            src_depth,
            shadow_map,
            stained_glass,
            dst_color,
        } = frame;
        let (width, height) = check_inputs(src_color, src_depth, shadow_map, dst_color, config)?;
        let shadow_map_resolution = shadow_map.width();

        let released = self.apply_config(config, (width, height), shadow_map_resolution);
        let media = self.tracker.update_media(config);

        let view = FrameView::new(
            config,
            &media,
            camera,
            light,
            src_color,
            src_depth,
            shadow_map,
            stained_glass,
        );
        let ctx = &mut self.ctx;
        ctx.set_constants(FrameConstants::new(
            config,
            &media,
            camera,
            light,
            (width, height),
            shadow_map_resolution,
            view.light_screen_pos,
            view.is_light_on_screen,
        ));

        let compiles_before = ctx.techniques.total_compiles();
        prepare(ctx, config, (width, height), shadow_map_resolution)?;
        let compiled = ctx.techniques.total_compiles() - compiles_before;

        ctx.begin_frame();
        integral::precompute_point_light_inscattering(ctx, &view)?;
        let min_max_levels = match config.technique {
            LightScatteringTechnique::BruteForce => {
                camera_z::reconstruct_camera_space_z(ctx, &view)?;
                fix::render_brute_force(ctx, &view, dst_color)?;
                0
            }
            LightScatteringTechnique::Epipolar => run_epipolar(ctx, &view, dst_color)?,
        };

        Ok(FrameReport {
            technique: config.technique,
            passes: ctx.pass_log().to_vec(),
            compiled,
            released,
            light_screen_pos: view.light_screen_pos,
            is_light_on_screen: view.is_light_on_screen,
            min_max_levels,
        })
    }

    /// Diffs against the previous frame and drops what changed.
    fn apply_config(
        &mut self,
        config: &PostProcessConfig,
        screen: (u32, u32),
        shadow_map_resolution: u32,
    ) -> Vec<ResourceGroup> {
        let diff = self.tracker.diff(config, screen, shadow_map_resolution);
        self.ctx.invalidate(diff)
    }

    /// Releases every surface and compiled technique.
    pub fn release_resources(&mut self) {
        self.ctx.techniques.clear();
        self.ctx.surfaces.release_all();
        self.tracker.reset();
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    /// Media coefficients of the last frame.
    pub fn media(&self) -> Option<&MediaParams> {
        self.tracker.media()
    }

    /// Number of times the media coefficients have been computed.
    pub fn media_updates(&self) -> u32 {
        self.tracker.media_updates()
    }

    pub fn sample_tags(&self) -> Option<&Surface<SampleTag>> {
        self.ctx.surfaces.epipolar.as_ref().map(|e| &e.tags)
    }

    /// Screen position of every sample, `slices` rows of `samples` texels.
    pub fn sample_coordinates(&self) -> Option<&Surface<Vec2>> {
        self.ctx.surfaces.epipolar.as_ref().map(|e| &e.coordinates)
    }

    pub fn slice_endpoints(&self) -> Option<&Surface<Vec4>> {
        self.ctx.surfaces.epipolar.as_ref().map(|e| &e.slice_endpoints)
    }

    pub fn interpolation_sources(&self) -> Option<&Surface<InterpolationSource>> {
        self.ctx
            .surfaces
            .epipolar
            .as_ref()
            .map(|e| &e.interpolation_sources)
    }

    /// Ray marched scattered light; zero at non-reference samples.
    pub fn initial_scattering(&self) -> Option<&Surface<Radiance16>> {
        self.ctx
            .surfaces
            .epipolar
            .as_ref()
            .map(|e| &e.initial_scattering)
    }

    pub fn interpolated_scattering(&self) -> Option<&Surface<Radiance16>> {
        self.ctx.surfaces.epipolar.as_ref().map(|e| &e.scattering)
    }

    pub fn min_max_pyramid(&self) -> Option<&PingPong<MinMaxDepth>> {
        self.ctx.surfaces.min_max.as_ref().map(|m| &m.pyramid)
    }

    pub fn slice_uv_directions(&self) -> Option<&Surface<Vec4>> {
        self.ctx.surfaces.min_max.as_ref().map(|m| &m.slice_uv_dir)
    }
}

/// Checks that the frame images agree in size. Returns the screen size.
pub(crate) fn check_inputs(
    src_color: &Surface<Vec4>,
    src_depth: &Surface<f32>,
    shadow_map: &Surface<f32>,
    dst_color: &Surface<Vec4>,
    config: &PostProcessConfig,
) -> RenderResult<(u32, u32)> {
    let (width, height) = src_color.size();
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidFrameInput("empty source color".into()));
    }
    for (name, size) in [("depth", src_depth.size()), ("destination", dst_color.size())] {
        if size != (width, height) {
            return Err(RenderError::InvalidFrameInput(format!(
                "{name} is {}x{}, source color is {width}x{height}",
                size.0, size.1
            )));
        }
    }
    let (sm_w, sm_h) = shadow_map.size();
    if sm_w != sm_h || sm_w == 0 {
        return Err(RenderError::InvalidFrameInput(format!(
            "shadow map must be square, got {sm_w}x{sm_h}"
        )));
    }
    if config.is_downscaled() && (width < config.downscale_factor || height < config.downscale_factor) {
        return Err(RenderError::InvalidFrameInput(format!(
            "{width}x{height} screen cannot be downscaled by {}",
            config.downscale_factor
        )));
    }
    Ok((width, height))
}

/// Techniques a frame runs, in no particular order.
pub fn required_techniques(config: &PostProcessConfig) -> Vec<TechniqueId> {
    let mut ids = vec![TechniqueId::ReconstructCameraSpaceZ];
    if config.light_type.is_positional() && config.inscattering_method.uses_table() {
        ids.push(TechniqueId::PrecomputePointLightInscattering);
    }
    if config.technique == LightScatteringTechnique::BruteForce {
        ids.push(TechniqueId::FixAndApplyInscattering);
        return ids;
    }
    ids.extend([
        TechniqueId::RenderSliceEndpoints,
        TechniqueId::RenderCoordinateTexture,
        TechniqueId::RefineSampleLocations,
        TechniqueId::MarkRayMarchingSamples,
    ]);
    match config.accel_struct {
        AccelStruct::MinMaxTree => ids.extend([
            TechniqueId::RenderSliceUvDirection,
            TechniqueId::InitializeMinMaxShadowMap,
            TechniqueId::ComputeMinMaxShadowMapLevel,
            TechniqueId::RayMarchMinMax,
        ]),
        AccelStruct::None => ids.push(TechniqueId::RayMarch),
    }
    ids.push(TechniqueId::InterpolateIrradiance);
    if config.is_downscaled() {
        ids.extend([
            TechniqueId::UnwarpEpipolarScattering,
            TechniqueId::UpscaleInscattering,
        ]);
        if config.correct_scattering_at_depth_breaks {
            ids.extend([
                TechniqueId::FixInscattering,
                TechniqueId::FixAndApplyInscattering,
            ]);
        }
    } else {
        ids.push(TechniqueId::ApplyInscatteredRadiance);
        if config.correct_scattering_at_depth_breaks {
            ids.push(TechniqueId::FixAndApplyInscattering);
        }
    }
    if config.show_sampling {
        ids.push(TechniqueId::RenderSampleLocations);
    }
    ids
}

/// Allocates the frame's surfaces and compiles its techniques.
fn prepare(
    ctx: &mut RenderContext,
    config: &PostProcessConfig,
    (width, height): (u32, u32),
    shadow_map_resolution: u32,
) -> RenderResult<()> {
    let surfaces = &mut ctx.surfaces;
    surfaces.ensure_screen(width, height)?;
    if config.is_downscaled() {
        let f = config.downscale_factor;
        surfaces.ensure_downscaled(width / f, height / f)?;
    }
    if config.technique == LightScatteringTechnique::Epipolar {
        surfaces.ensure_epipolar(config.max_samples_in_slice, config.num_epipolar_slices)?;
        if config.accel_struct == AccelStruct::MinMaxTree {
            surfaces.ensure_min_max(
                config.effective_min_max_resolution(shadow_map_resolution),
                config.num_epipolar_slices,
            )?;
        }
    }
    let screen = ScreenSize { width, height };
    for id in required_techniques(config) {
        ctx.techniques.get_or_compile(id, config, screen)?;
    }
    Ok(())
}

/// Runs the epipolar stages. Returns the number of min/max levels built.
fn run_epipolar(ctx: &mut RenderContext, frame: &FrameView<'_>, dst: &mut Surface<Vec4>) -> RenderResult<u32> {
    let config = frame.config;
    let sm = frame.shadow_map_resolution();

    camera_z::reconstruct_camera_space_z(ctx, frame)?;
    epipolar::render_slice_endpoints(ctx, frame)?;
    epipolar::render_coordinate_texture(ctx, frame)?;
    refinement::refine_sample_locations(ctx, frame)?;
    refinement::mark_ray_marching_samples(ctx, frame)?;

    let mut levels = 0;
    if config.accel_struct == AccelStruct::MinMaxTree {
        min_max::render_slice_uv_direction(ctx, frame)?;
        min_max::initialize_min_max_shadow_map(ctx, frame)?;
        levels = min_max::compute_min_max_shadow_map_levels(ctx, frame)?;
    }
    ray_march::ray_march(ctx, frame)?;
    interpolate::interpolate_irradiance(ctx, frame)?;

    if config.is_downscaled() {
        unwarp::unwarp_epipolar_scattering(ctx, frame)?;
        if config.correct_scattering_at_depth_breaks {
            fix::fix_inscattering(ctx, frame, fix::first_fix_steps(sm))?;
        }
        upscale::upscale_inscattering(ctx, frame, dst)?;
        if config.correct_scattering_at_depth_breaks {
            fix::fix_and_apply_inscattering(ctx, frame, dst, fix::second_fix_steps(sm))?;
        }
    } else {
        unwarp::apply_inscattered_radiance(ctx, frame, dst)?;
        if config.correct_scattering_at_depth_breaks {
            fix::fix_and_apply_inscattering(ctx, frame, dst, fix::first_fix_steps(sm))?;
        }
    }

    if config.show_sampling {
        overlay::render_sample_locations(ctx, frame, dst)?;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    struct Inputs {
        camera: CameraAttribs,
        light: LightAttribs,
        color: Surface<Vec4>,
        depth: Surface<f32>,
        shadow: Surface<f32>,
    }

    fn inputs(size: u32) -> Inputs {
        let camera = CameraAttribs::look_at(
            Vec3::new(0.0, 2.0, -8.0),
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::Y,
            1.0,
            1.0,
            0.5,
            100.0,
        );
        let light_view = Mat4::look_at_lh(Vec3::new(0.0, 20.0, 0.0), Vec3::ZERO, Vec3::Z);
        let light_proj = Mat4::orthographic_lh(-20.0, 20.0, -20.0, 20.0, 0.1, 50.0);
        let light = LightAttribs::directional(
            Vec3::new(0.2, 1.0, 0.3),
            Vec3::ONE,
            1.0,
            light_proj * light_view,
        );
        let d = camera.camera_z_to_depth(10.0);
        Inputs {
            color: Surface::from_fn("color", size, size, |_, _| Vec4::new(0.2, 0.3, 0.4, 1.0)).unwrap(),
            depth: Surface::from_texels("depth", size, size, vec![d; (size * size) as usize]).unwrap(),
            shadow: Surface::from_texels("shadow", 64, 64, vec![1.0; 64 * 64]).unwrap(),
            camera,
            light,
        }
    }

    fn small_config() -> PostProcessConfig {
        PostProcessConfig::default()
            .with_slices(16)
            .with_samples(32)
            .with_initial_step(8)
    }

    fn run(
        pipeline: &mut LightScatteringPipeline,
        inputs: &Inputs,
        dst: &mut Surface<Vec4>,
        config: &PostProcessConfig,
    ) -> RenderResult<FrameReport> {
        pipeline.perform_post_processing(
            FrameAttribs {
                light: &inputs.light,
                camera: &inputs.camera,
                src_color: &inputs.color,
                src_depth: &inputs.depth,
                shadow_map: &inputs.shadow,
                stained_glass: None,
                dst_color: dst,
            },
            config,
        )
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 8, 16).unwrap();
        let mut pipeline = LightScatteringPipeline::new();
        let err = run(&mut pipeline, &inputs, &mut dst, &small_config()).unwrap_err();
        assert!(matches!(err, RenderError::InvalidFrameInput(_)));
    }

    #[test]
    fn test_second_frame_compiles_nothing() {
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let mut pipeline = LightScatteringPipeline::new();
        let config = small_config();
        let first = run(&mut pipeline, &inputs, &mut dst, &config).unwrap();
        assert_eq!(first.compiled as usize, required_techniques(&config).len());
        let second = run(&mut pipeline, &inputs, &mut dst, &config).unwrap();
        assert_eq!(second.compiled, 0);
        assert!(second.released.is_empty());
        assert_eq!(pipeline.media_updates(), 1);
    }

    #[test]
    fn test_pass_order() {
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let mut pipeline = LightScatteringPipeline::new();
        let report = run(&mut pipeline, &inputs, &mut dst, &small_config()).unwrap();
        let order: Vec<_> = report.passes.iter().map(|p| p.technique).collect();
        let position = |id| order.iter().position(|t| *t == id).unwrap();
        assert_eq!(order[0], TechniqueId::ReconstructCameraSpaceZ);
        assert!(position(TechniqueId::RefineSampleLocations) < position(TechniqueId::MarkRayMarchingSamples));
        assert!(position(TechniqueId::InitializeMinMaxShadowMap) < position(TechniqueId::RayMarchMinMax));
        assert!(position(TechniqueId::RayMarchMinMax) < position(TechniqueId::InterpolateIrradiance));
        assert!(position(TechniqueId::InterpolateIrradiance) < position(TechniqueId::ApplyInscatteredRadiance));
        assert!(!report.executed(TechniqueId::UpscaleInscattering));
        assert_eq!(report.min_max_levels, 4);
    }

    #[test]
    fn test_media_change_recomputes_coefficients_only() {
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let mut pipeline = LightScatteringPipeline::new();
        let config = small_config();
        run(&mut pipeline, &inputs, &mut dst, &config).unwrap();
        let mut hazier = config.clone();
        hazier.mie_beta *= 2.0;
        let report = run(&mut pipeline, &inputs, &mut dst, &hazier).unwrap();
        assert_eq!(report.compiled, 0);
        assert_eq!(pipeline.media_updates(), 2);
    }

    #[test]
    fn test_compile_failure_leaves_destination_untouched() {
        let inputs = inputs(16);
        let sentinel = Vec4::new(0.5, 0.25, 0.125, 1.0);
        let mut dst = Surface::from_fn("dst", 16, 16, |_, _| sentinel).unwrap();
        let mut pipeline = LightScatteringPipeline::new();
        let config = small_config().with_samples(64).with_initial_step(24);
        let err = run(&mut pipeline, &inputs, &mut dst, &config).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(_)));
        assert!(dst.texels().iter().all(|t| *t == sentinel));
        assert!(pipeline.context().pass_log().is_empty());
    }
}
