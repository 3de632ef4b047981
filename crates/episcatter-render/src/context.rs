//! State shared by every pass of the pipeline.

use episcatter_core::{
    CameraAttribs, CameraUniforms, ConfigDiff, LightAttribs, LightUniforms, MediaParams,
    MediaUniforms, PostProcessConfig, PostProcessingUniforms,
};
use glam::Vec2;

use crate::resources::{ResourceGroup, SurfacePool};
use crate::technique::{TechniqueCache, TechniqueId};

/// One executed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRecord {
    pub technique: TechniqueId,
    /// Fragments (or sprite pixels, or compute items) written.
    pub fragments: usize,
}

/// Constant buffers bound to every pass of a frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameConstants {
    pub post_processing: PostProcessingUniforms,
    pub media: MediaUniforms,
    pub camera: CameraUniforms,
    pub light: LightUniforms,
}

impl FrameConstants {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &PostProcessConfig,
        media: &MediaParams,
        camera: &CameraAttribs,
        light: &LightAttribs,
        screen: (u32, u32),
        shadow_map_resolution: u32,
        light_screen_pos: Vec2,
        is_light_on_screen: bool,
    ) -> Self {
        Self {
            post_processing: PostProcessingUniforms::new(
                config,
                screen.0,
                screen.1,
                shadow_map_resolution,
            ),
            media: MediaUniforms::from(media),
            camera: CameraUniforms::from(camera),
            light: LightUniforms::new(
                light,
                config.light_type,
                camera,
                light_screen_pos,
                is_light_on_screen,
            ),
        }
    }
}

/// Compiled techniques, intermediate surfaces and per-frame bookkeeping.
#[derive(Debug, Default)]
pub struct RenderContext {
    pub techniques: TechniqueCache,
    pub surfaces: SurfacePool,
    pass_log: Vec<PassRecord>,
    frame_index: u64,
    constants: Option<FrameConstants>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the pass log and advances the frame counter.
    pub fn begin_frame(&mut self) {
        self.pass_log.clear();
        self.frame_index += 1;
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Drops techniques and surfaces made stale by `diff`.
    pub fn invalidate(&mut self, diff: ConfigDiff) -> Vec<ResourceGroup> {
        self.techniques.invalidate(diff);
        self.surfaces.invalidate(diff)
    }

    pub fn record_pass(&mut self, technique: TechniqueId, fragments: usize) {
        log::debug!("pass {technique:?}: {fragments} fragments");
        self.pass_log.push(PassRecord {
            technique,
            fragments,
        });
    }

    /// Passes executed in the current frame, in order.
    pub fn pass_log(&self) -> &[PassRecord] {
        &self.pass_log
    }

    /// Number of times `technique` ran in the current frame.
    pub fn passes_of(&self, technique: TechniqueId) -> usize {
        self.pass_log
            .iter()
            .filter(|p| p.technique == technique)
            .count()
    }

    pub fn executed(&self, technique: TechniqueId) -> bool {
        self.passes_of(technique) > 0
    }

    pub fn set_constants(&mut self, constants: FrameConstants) {
        self.constants = Some(constants);
    }

    pub fn constants(&self) -> Option<&FrameConstants> {
        self.constants.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_log_resets_per_frame() {
        let mut ctx = RenderContext::new();
        ctx.begin_frame();
        ctx.record_pass(TechniqueId::RayMarch, 10);
        ctx.record_pass(TechniqueId::RayMarch, 0);
        assert_eq!(ctx.passes_of(TechniqueId::RayMarch), 2);
        assert!(!ctx.executed(TechniqueId::UpscaleInscattering));
        ctx.begin_frame();
        assert!(ctx.pass_log().is_empty());
        assert_eq!(ctx.frame_index(), 2);
    }
}
