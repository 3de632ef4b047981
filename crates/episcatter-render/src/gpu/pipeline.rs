//! The light scattering post-process on a wgpu device.
//!
//! [`GpuLightScatteringPipeline`] runs the same passes as the host pipeline
//! in the same order, each as a compute dispatch over device buffers. The
//! whole frame is recorded into one command buffer and the destination is
//! read back once it has run.

use std::sync::Arc;

use glam::{Vec2, Vec4};
use wgpu::util::DeviceExt;

use episcatter_core::{AccelStruct, LightScatteringTechnique, PassUniforms, PostProcessConfig};

use crate::context::{FrameConstants, PassRecord};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{check_inputs, required_techniques, ConfigTracker, FrameAttribs, FrameReport};
use crate::resources::missing;
use crate::stages::integral::TABLE_RESOLUTION;
use crate::stages::{fix, min_max, FrameView};
use crate::surface::{InterpolationSource, SampleTag, Surface};
use crate::technique::{ScreenSize, TechniqueCache, TechniqueId};

use super::buffers::{read_buffer, GpuSurfaces};
use super::device::GpuDevice;
use super::kernels::{bindings, Kernel};
use super::mirror::{ConstantBuffers, GpuMirror};

const SRC_COLOR: &str = "source color";
const SRC_DEPTH: &str = "source depth";
const SHADOW_MAP: &str = "shadow map";
const STAINED_GLASS: &str = "stained glass";

/// Workgroup of the screen and sample grid kernels.
const TILE: (u32, u32) = (8, 8);
/// Workgroup of the per-slice and per-row kernels.
const ROW: (u32, u32) = (64, 1);

fn groups((width, height): (u32, u32), (gx, gy): (u32, u32)) -> (u32, u32) {
    (width.div_ceil(gx), height.div_ceil(gy))
}

fn items((width, height): (u32, u32)) -> usize {
    width as usize * height as usize
}

/// A resource bound to group 1.
#[derive(Debug, Clone, Copy)]
enum Bound<'a> {
    Buffer(&'a wgpu::Buffer),
    Texture(&'a wgpu::TextureView),
}

/// Textures uploaded from the frame inputs.
struct InputViews<'a> {
    src_color: &'a wgpu::TextureView,
    depth: &'a wgpu::TextureView,
    shadow_map: &'a wgpu::TextureView,
    glass: &'a wgpu::TextureView,
}

/// Records the passes of one frame.
struct FrameEncoder<'a> {
    gpu: &'a GpuDevice,
    techniques: &'a TechniqueCache,
    constants: &'a ConstantBuffers,
    base: PassUniforms,
    encoder: wgpu::CommandEncoder,
    passes: Vec<PassRecord>,
}

impl<'a> FrameEncoder<'a> {
    fn new(gpu: &'a GpuDevice, techniques: &'a TechniqueCache, constants: &'a ConstantBuffers, base: PassUniforms) -> Self {
        let encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("light scattering frame"),
            });
        Self {
            gpu,
            techniques,
            constants,
            base,
            encoder,
            passes: Vec::new(),
        }
    }

    /// Pass constants for a kernel writing a `size` grid.
    fn target(&self, size: (u32, u32)) -> PassUniforms {
        PassUniforms {
            target_size: [size.0, size.1],
            ..self.base
        }
    }

    fn record(&mut self, technique: TechniqueId, invocations: usize) {
        log::debug!("pass {technique:?}: {invocations} invocations");
        self.passes.push(PassRecord {
            technique,
            fragments: invocations,
        });
    }

    fn frame_group(&self, pass: &PassUniforms) -> wgpu::BindGroup {
        let device = self.gpu.device();
        let pass_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pass constants"),
            contents: bytemuck::bytes_of(pass),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let buffers = [
            &self.constants.post_processing,
            &self.constants.media,
            &self.constants.camera,
            &self.constants.light,
            &pass_buffer,
        ];
        let entries: Vec<_> = (0u32..)
            .zip(buffers)
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame constants"),
            layout: self.gpu.frame_layout(),
            entries: &entries,
        })
    }

    fn resource_group(
        &self,
        id: TechniqueId,
        layout: &wgpu::BindGroupLayout,
        provided: &[(u32, Bound<'_>)],
    ) -> RenderResult<wgpu::BindGroup> {
        let entries = bindings(id)
            .iter()
            .map(|(binding, _)| {
                let bound = provided
                    .iter()
                    .find(|(b, _)| b == binding)
                    .map(|(_, bound)| *bound)
                    .ok_or_else(|| {
                        RenderError::MissingResource(format!("{id:?} binding {binding}"))
                    })?;
                let resource = match bound {
                    Bound::Buffer(buffer) => buffer.as_entire_binding(),
                    Bound::Texture(view) => wgpu::BindingResource::TextureView(view),
                };
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(self
            .gpu
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(id.desc().entry_point),
                layout,
                entries: &entries,
            }))
    }

    /// Dispatches the compute kernel of `id` over `grid` items.
    fn dispatch(
        &mut self,
        id: TechniqueId,
        pass: &PassUniforms,
        resources: &[(u32, Bound<'_>)],
        grid: (u32, u32),
        workgroup: (u32, u32),
    ) -> RenderResult<()> {
        let techniques = self.techniques;
        let program = techniques.get(id)?.program.as_ref().ok_or_else(|| {
            RenderError::TechniqueNotCompiled(format!("{id:?} has no device program"))
        })?;
        let frame_group = self.frame_group(pass);
        let resource_group = self.resource_group(id, &program.resources, resources)?;
        let (x, y) = groups(grid, workgroup);
        {
            let mut compute = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(id.desc().entry_point),
                timestamp_writes: None,
            });
            compute.set_pipeline(program.compute());
            compute.set_bind_group(0, &frame_group, &[]);
            compute.set_bind_group(1, &resource_group, &[]);
            compute.dispatch_workgroups(x, y, 1);
        }
        self.record(id, items(grid));
        Ok(())
    }

    /// Rasterizes one sprite per sample into `overlay`, cleared first.
    fn draw_sprites(
        &mut self,
        overlay: &wgpu::TextureView,
        coordinates: &wgpu::Buffer,
        tags: &wgpu::Buffer,
        instances: u32,
    ) -> RenderResult<()> {
        let id = TechniqueId::RenderSampleLocations;
        let techniques = self.techniques;
        let Some(Kernel::Sprites { draw, .. }) = techniques.get(id)?.program.as_ref().map(|p| &p.kernel) else {
            return Err(RenderError::TechniqueNotCompiled(format!(
                "{id:?} has no sprite pipeline"
            )));
        };
        let mut render = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sample location sprites"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: overlay,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render.set_pipeline(draw);
        render.set_vertex_buffer(0, coordinates.slice(..));
        render.set_vertex_buffer(1, tags.slice(..));
        render.draw(0..6, 0..instances);
        Ok(())
    }

    fn finish(self) -> (wgpu::CommandBuffer, Vec<PassRecord>) {
        (self.encoder.finish(), self.passes)
    }
}

/// Epipolar light scattering post-process running on a device.
#[derive(Debug)]
pub struct GpuLightScatteringPipeline {
    gpu: Arc<GpuDevice>,
    techniques: TechniqueCache,
    surfaces: GpuSurfaces,
    mirror: GpuMirror,
    tracker: ConfigTracker,
    pass_log: Vec<PassRecord>,
}

impl GpuLightScatteringPipeline {
    pub fn new(gpu: Arc<GpuDevice>) -> RenderResult<Self> {
        log::info!("creating device light scattering pipeline");
        Ok(Self {
            techniques: TechniqueCache::for_device(gpu.clone()),
            surfaces: GpuSurfaces::new(&gpu)?,
            mirror: GpuMirror::new(gpu.clone()),
            tracker: ConfigTracker::default(),
            pass_log: Vec::new(),
            gpu,
        })
    }

    /// Creates the pipeline on a headless device.
    pub async fn new_headless() -> RenderResult<Self> {
        Self::new(GpuDevice::new_headless().await?)
    }

    pub fn gpu(&self) -> &Arc<GpuDevice> {
        &self.gpu
    }

    pub fn techniques(&self) -> &TechniqueCache {
        &self.techniques
    }

    pub fn surfaces(&self) -> &GpuSurfaces {
        &self.surfaces
    }

    /// Passes of the last frame, in order.
    pub fn pass_log(&self) -> &[PassRecord] {
        &self.pass_log
    }

    pub fn media_updates(&self) -> u32 {
        self.tracker.media_updates()
    }

    /// Releases every buffer and compiled technique.
    pub fn release_resources(&mut self) {
        self.techniques.clear();
        self.surfaces.release_all();
        self.tracker.reset();
    }

    /// Computes scattered light for one frame on the device and composites
    /// it into `frame.dst_color`.
    ///
    /// The configuration is validated against the device first. Everything
    /// the frame needs is compiled and allocated before any pass is
    /// recorded, so on error the destination is left untouched.
    pub fn perform_post_processing(
        &mut self,
        frame: FrameAttribs<'_>,
        config: &PostProcessConfig,
    ) -> RenderResult<FrameReport> {
        let result = self.run_frame(frame, config);
        if let Err(err) = &result {
            log::error!("device light scattering frame abandoned: {err}");
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
        self.gpu
            .validate_config(config, (width, height), shadow_map_resolution)?;

        let diff = self
            .tracker
            .diff(config, (width, height), shadow_map_resolution);
        self.techniques.invalidate(diff);
        let released = self.surfaces.invalidate(diff);
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

        let compiles_before = self.techniques.total_compiles();
        let precompute_table = self.prepare(config, (width, height), shadow_map_resolution)?;
        let compiled = self.techniques.total_compiles() - compiles_before;

        let constants = FrameConstants::new(
            config,
            &media,
            camera,
            light,
            (width, height),
            shadow_map_resolution,
            view.light_screen_pos,
            view.is_light_on_screen,
        );
        self.mirror.upload_as(SRC_COLOR, src_color)?;
        self.mirror.upload_as(SRC_DEPTH, src_depth)?;
        self.mirror.upload_as(SHADOW_MAP, shadow_map)?;
        let glass = view.stained_glass();
        if let Some(glass) = glass {
            self.mirror.upload_as(STAINED_GLASS, glass)?;
        }
        self.mirror.upload_constants(&constants);

        let gpu = &self.gpu;
        let techniques = &self.techniques;
        let surfaces = &self.surfaces;
        let mirror = &self.mirror;
        let screen = surfaces.screen.as_ref().ok_or_else(|| missing("screen"))?;
        gpu.queue().write_buffer(&screen.dst, 0, &dst_color.to_bytes());

        let view_of = |slot: &str| {
            mirror
                .texture(slot)
                .map(|t| &t.view)
                .ok_or_else(|| RenderError::MissingResource(format!("{slot} texture")))
        };
        let inputs = InputViews {
            src_color: view_of(SRC_COLOR)?,
            depth: view_of(SRC_DEPTH)?,
            shadow_map: view_of(SHADOW_MAP)?,
            glass: match glass {
                Some(_) => view_of(STAINED_GLASS)?,
                None => &surfaces.unused_glass,
            },
        };
        let constant_buffers = mirror
            .constants()
            .ok_or_else(|| RenderError::MissingResource("frame constants".into()))?;
        let base = PassUniforms {
            shadow_map_resolution,
            has_glass: u32::from(glass.is_some()),
            ..PassUniforms::new((width, height))
        };

        let (passes, min_max_levels) = gpu.scoped(
            |_| -> RenderResult<_> {
                let mut encoder = FrameEncoder::new(gpu, techniques, constant_buffers, base);
                if precompute_table {
                    encode_table(&mut encoder, surfaces)?;
                }
                let levels = match config.technique {
                    LightScatteringTechnique::BruteForce => {
                        encode_brute_force(&mut encoder, surfaces, &inputs, shadow_map_resolution)?;
                        0
                    }
                    LightScatteringTechnique::Epipolar => {
                        encode_epipolar(&mut encoder, surfaces, &inputs, config, shadow_map_resolution)?
                    }
                };
                let (commands, passes) = encoder.finish();
                gpu.queue().submit(std::iter::once(commands));
                Ok((passes, levels))
            },
            |msg| RenderError::CommandFailed(format!("light scattering frame: {msg}")),
        )??;

        let colors = read_buffer::<[f32; 4]>(gpu, &screen.dst)?;
        for (texel, color) in dst_color.texels_mut().iter_mut().zip(colors) {
            *texel = Vec4::from_array(color);
        }
        self.pass_log = passes;

        Ok(FrameReport {
            technique: config.technique,
            passes: self.pass_log.clone(),
            compiled,
            released,
            light_screen_pos: view.light_screen_pos,
            is_light_on_screen: view.is_light_on_screen,
            min_max_levels,
        })
    }

    /// Allocates the frame's buffers and compiles its techniques. Returns
    /// true when the point light table was allocated and must be filled.
    fn prepare(
        &mut self,
        config: &PostProcessConfig,
        (width, height): (u32, u32),
        shadow_map_resolution: u32,
    ) -> RenderResult<bool> {
        let gpu = &self.gpu;
        let surfaces = &mut self.surfaces;
        surfaces.ensure_screen(gpu, width, height)?;
        if config.is_downscaled() {
            let f = config.downscale_factor;
            surfaces.ensure_downscaled(gpu, width / f, height / f)?;
        }
        if config.technique == LightScatteringTechnique::Epipolar {
            surfaces.ensure_epipolar(gpu, config.max_samples_in_slice, config.num_epipolar_slices)?;
            if config.accel_struct == AccelStruct::MinMaxTree {
                surfaces.ensure_min_max(
                    gpu,
                    config.effective_min_max_resolution(shadow_map_resolution),
                    config.num_epipolar_slices,
                )?;
            }
        }
        let screen = ScreenSize { width, height };
        for id in required_techniques(config) {
            self.techniques.get_or_compile(id, config, screen)?;
        }
        if config.light_type.is_positional() && config.inscattering_method.uses_table() {
            return surfaces.ensure_table(gpu);
        }
        Ok(false)
    }

    /// Sample tags of the last epipolar frame.
    pub fn read_sample_tags(&self) -> RenderResult<Option<Surface<SampleTag>>> {
        let Some(epipolar) = &self.surfaces.epipolar else {
            return Ok(None);
        };
        let words = read_buffer::<u32>(&self.gpu, &epipolar.tags)?;
        let tags = words.into_iter().map(SampleTag::from_bits).collect();
        Surface::from_texels("epipolar sample tags", epipolar.samples, epipolar.slices, tags).map(Some)
    }

    /// Interpolation sources of the last epipolar frame.
    pub fn read_interpolation_sources(&self) -> RenderResult<Option<Surface<InterpolationSource>>> {
        let Some(epipolar) = &self.surfaces.epipolar else {
            return Ok(None);
        };
        let words = read_buffer::<u32>(&self.gpu, &epipolar.interpolation_sources)?;
        let sources = words.into_iter().map(InterpolationSource::from_bits).collect();
        Surface::from_texels("interpolation sources", epipolar.samples, epipolar.slices, sources).map(Some)
    }

    /// Screen position of every sample of the last epipolar frame.
    pub fn read_sample_coordinates(&self) -> RenderResult<Option<Surface<Vec2>>> {
        let Some(epipolar) = &self.surfaces.epipolar else {
            return Ok(None);
        };
        let words = read_buffer::<[f32; 2]>(&self.gpu, &epipolar.coordinates)?;
        let coordinates = words.into_iter().map(Vec2::from_array).collect();
        Surface::from_texels("epipolar coordinates", epipolar.samples, epipolar.slices, coordinates).map(Some)
    }
}

fn encode_table(encoder: &mut FrameEncoder<'_>, surfaces: &GpuSurfaces) -> RenderResult<()> {
    let table = surfaces
        .table
        .as_ref()
        .ok_or_else(|| missing("point light table"))?;
    let pass = encoder.base;
    encoder.dispatch(
        TechniqueId::PrecomputePointLightInscattering,
        &pass,
        &[(0, Bound::Buffer(table))],
        (TABLE_RESOLUTION, 1),
        ROW,
    )
}

fn encode_camera_z(
    encoder: &mut FrameEncoder<'_>,
    depth: &wgpu::TextureView,
    camera_z: &wgpu::Buffer,
    size: (u32, u32),
) -> RenderResult<()> {
    let pass = encoder.target(size);
    encoder.dispatch(
        TechniqueId::ReconstructCameraSpaceZ,
        &pass,
        &[(0, Bound::Texture(depth)), (1, Bound::Buffer(camera_z))],
        size,
        TILE,
    )
}

fn encode_brute_force(
    encoder: &mut FrameEncoder<'_>,
    surfaces: &GpuSurfaces,
    inputs: &InputViews<'_>,
    shadow_map_resolution: u32,
) -> RenderResult<()> {
    use Bound::{Buffer as B, Texture as T};

    let screen = surfaces.screen.as_ref().ok_or_else(|| missing("screen"))?;
    encode_camera_z(encoder, inputs.depth, &screen.camera_z, screen.size)?;
    encoder.encoder.clear_buffer(&screen.tags, 0, None);
    let pass = encoder.target(screen.size).with_max_steps(shadow_map_resolution);
    encoder.dispatch(
        TechniqueId::FixAndApplyInscattering,
        &pass,
        &[
            (0, T(inputs.shadow_map)),
            (1, T(inputs.glass)),
            (2, B(surfaces.table_or_unused())),
            (3, T(inputs.src_color)),
            (4, B(&screen.camera_z)),
            (5, B(&screen.tags)),
            (6, B(&screen.dst)),
        ],
        screen.size,
        TILE,
    )
}

/// Records the epipolar passes. Returns the number of min/max levels built.
#[allow(clippy::too_many_lines)]
fn encode_epipolar(
    encoder: &mut FrameEncoder<'_>,
    surfaces: &GpuSurfaces,
    inputs: &InputViews<'_>,
    config: &PostProcessConfig,
    shadow_map_resolution: u32,
) -> RenderResult<u32> {
    use Bound::{Buffer as B, Texture as T};

    let screen = surfaces.screen.as_ref().ok_or_else(|| missing("screen"))?;
    let epipolar = surfaces.epipolar.as_ref().ok_or_else(|| missing("epipolar"))?;
    let downscaled = if config.is_downscaled() {
        Some(surfaces.downscaled.as_ref().ok_or_else(|| missing("downscaled"))?)
    } else {
        None
    };
    let table = surfaces.table_or_unused();
    let sm = shadow_map_resolution;
    let samples = (epipolar.samples, epipolar.slices);
    let slices = (epipolar.slices, 1);
    let base = encoder.base;

    encode_camera_z(encoder, inputs.depth, &screen.camera_z, screen.size)?;
    if let Some(ds) = downscaled {
        encode_camera_z(encoder, inputs.depth, &ds.camera_z, ds.size)?;
    }

    encoder.dispatch(
        TechniqueId::RenderSliceEndpoints,
        &base,
        &[(0, B(&epipolar.slice_endpoints))],
        slices,
        ROW,
    )?;
    encoder.dispatch(
        TechniqueId::RenderCoordinateTexture,
        &base,
        &[
            (0, B(&epipolar.slice_endpoints)),
            (1, B(&screen.camera_z)),
            (2, B(&epipolar.coordinates)),
            (3, B(&epipolar.camera_z)),
            (4, B(&epipolar.tags)),
        ],
        samples,
        TILE,
    )?;
    encoder.dispatch(
        TechniqueId::RefineSampleLocations,
        &base,
        &[(0, B(&epipolar.camera_z)), (1, B(&epipolar.interpolation_sources))],
        samples,
        ROW,
    )?;
    encoder.dispatch(
        TechniqueId::MarkRayMarchingSamples,
        &base,
        &[(0, B(&epipolar.interpolation_sources)), (1, B(&epipolar.tags))],
        samples,
        TILE,
    )?;

    let mut marching: Vec<(u32, Bound<'_>)> = vec![
        (0, T(inputs.shadow_map)),
        (1, T(inputs.glass)),
        (2, B(table)),
        (3, B(&epipolar.coordinates)),
        (4, B(&epipolar.camera_z)),
        (5, B(&epipolar.tags)),
        (6, B(&epipolar.initial_scattering)),
    ];
    let mut levels = 0;
    let ray_march = if config.accel_struct == AccelStruct::MinMaxTree {
        let mm = surfaces.min_max.as_ref().ok_or_else(|| missing("min/max"))?;
        encoder.dispatch(
            TechniqueId::RenderSliceUvDirection,
            &base,
            &[(0, B(&epipolar.slice_endpoints)), (1, B(&mm.slice_uv_dir))],
            slices,
            ROW,
        )?;
        encoder.dispatch(
            TechniqueId::InitializeMinMaxShadowMap,
            &base,
            &[
                (0, T(inputs.shadow_map)),
                (1, B(&mm.slice_uv_dir)),
                (2, B(&mm.tree)),
            ],
            (mm.resolution >> 1, mm.slices),
            ROW,
        )?;
        levels = min_max::level_count(mm.resolution, config.max_shadow_map_step);
        for level in 1..levels {
            encoder.dispatch(
                TechniqueId::ComputeMinMaxShadowMapLevel,
                &base.with_level(level),
                &[(2, B(&mm.tree))],
                (mm.resolution >> (level + 1), mm.slices),
                ROW,
            )?;
        }
        marching.extend([(7, B(&mm.slice_uv_dir)), (8, B(&mm.tree))]);
        TechniqueId::RayMarchMinMax
    } else {
        TechniqueId::RayMarch
    };
    let marched = PassUniforms {
        min_max_levels: levels,
        ..base.with_max_steps(sm)
    };
    encoder.dispatch(ray_march, &marched, &marching, samples, TILE)?;

    encoder.dispatch(
        TechniqueId::InterpolateIrradiance,
        &base,
        &[
            (0, B(&epipolar.initial_scattering)),
            (1, B(&epipolar.interpolation_sources)),
            (2, B(&epipolar.tags)),
            (3, B(&epipolar.scattering)),
        ],
        samples,
        TILE,
    )?;

    let unwarp_sources: [(u32, Bound<'_>); 4] = [
        (0, B(&epipolar.slice_endpoints)),
        (1, B(&epipolar.camera_z)),
        (2, B(&epipolar.tags)),
        (3, B(&epipolar.scattering)),
    ];
    let fix_sources: [(u32, Bound<'_>); 3] = [(0, T(inputs.shadow_map)), (1, T(inputs.glass)), (2, B(table))];
    let screen_targets: [(u32, Bound<'_>); 4] = [
        (3, T(inputs.src_color)),
        (4, B(&screen.camera_z)),
        (5, B(&screen.tags)),
        (6, B(&screen.dst)),
    ];
    let correct = config.correct_scattering_at_depth_breaks;

    if let Some(ds) = downscaled {
        let downscaled_targets: [(u32, Bound<'_>); 3] = [
            (8, B(&ds.camera_z)),
            (9, B(&ds.tags)),
            (10, B(&ds.scattering)),
        ];
        encoder.dispatch(
            TechniqueId::UnwarpEpipolarScattering,
            &encoder.target(ds.size),
            &[&unwarp_sources[..], &downscaled_targets[..]].concat(),
            ds.size,
            TILE,
        )?;
        if correct {
            encoder.dispatch(
                TechniqueId::FixInscattering,
                &encoder.target(ds.size).with_max_steps(fix::first_fix_steps(sm)),
                &[
                    &fix_sources[..],
                    &[(7, B(&ds.camera_z)), (8, B(&ds.tags)), (9, B(&ds.scattering))],
                ]
                .concat(),
                ds.size,
                TILE,
            )?;
        }
        encoder.dispatch(
            TechniqueId::UpscaleInscattering,
            &encoder.target(screen.size).with_source_size(ds.size),
            &[
                (0, B(&ds.scattering)),
                (1, B(&ds.camera_z)),
                (2, B(&ds.tags)),
                (3, T(inputs.src_color)),
                (4, B(&screen.camera_z)),
                (5, B(&screen.tags)),
                (6, B(&screen.dst)),
            ],
            screen.size,
            TILE,
        )?;
        if correct {
            encoder.dispatch(
                TechniqueId::FixAndApplyInscattering,
                &encoder.target(screen.size).with_max_steps(fix::second_fix_steps(sm)),
                &[&fix_sources[..], &screen_targets[..]].concat(),
                screen.size,
                TILE,
            )?;
        }
    } else {
        encoder.dispatch(
            TechniqueId::ApplyInscatteredRadiance,
            &encoder.target(screen.size),
            &[
                &unwarp_sources[..],
                &[
                    (4, T(inputs.src_color)),
                    (5, B(&screen.camera_z)),
                    (6, B(&screen.tags)),
                    (7, B(&screen.dst)),
                ],
            ]
            .concat(),
            screen.size,
            TILE,
        )?;
        if correct {
            encoder.dispatch(
                TechniqueId::FixAndApplyInscattering,
                &encoder.target(screen.size).with_max_steps(fix::first_fix_steps(sm)),
                &[&fix_sources[..], &screen_targets[..]].concat(),
                screen.size,
                TILE,
            )?;
        }
    }

    if config.show_sampling {
        let instances = epipolar.samples * epipolar.slices;
        encoder.draw_sprites(
            &screen.overlay_view,
            &epipolar.coordinates,
            &epipolar.tags,
            instances,
        )?;
        encoder.dispatch(
            TechniqueId::RenderSampleLocations,
            &encoder.target(screen.size),
            &[(0, T(&screen.overlay_view)), (1, B(&screen.dst))],
            screen.size,
            TILE,
        )?;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use episcatter_core::{CameraAttribs, LightAttribs};
    use glam::{Mat4, Vec3};

    use crate::pipeline::LightScatteringPipeline;

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
            .with_slices(32)
            .with_samples(32)
            .with_initial_step(8)
    }

    fn pipeline() -> Option<GpuLightScatteringPipeline> {
        match pollster::block_on(GpuLightScatteringPipeline::new_headless()) {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                eprintln!("skipping: {err}");
                None
            }
        }
    }

    fn attribs<'a>(inputs: &'a Inputs, dst: &'a mut Surface<Vec4>) -> FrameAttribs<'a> {
        FrameAttribs {
            light: &inputs.light,
            camera: &inputs.camera,
            src_color: &inputs.color,
            src_depth: &inputs.depth,
            shadow_map: &inputs.shadow,
            stained_glass: None,
            dst_color: dst,
        }
    }

    #[test]
    fn test_second_frame_compiles_nothing() {
        let Some(mut pipeline) = pipeline() else {
            return;
        };
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let config = small_config();
        let first = pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &config)
            .unwrap();
        assert_eq!(first.compiled as usize, required_techniques(&config).len());
        assert_eq!(first.min_max_levels, 4);
        let second = pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &config)
            .unwrap();
        assert_eq!(second.compiled, 0);
        assert_eq!(pipeline.media_updates(), 1);
        for id in required_techniques(&config) {
            assert!(pipeline.techniques().get(id).unwrap().program.is_some(), "{id:?}");
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_before_any_pass() {
        let Some(mut pipeline) = pipeline() else {
            return;
        };
        let inputs = inputs(16);
        let sentinel = Vec4::new(0.5, 0.25, 0.125, 1.0);
        let mut dst = Surface::from_fn("dst", 16, 16, |_, _| sentinel).unwrap();
        let config = small_config().with_slices(48);
        let err = pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &config)
            .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
        assert!(pipeline.pass_log().is_empty());
        assert_eq!(pipeline.techniques().total_compiles(), 0);
        assert!(dst.texels().iter().all(|t| *t == sentinel));
    }

    #[test]
    fn test_pass_order_matches_host() {
        let Some(mut pipeline) = pipeline() else {
            return;
        };
        let inputs = inputs(16);
        let config = small_config();
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let report = pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &config)
            .unwrap();
        let mut host = LightScatteringPipeline::new();
        let mut host_dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let expected = host
            .perform_post_processing(attribs(&inputs, &mut host_dst), &config)
            .unwrap();
        let order = |report: &FrameReport| {
            let mut ids: Vec<_> = report.passes.iter().map(|p| p.technique).collect();
            ids.dedup();
            ids
        };
        assert_eq!(order(&report), order(&expected));
        assert_eq!(report.min_max_levels, expected.min_max_levels);
    }

    #[test]
    fn test_output_tracks_host_pipeline() {
        let Some(mut pipeline) = pipeline() else {
            return;
        };
        let inputs = inputs(16);
        for config in [
            small_config(),
            small_config().with_accel_struct(AccelStruct::None),
            small_config().with_downscale(2),
            small_config().with_technique(LightScatteringTechnique::BruteForce),
        ] {
            let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
            pipeline
                .perform_post_processing(attribs(&inputs, &mut dst), &config)
                .unwrap();
            let mut host_dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
            LightScatteringPipeline::new()
                .perform_post_processing(attribs(&inputs, &mut host_dst), &config)
                .unwrap();

            let diff: f32 = dst
                .texels()
                .iter()
                .zip(host_dst.texels())
                .map(|(a, b)| (*a - *b).abs().max_element())
                .sum::<f32>()
                / dst.texels().len() as f32;
            assert!(diff < 0.05, "{config:?}: mean difference {diff}");
            assert!(dst.texels().iter().all(|t| t.is_finite()));
        }
    }

    #[test]
    fn test_sample_tags_are_read_back() {
        let Some(mut pipeline) = pipeline() else {
            return;
        };
        assert!(pipeline.read_sample_tags().unwrap().is_none());
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &small_config())
            .unwrap();
        let tags = pipeline.read_sample_tags().unwrap().unwrap();
        assert_eq!(tags.size(), (32, 32));
        assert!(tags.texels().iter().any(|t| *t == SampleTag::Reference));
        let sources = pipeline.read_interpolation_sources().unwrap().unwrap();
        assert_eq!(sources.size(), (32, 32));
    }

    #[test]
    fn test_release_resources_recompiles() {
        let Some(mut pipeline) = pipeline() else {
            return;
        };
        let inputs = inputs(16);
        let mut dst = Surface::<Vec4>::new("dst", 16, 16).unwrap();
        let config = small_config().with_show_sampling(true);
        pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &config)
            .unwrap();
        assert!(pipeline.pass_log().iter().any(|p| p.technique == TechniqueId::RenderSampleLocations));
        pipeline.release_resources();
        assert!(pipeline.surfaces().screen.is_none());
        let report = pipeline
            .perform_post_processing(attribs(&inputs, &mut dst), &config)
            .unwrap();
        assert!(report.compiled > 0);
    }
}
