//! Pipelines built from the assembled programs.
//!
//! Every technique runs as a compute kernel with the frame constants in
//! bind group 0 and its own surfaces in bind group 1. The sample location
//! overlay additionally rasterizes one sprite per sample into an offscreen
//! texture that a compute kernel composites onto the destination.

use crate::error::{RenderError, RenderResult};
use crate::technique::{ProgramKind, TechniqueDesc, TechniqueId};

use super::device::GpuDevice;

/// Format of the sprite overlay target.
pub const OVERLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

const SPRITE_VERTEX_ENTRY: &str = "sample_location_vertex";
const SPRITE_COMPOSITE_ENTRY: &str = "composite_sample_locations";

/// How a technique binds one resource of group 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Storage,
    StorageRw,
    Texture,
}

/// Group 1 bindings statically used by the entry points of `id`.
pub fn bindings(id: TechniqueId) -> &'static [(u32, Slot)] {
    use Slot::{Storage as S, StorageRw as Rw, Texture as T};
    match id {
        TechniqueId::ReconstructCameraSpaceZ => &[(0, T), (1, Rw)],
        TechniqueId::RenderSliceEndpoints => &[(0, Rw)],
        TechniqueId::RenderCoordinateTexture => &[(0, S), (1, S), (2, Rw), (3, Rw), (4, Rw)],
        TechniqueId::RefineSampleLocations
        | TechniqueId::MarkRayMarchingSamples
        | TechniqueId::RenderSliceUvDirection => &[(0, S), (1, Rw)],
        TechniqueId::InitializeMinMaxShadowMap => &[(0, T), (1, S), (2, Rw)],
        TechniqueId::ComputeMinMaxShadowMapLevel => &[(2, Rw)],
        TechniqueId::RayMarch => &[(0, T), (1, T), (2, S), (3, S), (4, S), (5, S), (6, Rw)],
        TechniqueId::RayMarchMinMax => &[
            (0, T),
            (1, T),
            (2, S),
            (3, S),
            (4, S),
            (5, S),
            (6, Rw),
            (7, S),
            (8, S),
        ],
        TechniqueId::InterpolateIrradiance => &[(0, S), (1, S), (2, S), (3, Rw)],
        TechniqueId::ApplyInscatteredRadiance => &[
            (0, S),
            (1, S),
            (2, S),
            (3, S),
            (4, T),
            (5, S),
            (6, Rw),
            (7, Rw),
        ],
        TechniqueId::UnwarpEpipolarScattering => &[
            (0, S),
            (1, S),
            (2, S),
            (3, S),
            (8, S),
            (9, Rw),
            (10, Rw),
        ],
        TechniqueId::FixAndApplyInscattering => &[(0, T), (1, T), (2, S), (3, T), (4, S), (5, Rw), (6, Rw)],
        TechniqueId::FixInscattering => &[(0, T), (1, T), (2, S), (7, S), (8, Rw), (9, Rw)],
        TechniqueId::UpscaleInscattering => &[(0, S), (1, S), (2, S), (3, T), (4, S), (5, Rw), (6, Rw)],
        TechniqueId::RenderSampleLocations => &[(0, T), (1, Rw)],
        TechniqueId::PrecomputePointLightInscattering => &[(0, Rw)],
    }
}

/// Most storage buffers any technique binds to one stage.
pub fn max_storage_buffers() -> u32 {
    TechniqueId::ALL
        .iter()
        .map(|id| {
            bindings(*id)
                .iter()
                .filter(|(_, slot)| *slot != Slot::Texture)
                .count()
        })
        .max()
        .map_or(0, |count| count as u32)
}

fn layout_entry(binding: u32, slot: Slot) -> wgpu::BindGroupLayoutEntry {
    let ty = match slot {
        Slot::Storage | Slot::StorageRw => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage {
                read_only: slot == Slot::Storage,
            },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        Slot::Texture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

/// Device pipelines of a technique.
#[derive(Debug)]
pub enum Kernel {
    Compute(wgpu::ComputePipeline),
    Sprites {
        draw: wgpu::RenderPipeline,
        composite: wgpu::ComputePipeline,
    },
}

/// A compiled shader module with its pipelines.
#[derive(Debug)]
pub struct GpuProgram {
    pub module: wgpu::ShaderModule,
    /// Layout of bind group 1.
    pub resources: wgpu::BindGroupLayout,
    pub kernel: Kernel,
}

impl GpuProgram {
    /// The compute pipeline that writes the technique's outputs.
    pub fn compute(&self) -> &wgpu::ComputePipeline {
        match &self.kernel {
            Kernel::Compute(pipeline) => pipeline,
            Kernel::Sprites { composite, .. } => composite,
        }
    }
}

/// Compiles `source` and creates the pipelines of `desc`. Any validation
/// error of the module or its pipelines is a compilation failure.
pub fn build_program(gpu: &GpuDevice, desc: &TechniqueDesc, source: &str) -> RenderResult<GpuProgram> {
    let label = desc.entry_point;
    let entries: Vec<_> = bindings(desc.id)
        .iter()
        .map(|(binding, slot)| layout_entry(*binding, *slot))
        .collect();
    gpu.scoped(
        |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let resources = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[gpu.frame_layout(), &resources],
                push_constant_ranges: &[],
            });
            let compute = |entry_point: &str| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry_point),
                    layout: Some(&layout),
                    module: &module,
                    entry_point: Some(entry_point),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            };
            let kernel = match desc.kind {
                ProgramKind::Compute => Kernel::Compute(compute(desc.entry_point)),
                ProgramKind::PointSprite => Kernel::Sprites {
                    draw: sprite_pipeline(device, &module, desc.entry_point),
                    composite: compute(SPRITE_COMPOSITE_ENTRY),
                },
            };
            GpuProgram {
                module,
                resources,
                kernel,
            }
        },
        |msg| RenderError::ShaderCompilationFailed(format!("{label}: {msg}")),
    )
}

/// One quad per instance: sample coordinates in slot 0, sample tags in slot 1.
fn sprite_pipeline(device: &wgpu::Device, module: &wgpu::ShaderModule, fragment_entry: &str) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("sample location sprites"),
        bind_group_layouts: &[],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("sample location sprites"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some(SPRITE_VERTEX_ENTRY),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x2,
                        offset: 0,
                        shader_location: 0,
                    }],
                },
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<u32>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Uint32,
                        offset: 0,
                        shader_location: 1,
                    }],
                },
            ],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: OVERLAY_FORMAT,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_are_sorted_and_unique() {
        for id in TechniqueId::ALL {
            let slots = bindings(id);
            assert!(!slots.is_empty(), "{id:?}");
            assert!(slots.windows(2).all(|w| w[0].0 < w[1].0), "{id:?}");
        }
    }

    #[test]
    fn test_widest_technique_fits_default_limits() {
        assert_eq!(max_storage_buffers(), 7);
        assert!(max_storage_buffers() <= wgpu::Limits::default().max_storage_buffers_per_shader_stage);
    }

    fn device() -> Option<std::sync::Arc<GpuDevice>> {
        match pollster::block_on(GpuDevice::new_headless()) {
            Ok(gpu) => Some(gpu),
            Err(err) => {
                eprintln!("skipping: {err}");
                None
            }
        }
    }

    #[test]
    fn test_broken_source_fails_compilation() {
        let Some(gpu) = device() else {
            return;
        };
        let desc = TechniqueId::InterpolateIrradiance.desc();
        let err = build_program(&gpu, desc, "fn interpolate_irradiance( {").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(ref msg) if msg.starts_with(desc.entry_point)));
    }

    #[test]
    fn test_missing_macros_fail_compilation() {
        let Some(gpu) = device() else {
            return;
        };
        let desc = TechniqueId::RenderCoordinateTexture.desc();
        let source = crate::gpu::programs::assemble(desc, &crate::technique::MacroSet::default()).unwrap();
        let err = build_program(&gpu, desc, &source).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn test_sprite_program_has_both_pipelines() {
        let Some(gpu) = device() else {
            return;
        };
        let desc = TechniqueId::RenderSampleLocations.desc();
        let macros = crate::technique::MacroSet::for_technique(
            desc,
            &episcatter_core::PostProcessConfig::default().with_show_sampling(true),
            crate::technique::ScreenSize {
                width: 64,
                height: 64,
            },
        );
        let source = crate::gpu::programs::assemble(desc, &macros).unwrap();
        let program = build_program(&gpu, desc, &source).unwrap();
        assert!(matches!(program.kernel, Kernel::Sprites { .. }));
    }

    #[test]
    fn test_min_max_ray_march_extends_plain_ray_march() {
        let plain = bindings(TechniqueId::RayMarch);
        let min_max = bindings(TechniqueId::RayMarchMinMax);
        assert_eq!(&min_max[..plain.len()], plain);
    }
}
