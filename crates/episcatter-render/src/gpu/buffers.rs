//! Device storage for the intermediate surfaces.
//!
//! Every host surface group has a buffer counterpart laid out row-major with
//! one 32-bit word per scalar: tags and packed interpolation sources are
//! `u32`, radiance is `vec4<f32>`. Groups are released on the same
//! configuration changes as their host surfaces.

use episcatter_core::ConfigDiff;

use crate::error::{RenderError, RenderResult};
use crate::resources::ResourceGroup;
use crate::stages::integral::TABLE_RESOLUTION;

use super::device::GpuDevice;
use super::kernels::OVERLAY_FORMAT;

/// Smallest buffer created, so that empty groups still bind.
const MIN_BUFFER_SIZE: u64 = 16;

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

const WORD: u64 = 4;
const VEC2: u64 = 8;
const VEC4: u64 = 16;

fn storage(
    gpu: &GpuDevice,
    label: &str,
    bytes: u64,
    extra: wgpu::BufferUsages,
) -> RenderResult<wgpu::Buffer> {
    gpu.scoped(
        |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes.max(MIN_BUFFER_SIZE),
                usage: STORAGE_USAGE | extra,
                mapped_at_creation: false,
            })
        },
        |msg| RenderError::BufferCreationFailed(format!("{label}: {msg}")),
    )
}

fn texels(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height)
}

/// Full-resolution screen buffers and the overlay target.
#[derive(Debug)]
pub struct ScreenBuffers {
    pub size: (u32, u32),
    pub camera_z: wgpu::Buffer,
    pub tags: wgpu::Buffer,
    /// Destination color, read back at the end of the frame.
    pub dst: wgpu::Buffer,
    pub overlay: wgpu::Texture,
    pub overlay_view: wgpu::TextureView,
}

/// Buffers indexed by (sample, slice).
#[derive(Debug)]
pub struct EpipolarBuffers {
    pub samples: u32,
    pub slices: u32,
    pub slice_endpoints: wgpu::Buffer,
    /// Also the first instance buffer of the overlay sprites.
    pub coordinates: wgpu::Buffer,
    pub camera_z: wgpu::Buffer,
    /// Also the second instance buffer of the overlay sprites.
    pub tags: wgpu::Buffer,
    pub interpolation_sources: wgpu::Buffer,
    pub initial_scattering: wgpu::Buffer,
    pub scattering: wgpu::Buffer,
}

/// Per-slice min/max trees, one row of `resolution` nodes per slice.
#[derive(Debug)]
pub struct MinMaxBuffers {
    pub resolution: u32,
    pub slices: u32,
    pub slice_uv_dir: wgpu::Buffer,
    pub tree: wgpu::Buffer,
}

/// Scattering at reduced resolution.
#[derive(Debug)]
pub struct DownscaledBuffers {
    pub size: (u32, u32),
    pub camera_z: wgpu::Buffer,
    pub tags: wgpu::Buffer,
    pub scattering: wgpu::Buffer,
}

/// Every intermediate buffer of the device pipeline.
#[derive(Debug)]
pub struct GpuSurfaces {
    pub screen: Option<ScreenBuffers>,
    pub epipolar: Option<EpipolarBuffers>,
    pub min_max: Option<MinMaxBuffers>,
    pub downscaled: Option<DownscaledBuffers>,
    /// Precomputed point light table, `TABLE_RESOLUTION` squared texels.
    pub table: Option<wgpu::Buffer>,
    /// Bound in place of the table when the frame needs none.
    pub unused_table: wgpu::Buffer,
    /// Bound in place of the stained glass map when the frame has none.
    pub unused_glass: wgpu::TextureView,
}

impl GpuSurfaces {
    pub fn new(gpu: &GpuDevice) -> RenderResult<Self> {
        let unused_table = storage(gpu, "unused inscattering table", VEC4, wgpu::BufferUsages::empty())?;
        let glass = gpu.scoped(
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("unused stained glass"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba32Float,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                })
            },
            |msg| RenderError::TextureCreationFailed(format!("unused stained glass: {msg}")),
        )?;
        Ok(Self {
            screen: None,
            epipolar: None,
            min_max: None,
            downscaled: None,
            table: None,
            unused_table,
            unused_glass: glass.create_view(&wgpu::TextureViewDescriptor::default()),
        })
    }

    pub fn is_allocated(&self, group: ResourceGroup) -> bool {
        match group {
            ResourceGroup::Screen => self.screen.is_some(),
            ResourceGroup::Epipolar => self.epipolar.is_some(),
            ResourceGroup::MinMax => self.min_max.is_some(),
            ResourceGroup::Downscaled => self.downscaled.is_some(),
            ResourceGroup::PointLightTables => self.table.is_some(),
        }
    }

    pub fn release(&mut self, group: ResourceGroup) {
        if self.is_allocated(group) {
            log::debug!("releasing {group:?} buffers");
        }
        match group {
            ResourceGroup::Screen => self.screen = None,
            ResourceGroup::Epipolar => self.epipolar = None,
            ResourceGroup::MinMax => self.min_max = None,
            ResourceGroup::Downscaled => self.downscaled = None,
            ResourceGroup::PointLightTables => self.table = None,
        }
    }

    /// Releases every group depending on a changed field.
    pub fn invalidate(&mut self, diff: ConfigDiff) -> Vec<ResourceGroup> {
        let mut released = Vec::new();
        for group in ResourceGroup::ALL {
            if diff.intersects(group.dependencies()) && self.is_allocated(group) {
                self.release(group);
                released.push(group);
            }
        }
        released
    }

    pub fn release_all(&mut self) {
        for group in ResourceGroup::ALL {
            self.release(group);
        }
    }

    pub fn ensure_screen(&mut self, gpu: &GpuDevice, width: u32, height: u32) -> RenderResult<()> {
        if matches!(&self.screen, Some(s) if s.size == (width, height)) {
            return Ok(());
        }
        log::info!("allocating screen buffers {width}x{height}");
        let n = texels(width, height);
        let overlay = gpu.scoped(
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("sample location overlay"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: OVERLAY_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                })
            },
            |msg| RenderError::TextureCreationFailed(format!("sample location overlay: {msg}")),
        )?;
        self.screen = Some(ScreenBuffers {
            size: (width, height),
            camera_z: storage(gpu, "screen camera-space z", n * WORD, wgpu::BufferUsages::empty())?,
            tags: storage(gpu, "screen pixel tags", n * WORD, wgpu::BufferUsages::empty())?,
            dst: storage(gpu, "destination color", n * VEC4, wgpu::BufferUsages::empty())?,
            overlay_view: overlay.create_view(&wgpu::TextureViewDescriptor::default()),
            overlay,
        });
        Ok(())
    }

    pub fn ensure_epipolar(&mut self, gpu: &GpuDevice, samples: u32, slices: u32) -> RenderResult<()> {
        if matches!(&self.epipolar, Some(e) if e.samples == samples && e.slices == slices) {
            return Ok(());
        }
        log::info!("allocating epipolar buffers {samples} samples x {slices} slices");
        let n = texels(samples, slices);
        let none = wgpu::BufferUsages::empty();
        self.epipolar = Some(EpipolarBuffers {
            samples,
            slices,
            slice_endpoints: storage(gpu, "slice endpoints", u64::from(slices) * VEC4, none)?,
            coordinates: storage(gpu, "epipolar coordinates", n * VEC2, wgpu::BufferUsages::VERTEX)?,
            camera_z: storage(gpu, "epipolar camera-space z", n * WORD, none)?,
            tags: storage(gpu, "epipolar sample tags", n * WORD, wgpu::BufferUsages::VERTEX)?,
            interpolation_sources: storage(gpu, "interpolation sources", n * WORD, none)?,
            initial_scattering: storage(gpu, "initial scattered light", n * VEC4, none)?,
            scattering: storage(gpu, "interpolated scattered light", n * VEC4, none)?,
        });
        Ok(())
    }

    pub fn ensure_min_max(&mut self, gpu: &GpuDevice, resolution: u32, slices: u32) -> RenderResult<()> {
        if matches!(&self.min_max, Some(m) if m.resolution == resolution && m.slices == slices) {
            return Ok(());
        }
        log::info!("allocating min/max tree buffers {resolution} x {slices} slices");
        let none = wgpu::BufferUsages::empty();
        self.min_max = Some(MinMaxBuffers {
            resolution,
            slices,
            slice_uv_dir: storage(gpu, "slice uv origin and direction", u64::from(slices) * VEC4, none)?,
            tree: storage(gpu, "min/max shadow map", texels(resolution, slices) * VEC2, none)?,
        });
        Ok(())
    }

    pub fn ensure_downscaled(&mut self, gpu: &GpuDevice, width: u32, height: u32) -> RenderResult<()> {
        if matches!(&self.downscaled, Some(d) if d.size == (width, height)) {
            return Ok(());
        }
        log::info!("allocating downscaled buffers {width}x{height}");
        let n = texels(width, height);
        let none = wgpu::BufferUsages::empty();
        self.downscaled = Some(DownscaledBuffers {
            size: (width, height),
            camera_z: storage(gpu, "downscaled camera-space z", n * WORD, none)?,
            tags: storage(gpu, "downscaled pixel tags", n * WORD, none)?,
            scattering: storage(gpu, "downscaled scattered light", n * VEC4, none)?,
        });
        Ok(())
    }

    /// Allocates the point light table. Returns true when it was missing
    /// and must be precomputed.
    pub fn ensure_table(&mut self, gpu: &GpuDevice) -> RenderResult<bool> {
        if self.table.is_some() {
            return Ok(false);
        }
        let bytes = texels(TABLE_RESOLUTION, TABLE_RESOLUTION) * VEC4;
        self.table = Some(storage(gpu, "point light inscattering table", bytes, wgpu::BufferUsages::empty())?);
        Ok(true)
    }

    /// The table to bind: the precomputed one, or a placeholder.
    pub fn table_or_unused(&self) -> &wgpu::Buffer {
        self.table.as_ref().unwrap_or(&self.unused_table)
    }
}

/// Copies `buffer` to the host.
pub fn read_buffer<T: bytemuck::Pod>(gpu: &GpuDevice, buffer: &wgpu::Buffer) -> RenderResult<Vec<T>> {
    let size = buffer.size();
    let staging = gpu.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    gpu.queue().submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = gpu.device().poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|err| RenderError::CommandFailed(format!("readback: {err}")))?
        .map_err(|err| RenderError::CommandFailed(format!("readback: {err}")))?;

    let data = slice.get_mapped_range();
    let texels = bytemuck::try_cast_slice::<u8, T>(&data)
        .map(<[T]>::to_vec)
        .map_err(|err| RenderError::CommandFailed(format!("readback: {err}")));
    drop(data);
    staging.unmap();
    texels
}
