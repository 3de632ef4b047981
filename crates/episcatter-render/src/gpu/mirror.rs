//! Device copies of host surfaces and of the frame constants.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::context::FrameConstants;
use crate::error::{RenderError, RenderResult};
use crate::surface::{Surface, Texel};

use super::device::GpuDevice;

/// Usage requested for mirrored textures; narrowed to what the adapter
/// allows for the texel format.
const MIRROR_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC);

/// A texture uploaded from a surface.
#[derive(Debug)]
pub struct MirroredTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
}

/// Uniform buffers holding the per-frame constants.
#[derive(Debug)]
pub struct ConstantBuffers {
    pub post_processing: wgpu::Buffer,
    pub media: wgpu::Buffer,
    pub camera: wgpu::Buffer,
    pub light: wgpu::Buffer,
}

/// Textures mirrored onto a device, keyed by slot name.
#[derive(Debug)]
pub struct GpuMirror {
    gpu: Arc<GpuDevice>,
    textures: HashMap<String, MirroredTexture>,
    constants: Option<ConstantBuffers>,
}

impl GpuMirror {
    pub fn new(gpu: Arc<GpuDevice>) -> Self {
        Self {
            gpu,
            textures: HashMap::new(),
            constants: None,
        }
    }

    /// Creates a mirror on a headless device.
    pub async fn new_headless() -> RenderResult<Self> {
        Ok(Self::new(GpuDevice::new_headless().await?))
    }

    pub fn gpu(&self) -> &Arc<GpuDevice> {
        &self.gpu
    }

    pub fn device(&self) -> &wgpu::Device {
        self.gpu.device()
    }

    pub fn queue(&self) -> &wgpu::Queue {
        self.gpu.queue()
    }

    /// Uploads `surface` under its own label.
    pub fn upload<T: Texel>(&mut self, surface: &Surface<T>) -> RenderResult<&MirroredTexture> {
        let slot = surface.label().to_owned();
        self.upload_as(&slot, surface)
    }

    /// Uploads `surface` into `slot`, reusing the slot's texture when its
    /// format and size still match.
    pub fn upload_as<T: Texel>(&mut self, slot: &str, surface: &Surface<T>) -> RenderResult<&MirroredTexture> {
        let desc = surface.desc();
        let (width, height) = (desc.width, desc.height);
        if width == 0 || height == 0 {
            return Err(RenderError::TextureCreationFailed(format!(
                "{slot}: empty surface"
            )));
        }
        let limit = self.gpu.device().limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(RenderError::TextureCreationFailed(format!(
                "{slot}: {width}x{height} exceeds the device limit of {limit}"
            )));
        }

        let stale = self
            .textures
            .get(slot)
            .map_or(true, |t| t.format != desc.format || t.size != (width, height));
        if stale {
            let allowed = self
                .gpu
                .adapter()
                .get_texture_format_features(desc.format)
                .allowed_usages;
            let usage = MIRROR_USAGE & allowed;
            if !usage.contains(wgpu::TextureUsages::COPY_DST) {
                return Err(RenderError::TextureCreationFailed(format!(
                    "{slot}: {:?} textures cannot be written",
                    desc.format
                )));
            }
            let texture = self.gpu.scoped(
                |device| {
                    device.create_texture(&wgpu::TextureDescriptor {
                        label: Some(slot),
                        size: wgpu::Extent3d {
                            width,
                            height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: desc.format,
                        usage,
                        view_formats: &[],
                    })
                },
                |msg| RenderError::TextureCreationFailed(format!("{slot}: {msg}")),
            )?;
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            log::debug!("created {:?} texture {slot} {width}x{height}", desc.format);
            self.textures.insert(
                slot.to_owned(),
                MirroredTexture {
                    texture,
                    view,
                    format: desc.format,
                    size: (width, height),
                },
            );
        }

        let mirrored = self
            .textures
            .get(slot)
            .ok_or_else(|| RenderError::TextureCreationFailed(slot.to_owned()))?;
        self.gpu.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &mirrored.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &surface.to_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.bytes_per_row()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(mirrored)
    }

    /// Writes the frame constants, creating the buffers on first use.
    pub fn upload_constants(&mut self, constants: &FrameConstants) -> &ConstantBuffers {
        let buffers = match self.constants.take() {
            Some(buffers) => {
                let writes = [
                    (&buffers.post_processing, bytemuck::bytes_of(&constants.post_processing)),
                    (&buffers.media, bytemuck::bytes_of(&constants.media)),
                    (&buffers.camera, bytemuck::bytes_of(&constants.camera)),
                    (&buffers.light, bytemuck::bytes_of(&constants.light)),
                ];
                for (buffer, data) in writes {
                    self.gpu.queue().write_buffer(buffer, 0, data);
                }
                buffers
            }
            None => {
                let uniform = |label: &str, contents: &[u8]| {
                    self.gpu
                        .device()
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some(label),
                            contents,
                            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        })
                };
                ConstantBuffers {
                    post_processing: uniform(
                        "post processing constants",
                        bytemuck::bytes_of(&constants.post_processing),
                    ),
                    media: uniform("media constants", bytemuck::bytes_of(&constants.media)),
                    camera: uniform("camera constants", bytemuck::bytes_of(&constants.camera)),
                    light: uniform("light constants", bytemuck::bytes_of(&constants.light)),
                }
            }
        };
        self.constants.insert(buffers)
    }

    pub fn constants(&self) -> Option<&ConstantBuffers> {
        self.constants.as_ref()
    }

    pub fn texture(&self, slot: &str) -> Option<&MirroredTexture> {
        self.textures.get(slot)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    use crate::surface::{PixelTag, SampleTag};

    fn mirror() -> Option<GpuMirror> {
        match pollster::block_on(GpuMirror::new_headless()) {
            Ok(mirror) => Some(mirror),
            Err(err) => {
                eprintln!("skipping: {err}");
                None
            }
        }
    }

    #[test]
    fn test_upload_reuses_texture() {
        let Some(mut mirror) = mirror() else {
            return;
        };
        let surface = Surface::from_fn("scattering", 8, 4, |x, y| {
            Vec4::new(x as f32, y as f32, 0.0, 1.0)
        })
        .unwrap();
        let format = mirror.upload(&surface).unwrap().format;
        assert_eq!(format, wgpu::TextureFormat::Rgba32Float);
        mirror.upload(&surface).unwrap();
        assert_eq!(mirror.texture_count(), 1);
    }

    #[test]
    fn test_upload_unfilterable_and_integer_formats() {
        let Some(mut mirror) = mirror() else {
            return;
        };
        let depth = Surface::from_texels("depth", 4, 4, vec![0.5_f32; 16]).unwrap();
        let mirrored = mirror.upload(&depth).unwrap();
        assert_eq!(mirrored.format, wgpu::TextureFormat::R32Float);
        assert!(!mirrored
            .texture
            .usage()
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT));

        mirror
            .upload(&Surface::<SampleTag>::new("sample tags", 4, 2).unwrap())
            .unwrap();
        mirror
            .upload(&Surface::<PixelTag>::new("pixel tags", 4, 2).unwrap())
            .unwrap();
        assert_eq!(mirror.texture_count(), 3);
    }

    #[test]
    fn test_slot_is_recreated_when_size_changes() {
        let Some(mut mirror) = mirror() else {
            return;
        };
        let small = Surface::from_texels("a", 2, 2, vec![1.0_f32; 4]).unwrap();
        let large = Surface::from_texels("b", 4, 4, vec![1.0_f32; 16]).unwrap();
        mirror.upload_as("shadow map", &small).unwrap();
        let size = mirror.upload_as("shadow map", &large).unwrap().size;
        assert_eq!(size, (4, 4));
        assert_eq!(mirror.texture_count(), 1);
        assert!(mirror.texture("a").is_none());
    }
}
