//! Headless device shared by the mirror and the compute backend.

use std::sync::Arc;

use pollster::FutureExt;

use episcatter_core::PostProcessConfig;

use crate::error::{RenderError, RenderResult};

use super::kernels;

/// Uniform buffers of the frame bind group: post processing, media, camera,
/// light and the per-dispatch pass constants.
pub const FRAME_BINDINGS: u32 = 5;

/// A wgpu device able to run every technique.
#[derive(Debug)]
pub struct GpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    frame_layout: wgpu::BindGroupLayout,
}

impl GpuDevice {
    /// Opens the default adapter without a surface.
    pub async fn new_headless() -> RenderResult<Arc<Self>> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::AdapterCreationFailed)?;
        Self::from_adapter(adapter).await
    }

    /// Opens a device on `adapter` after checking it can bind the widest
    /// technique.
    pub async fn from_adapter(adapter: wgpu::Adapter) -> RenderResult<Arc<Self>> {
        let info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(RenderError::UnsupportedDevice(format!(
                "{} has no compute shaders",
                info.name
            )));
        }
        let limits = adapter.limits();
        let needed = kernels::max_storage_buffers();
        if limits.max_storage_buffers_per_shader_stage < needed {
            return Err(RenderError::UnsupportedDevice(format!(
                "{} binds {} storage buffers per stage, {needed} are needed",
                info.name, limits.max_storage_buffers_per_shader_stage
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("episcatter device (headless)"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured device error: {err}");
        }));
        let frame_layout = create_frame_layout(&device);
        log::info!("gpu backend on {} ({:?})", info.name, info.backend);
        Ok(Arc::new(Self {
            adapter,
            device,
            queue,
            frame_layout,
        }))
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Layout of bind group 0, shared by every technique.
    pub fn frame_layout(&self) -> &wgpu::BindGroupLayout {
        &self.frame_layout
    }

    /// Runs `create` inside validation and out-of-memory error scopes.
    ///
    /// Validation errors are turned into an error by `on_invalid`; running
    /// out of memory becomes [`RenderError::OutOfMemory`].
    pub fn scoped<T>(
        &self,
        create: impl FnOnce(&wgpu::Device) -> T,
        on_invalid: impl FnOnce(String) -> RenderError,
    ) -> RenderResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let invalid = self.device.pop_error_scope().block_on();
        let out_of_memory = self.device.pop_error_scope().block_on();
        if let Some(err) = invalid {
            return Err(on_invalid(err.to_string()));
        }
        if out_of_memory.is_some() {
            return Err(RenderError::OutOfMemory);
        }
        Ok(value)
    }

    /// Checks `config` and the frame dimensions against this device.
    pub fn validate_config(
        &self,
        config: &PostProcessConfig,
        screen: (u32, u32),
        shadow_map_resolution: u32,
    ) -> RenderResult<()> {
        config.validate()?;

        let limits = self.device.limits();
        let dimension = limits.max_texture_dimension_2d;
        if screen.0 > dimension || screen.1 > dimension || shadow_map_resolution > dimension {
            return Err(RenderError::UnsupportedDevice(format!(
                "{}x{} screen with a {shadow_map_resolution} shadow map exceeds the texture limit of {dimension}",
                screen.0, screen.1
            )));
        }

        let slices = u64::from(config.num_epipolar_slices);
        let largest = [
            (
                "epipolar scattering",
                slices * u64::from(config.max_samples_in_slice) * 16,
            ),
            (
                "screen color",
                u64::from(screen.0) * u64::from(screen.1) * 16,
            ),
            (
                "min/max trees",
                slices * u64::from(config.effective_min_max_resolution(shadow_map_resolution)) * 8,
            ),
        ];
        let binding_limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        for (name, bytes) in largest {
            if bytes > binding_limit {
                return Err(RenderError::UnsupportedDevice(format!(
                    "{name} need {bytes} bytes, the device binds at most {binding_limit}"
                )));
            }
        }
        Ok(())
    }
}

fn create_frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = (0..FRAME_BINDINGS)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("frame constants layout"),
        entries: &entries,
    })
}
