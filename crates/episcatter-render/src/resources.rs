//! Intermediate surfaces, grouped by the settings that size them.

use std::collections::HashMap;

use glam::{Vec2, Vec4};

use episcatter_core::{ConfigDiff, ConfigField};

use crate::error::{RenderError, RenderResult};
use crate::stages::integral::InscatteringTable;
use crate::surface::{
    InterpolationSource, MinMaxDepth, PingPong, PixelTag, Radiance16, SampleTag, Surface,
};

/// A set of surfaces allocated and released together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceGroup {
    Screen,
    Epipolar,
    MinMax,
    Downscaled,
    PointLightTables,
}

impl ResourceGroup {
    pub const ALL: [ResourceGroup; 5] = [
        ResourceGroup::Screen,
        ResourceGroup::Epipolar,
        ResourceGroup::MinMax,
        ResourceGroup::Downscaled,
        ResourceGroup::PointLightTables,
    ];

    /// Fields whose change forces the group to be reallocated.
    pub fn dependencies(self) -> &'static [ConfigField] {
        match self {
            ResourceGroup::Screen => &[ConfigField::ScreenResolution],
            ResourceGroup::Epipolar => {
                &[ConfigField::NumEpipolarSlices, ConfigField::MaxSamplesInSlice]
            }
            ResourceGroup::MinMax => &[
                ConfigField::MinMaxShadowMapResolution,
                ConfigField::NumEpipolarSlices,
                ConfigField::AccelStruct,
            ],
            ResourceGroup::Downscaled => {
                &[ConfigField::DownscaleFactor, ConfigField::ScreenResolution]
            }
            ResourceGroup::PointLightTables => &[
                ConfigField::DistanceScaler,
                ConfigField::RayleighBeta,
                ConfigField::MieBeta,
                ConfigField::InscatteringMethod,
                ConfigField::AnisotropicPhaseFunction,
                ConfigField::MaxTracingDistance,
            ],
        }
    }
}

/// Full-resolution screen surfaces.
#[derive(Debug)]
pub struct ScreenSurfaces {
    pub camera_z: Surface<f32>,
    pub tags: Surface<PixelTag>,
}

/// Surfaces indexed by (sample, slice).
#[derive(Debug)]
pub struct EpipolarSurfaces {
    /// `N x 1`: entry xy, exit xy.
    pub slice_endpoints: Surface<Vec4>,
    pub coordinates: Surface<Vec2>,
    pub camera_z: Surface<f32>,
    pub tags: Surface<SampleTag>,
    pub interpolation_sources: Surface<InterpolationSource>,
    pub initial_scattering: Surface<Radiance16>,
    pub scattering: Surface<Radiance16>,
}

impl EpipolarSurfaces {
    pub fn samples(&self) -> u32 {
        self.coordinates.width()
    }

    pub fn slices(&self) -> u32 {
        self.coordinates.height()
    }
}

/// Per-slice 1D min/max trees.
#[derive(Debug)]
pub struct MinMaxSurfaces {
    /// `N x 1`: slice origin uv, slice direction uv.
    pub slice_uv_dir: Surface<Vec4>,
    pub pyramid: PingPong<MinMaxDepth>,
}

impl MinMaxSurfaces {
    pub fn resolution(&self) -> u32 {
        self.pyramid.size().0
    }
}

/// Scattering rendered at reduced resolution.
#[derive(Debug)]
pub struct DownscaledSurfaces {
    pub scattering: Surface<Radiance16>,
    pub camera_z: Surface<f32>,
    pub tags: Surface<PixelTag>,
}

/// Every intermediate surface owned by the pipeline.
#[derive(Debug, Default)]
pub struct SurfacePool {
    pub screen: Option<ScreenSurfaces>,
    pub epipolar: Option<EpipolarSurfaces>,
    pub min_max: Option<MinMaxSurfaces>,
    pub downscaled: Option<DownscaledSurfaces>,
    pub tables: Option<InscatteringTable>,
    allocations: HashMap<ResourceGroup, u32>,
}

impl SurfacePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allocated(&self, group: ResourceGroup) -> bool {
        match group {
            ResourceGroup::Screen => self.screen.is_some(),
            ResourceGroup::Epipolar => self.epipolar.is_some(),
            ResourceGroup::MinMax => self.min_max.is_some(),
            ResourceGroup::Downscaled => self.downscaled.is_some(),
            ResourceGroup::PointLightTables => self.tables.is_some(),
        }
    }

    pub fn release(&mut self, group: ResourceGroup) {
        if self.is_allocated(group) {
            log::debug!("releasing {group:?} surfaces");
        }
        match group {
            ResourceGroup::Screen => self.screen = None,
            ResourceGroup::Epipolar => self.epipolar = None,
            ResourceGroup::MinMax => self.min_max = None,
            ResourceGroup::Downscaled => self.downscaled = None,
            ResourceGroup::PointLightTables => self.tables = None,
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

    /// Number of times a group has been allocated.
    pub fn allocation_count(&self, group: ResourceGroup) -> u32 {
        self.allocations.get(&group).copied().unwrap_or(0)
    }

    fn count(&mut self, group: ResourceGroup) {
        *self.allocations.entry(group).or_insert(0) += 1;
    }

    pub fn ensure_screen(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if matches!(&self.screen, Some(s) if s.camera_z.size() == (width, height)) {
            return Ok(());
        }
        log::info!("allocating screen surfaces {width}x{height}");
        self.screen = Some(ScreenSurfaces {
            camera_z: Surface::new("screen camera-space z", width, height)?,
            tags: Surface::new("screen pixel tags", width, height)?,
        });
        self.count(ResourceGroup::Screen);
        Ok(())
    }

    pub fn ensure_epipolar(&mut self, samples: u32, slices: u32) -> RenderResult<()> {
        if matches!(&self.epipolar, Some(e) if e.samples() == samples && e.slices() == slices) {
            return Ok(());
        }
        log::info!("allocating epipolar surfaces {samples} samples x {slices} slices");
        self.epipolar = Some(EpipolarSurfaces {
            slice_endpoints: Surface::new("slice endpoints", slices, 1)?,
            coordinates: Surface::new("epipolar coordinates", samples, slices)?,
            camera_z: Surface::new("epipolar camera-space z", samples, slices)?,
            tags: Surface::new("epipolar sample tags", samples, slices)?,
            interpolation_sources: Surface::new("interpolation sources", samples, slices)?,
            initial_scattering: Surface::new("initial scattered light", samples, slices)?,
            scattering: Surface::new("interpolated scattered light", samples, slices)?,
        });
        self.count(ResourceGroup::Epipolar);
        Ok(())
    }

    pub fn ensure_min_max(&mut self, resolution: u32, slices: u32) -> RenderResult<()> {
        if matches!(&self.min_max, Some(m) if m.pyramid.size() == (resolution, slices)) {
            return Ok(());
        }
        log::info!("allocating min/max trees {resolution} x {slices} slices");
        self.min_max = Some(MinMaxSurfaces {
            slice_uv_dir: Surface::new("slice uv origin and direction", slices, 1)?,
            pyramid: PingPong::new("min/max shadow map", resolution, slices)?,
        });
        self.count(ResourceGroup::MinMax);
        Ok(())
    }

    pub fn ensure_downscaled(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if matches!(&self.downscaled, Some(d) if d.scattering.size() == (width, height)) {
            return Ok(());
        }
        log::info!("allocating downscaled surfaces {width}x{height}");
        self.downscaled = Some(DownscaledSurfaces {
            scattering: Surface::new("downscaled scattered light", width, height)?,
            camera_z: Surface::new("downscaled camera-space z", width, height)?,
            tags: Surface::new("downscaled pixel tags", width, height)?,
        });
        self.count(ResourceGroup::Downscaled);
        Ok(())
    }

    /// Stores freshly built point-light tables.
    pub fn store_tables(&mut self, table: InscatteringTable) {
        self.tables = Some(table);
        self.count(ResourceGroup::PointLightTables);
    }

    pub fn screen(&self) -> RenderResult<&ScreenSurfaces> {
        self.screen.as_ref().ok_or_else(|| missing("screen"))
    }

    pub fn epipolar(&self) -> RenderResult<&EpipolarSurfaces> {
        self.epipolar.as_ref().ok_or_else(|| missing("epipolar"))
    }

    pub fn min_max(&self) -> RenderResult<&MinMaxSurfaces> {
        self.min_max.as_ref().ok_or_else(|| missing("min/max"))
    }

    pub fn downscaled(&self) -> RenderResult<&DownscaledSurfaces> {
        self.downscaled.as_ref().ok_or_else(|| missing("downscaled"))
    }
}

pub(crate) fn missing(group: &str) -> RenderError {
    RenderError::MissingResource(format!("{group} surfaces are not allocated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_reuses_matching_allocation() {
        let mut pool = SurfacePool::new();
        pool.ensure_epipolar(64, 32).unwrap();
        pool.ensure_epipolar(64, 32).unwrap();
        assert_eq!(pool.allocation_count(ResourceGroup::Epipolar), 1);
        pool.ensure_epipolar(128, 32).unwrap();
        assert_eq!(pool.allocation_count(ResourceGroup::Epipolar), 2);
        let e = pool.epipolar().unwrap();
        assert_eq!(e.coordinates.size(), (128, 32));
        assert_eq!(e.slice_endpoints.size(), (32, 1));
    }

    #[test]
    fn test_invalidate_releases_dependent_groups() {
        let mut pool = SurfacePool::new();
        pool.ensure_screen(8, 8).unwrap();
        pool.ensure_epipolar(64, 32).unwrap();
        pool.ensure_min_max(256, 32).unwrap();
        pool.ensure_downscaled(4, 4).unwrap();

        let released = pool.invalidate(ConfigDiff::empty().with(ConfigField::AccelStruct));
        assert_eq!(released, vec![ResourceGroup::MinMax]);

        let released = pool.invalidate(ConfigDiff::empty().with(ConfigField::ScreenResolution));
        assert_eq!(released, vec![ResourceGroup::Screen, ResourceGroup::Downscaled]);
        assert!(pool.is_allocated(ResourceGroup::Epipolar));
        assert!(pool.screen().is_err());

        pool.release_all();
        assert!(!pool.is_allocated(ResourceGroup::Epipolar));
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let mut pool = SurfacePool::new();
        assert!(matches!(
            pool.ensure_screen(0, 10),
            Err(RenderError::TextureCreationFailed(_))
        ));
        assert!(!pool.is_allocated(ResourceGroup::Screen));
    }
}
