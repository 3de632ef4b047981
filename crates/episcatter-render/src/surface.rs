//! Texture storage for the post-processing passes.
//!
//! A [`Surface`] is a 2D texel array tagged with the wgpu format and usage
//! it would have on a device. Passes read and write surfaces through the
//! quad rasterizer in [`crate::quad`]; [`crate::gpu`] uploads them verbatim.

use glam::{Vec2, Vec3, Vec4};
use half::f16;

use crate::error::{RenderError, RenderResult};
use crate::quad::BlendMode;

/// Marker for coordinates and depths of discarded epipolar samples.
pub const INVALID_COORDINATE: f32 = -1e10;

/// Largest width or height a surface may have.
pub const MAX_SURFACE_DIMENSION: u32 = 16384;

/// A texel type with a fixed GPU format.
pub trait Texel: Copy + Default + PartialEq + std::fmt::Debug {
    /// Format of a texture holding this texel type.
    const FORMAT: wgpu::TextureFormat;

    /// Appends the texel in its GPU byte layout.
    fn write_bytes(&self, out: &mut Vec<u8>);

    /// Combines a new value with the value already stored.
    #[must_use]
    fn blend(self, _dst: Self, _mode: BlendMode) -> Self {
        self
    }
}

impl Texel for f32 {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Texel for Vec2 {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(bytemuck::bytes_of(&self.to_array()));
    }
}

impl Texel for Vec4 {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(bytemuck::bytes_of(&self.to_array()));
    }

    fn blend(self, dst: Self, mode: BlendMode) -> Self {
        match mode {
            BlendMode::Replace => self,
            BlendMode::AlphaOver => {
                let a = self.w.clamp(0.0, 1.0);
                let rgb = self.truncate() * a + dst.truncate() * (1.0 - a);
                rgb.extend(a + dst.w * (1.0 - a))
            }
        }
    }
}

/// Half-precision RGBA radiance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Radiance16(pub [f16; 4]);

impl Radiance16 {
    pub fn from_rgb(rgb: Vec3) -> Self {
        Self([
            f16::from_f32(rgb.x),
            f16::from_f32(rgb.y),
            f16::from_f32(rgb.z),
            f16::ONE,
        ])
    }

    pub fn rgb(self) -> Vec3 {
        Vec3::new(self.0[0].to_f32(), self.0[1].to_f32(), self.0[2].to_f32())
    }
}

impl Texel for Radiance16 {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        for c in self.0 {
            out.extend_from_slice(&c.to_bits().to_le_bytes());
        }
    }
}

/// Indices of the two samples a sample interpolates between.
///
/// A sample whose sources are both itself is a ray-marching sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterpolationSource {
    pub left: u16,
    pub right: u16,
}

impl InterpolationSource {
    pub fn new(left: u16, right: u16) -> Self {
        Self { left, right }
    }

    /// Source pair of a sample that is marched itself.
    pub fn itself(index: u16) -> Self {
        Self::new(index, index)
    }

    pub fn is_self_reference(self, index: u16) -> bool {
        self.left == index && self.right == index
    }

    /// Unpacks a device word: left in the low half, right in the high half.
    pub fn from_bits(bits: u32) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self::new(bits as u16, (bits >> 16) as u16)
    }
}

impl Texel for InterpolationSource {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Uint;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.left.to_le_bytes());
        out.extend_from_slice(&self.right.to_le_bytes());
    }
}

/// Conservative half-precision depth bounds of a min/max tree node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MinMaxDepth {
    pub min: f16,
    pub max: f16,
}

impl MinMaxDepth {
    /// Stores `[min, max]`, rounding outward so the stored interval contains it.
    pub fn conservative(min: f32, max: f32) -> Self {
        Self {
            min: f16_round_down(min),
            max: f16_round_up(max),
        }
    }

    pub fn bounds(self) -> (f32, f32) {
        (self.min.to_f32(), self.max.to_f32())
    }

    /// Smallest interval containing both nodes.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: if other.min < self.min { other.min } else { self.min },
            max: if other.max > self.max { other.max } else { self.max },
        }
    }
}

impl Texel for MinMaxDepth {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.min.to_bits().to_le_bytes());
        out.extend_from_slice(&self.max.to_bits().to_le_bytes());
    }
}

fn f16_round_down(v: f32) -> f16 {
    let h = f16::from_f32(v);
    if h.to_f32() <= v {
        h
    } else {
        let bits = h.to_bits();
        if bits & 0x7fff == 0 {
            f16::from_bits(0x8001)
        } else if bits & 0x8000 == 0 {
            f16::from_bits(bits - 1)
        } else {
            f16::from_bits(bits + 1)
        }
    }
}

fn f16_round_up(v: f32) -> f16 {
    let h = f16::from_f32(v);
    if h.to_f32() >= v {
        h
    } else {
        let bits = h.to_bits();
        if bits & 0x7fff == 0 {
            f16::from_bits(0x0001)
        } else if bits & 0x8000 == 0 {
            f16::from_bits(bits + 1)
        } else {
            f16::from_bits(bits - 1)
        }
    }
}

/// Classification of an epipolar sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SampleTag {
    /// Outside the screen; never processed.
    #[default]
    Discarded = 0,
    /// Valid sample that gets its radiance by interpolation.
    Interpolated = 1,
    /// Valid sample that is ray marched.
    Reference = 2,
}

impl SampleTag {
    /// Tag stored in a device word. Unknown values read as discarded.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => SampleTag::Interpolated,
            2 => SampleTag::Reference,
            _ => SampleTag::Discarded,
        }
    }
}

impl Texel for SampleTag {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Uint;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
}

/// Whether a screen pixel received scattering from the epipolar samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PixelTag {
    #[default]
    Unresolved = 0,
    Resolved = 1,
}

impl PixelTag {
    pub fn from_bits(bits: u32) -> Self {
        if bits == 1 {
            PixelTag::Resolved
        } else {
            PixelTag::Unresolved
        }
    }
}

impl Texel for PixelTag {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Uint;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
}

/// Values that can be filtered linearly.
pub trait Filterable: Texel {
    #[must_use]
    fn lerp_texel(self, other: Self, t: f32) -> Self;
}

impl Filterable for f32 {
    fn lerp_texel(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Filterable for Vec2 {
    fn lerp_texel(self, other: Self, t: f32) -> Self {
        self.lerp(other, t)
    }
}

impl Filterable for Vec4 {
    fn lerp_texel(self, other: Self, t: f32) -> Self {
        self.lerp(other, t)
    }
}

/// Description of a surface as it would be created on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl SurfaceDesc {
    /// Bytes per row of tightly packed texel data.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.block_copy_size(None).unwrap_or(4)
    }
}

/// Default usage of intermediate surfaces: written by a pass, read by later ones.
pub const INTERMEDIATE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A 2D array of texels.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface<T: Texel> {
    desc: SurfaceDesc,
    texels: Vec<T>,
}

impl<T: Texel> Surface<T> {
    /// Allocates a surface filled with `T::default()`.
    pub fn new(label: &str, width: u32, height: u32) -> RenderResult<Self> {
        Self::with_usage(label, width, height, INTERMEDIATE_USAGE)
    }

    pub fn with_usage(
        label: &str,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> RenderResult<Self> {
        if width == 0 || height == 0 || width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION
        {
            return Err(RenderError::TextureCreationFailed(format!(
                "{label}: invalid size {width}x{height}"
            )));
        }
        let len = width as usize * height as usize;
        let mut texels = Vec::new();
        texels
            .try_reserve_exact(len)
            .map_err(|_| RenderError::OutOfMemory)?;
        texels.resize(len, T::default());
        log::debug!("allocated surface '{label}' {width}x{height} {:?}", T::FORMAT);
        Ok(Self {
            desc: SurfaceDesc {
                label: label.to_string(),
                width,
                height,
                format: T::FORMAT,
                usage,
            },
            texels,
        })
    }

    /// Wraps existing texel data, stored row by row from the top.
    pub fn from_texels(label: &str, width: u32, height: u32, texels: Vec<T>) -> RenderResult<Self> {
        let mut surface = Self::new(label, width, height)?;
        if texels.len() != surface.texels.len() {
            return Err(RenderError::TextureCreationFailed(format!(
                "{label}: expected {} texels, got {}",
                surface.texels.len(),
                texels.len()
            )));
        }
        surface.texels = texels;
        Ok(surface)
    }

    /// Builds a surface by evaluating `f(x, y)` at every texel.
    pub fn from_fn(
        label: &str,
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> T,
    ) -> RenderResult<Self> {
        let mut surface = Self::new(label, width, height)?;
        for y in 0..height {
            for x in 0..width {
                surface.set(x, y, f(x, y));
            }
        }
        Ok(surface)
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.desc.width && y < self.desc.height);
        y as usize * self.desc.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> T {
        self.texels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let i = self.index(x, y);
        self.texels[i] = value;
    }

    /// Texel at signed coordinates, clamped to the edge.
    pub fn get_clamped(&self, x: i64, y: i64) -> T {
        let x = x.clamp(0, i64::from(self.desc.width) - 1);
        let y = y.clamp(0, i64::from(self.desc.height) - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        self.get(x as u32, y as u32)
    }

    pub fn fill(&mut self, value: T) {
        self.texels.fill(value);
    }

    pub fn texels(&self) -> &[T] {
        &self.texels
    }

    pub fn texels_mut(&mut self) -> &mut [T] {
        &mut self.texels
    }

    pub fn row(&self, y: u32) -> &[T] {
        let start = self.index(0, y);
        &self.texels[start..start + self.desc.width as usize]
    }

    /// Copies a rectangle from `src` at the same position.
    pub fn copy_region_from(
        &mut self,
        src: &Surface<T>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        if src.size() != self.size()
            || x + width > self.desc.width
            || y + height > self.desc.height
        {
            return Err(RenderError::InvalidFrameInput(format!(
                "copy {width}x{height} at ({x}, {y}) from '{}' into '{}'",
                src.label(),
                self.label()
            )));
        }
        for row in y..y + height {
            let start = self.index(x, row);
            let end = start + width as usize;
            self.texels[start..end].copy_from_slice(&src.texels[start..end]);
        }
        Ok(())
    }

    /// Nearest texel at a UV coordinate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn sample_nearest(&self, uv: Vec2) -> T {
        let x = (uv.x * self.desc.width as f32).floor() as i64;
        let y = (uv.y * self.desc.height as f32).floor() as i64;
        self.get_clamped(x, y)
    }

    /// Texel data in the surface's GPU byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.desc.bytes_per_row() as usize * self.desc.height as usize,
        );
        for texel in &self.texels {
            texel.write_bytes(&mut out);
        }
        out
    }
}

impl<T: Filterable> Surface<T> {
    /// Bilinear sample at continuous texel coordinates where `(0, 0)` is the
    /// center of the first texel. Clamps to the edge.
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample_texel_linear(&self, fx: f32, fy: f32) -> T {
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let top = self
            .get_clamped(x0, y0)
            .lerp_texel(self.get_clamped(x0 + 1, y0), tx);
        let bottom = self
            .get_clamped(x0, y0 + 1)
            .lerp_texel(self.get_clamped(x0 + 1, y0 + 1), tx);
        top.lerp_texel(bottom, ty)
    }

    /// Bilinear sample at a UV coordinate.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample_linear(&self, uv: Vec2) -> T {
        self.sample_texel_linear(
            uv.x * self.desc.width as f32 - 0.5,
            uv.y * self.desc.height as f32 - 0.5,
        )
    }
}

/// Two surfaces a pass alternates between, reading one while writing the other.
#[derive(Debug, Clone)]
pub struct PingPong<T: Texel> {
    buffers: [Surface<T>; 2],
    write: usize,
}

impl<T: Texel> PingPong<T> {
    pub fn new(label: &str, width: u32, height: u32) -> RenderResult<Self> {
        Ok(Self {
            buffers: [
                Surface::new(&format!("{label} 0"), width, height)?,
                Surface::new(&format!("{label} 1"), width, height)?,
            ],
            write: 0,
        })
    }

    /// Selects which buffer the next [`Self::split`] writes to.
    pub fn set_write_index(&mut self, index: usize) {
        self.write = index % 2;
    }

    pub fn write_index(&self) -> usize {
        self.write
    }

    /// The buffer being read and the buffer being written.
    pub fn split(&mut self) -> (&Surface<T>, &mut Surface<T>) {
        let [first, second] = &mut self.buffers;
        if self.write == 0 {
            (&*second, first)
        } else {
            (&*first, second)
        }
    }

    pub fn buffer(&self, index: usize) -> &Surface<T> {
        &self.buffers[index % 2]
    }

    pub fn buffer_mut(&mut self, index: usize) -> &mut Surface<T> {
        &mut self.buffers[index % 2]
    }

    /// Copies a region written into the second buffer back into the first,
    /// so that the first buffer ends up holding every region.
    pub fn consolidate(&mut self, x: u32, y: u32, width: u32, height: u32) -> RenderResult<()> {
        let [first, second] = &mut self.buffers;
        first.copy_region_from(second, x, y, width, height)
    }

    pub fn size(&self) -> (u32, u32) {
        self.buffers[0].size()
    }
}
