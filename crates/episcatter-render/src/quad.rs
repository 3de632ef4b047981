//! Full-screen quad rasterization.
//!
//! Every pass draws one screen-aligned quad over a viewport of its render
//! target(s). The fragment closure runs once per covered texel, and an
//! optional tag surface plays the role of the stencil buffer: a [`TagRule`]
//! restricts which texels run the closure and what tag they get afterwards.

use glam::{Vec2, Vec4};

use crate::surface::{Surface, Texel};
use episcatter_core::uv_to_proj;

/// How a fragment output combines with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    /// `src * src.a + dst * (1 - src.a)`.
    AlphaOver,
}

/// Output of one fragment invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment<V> {
    Output(V),
    Discard,
}

/// Stencil-style test and update on a tag surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRule<G> {
    /// Only texels carrying this tag are processed.
    pub require: Option<G>,
    /// Tag written to texels whose fragment was not discarded.
    pub write: Option<G>,
}

impl<G: Copy + PartialEq> TagRule<G> {
    pub const fn always() -> Self {
        Self {
            require: None,
            write: None,
        }
    }

    pub fn accepts(&self, tag: G) -> bool {
        self.require.map_or(true, |r| r == tag)
    }
}

/// Rectangle of a render target covered by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Columns `x..x + width` over the full height.
    pub fn columns(x: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y: 0,
            width,
            height,
        }
    }
}

/// Position of a fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadInvocation {
    /// Texel column in the render target.
    pub x: u32,
    /// Texel row in the render target.
    pub y: u32,
    /// Texel center in target UV.
    pub uv: Vec2,
    /// Texel center in normalized device coordinates.
    pub ndc: Vec2,
}

/// One or more surfaces written by the same draw.
pub trait RenderTarget {
    type Value;

    fn dimensions(&self) -> (u32, u32);

    fn store(&mut self, x: u32, y: u32, value: Self::Value, blend: BlendMode);
}

impl<T: Texel> RenderTarget for Surface<T> {
    type Value = T;

    fn dimensions(&self) -> (u32, u32) {
        self.size()
    }

    fn store(&mut self, x: u32, y: u32, value: T, blend: BlendMode) {
        let dst = self.get(x, y);
        self.set(x, y, value.blend(dst, blend));
    }
}

impl<A: Texel, B: Texel> RenderTarget for (&mut Surface<A>, &mut Surface<B>) {
    type Value = (A, B);

    fn dimensions(&self) -> (u32, u32) {
        debug_assert_eq!(self.0.size(), self.1.size());
        self.0.size()
    }

    fn store(&mut self, x: u32, y: u32, value: (A, B), blend: BlendMode) {
        self.0.store(x, y, value.0, blend);
        self.1.store(x, y, value.1, blend);
    }
}

/// A draw that only updates tags, like a depth-stencil-only pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagOnly {
    pub width: u32,
    pub height: u32,
}

impl RenderTarget for TagOnly {
    type Value = ();

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn store(&mut self, _x: u32, _y: u32, _value: (), _blend: BlendMode) {}
}

fn invocation(x: u32, y: u32, width: u32, height: u32) -> QuadInvocation {
    #[allow(clippy::cast_precision_loss)]
    let uv = Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    );
    QuadInvocation {
        x,
        y,
        uv,
        ndc: uv_to_proj(uv),
    }
}

fn clip_viewport(viewport: Viewport, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let x0 = viewport.x.min(width);
    let y0 = viewport.y.min(height);
    let x1 = viewport.x.saturating_add(viewport.width).min(width);
    let y1 = viewport.y.saturating_add(viewport.height).min(height);
    (x0, y0, x1, y1)
}

/// Draws a quad over `viewport` and returns the number of fragments written.
pub fn draw_quad<R, F>(target: &mut R, viewport: Viewport, blend: BlendMode, mut shader: F) -> usize
where
    R: RenderTarget,
    F: FnMut(&QuadInvocation) -> Fragment<R::Value>,
{
    let (width, height) = target.dimensions();
    let (x0, y0, x1, y1) = clip_viewport(viewport, width, height);
    let mut written = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            if let Fragment::Output(value) = shader(&invocation(x, y, width, height)) {
                target.store(x, y, value, blend);
                written += 1;
            }
        }
    }
    written
}

/// Draws a quad whose fragments are filtered and tagged through `tags`.
pub fn draw_quad_tagged<R, G, F>(
    target: &mut R,
    tags: &mut Surface<G>,
    rule: TagRule<G>,
    viewport: Viewport,
    blend: BlendMode,
    mut shader: F,
) -> usize
where
    R: RenderTarget,
    G: Texel,
    F: FnMut(&QuadInvocation) -> Fragment<R::Value>,
{
    let (width, height) = target.dimensions();
    debug_assert_eq!(tags.size(), (width, height));
    let (x0, y0, x1, y1) = clip_viewport(viewport, width, height);
    let mut written = 0;
    for y in y0..y1 {
        for x in x0..x1 {
            if !rule.accepts(tags.get(x, y)) {
                continue;
            }
            if let Fragment::Output(value) = shader(&invocation(x, y, width, height)) {
                target.store(x, y, value, blend);
                if let Some(tag) = rule.write {
                    tags.set(x, y, tag);
                }
                written += 1;
            }
        }
    }
    written
}

/// A screen-aligned square of `2 * radius + 1` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sprite {
    /// Center in normalized device coordinates.
    pub center: Vec2,
    pub radius: u32,
    pub color: Vec4,
}

/// Draws point sprites onto `target`, returning the number of pixels touched.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn draw_sprites(
    target: &mut Surface<Vec4>,
    sprites: impl IntoIterator<Item = Sprite>,
    blend: BlendMode,
) -> usize {
    let (width, height) = target.size();
    let mut written = 0;
    for sprite in sprites {
        let cx = ((0.5 + 0.5 * sprite.center.x) * width as f32).floor() as i64;
        let cy = ((0.5 - 0.5 * sprite.center.y) * height as f32).floor() as i64;
        let r = i64::from(sprite.radius);
        for y in (cy - r)..=(cy + r) {
            for x in (cx - r)..=(cx + r) {
                if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
                    continue;
                }
                target.store(x as u32, y as u32, sprite.color, blend);
                written += 1;
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SampleTag;

    #[test]
    fn test_invocation_coordinates() {
        let inv = invocation(0, 0, 4, 2);
        assert_eq!(inv.uv, Vec2::new(0.125, 0.25));
        assert_eq!(inv.ndc, Vec2::new(-0.75, 0.5));
    }

    #[test]
    fn test_draw_quad_counts_fragments() {
        let mut s = Surface::<f32>::new("t", 4, 4).unwrap();
        let n = draw_quad(&mut s, Viewport::columns(1, 2, 4), BlendMode::Replace, |inv| {
            if inv.y == 0 {
                Fragment::Discard
            } else {
                Fragment::Output(1.0)
            }
        });
        assert_eq!(n, 6);
        assert_eq!(s.get(0, 1), 0.0);
        assert_eq!(s.get(1, 1), 1.0);
        assert_eq!(s.get(1, 0), 0.0);
    }

    #[test]
    fn test_tagged_draw_filters_and_writes() {
        let mut s = Surface::<f32>::new("t", 3, 1).unwrap();
        let mut tags = Surface::<SampleTag>::new("tags", 3, 1).unwrap();
        tags.set(1, 0, SampleTag::Interpolated);
        let rule = TagRule {
            require: Some(SampleTag::Interpolated),
            write: Some(SampleTag::Reference),
        };
        let n = draw_quad_tagged(&mut s, &mut tags, rule, Viewport::full(3, 1), BlendMode::Replace, |_| {
            Fragment::Output(2.0)
        });
        assert_eq!(n, 1);
        assert_eq!(s.texels(), &[0.0, 2.0, 0.0]);
        assert_eq!(tags.get(1, 0), SampleTag::Reference);
    }

    #[test]
    fn test_multiple_render_targets() {
        let mut a = Surface::<f32>::new("a", 2, 1).unwrap();
        let mut b = Surface::<Vec2>::new("b", 2, 1).unwrap();
        let n = draw_quad(&mut (&mut a, &mut b), Viewport::full(2, 1), BlendMode::Replace, |inv| {
            Fragment::Output((inv.uv.x, inv.ndc))
        });
        assert_eq!(n, 2);
        assert_eq!(a.get(1, 0), 0.75);
        assert_eq!(b.get(0, 0), Vec2::new(-0.5, 0.0));
    }

    #[test]
    fn test_sprites_clip_to_target() {
        let mut s = Surface::<Vec4>::new("dst", 4, 4).unwrap();
        let sprite = Sprite {
            center: Vec2::new(-1.0, 1.0),
            radius: 1,
            color: Vec4::ONE,
        };
        let n = draw_sprites(&mut s, [sprite], BlendMode::Replace);
        assert_eq!(n, 4);
        assert_eq!(s.get(1, 1), Vec4::ONE);
        assert_eq!(s.get(2, 2), Vec4::ZERO);
    }
}
