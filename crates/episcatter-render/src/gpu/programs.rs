//! WGSL sources of the technique programs.
//!
//! A technique's shader is assembled from a generated header holding its
//! macros and tag rule, the shared frame constants and helpers, and the
//! files of its program.

use crate::error::{RenderError, RenderResult};
use crate::technique::{MacroSet, StencilRule, TechniqueDesc};

const COMMON: &str = include_str!("../shaders/common.wgsl");
const SCATTERING: &str = include_str!("../shaders/scattering.wgsl");

/// Value of `STENCIL_REQUIRE` and `STENCIL_WRITE` when the rule is absent.
pub const TAG_ANY: u32 = u32::MAX;

/// Source files of `program`, in the order they are concatenated.
pub fn program_sources(program: &str) -> Option<&'static [&'static str]> {
    let sources: &'static [&'static str] = match program {
        "camera_z" => &[include_str!("../shaders/camera_z.wgsl")],
        "slice_endpoints" => &[include_str!("../shaders/slice_endpoints.wgsl")],
        "coordinates" => &[include_str!("../shaders/coordinates.wgsl")],
        "refinement" => &[include_str!("../shaders/refinement.wgsl")],
        "mark_samples" => &[include_str!("../shaders/mark_samples.wgsl")],
        "slice_uv_direction" => &[include_str!("../shaders/slice_uv_direction.wgsl")],
        "min_max" => &[include_str!("../shaders/min_max.wgsl")],
        "ray_march" => &[SCATTERING, include_str!("../shaders/ray_march.wgsl")],
        "interpolate" => &[include_str!("../shaders/interpolate.wgsl")],
        "unwarp" => &[include_str!("../shaders/unwarp.wgsl")],
        "fix" => &[SCATTERING, include_str!("../shaders/fix.wgsl")],
        "upscale" => &[include_str!("../shaders/upscale.wgsl")],
        "sample_locations" => &[include_str!("../shaders/sample_locations.wgsl")],
        "precompute_inscattering" => &[include_str!("../shaders/precompute_inscattering.wgsl")],
        _ => return None,
    };
    Some(sources)
}

/// `(STENCIL_REQUIRE, STENCIL_WRITE)` of a rule.
pub fn stencil_values(rule: StencilRule) -> (u32, u32) {
    let bits = |tag: Option<u8>| tag.map_or(TAG_ANY, u32::from);
    match rule {
        StencilRule::Disabled => (TAG_ANY, TAG_ANY),
        StencilRule::Sample(rule) => (
            bits(rule.require.map(|t| t as u8)),
            bits(rule.write.map(|t| t as u8)),
        ),
        StencilRule::Pixel(rule) => (
            bits(rule.require.map(|t| t as u8)),
            bits(rule.write.map(|t| t as u8)),
        ),
    }
}

/// Declarations prepended to every program of `desc`.
pub fn header(desc: &TechniqueDesc, macros: &MacroSet) -> String {
    let (require, write) = stencil_values(desc.stencil);
    let mut lines = vec![format!("// {} ({})", desc.entry_point, desc.program)];
    lines.extend(
        macros
            .iter()
            .map(|(name, value)| format!("const {name}: u32 = {value}u;")),
    );
    lines.push(format!("const STENCIL_REQUIRE: u32 = {require}u;"));
    lines.push(format!("const STENCIL_WRITE: u32 = {write}u;"));
    lines.push(String::new());
    lines.join("\n")
}

/// Full WGSL source of `desc` specialized for `macros`.
pub fn assemble(desc: &TechniqueDesc, macros: &MacroSet) -> RenderResult<String> {
    let sources = program_sources(desc.program).ok_or_else(|| {
        RenderError::ShaderCompilationFailed(format!(
            "{}: unknown program {}",
            desc.entry_point, desc.program
        ))
    })?;
    let mut source = header(desc, macros);
    source.push_str(COMMON);
    for part in sources {
        source.push('\n');
        source.push_str(part);
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use episcatter_core::PostProcessConfig;

    use crate::stages::integral::TABLE_RESOLUTION;
    use crate::technique::{ScreenSize, TechniqueId};

    const MACRO_NAMES: [&str; 12] = [
        "NUM_EPIPOLAR_SLICES",
        "MAX_SAMPLES_IN_SLICE",
        "INITIAL_SAMPLE_STEP",
        "OPTIMIZE_SAMPLE_LOCATIONS",
        "LIGHT_TYPE",
        "STAINED_GLASS",
        "ACCEL_STRUCT",
        "INSCTR_INTGL_EVAL_METHOD",
        "ANISOTROPIC_PHASE_FUNCTION",
        "SCREEN_WIDTH",
        "SCREEN_HEIGHT",
        "THREAD_GROUP_SIZE",
    ];

    fn mentions(source: &str, word: &str) -> bool {
        source
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|token| token == word)
    }

    fn macros(id: TechniqueId) -> MacroSet {
        MacroSet::for_technique(
            id.desc(),
            &PostProcessConfig::default(),
            ScreenSize {
                width: 640,
                height: 480,
            },
        )
    }

    #[test]
    fn test_every_technique_has_its_entry_point() {
        for id in TechniqueId::ALL {
            let desc = id.desc();
            let source = assemble(desc, &macros(id)).unwrap();
            assert!(
                source.contains(&format!("fn {}(", desc.entry_point)),
                "{id:?} has no entry point {}",
                desc.entry_point
            );
        }
    }

    #[test]
    fn test_referenced_macros_are_defined() {
        for id in TechniqueId::ALL {
            let desc = id.desc();
            let macros = macros(id);
            for part in program_sources(desc.program).unwrap() {
                for name in MACRO_NAMES {
                    if mentions(part, name) {
                        assert!(macros.get(name).is_some(), "{id:?} uses undefined {name}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_table_resolution_matches_host() {
        let declaration = format!("const TABLE_RESOLUTION: u32 = {TABLE_RESOLUTION}u;");
        assert!(SCATTERING.contains(&declaration));
        assert!(program_sources("precompute_inscattering").unwrap()[0].contains(&declaration));
    }

    #[test]
    fn test_header_stencil_values() {
        let mark = header(
            TechniqueId::MarkRayMarchingSamples.desc(),
            &MacroSet::default(),
        );
        assert!(mark.contains("const STENCIL_REQUIRE: u32 = 1u;"));
        assert!(mark.contains("const STENCIL_WRITE: u32 = 2u;"));

        let fix = header(TechniqueId::FixInscattering.desc(), &MacroSet::default());
        assert!(fix.contains("const STENCIL_REQUIRE: u32 = 0u;"));
        assert!(fix.contains("const STENCIL_WRITE: u32 = 1u;"));

        let interpolate = header(TechniqueId::InterpolateIrradiance.desc(), &MacroSet::default());
        assert!(interpolate.contains(&format!("const STENCIL_REQUIRE: u32 = {TAG_ANY}u;")));
    }

    #[test]
    fn test_unknown_program_has_no_sources() {
        assert!(program_sources("light_scattering").is_none());
    }
}
