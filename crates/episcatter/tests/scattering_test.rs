//! Scenario tests over the ray-cast scene.

use episcatter::*;
use episcatter_render::stages::min_max::LevelLayout;
use episcatter_render::ResourceGroup;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const SHADOW_MAP: u32 = 256;

struct Setup {
    camera: CameraAttribs,
    light: LightAttribs,
    frame: SceneFrame,
    config: PostProcessConfig,
}

fn colonnade(light_type: LightType) -> Setup {
    let scene = Scene::colonnade();
    let camera = scene.default_camera(WIDTH, HEIGHT);
    let mut light = scene.light(light_type);
    light.track_camera(light_type, &camera);
    let frame = scene
        .render(&camera, &light, light_type, (WIDTH, HEIGHT), SHADOW_MAP)
        .unwrap();
    let config = PostProcessConfig::for_scene(scene.extent(), light_type, SHADOW_MAP)
        .with_slices(64)
        .with_samples(64)
        .with_initial_step(8);
    Setup {
        camera,
        light,
        frame,
        config,
    }
}

fn run(
    pipeline: &mut LightScatteringPipeline,
    setup: &Setup,
    config: &PostProcessConfig,
) -> (Surface<Vec4>, FrameReport) {
    setup
        .frame
        .post_process(pipeline, &setup.camera, &setup.light, config)
        .unwrap()
}

fn max_abs_difference(a: &Surface<Vec4>, b: &Surface<Vec4>) -> f32 {
    a.texels()
        .iter()
        .zip(b.texels())
        .map(|(x, y)| (x.truncate() - y.truncate()).abs().max_element())
        .fold(0.0, f32::max)
}

fn lighting_total(image: &Surface<Vec4>) -> f32 {
    image.texels().iter().map(|c| c.truncate().element_sum()).sum()
}

fn mean_abs_difference(a: &Surface<Vec4>, b: &Surface<Vec4>) -> f32 {
    let sum: f32 = a
        .texels()
        .iter()
        .zip(b.texels())
        .map(|(x, y)| (x.truncate() - y.truncate()).abs().element_sum())
        .sum();
    sum / (3 * a.texels().len()) as f32
}

#[test]
fn test_constant_depth_keeps_initial_lattice() {
    let scene = Scene::ground(12.0);
    let camera = CameraAttribs::look_at(
        Vec3::new(0.0, 5.0, 0.0),
        Vec3::ZERO,
        Vec3::Z,
        std::f32::consts::FRAC_PI_3,
        1.0,
        0.1,
        50.0,
    );
    let light = scene.directional_light(Vec3::Y);
    let frame = scene
        .render(&camera, &light, LightType::Directional, (32, 32), 64)
        .unwrap();
    let config = PostProcessConfig::default()
        .with_slices(32)
        .with_samples(32)
        .with_initial_step(8)
        .with_epipole_density(1)
        .with_optimize_sample_locations(false);
    let mut pipeline = LightScatteringPipeline::new();
    frame
        .post_process(&mut pipeline, &camera, &light, &config)
        .unwrap();

    let tags = pipeline.sample_tags().unwrap();
    let mut valid_slices = 0;
    for slice in 0..32 {
        let row = tags.row(slice);
        let Some(last_valid) = (0..32).rev().find(|i| row[*i] != SampleTag::Discarded) else {
            continue;
        };
        valid_slices += 1;
        let references: Vec<_> = (0..32).filter(|i| row[*i] == SampleTag::Reference).collect();
        // The lattice plus the sample closing the slice.
        let mut expected: Vec<_> = [0, 8, 16, 24].into_iter().filter(|i| *i <= last_valid).collect();
        if expected.last() != Some(&last_valid) {
            expected.push(last_valid);
        }
        assert_eq!(references, expected, "slice {slice}");
    }
    assert!(valid_slices > 0);
}

#[test]
fn test_interpolation_is_exact_at_references() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    run(&mut pipeline, &setup, &setup.config);

    let tags = pipeline.sample_tags().unwrap();
    let initial = pipeline.initial_scattering().unwrap();
    let interpolated = pipeline.interpolated_scattering().unwrap();
    let mut checked = 0;
    for slice in 0..64 {
        for sample in 0..64 {
            if tags.get(sample, slice) == SampleTag::Reference {
                assert_eq!(interpolated.get(sample, slice), initial.get(sample, slice));
                checked += 1;
            }
        }
    }
    assert!(checked > 0);
}

#[test]
fn test_refinement_is_idempotent() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    run(&mut pipeline, &setup, &setup.config);
    let first = pipeline.interpolation_sources().unwrap().clone();
    let first_tags = pipeline.sample_tags().unwrap().clone();
    run(&mut pipeline, &setup, &setup.config);
    assert_eq!(pipeline.interpolation_sources().unwrap(), &first);
    assert_eq!(pipeline.sample_tags().unwrap(), &first_tags);
}

#[test]
fn test_coordinates_on_screen_or_invalid() {
    for light_type in [LightType::Directional, LightType::Spot, LightType::Point] {
        let setup = colonnade(light_type);
        let mut pipeline = LightScatteringPipeline::new();
        run(&mut pipeline, &setup, &setup.config);
        let tags = pipeline.sample_tags().unwrap();
        let coordinates = pipeline.sample_coordinates().unwrap();
        for slice in 0..64 {
            for sample in 0..64 {
                let c = coordinates.get(sample, slice);
                if tags.get(sample, slice) == SampleTag::Discarded {
                    assert!(c.x < -1e9, "{light_type:?} discarded sample at {c}");
                } else {
                    assert!(c.abs().max_element() <= 1.0 + 1e-5, "{light_type:?} sample at {c}");
                }
            }
        }
    }
}

#[test]
fn test_no_upscale_without_downscaling() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    let (_, report) = run(&mut pipeline, &setup, &setup.config);
    assert!(!report.executed(TechniqueId::UpscaleInscattering));
    assert!(!report.executed(TechniqueId::UnwarpEpipolarScattering));
    assert!(report.executed(TechniqueId::ApplyInscatteredRadiance));

    let downscaled = setup.config.clone().with_downscale(2);
    let (image, report) = run(&mut pipeline, &setup, &downscaled);
    assert!(report.executed(TechniqueId::UnwarpEpipolarScattering));
    assert!(report.executed(TechniqueId::UpscaleInscattering));
    assert!(report.executed(TechniqueId::FixInscattering));

    let brute = setup
        .config
        .clone()
        .with_technique(LightScatteringTechnique::BruteForce);
    let (reference, _) = run(&mut pipeline, &setup, &brute);
    let diff = max_abs_difference(&image, &reference);
    assert!(diff < 0.02, "max difference {diff}");
}

#[test]
fn test_no_min_max_without_acceleration() {
    let setup = colonnade(LightType::Directional);
    let config = setup.config.clone().with_accel_struct(AccelStruct::None);
    let mut pipeline = LightScatteringPipeline::new();
    let (_, report) = run(&mut pipeline, &setup, &config);
    for id in [
        TechniqueId::RenderSliceUvDirection,
        TechniqueId::InitializeMinMaxShadowMap,
        TechniqueId::ComputeMinMaxShadowMapLevel,
        TechniqueId::RayMarchMinMax,
    ] {
        assert!(!report.executed(id), "{id:?} ran");
    }
    assert!(report.executed(TechniqueId::RayMarch));
    assert_eq!(report.min_max_levels, 0);
    assert!(pipeline.min_max_pyramid().is_none());
}

#[test]
fn test_acceleration_matches_plain_ray_march() {
    let setup = colonnade(LightType::Directional);
    let mut plain = LightScatteringPipeline::new();
    let (plain_image, _) = run(
        &mut plain,
        &setup,
        &setup.config.clone().with_accel_struct(AccelStruct::None),
    );
    let mut accelerated = LightScatteringPipeline::new();
    let (accelerated_image, report) = run(&mut accelerated, &setup, &setup.config);
    assert!(report.executed(TechniqueId::RayMarchMinMax));
    let diff = mean_abs_difference(&plain_image, &accelerated_image);
    assert!(diff < 0.02, "mean difference {diff}");
}

#[test]
fn test_min_max_levels_bound_their_children() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    let (_, report) = run(&mut pipeline, &setup, &setup.config);
    let tree = pipeline.min_max_pyramid().unwrap().buffer(0);
    for level in 1..report.min_max_levels {
        let layout = LevelLayout::new(SHADOW_MAP, level);
        let children = LevelLayout::new(SHADOW_MAP, level - 1);
        for slice in 0..64 {
            for j in 0..layout.width {
                let (lo, hi) = tree.get(layout.offset + j, slice).bounds();
                for c in [2 * j, 2 * j + 1] {
                    let (clo, chi) = tree.get(children.offset + c, slice).bounds();
                    assert!(lo <= clo && hi >= chi, "level {level} slice {slice} node {j}");
                }
            }
        }
    }
}

#[test]
fn test_show_sampling_changes_only_overlay_pixels() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    let (plain, _) = run(&mut pipeline, &setup, &setup.config);
    let (overlaid, report) = run(&mut pipeline, &setup, &setup.config.clone().with_show_sampling(true));
    assert!(report.executed(TechniqueId::RenderSampleLocations));
    assert_eq!(report.compiled, 1);

    let mut near_sample = vec![false; (WIDTH * HEIGHT) as usize];
    let tags = pipeline.sample_tags().unwrap();
    let coordinates = pipeline.sample_coordinates().unwrap();
    for slice in 0..64 {
        for sample in 0..64 {
            if tags.get(sample, slice) == SampleTag::Discarded {
                continue;
            }
            let c = coordinates.get(sample, slice);
            let cx = ((0.5 + 0.5 * c.x) * WIDTH as f32).floor() as i64;
            let cy = ((0.5 - 0.5 * c.y) * HEIGHT as f32).floor() as i64;
            for y in cy - 1..=cy + 1 {
                for x in cx - 1..=cx + 1 {
                    if (0..i64::from(WIDTH)).contains(&x) && (0..i64::from(HEIGHT)).contains(&y) {
                        near_sample[(y * i64::from(WIDTH) + x) as usize] = true;
                    }
                }
            }
        }
    }
    let mut changed = 0;
    for (i, (a, b)) in plain.texels().iter().zip(overlaid.texels()).enumerate() {
        if a != b {
            changed += 1;
            assert!(near_sample[i], "pixel {i} changed away from every sample");
        }
    }
    assert!(changed > 0);
}

#[test]
fn test_recompiles_only_dependent_techniques() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    let (_, first) = run(&mut pipeline, &setup, &setup.config);
    assert_eq!(first.compiled as usize, required_techniques(&setup.config).len());

    let (_, same) = run(&mut pipeline, &setup, &setup.config);
    assert_eq!(same.compiled, 0);
    assert!(same.released.is_empty());

    let brighter = setup.config.clone().with_exposure(2.0);
    let (_, report) = run(&mut pipeline, &setup, &brighter);
    assert_eq!(report.compiled, 0);

    let no_aniso = PostProcessConfig {
        anisotropic_phase_function: false,
        ..setup.config.clone()
    };
    let (_, report) = run(&mut pipeline, &setup, &no_aniso);
    let expected = required_techniques(&no_aniso)
        .into_iter()
        .filter(|id| id.desc().defines.contains(&ConfigField::AnisotropicPhaseFunction))
        .count();
    assert_eq!(report.compiled as usize, expected);

    let fewer_slices = no_aniso.clone().with_slices(32);
    let (_, report) = run(&mut pipeline, &setup, &fewer_slices);
    assert!(report.released.contains(&ResourceGroup::Epipolar));
    assert!(report.released.contains(&ResourceGroup::MinMax));
    assert!(!report.released.contains(&ResourceGroup::Screen));
}

#[test]
fn test_brute_force_agrees_with_epipolar() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    let (epipolar, _) = run(&mut pipeline, &setup, &setup.config);
    let brute = setup
        .config
        .clone()
        .with_technique(LightScatteringTechnique::BruteForce);
    let (reference, report) = run(&mut pipeline, &setup, &brute);
    assert_eq!(report.passes_of(TechniqueId::FixAndApplyInscattering), 1);
    assert!(!report.executed(TechniqueId::RayMarchMinMax));
    let diff = mean_abs_difference(&epipolar, &reference);
    assert!(diff < 0.04, "mean difference {diff}");
}

#[test]
fn test_point_light_tables_built_once() {
    for method in [InscatteringMethod::Lut, InscatteringMethod::Srnn05] {
        let setup = colonnade(LightType::Point);
        let config = setup.config.clone().with_inscattering_method(method);
        let mut pipeline = LightScatteringPipeline::new();
        let (image, first) = run(&mut pipeline, &setup, &config);
        assert!(first.executed(TechniqueId::PrecomputePointLightInscattering));
        assert!(image.texels().iter().all(|c| c.is_finite()));
        let (_, second) = run(&mut pipeline, &setup, &config);
        assert!(!second.executed(TechniqueId::PrecomputePointLightInscattering));
    }
}

#[test]
fn test_spot_light_matches_brute_force() {
    let setup = colonnade(LightType::Spot);
    let lighting_only = PostProcessConfig {
        show_lighting_only: true,
        ..setup.config.clone()
    };
    let mut pipeline = LightScatteringPipeline::new();
    let (reference, _) = run(
        &mut pipeline,
        &setup,
        &lighting_only
            .clone()
            .with_technique(LightScatteringTechnique::BruteForce),
    );
    let expected = lighting_total(&reference);
    assert!(expected > 0.0, "spot light scatters no light");

    for method in [
        InscatteringMethod::Analytic,
        InscatteringMethod::Lut,
        InscatteringMethod::Srnn05,
    ] {
        for accel in [AccelStruct::None, AccelStruct::MinMaxTree] {
            let config = lighting_only
                .clone()
                .with_inscattering_method(method)
                .with_accel_struct(accel);
            let (image, report) = run(&mut pipeline, &setup, &config);
            assert!(image.texels().iter().all(|c| c.is_finite()));
            assert_eq!(
                report.executed(TechniqueId::RayMarchMinMax),
                accel == AccelStruct::MinMaxTree
            );
            let total = lighting_total(&image);
            assert!(
                (total - expected).abs() <= 0.25 * expected,
                "{method:?} {accel:?}: {total} vs brute force {expected}"
            );
        }
    }
}

#[test]
fn test_mismatched_destination_is_rejected() {
    let setup = colonnade(LightType::Directional);
    let mut pipeline = LightScatteringPipeline::new();
    let mut dst = Surface::<Vec4>::new("small", WIDTH / 2, HEIGHT).unwrap();
    let err = pipeline
        .perform_post_processing(setup.frame.attribs(&setup.camera, &setup.light, &mut dst), &setup.config)
        .unwrap_err();
    assert!(matches!(err, RenderError::InvalidFrameInput(_)));
    assert!(dst.texels().iter().all(|c| *c == Vec4::ZERO));
}
