//! Renders the colonnade scene with light shafts for every light type.
//!
//! Usage: `cargo run --example scattering_demo -- [output dir] [config.json]`
//!
//! Without a config file each light type gets a config sized for the scene.
//! Writes the source frame, the epipolar result, a sample-location overlay
//! and a brute-force reference for each light.

use std::path::PathBuf;

use episcatter::*;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const SHADOW_MAP: u32 = 1024;

fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "scattering_out".into()));
    let loaded = args.next().map(PostProcessConfig::load).transpose()?;
    std::fs::create_dir_all(&out_dir).map_err(image::ImageError::IoError)?;

    let scene = Scene::colonnade();
    let camera = scene.default_camera(WIDTH, HEIGHT);
    let mut pipeline = LightScatteringPipeline::new();

    for light_type in [LightType::Directional, LightType::Spot, LightType::Point] {
        let mut light = scene.light(light_type);
        light.track_camera(light_type, &camera);
        let frame = scene.render(&camera, &light, light_type, (WIDTH, HEIGHT), SHADOW_MAP)?;
        let name = format!("{light_type:?}").to_lowercase();
        save_image(out_dir.join(format!("{name}_source.png")), &frame.color)?;

        let config = match &loaded {
            Some(config) => config.clone().with_light_type(light_type),
            None => PostProcessConfig::for_scene(scene.extent(), light_type, SHADOW_MAP),
        };
        config.validate()?;

        let (image, report) = frame.post_process(&mut pipeline, &camera, &light, &config)?;
        log::info!(
            "{name}: {} passes, {} techniques compiled, light on screen: {}",
            report.passes.len(),
            report.compiled,
            report.is_light_on_screen
        );
        save_image(out_dir.join(format!("{name}_epipolar.png")), &image)?;

        let overlay = config.clone().with_show_sampling(true);
        let (image, _) = frame.post_process(&mut pipeline, &camera, &light, &overlay)?;
        save_image(out_dir.join(format!("{name}_samples.png")), &image)?;

        let brute = config.with_technique(LightScatteringTechnique::BruteForce);
        let (image, _) = frame.post_process(&mut pipeline, &camera, &light, &brute)?;
        save_image(out_dir.join(format!("{name}_brute_force.png")), &image)?;
    }

    println!("wrote images to {}", out_dir.display());
    Ok(())
}
