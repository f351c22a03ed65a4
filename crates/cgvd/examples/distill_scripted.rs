//! Run the distillation wrapper against a small scripted environment with
//! mock perception models, printing per-stage timings.
//!
//! Usage: distill_scripted [out_dir]
//!
//! When `out_dir` is given, the first distilled frame is saved there as a
//! PNG next to the raw frame for comparison.

use std::error::Error;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use cgvd::env::{Environment, Observation, StepOutcome};
use cgvd::error::{EnvError, ServiceError};
use cgvd::mask::{self, Mask};
use cgvd::services::{InstanceDetection, Segmentation};
use cgvd::{DistillConfig, DistillWrapper, Inpainter, ModelRegistry, Segmenter};

const W: u32 = 160;
const H: u32 = 120;
const CAMERA: &str = "overhead_camera";

/// Axis-aligned colored object on the table.
#[derive(Clone, Copy)]
struct Blob {
    name: &'static str,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    color: [u8; 3],
}

const SCENE: [Blob; 4] = [
    Blob { name: "spoon", x0: 20, y0: 20, x1: 44, y1: 32, color: [200, 40, 40] },
    Blob { name: "towel", x0: 70, y0: 50, x1: 110, y1: 86, color: [40, 180, 60] },
    Blob { name: "fork", x0: 120, y0: 16, x1: 150, y1: 30, color: [120, 120, 140] },
    Blob { name: "robot arm", x0: 0, y0: 90, x1: 24, y1: 120, color: [30, 30, 30] },
];

const TABLE: [u8; 3] = [170, 150, 120];

/// Renders the scene; the robot drifts right one pixel per step.
struct TableTopEnv {
    step: u32,
    robot_visible: bool,
}

impl TableTopEnv {
    fn frame(&self) -> RgbImage {
        let mut img = RgbImage::from_pixel(W, H, Rgb(TABLE));
        for b in &SCENE {
            if b.name == "robot arm" && !self.robot_visible {
                continue;
            }
            let dx = if b.name == "robot arm" { self.step } else { 0 };
            for y in b.y0..b.y1 {
                for x in b.x0..b.x1 {
                    img.put_pixel((x + dx).min(W - 1), y, Rgb(b.color));
                }
            }
        }
        img
    }

    fn observation(&self) -> Observation {
        Observation::with_camera(CAMERA, self.frame())
    }
}

impl Environment for TableTopEnv {
    type Action = f64;

    fn reset(&mut self, _seed: Option<u64>) -> Result<Observation, EnvError> {
        self.step = 0;
        self.robot_visible = true;
        Ok(self.observation())
    }

    fn step(&mut self, _action: &f64) -> Result<StepOutcome, EnvError> {
        self.step += 1;
        Ok(StepOutcome {
            observation: self.observation(),
            reward: 0.0,
            terminated: false,
            truncated: false,
        })
    }

    fn render(&mut self) -> Result<Observation, EnvError> {
        Ok(self.observation())
    }

    fn language_instruction(&self) -> Option<String> {
        Some("put the spoon on the towel".to_string())
    }

    fn set_robot_visible(&mut self, visible: bool) -> Result<(), EnvError> {
        self.robot_visible = visible;
        Ok(())
    }
}

/// "Detects" a concept wherever the scene's blob colors match the frame.
struct ColorSegmenter;

impl Segmenter for ColorSegmenter {
    fn segment(
        &self,
        image: &RgbImage,
        concepts: &str,
        _threshold: f32,
    ) -> Result<Segmentation, ServiceError> {
        let (w, h) = image.dimensions();
        let mut combined = mask::zeros(w, h);
        let mut instances = Vec::new();
        for requested in concepts.split(". ") {
            let Some(blob) = SCENE.iter().find(|b| b.name == requested) else {
                continue;
            };
            // Detect the blob wherever its color actually is in this frame.
            let mut m = mask::zeros(w, h);
            for (i, p) in image.pixels().enumerate() {
                if p.0 == blob.color {
                    m.as_mut()[i] = 1.0;
                }
            }
            if mask::is_empty(&m) {
                continue;
            }
            mask::max_in_place(&mut combined, &m);
            instances.push(InstanceDetection {
                concept: requested.to_string(),
                instance_index: 0,
                mask: m,
                score: 0.92,
            });
        }
        Ok(Segmentation {
            combined,
            instances,
        })
    }
}

/// Fills the masked region with the table color.
struct TableInpainter;

impl Inpainter for TableInpainter {
    fn inpaint(&self, image: &RgbImage, mask: &Mask) -> Result<RgbImage, ServiceError> {
        let mut out = image.clone();
        for (i, pixel) in out.pixels_mut().enumerate() {
            if mask.as_raw()[i] > 0.5 {
                pixel.0 = TABLE;
            }
        }
        Ok(out)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let config = DistillConfig {
        camera_name: CAMERA.to_string(),
        distractor_names: vec!["fork".to_string()],
        safeset_warmup_frames: 4,
        lama_dilation: 3,
        safe_dilation: 2,
        blend_sigma: 1.5,
        min_component_pixels: 16,
        ..Default::default()
    };
    let models = ModelRegistry::new(Arc::new(ColorSegmenter), Arc::new(TableInpainter));
    let env = TableTopEnv {
        step: 0,
        robot_visible: true,
    };
    let mut wrapper = DistillWrapper::new(env, config, models)?;

    let obs = wrapper.reset(Some(0))?;
    let first = obs.cameras[CAMERA].clone();
    println!(
        "reset: fork pixel now {:?} (table is {:?})",
        first.get_pixel(135, 22).0,
        TABLE
    );

    for i in 0..10 {
        let outcome = wrapper.step(&0.0)?;
        if i == 9 {
            let frame = &outcome.observation.cameras[CAMERA];
            println!("step {}: robot pixel {:?}", i + 1, frame.get_pixel(12, 100).0);
        }
    }

    println!(
        "timing: {}",
        serde_json::to_string_pretty(&wrapper.timing())?
    );

    if let Some(out_dir) = std::env::args().nth(1) {
        std::fs::create_dir_all(&out_dir)?;
        wrapper.env_mut().render()?.cameras[CAMERA].save(format!("{out_dir}/raw.png"))?;
        first.save(format!("{out_dir}/distilled.png"))?;
        println!("Wrote {out_dir}/raw.png and {out_dir}/distilled.png");
    }
    Ok(())
}
