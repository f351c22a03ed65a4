//! Optional per-frame diagnostics: panel images plus a JSONL decision log.
//!
//! A side channel, not part of the functional contract: nothing downstream
//! reads these files. Records reuse the production pipeline structs wherever
//! possible; only the envelope types here are debug-only.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use image::{Rgb, RgbImage};
use serde::Serialize;

use crate::config::DebugConfig;
use crate::error::DistillError;
use crate::mask::{Mask, BINARY_THRESHOLD};
use crate::pipeline::{ComponentScore, InstanceGenuineness, TargetUpdate};

pub const DEBUG_SCHEMA: &str = "cgvd.debug.v2";

/// One warm-up frame's decisions.
#[derive(Debug, Serialize)]
struct WarmupRecord<'a> {
    schema: &'static str,
    kind: &'static str,
    frame_idx: u32,
    target_update: &'a TargetUpdate,
    instances: &'a [InstanceGenuineness],
}

/// Cleanup summary emitted on the final warm-up frame.
#[derive(Debug, Serialize)]
struct CleanupRecord<'a> {
    schema: &'static str,
    kind: &'static str,
    component_scores: Option<&'a [ComponentScore]>,
    target_missing: bool,
}

/// One steady-state frame.
#[derive(Debug, Serialize)]
struct FrameRecord {
    schema: &'static str,
    kind: &'static str,
    frame_idx: u64,
    robot_pixels: usize,
    composited_pixels: usize,
}

/// Writes diagnostics into a configured directory.
pub struct DebugSink {
    dir: PathBuf,
    log: File,
}

impl DebugSink {
    pub fn new(config: &DebugConfig) -> Result<Self, DistillError> {
        std::fs::create_dir_all(&config.dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.dir.join("decisions.jsonl"))?;
        Ok(Self {
            dir: config.dir.clone(),
            log,
        })
    }

    pub fn record_warmup(
        &mut self,
        frame_idx: u32,
        target_update: &TargetUpdate,
        instances: &[InstanceGenuineness],
    ) -> Result<(), DistillError> {
        self.write_record(&WarmupRecord {
            schema: DEBUG_SCHEMA,
            kind: "warmup",
            frame_idx,
            target_update,
            instances,
        })
    }

    pub fn record_cleanup(
        &mut self,
        component_scores: Option<&[ComponentScore]>,
        target_missing: bool,
    ) -> Result<(), DistillError> {
        self.write_record(&CleanupRecord {
            schema: DEBUG_SCHEMA,
            kind: "cleanup",
            component_scores,
            target_missing,
        })
    }

    /// Write the four-panel diagnostic image (original / distractor /
    /// safe-set / composited) and the frame record.
    pub fn record_frame(
        &mut self,
        frame_idx: u64,
        original: &RgbImage,
        distractor: &Mask,
        safe: &Mask,
        composited: &RgbImage,
        robot_pixels: usize,
    ) -> Result<(), DistillError> {
        let panel = four_panel(original, distractor, safe, composited);
        panel.save(self.dir.join(format!("frame_{frame_idx:05}.png")))?;
        self.write_record(&FrameRecord {
            schema: DEBUG_SCHEMA,
            kind: "frame",
            frame_idx,
            robot_pixels,
            composited_pixels: crate::mask::nonzero_count(distractor),
        })
    }

    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<(), DistillError> {
        let line = serde_json::to_string(record).expect("debug records serialize");
        self.log.write_all(line.as_bytes())?;
        self.log.write_all(b"\n")?;
        Ok(())
    }
}

/// Tint `frame` where `mask` is set.
fn overlay(frame: &RgbImage, mask: &Mask, tint: [u8; 3]) -> RgbImage {
    let mut out = frame.clone();
    for (i, pixel) in out.pixels_mut().enumerate() {
        if mask.as_raw()[i] > BINARY_THRESHOLD {
            for c in 0..3 {
                pixel.0[c] = ((u16::from(pixel.0[c]) + u16::from(tint[c])) / 2) as u8;
            }
        }
    }
    out
}

fn four_panel(
    original: &RgbImage,
    distractor: &Mask,
    safe: &Mask,
    composited: &RgbImage,
) -> RgbImage {
    let (w, h) = original.dimensions();
    let panels = [
        original.clone(),
        overlay(original, distractor, [255, 0, 0]),
        overlay(original, safe, [0, 255, 0]),
        composited.clone(),
    ];
    let mut out = RgbImage::from_pixel(4 * w, h, Rgb([0, 0, 0]));
    for (k, panel) in panels.iter().enumerate() {
        for (x, y, p) in panel.enumerate_pixels() {
            out.put_pixel(k as u32 * w + x, y, *p);
        }
    }
    out
}
