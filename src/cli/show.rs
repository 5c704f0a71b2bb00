use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use image::{Rgb, RgbImage};

use crate::cli::SubCommandExtend;
use crate::config::{Opts, OrbOptions};
use crate::image::Image;
use crate::orb::{FeatureExtractor, KeyPoint, OrbExtractor};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub orb: OrbOptions,
    /// 图片路径
    pub image: PathBuf,
    /// 标注后的图片保存路径
    #[arg(short, long, default_value = "keypoints.png")]
    pub output: PathBuf,
}

impl SubCommandExtend for ShowCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let image = Image::open(&self.image)?;
        let orb = OrbExtractor::create(self.orb.clone());
        let (kps, _) = orb.detect(&image)?;

        // 特征点坐标对应缩放后的图片
        let image = image.fit_within(self.orb.max_size);
        let output = draw_keypoints(&image, &kps);
        output.save(&self.output)?;
        println!("{} keypoints", kps.len());
        Ok(())
    }
}

const COLORS: [Rgb<u8>; 4] = [Rgb([0, 255, 0]), Rgb([255, 0, 0]), Rgb([0, 128, 255]), Rgb([255, 200, 0])];

/// 在灰度图上用不同颜色的圆圈标出每一层的特征点，并画出方向
fn draw_keypoints(image: &Image, kps: &[KeyPoint]) -> RgbImage {
    let gray = image.as_gray();
    let mut output = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    });

    for kp in kps {
        let color = COLORS[kp.level as usize % COLORS.len()];
        let radius = 3. * (1 + kp.level) as f32;
        let steps = (radius * 8.) as u32;
        for i in 0..steps {
            let t = i as f32 / steps as f32 * std::f32::consts::TAU;
            put_pixel(&mut output, kp.x + radius * t.cos(), kp.y + radius * t.sin(), color);
        }
        for i in 0..=radius as u32 {
            let r = i as f32;
            put_pixel(&mut output, kp.x + r * kp.angle.cos(), kp.y + r * kp.angle.sin(), color);
        }
    }
    output
}

fn put_pixel(image: &mut RgbImage, x: f32, y: f32, color: Rgb<u8>) {
    let (x, y) = (x.round(), y.round());
    if x >= 0. && y >= 0. && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}
