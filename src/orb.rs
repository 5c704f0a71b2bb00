use image::GrayImage;
use image::imageops::{self, FilterType};
use log::debug;
use rand::prelude::*;

use crate::config::OrbOptions;
use crate::error::{IndexError, Result};
use crate::fast::{Corner, fast9};
use crate::image::Image;
use crate::types::{DESCRIPTOR_SIZE, Descriptor};

/// 计算方向时使用的圆形区域半径
const PATCH_RADIUS: i32 = 15;
/// BRIEF 采样点所在圆的半径，旋转后仍然在 PATCH_RADIUS 以内
const PATTERN_RADIUS: i32 = 13;
/// 特征点距离图片边缘的最小距离
const EDGE_THRESHOLD: u32 = PATCH_RADIUS as u32 + 1;
/// 采样模式的随机种子，修改后已有的特征文件将全部失效
const PATTERN_SEED: u64 = 0x1a2b_3c4d;

/// 特征提取器
pub trait FeatureExtractor {
    /// 检测特征点并计算描述符，两个列表一一对应
    fn detect(&self, image: &Image) -> Result<(Vec<KeyPoint>, Vec<Descriptor>)>;

    /// 只计算描述符
    fn extract(&self, image: &Image) -> Result<Vec<Descriptor>> {
        Ok(self.detect(image)?.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// 在原图坐标系中的位置
    pub x: f32,
    pub y: f32,
    /// 所在金字塔层
    pub level: u32,
    /// 方向，弧度
    pub angle: f32,
    /// FAST 得分
    pub score: u32,
}

/// 纯 Rust 实现的 ORB：FAST 角点 + 灰度质心方向 + 旋转 BRIEF
pub struct OrbExtractor {
    opts: OrbOptions,
    /// 256 组采样点对 (x1, y1, x2, y2)
    pattern: Vec<[i32; 4]>,
    /// 方向圆形区域每一行的半宽
    umax: Vec<i32>,
}

impl OrbExtractor {
    pub fn create(opts: OrbOptions) -> Self {
        let umax = (0..=PATCH_RADIUS)
            .map(|dy| (((PATCH_RADIUS * PATCH_RADIUS - dy * dy) as f32).sqrt()).floor() as i32)
            .collect();
        Self { opts, pattern: sampling_pattern(), umax }
    }

    pub fn options(&self) -> &OrbOptions {
        &self.opts
    }

    /// 构建图像金字塔，返回每一层的图片和相对原图的缩放比例
    fn pyramid(&self, image: &GrayImage) -> Vec<(GrayImage, f32)> {
        let min_side = 2 * EDGE_THRESHOLD + 1;
        let mut levels = vec![(image.clone(), 1.0)];
        let mut scale = 1.0f32;
        for _ in 1..self.opts.orb_nlevels.max(1) {
            scale *= self.opts.orb_scale_factor;
            let width = (image.width() as f32 / scale).round() as u32;
            let height = (image.height() as f32 / scale).round() as u32;
            if width < min_side || height < min_side {
                break;
            }
            levels.push((imageops::resize(image, width, height, FilterType::Triangle), scale));
        }
        levels
    }

    /// 按照缩放因子的几何级数把特征点数量分配到每一层
    fn features_per_level(&self, nlevels: usize) -> Vec<usize> {
        let total = self.opts.orb_nfeatures as usize;
        let factor = 1.0 / self.opts.orb_scale_factor.max(1.0 + f32::EPSILON);
        let first = total as f32 * (1.0 - factor) / (1.0 - factor.powi(nlevels as i32));

        let mut quota = Vec::with_capacity(nlevels);
        let mut sum = 0;
        for level in 0..nlevels.saturating_sub(1) {
            let n = (first * factor.powi(level as i32)).round() as usize;
            quota.push(n);
            sum += n;
        }
        quota.push(total.saturating_sub(sum));
        quota
    }

    /// 在一层中检测角点，阈值过高导致数量不足时使用最小阈值重试
    fn detect_corners(&self, level: &GrayImage, quota: usize) -> Vec<Corner> {
        let mut corners = fast9(level, self.opts.orb_ini_th_fast, EDGE_THRESHOLD);
        if corners.len() < quota && self.opts.orb_min_th_fast < self.opts.orb_ini_th_fast {
            corners = fast9(level, self.opts.orb_min_th_fast, EDGE_THRESHOLD);
        }
        corners.sort_by(|a, b| b.score.cmp(&a.score).then(a.y.cmp(&b.y)).then(a.x.cmp(&b.x)));
        corners.truncate(quota);
        corners
    }

    /// 灰度质心法计算特征点方向
    fn ic_angle(&self, image: &GrayImage, x: u32, y: u32) -> f32 {
        let (cx, cy) = (x as i32, y as i32);
        let pixel = |dx: i32, dy: i32| image.get_pixel((cx + dx) as u32, (cy + dy) as u32).0[0] as i64;

        let (mut m01, mut m10) = (0i64, 0i64);
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            m10 += dx as i64 * pixel(dx, 0);
        }
        for dy in 1..=PATCH_RADIUS {
            let d = self.umax[dy as usize];
            for dx in -d..=d {
                let (top, bottom) = (pixel(dx, -dy), pixel(dx, dy));
                m10 += dx as i64 * (top + bottom);
                m01 += dy as i64 * (bottom - top);
            }
        }
        (m01 as f32).atan2(m10 as f32)
    }

    /// 在平滑后的图片上计算旋转 BRIEF 描述符
    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let (cx, cy) = (x as i32, y as i32);
        let sample = |px: i32, py: i32| {
            let rx = (px as f32 * cos - py as f32 * sin).round() as i32;
            let ry = (px as f32 * sin + py as f32 * cos).round() as i32;
            smoothed.get_pixel((cx + rx) as u32, (cy + ry) as u32).0[0]
        };

        let mut descriptor = [0u8; DESCRIPTOR_SIZE];
        for (i, [x1, y1, x2, y2]) in self.pattern.iter().enumerate() {
            if sample(*x1, *y1) < sample(*x2, *y2) {
                descriptor[i / 8] |= 1 << (i % 8);
            }
        }
        descriptor
    }
}

impl FeatureExtractor for OrbExtractor {
    fn detect(&self, image: &Image) -> Result<(Vec<KeyPoint>, Vec<Descriptor>)> {
        if image.is_empty() {
            return Err(IndexError::Extraction("图片为空".to_string()));
        }
        let min_side = image.width().min(image.height());
        if min_side < self.opts.min_size {
            return Err(IndexError::Extraction(format!(
                "图片尺寸 {}x{} 小于最小边长 {}",
                image.width(),
                image.height(),
                self.opts.min_size
            )));
        }

        let image = image.fit_within(self.opts.max_size);
        let levels = self.pyramid(image.as_gray());
        let quota = self.features_per_level(levels.len());

        let mut keypoints = vec![];
        let mut descriptors = vec![];
        for (level_no, ((level, scale), quota)) in levels.iter().zip(quota).enumerate() {
            let corners = self.detect_corners(level, quota);
            if corners.is_empty() {
                continue;
            }
            let smoothed = if self.opts.orb_blur_sigma > 0. {
                imageops::blur(level, self.opts.orb_blur_sigma)
            } else {
                level.clone()
            };
            for corner in corners {
                let angle = if self.opts.orb_not_oriented {
                    0.
                } else {
                    self.ic_angle(level, corner.x, corner.y)
                };
                descriptors.push(self.describe(&smoothed, corner.x, corner.y, angle));
                keypoints.push(KeyPoint {
                    x: corner.x as f32 * scale,
                    y: corner.y as f32 * scale,
                    level: level_no as u32,
                    angle,
                    score: corner.score,
                });
            }
        }

        debug!(
            "提取特征点: {}x{}, {} 层, {} 个",
            image.width(),
            image.height(),
            levels.len(),
            descriptors.len()
        );
        Ok((keypoints, descriptors))
    }
}

/// 生成固定的 BRIEF 采样模式，所有采样点都位于半径 PATTERN_RADIUS 的圆内
fn sampling_pattern() -> Vec<[i32; 4]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut point = || loop {
        let x = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x, y);
        }
    };
    let mut pattern = Vec::with_capacity(DESCRIPTOR_SIZE * 8);
    while pattern.len() < DESCRIPTOR_SIZE * 8 {
        let (x1, y1) = point();
        let (x2, y2) = point();
        if (x1, y1) != (x2, y2) {
            pattern.push([x1, y1, x2, y2]);
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(width: u32, height: u32, seed: u64) -> Image {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..width * height).map(|_| rng.random::<u8>()).collect();
        Image::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn pattern_is_stable() {
        let a = sampling_pattern();
        let b = sampling_pattern();
        assert_eq!(a.len(), 256);
        assert_eq!(a, b);
        for [x1, y1, x2, y2] in a {
            assert!(x1 * x1 + y1 * y1 <= PATTERN_RADIUS * PATTERN_RADIUS);
            assert!(x2 * x2 + y2 * y2 <= PATTERN_RADIUS * PATTERN_RADIUS);
        }
    }

    #[test]
    fn features_per_level_sums_to_total() {
        let orb = OrbExtractor::create(OrbOptions::default());
        for n in 1..=8 {
            let quota = orb.features_per_level(n);
            assert_eq!(quota.len(), n);
            assert_eq!(quota.iter().sum::<usize>(), 500);
        }
        // 越往上的层分配的数量越少
        let quota = orb.features_per_level(8);
        assert!(quota[0] > quota[6]);
    }

    #[test]
    fn textured_image_has_descriptors() {
        let orb = OrbExtractor::create(OrbOptions::default());
        let (kps, des) = orb.detect(&noise(200, 160, 1)).unwrap();
        assert!(!des.is_empty());
        assert_eq!(kps.len(), des.len());
        assert!(des.len() <= 500);
    }

    #[test]
    fn blank_image_has_no_descriptors() {
        let orb = OrbExtractor::create(OrbOptions::default());
        let blank = Image::from_fn(200, 160, |_, _| 128);
        assert!(orb.extract(&blank).unwrap().is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let orb = OrbExtractor::create(OrbOptions::default());
        let image = noise(180, 180, 7);
        assert_eq!(orb.extract(&image).unwrap(), orb.extract(&image).unwrap());
    }

    #[test]
    fn small_image_is_rejected() {
        let orb = OrbExtractor::create(OrbOptions::default());
        let err = orb.extract(&noise(20, 200, 3)).unwrap_err();
        assert!(matches!(err, IndexError::Extraction(_)));
        let empty = Image::from_raw(0, 0, vec![]).unwrap();
        assert!(orb.extract(&empty).is_err());
    }

    #[test]
    fn keypoints_stay_inside_image() {
        let orb = OrbExtractor::create(OrbOptions::default());
        let image = noise(240, 120, 11);
        let (kps, _) = orb.detect(&image).unwrap();
        for kp in kps {
            assert!(kp.x >= 0. && kp.x < 240.);
            assert!(kp.y >= 0. && kp.y < 120.);
        }
    }
}
