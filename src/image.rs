//! 图片容器
//!
//! 对 [`image::GrayImage`] 的简单包装，提供读取、裁剪和缩放。
//! 所有特征提取都在灰度图上进行，因此读取时即转换为灰度。

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: GrayImage,
}

impl Image {
    /// 从文件读取图片
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| IndexError::Extraction(format!("{}: {}", path.display(), e)))?;
        Ok(Self { pixels: image.to_luma8() })
    }

    /// 从内存中的编码数据读取图片
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image =
            image::load_from_memory(bytes).map_err(|e| IndexError::Extraction(e.to_string()))?;
        Ok(Self { pixels: image.to_luma8() })
    }

    /// 使用按行排列的灰度像素创建图片
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let pixels = GrayImage::from_raw(width, height, data).ok_or_else(|| {
            IndexError::Extraction(format!("像素数量与尺寸 {width}x{height} 不符"))
        })?;
        Ok(Self { pixels })
    }

    /// 使用函数生成每个像素
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        Self { pixels: GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])) }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// 裁剪出一个子区域
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        let inside = x.checked_add(width).is_some_and(|r| r <= self.width())
            && y.checked_add(height).is_some_and(|b| b <= self.height());
        if !inside || width == 0 || height == 0 {
            return Err(IndexError::Extraction(format!(
                "裁剪区域 ({x}, {y}, {width}, {height}) 超出图片范围 {}x{}",
                self.width(),
                self.height()
            )));
        }
        Ok(Self { pixels: imageops::crop_imm(&self.pixels, x, y, width, height).to_image() })
    }

    /// 缩放到指定尺寸
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || self.is_empty() {
            return Err(IndexError::Extraction(format!("无法缩放到 {width}x{height}")));
        }
        Ok(Self { pixels: imageops::resize(&self.pixels, width, height, FilterType::Triangle) })
    }

    /// 宽或高超过最大尺寸时，等比缩小到最大尺寸以内
    pub fn fit_within(&self, (max_width, max_height): (u32, u32)) -> Self {
        if self.width() <= max_width && self.height() <= max_height {
            return self.clone();
        }
        let scale = (max_width as f64 / self.width() as f64)
            .min(max_height as f64 / self.height() as f64);
        let width = ((self.width() as f64 * scale).round() as u32).max(1);
        let height = ((self.height() as f64 * scale).round() as u32).max(1);
        Self { pixels: imageops::resize(&self.pixels, width, height, FilterType::Triangle) }
    }

    /// 取中心边长为短边一半的正方形，并缩放到 size x size
    ///
    /// 查询图片通常是相机预览帧，物体位于中心，这一步去掉了大部分背景
    pub fn center_square(&self, size: u32) -> Result<Self> {
        let min = self.width().min(self.height());
        let side = min / 2;
        if side == 0 {
            return Err(IndexError::Extraction(format!(
                "图片过小: {}x{}",
                self.width(),
                self.height()
            )));
        }
        let x = (self.width() - side) / 2;
        let y = (self.height() - side) / 2;
        self.crop(x, y, side, side)?.resize(size, size)
    }
}

impl From<GrayImage> for Image {
    fn from(pixels: GrayImage) -> Self {
        Self { pixels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Image {
        Image::from_fn(width, height, |x, y| ((x + y) % 256) as u8)
    }

    #[test]
    fn crop_inside_bounds() {
        let img = gradient(40, 30);
        let sub = img.crop(10, 5, 20, 10).unwrap();
        assert_eq!((sub.width(), sub.height()), (20, 10));
        assert_eq!(sub.as_gray().get_pixel(0, 0).0[0], 15);
    }

    #[test]
    fn crop_outside_bounds_fails() {
        let img = gradient(40, 30);
        assert!(img.crop(30, 0, 20, 10).is_err());
        assert!(img.crop(0, 0, 0, 10).is_err());
        assert!(img.crop(u32::MAX, 0, 2, 2).is_err());
    }

    #[test]
    fn resize_changes_dimensions() {
        let img = gradient(40, 30).resize(20, 15).unwrap();
        assert_eq!((img.width(), img.height()), (20, 15));
    }

    #[test]
    fn fit_within_keeps_small_images() {
        let img = gradient(40, 30);
        assert_eq!(img.fit_within((100, 100)), img);
        assert_eq!(img.fit_within((40, 30)), img);
    }

    #[test]
    fn fit_within_scales_large_images() {
        let img = gradient(400, 200).fit_within((100, 100));
        assert_eq!((img.width(), img.height()), (100, 50));
    }

    #[test]
    fn fit_within_scales_when_one_side_exceeds() {
        let img = gradient(4000, 700).fit_within((1080, 1920));
        assert_eq!((img.width(), img.height()), (1080, 189));
        let img = gradient(40, 300).fit_within((100, 100));
        assert_eq!((img.width(), img.height()), (13, 100));
    }

    #[test]
    fn center_square_normalizes_query() {
        let img = gradient(400, 300).center_square(150).unwrap();
        assert_eq!((img.width(), img.height()), (150, 150));
        assert!(Image::from_fn(1, 1, |_, _| 0).center_square(150).is_err());
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(Image::from_raw(2, 2, vec![0; 4]).is_ok());
        assert!(Image::from_raw(2, 2, vec![0; 3]).is_err());
    }
}
