//! 供其他语言调用的操作接口
//!
//! 索引和图片都保存在句柄表中，调用方只持有整数句柄。
//! 所有错误在这里折叠为两类：已知的图片/索引处理错误和未知错误，
//! 具体的错误类型只保留在消息文本中。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use log::warn;
use thiserror::Error;

use crate::config::IndexConfig;
use crate::error::{IndexError, NO_MATCH, STATUS_OK};
use crate::facade::IqIndex;
use crate::handle::{Handle, HandleTable};
use crate::image::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 图片或索引处理失败
    Known,
    /// 无效句柄、内部 panic 等
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BoundaryError {
    pub category: ErrorCategory,
    pub message: String,
}

impl BoundaryError {
    pub fn known(message: impl Into<String>) -> Self {
        Self { category: ErrorCategory::Known, message: message.into() }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self { category: ErrorCategory::Unknown, message: message.into() }
    }
}

impl From<IndexError> for BoundaryError {
    fn from(e: IndexError) -> Self {
        Self::known(e.to_string())
    }
}

pub type BoundaryResult<T> = Result<T, BoundaryError>;

type IndexFactory = Box<dyn Fn() -> IqIndex + Send + Sync>;

/// 进程内的全部状态，由调用方在启动时创建一次
pub struct Runtime {
    indexes: HandleTable<IqIndex>,
    images: HandleTable<Image>,
    factory: IndexFactory,
    /// 查询图片裁剪后的边长
    query_size: u32,
}

impl Runtime {
    pub fn initialize() -> Self {
        Self::with_config(IndexConfig::default())
    }

    pub fn with_config(config: IndexConfig) -> Self {
        let query_size = config.search.query_size;
        Self::with_factory(query_size, move || IqIndex::builder().config(config.clone()).build())
    }

    /// 使用自定义的方法创建索引
    pub fn with_factory(query_size: u32, factory: impl Fn() -> IqIndex + Send + Sync + 'static) -> Self {
        Self {
            indexes: HandleTable::new(),
            images: HandleTable::new(),
            factory: Box::new(factory),
            query_size,
        }
    }

    fn index(&self, handle: u64) -> BoundaryResult<&IqIndex> {
        self.indexes
            .get(Handle::from_raw(handle))
            .ok_or_else(|| BoundaryError::unknown(format!("无效的索引句柄 {handle:#x}")))
    }

    fn index_mut(&mut self, handle: u64) -> BoundaryResult<&mut IqIndex> {
        self.indexes
            .get_mut(Handle::from_raw(handle))
            .ok_or_else(|| BoundaryError::unknown(format!("无效的索引句柄 {handle:#x}")))
    }

    fn image(&self, handle: u64) -> BoundaryResult<&Image> {
        self.images
            .get(Handle::from_raw(handle))
            .ok_or_else(|| BoundaryError::unknown(format!("无效的图片句柄 {handle:#x}")))
    }

    pub fn create_index(&mut self) -> BoundaryResult<u64> {
        guard(|| {
            let index = (self.factory)();
            Ok(self.indexes.insert(index).to_raw())
        })
    }

    pub fn destroy_index(&mut self, handle: u64) -> BoundaryResult<()> {
        self.indexes
            .remove(Handle::from_raw(handle))
            .map(drop)
            .ok_or_else(|| BoundaryError::unknown(format!("无效的索引句柄 {handle:#x}")))
    }

    pub fn open_image(&mut self, path: impl AsRef<Path>) -> BoundaryResult<u64> {
        guard(|| {
            let image = Image::open(path)?;
            Ok(self.images.insert(image).to_raw())
        })
    }

    /// 使用灰度像素创建图片
    pub fn image_from_raw(&mut self, width: u32, height: u32, data: Vec<u8>) -> BoundaryResult<u64> {
        guard(|| {
            let image = Image::from_raw(width, height, data)?;
            Ok(self.images.insert(image).to_raw())
        })
    }

    pub fn image_size(&self, handle: u64) -> BoundaryResult<(u32, u32)> {
        let image = self.image(handle)?;
        Ok((image.width(), image.height()))
    }

    /// 裁剪图片，返回新图片的句柄
    pub fn crop_image(&mut self, handle: u64, x: u32, y: u32, width: u32, height: u32) -> BoundaryResult<u64> {
        guard(|| {
            let cropped = self.image(handle)?.crop(x, y, width, height)?;
            Ok(self.images.insert(cropped).to_raw())
        })
    }

    /// 缩放图片，返回新图片的句柄
    pub fn resize_image(&mut self, handle: u64, width: u32, height: u32) -> BoundaryResult<u64> {
        guard(|| {
            let resized = self.image(handle)?.resize(width, height)?;
            Ok(self.images.insert(resized).to_raw())
        })
    }

    pub fn destroy_image(&mut self, handle: u64) -> BoundaryResult<()> {
        self.images
            .remove(Handle::from_raw(handle))
            .map(drop)
            .ok_or_else(|| BoundaryError::unknown(format!("无效的图片句柄 {handle:#x}")))
    }

    /// 返回状态码，引擎错误只记录日志
    pub fn load(&mut self, handle: u64, index_path: &str, images_path: &str) -> BoundaryResult<i32> {
        guard(|| Ok(status(self.index_mut(handle)?.load(index_path, images_path))))
    }

    pub fn train(&mut self, handle: u64) -> BoundaryResult<i32> {
        guard(|| Ok(status(self.index_mut(handle)?.train())))
    }

    pub fn compute(&mut self, handle: u64, image: u64, object_id: &str, image_id: &str) -> BoundaryResult<i32> {
        guard(|| {
            let image = self.image(image)?.clone();
            Ok(status(self.index_mut(handle)?.compute(&image, object_id, image_id)))
        })
    }

    /// 识别图片中心区域的物体，返回物体序号或者 [`NO_MATCH`]
    pub fn match_image(&self, handle: u64, image: u64) -> BoundaryResult<i32> {
        guard(|| {
            let index = self.index(handle)?;
            let query = self.image(image)?.center_square(self.query_size)?;
            Ok(match index.match_image(&query)? {
                Some(ordinal) => i32::try_from(ordinal)
                    .map_err(|_| BoundaryError::unknown(format!("物体序号 {ordinal} 溢出")))?,
                None => NO_MATCH,
            })
        })
    }

    pub fn object_count(&self, handle: u64) -> BoundaryResult<i32> {
        let count = self.index(handle)?.object_count();
        i32::try_from(count).map_err(|_| BoundaryError::unknown(format!("物体数量 {count} 溢出")))
    }

    pub fn object_id_at(&self, handle: u64, ordinal: i32) -> BoundaryResult<Option<String>> {
        let index = self.index(handle)?;
        Ok(usize::try_from(ordinal).ok().and_then(|i| index.object_id_at(i)).map(str::to_string))
    }

    pub fn name(&self, handle: u64, object_id: &str) -> BoundaryResult<Option<String>> {
        Ok(self.index(handle)?.name(object_id).map(str::to_string))
    }

    pub fn metadata(&self, handle: u64, object_id: &str) -> BoundaryResult<Option<String>> {
        Ok(self.index(handle)?.metadata(object_id).map(str::to_string))
    }

    pub fn num_images(&self, handle: u64) -> BoundaryResult<usize> {
        Ok(self.index(handle)?.num_images())
    }
}

/// 将引擎的结果转换为状态码
fn status(result: crate::error::Result<()>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => {
            warn!("{e}");
            e.status()
        }
    }
}

/// 捕获 panic，作为未知错误返回
fn guard<T>(f: impl FnOnce() -> BoundaryResult<T>) -> BoundaryResult<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(BoundaryError::unknown(format!("内部错误: {}", panic_message(payload.as_ref()))))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn destroyed_handles_are_rejected() {
        let mut rt = Runtime::initialize();
        let index = rt.create_index().unwrap();
        rt.destroy_index(index).unwrap();

        let err = rt.train(index).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Unknown);
        assert!(rt.destroy_index(index).is_err());
        assert!(rt.object_count(0).is_err());
    }

    #[test]
    fn engine_errors_become_status_codes() {
        let mut rt = Runtime::initialize();
        let index = rt.create_index().unwrap();
        assert_eq!(rt.train(index).unwrap(), ErrorKind::NotLoaded.status());
    }

    #[test]
    fn match_errors_are_known() {
        let mut rt = Runtime::initialize();
        let index = rt.create_index().unwrap();
        let image = rt.image_from_raw(64, 64, vec![0; 64 * 64]).unwrap();
        let err = rt.match_image(index, image).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Known);
    }

    #[test]
    fn image_operations() {
        let mut rt = Runtime::initialize();
        let image = rt.image_from_raw(40, 30, vec![7; 40 * 30]).unwrap();
        let cropped = rt.crop_image(image, 5, 5, 20, 10).unwrap();
        assert_eq!(rt.image_size(cropped).unwrap(), (20, 10));
        let resized = rt.resize_image(cropped, 10, 5).unwrap();
        assert_eq!(rt.image_size(resized).unwrap(), (10, 5));

        let err = rt.crop_image(image, 30, 0, 20, 10).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Known);

        rt.destroy_image(image).unwrap();
        assert_eq!(rt.image_size(image).unwrap_err().category, ErrorCategory::Unknown);
        assert_eq!(rt.image_size(cropped).unwrap(), (20, 10));
        assert!(rt.open_image("/nonexistent/image.png").is_err());
    }

    #[test]
    fn panics_are_unknown() {
        let result: BoundaryResult<()> = guard(|| panic!("boom"));
        let err = result.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Unknown);
        assert!(err.message.contains("boom"));
    }
}
