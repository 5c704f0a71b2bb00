use serde::{Deserialize, Serialize};

/// 256 位的二进制描述符，使用汉明距离比较
pub type Descriptor = [u8; 32];

/// 描述符字节数
pub const DESCRIPTOR_SIZE: usize = 32;

/// 从一张图片中提取的全部描述符
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub object_id: String,
    pub image_id: String,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn new(
        object_id: impl Into<String>,
        image_id: impl Into<String>,
        descriptors: Vec<Descriptor>,
    ) -> Self {
        Self { object_id: object_id.into(), image_id: image_id.into(), descriptors }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// 物体记录，保存在 `<object>/meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub meta: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl ObjectRecord {
    /// 首次 compute() 时创建的记录，名称默认为物体 ID
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self { name: id.clone(), id, meta: String::new(), images: vec![] }
    }
}

/// 索引中一条描述符的来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub object_id: String,
    pub image_id: String,
}

/// 匹配结果中的一个候选物体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub object_id: String,
    /// 接受的投票数
    pub votes: usize,
    /// 所有接受的投票的距离之和
    pub distance_sum: u64,
}

/// 检查物体 ID 或图片 ID 能否安全地作为文件名使用
pub fn validate_identifier(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id.len() <= 255
        && !id.chars().any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(validate_identifier("cola"));
        assert!(validate_identifier("img-01.front"));
        assert!(!validate_identifier(""));
        assert!(!validate_identifier(".."));
        assert!(!validate_identifier("a/b"));
        assert!(!validate_identifier("a\nb"));
    }

    #[test]
    fn new_record_uses_id_as_name() {
        let record = ObjectRecord::new("A");
        assert_eq!(record.name, "A");
        assert!(record.images.is_empty());
    }
}
