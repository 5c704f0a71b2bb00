use thiserror::Error;

/// 状态码：成功
pub const STATUS_OK: i32 = 0;
/// 匹配失败时返回的序号
pub const NO_MATCH: i32 = -1;

/// 错误类型标签，用于在边界层折叠错误和映射状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 图片无法读取或者尺寸过小
    Extraction,
    /// 在 load() 之前调用了其他操作
    NotLoaded,
    /// 在 train() / compute() 之前进行了匹配
    NotTrained,
    /// 读写磁盘失败
    Persistence,
    /// 磁盘上的数据结构损坏
    Corrupt,
    /// 物体 ID 或图片 ID 不合法
    InvalidIdentifier,
}

impl ErrorKind {
    /// 对应的状态码
    pub fn status(self) -> i32 {
        match self {
            Self::NotLoaded => -1,
            Self::Extraction => -2,
            Self::Persistence => -3,
            Self::NotTrained => -4,
            Self::Corrupt => -5,
            Self::InvalidIdentifier => -6,
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("特征提取失败: {0}")]
    Extraction(String),

    #[error("索引尚未加载")]
    NotLoaded,

    #[error("索引尚未训练")]
    NotTrained,

    #[error("读写失败: {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("数据损坏: {0}")]
    Corrupt(String),

    #[error("非法标识符: {0}")]
    InvalidIdentifier(String),
}

impl IndexError {
    pub fn persistence(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence { context: context.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::NotLoaded => ErrorKind::NotLoaded,
            Self::NotTrained => ErrorKind::NotTrained,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
        }
    }

    pub fn status(&self) -> i32 {
        self.kind().status()
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
