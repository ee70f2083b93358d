use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// 待索引的文档载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// 文档在目标库中的唯一引用
    pub reference: String,
    pub content: String,
    /// 附加字段，按写入顺序提交
    #[serde(default)]
    pub fields: Vec<(String, String)>,
}

/// 批量提交的目标描述
///
/// 相同指纹的文档合并为同一批提交。指纹只在进程内作为队列键使用，
/// 不要求跨进程稳定。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDestination {
    /// 目标索引库名
    pub database: String,
    /// 优先级档位，达到旁路阈值的提交不进入队列
    #[serde(default)]
    pub priority: i32,
    /// 透传给索引引擎的额外参数
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl IndexDestination {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            priority: 0,
            params: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 队列键
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
