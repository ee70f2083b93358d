use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use indexflow_core::SchedulerResult;
use indexflow_domain::AccessResolver;

/// 放行所有访问，用于单租户部署和测试
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAccessResolver;

#[async_trait]
impl AccessResolver for AllowAllAccessResolver {
    async fn has_access(&self, _username: &str, _project_id: i64) -> SchedulerResult<bool> {
        Ok(true)
    }
}

/// 基于静态授权表的鉴权
pub struct StaticAccessResolver {
    grants: HashMap<String, HashSet<i64>>,
}

impl StaticAccessResolver {
    pub fn new(grants: HashMap<String, HashSet<i64>>) -> Self {
        Self { grants }
    }
}

#[async_trait]
impl AccessResolver for StaticAccessResolver {
    async fn has_access(&self, username: &str, project_id: i64) -> SchedulerResult<bool> {
        Ok(self
            .grants
            .get(username)
            .map(|projects| projects.contains(&project_id))
            .unwrap_or(false))
    }
}
