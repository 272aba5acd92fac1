// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 上下文与路由
//!
//! 一个 [`HttpContext`] 把一个路径前缀绑定到处理器、过滤器、可选的认证器和一组属性。
//! 请求按最长前缀匹配到唯一的上下文；上下文一旦注册就不再修改。

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    exception::Exception,
    filter::{AuthFilter, Authenticator, Filter, HttpHandler},
};

pub struct HttpContext {
    path: String,
    handler: Option<Arc<dyn HttpHandler>>,
    filters: Vec<Arc<dyn Filter>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    attributes: HashMap<String, String>,
}

impl HttpContext {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            handler: None,
            filters: Vec::new(),
            authenticator: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_handler<H: HttpHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// 追加一个用户过滤器，按加入顺序执行
    pub fn with_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn with_authenticator<A: Authenticator + 'static>(mut self, authenticator: A) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> Option<&Arc<dyn HttpHandler>> {
        self.handler.as_ref()
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }

    /// 请求实际经过的过滤器：内部过滤器在前，用户过滤器在后
    pub(crate) fn chain_filters(&self) -> Vec<Arc<dyn Filter>> {
        let mut chain: Vec<Arc<dyn Filter>> = Vec::with_capacity(self.filters.len() + 1);
        if let Some(authenticator) = &self.authenticator {
            chain.push(Arc::new(AuthFilter::new(Arc::clone(authenticator))));
        }
        chain.extend(self.filters.iter().cloned());
        chain
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters: Vec<&str> = self.filters.iter().map(|f| f.description()).collect();
        f.debug_struct("HttpContext")
            .field("path", &self.path)
            .field("has_handler", &self.handler.is_some())
            .field("filters", &filters)
            .field("has_authenticator", &self.authenticator.is_some())
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// 已注册的上下文集合
#[derive(Debug, Default)]
pub struct ContextList {
    contexts: Vec<Arc<HttpContext>>,
}

impl ContextList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, context: HttpContext) -> Result<Arc<HttpContext>, Exception> {
        if !context.path.starts_with('/') {
            return Err(Exception::InvalidContextPath(context.path));
        }
        if self.contexts.iter().any(|c| c.path == context.path) {
            return Err(Exception::ContextExists(context.path));
        }
        let context = Arc::new(context);
        self.contexts.push(Arc::clone(&context));
        Ok(context)
    }

    pub fn remove(&mut self, path: &str) -> Result<Arc<HttpContext>, Exception> {
        match self.contexts.iter().position(|c| c.path == path) {
            Some(i) => Ok(self.contexts.remove(i)),
            None => Err(Exception::ContextNotFound(path.to_string())),
        }
    }

    pub fn remove_context(&mut self, context: &Arc<HttpContext>) -> Result<(), Exception> {
        match self.contexts.iter().position(|c| Arc::ptr_eq(c, context)) {
            Some(i) => {
                self.contexts.remove(i);
                Ok(())
            }
            None => Err(Exception::ContextNotFound(context.path.clone())),
        }
    }

    /// 最长前缀匹配
    pub fn find(&self, path: &str) -> Option<Arc<HttpContext>> {
        self.contexts
            .iter()
            .filter(|c| path.starts_with(c.path.as_str()))
            .max_by_key(|c| c.path.len())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
