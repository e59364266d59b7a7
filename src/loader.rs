//! Template Loading
//!
//! A [`TemplateLoader`] answers either immediately ([`TemplateFetch::Ready`])
//! or with a future the compiler drives on its local executor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::error::{Error, Result};

pub enum TemplateFetch {
    Ready(Result<String>),
    Pending(LocalBoxFuture<'static, Result<String>>),
}

pub trait TemplateLoader {
    fn fetch(&self, url: &str) -> TemplateFetch;
}

/// Shared url → markup store.
#[derive(Debug, Clone, Default)]
pub struct TemplateCache(Rc<RefCell<HashMap<String, String>>>);

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, url: &str, markup: &str) {
        self.0
            .borrow_mut()
            .insert(url.to_string(), markup.to_string());
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.0.borrow().get(url).cloned()
    }

    pub fn remove(&self, url: &str) {
        self.0.borrow_mut().remove(url);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Serves from a [`TemplateCache`], falling back to an optional upstream
/// loader whose successful responses are cached.
#[derive(Clone, Default)]
pub struct CachedTemplateLoader {
    cache: TemplateCache,
    upstream: Option<Rc<dyn TemplateLoader>>,
}

impl CachedTemplateLoader {
    pub fn new(cache: TemplateCache) -> Self {
        Self {
            cache,
            upstream: None,
        }
    }

    pub fn with_upstream(mut self, upstream: Rc<dyn TemplateLoader>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

impl TemplateLoader for CachedTemplateLoader {
    fn fetch(&self, url: &str) -> TemplateFetch {
        if let Some(markup) = self.cache.get(url) {
            return TemplateFetch::Ready(Ok(markup));
        }
        let Some(upstream) = &self.upstream else {
            return TemplateFetch::Ready(Err(Error::TemplateLoad {
                url: url.to_string(),
                reason: "not found in template cache".to_string(),
            }));
        };

        let cache = self.cache.clone();
        let key = url.to_string();
        match upstream.fetch(url) {
            TemplateFetch::Ready(result) => {
                if let Ok(markup) = &result {
                    cache.put(&key, markup);
                }
                TemplateFetch::Ready(result)
            }
            TemplateFetch::Pending(future) => TemplateFetch::Pending(
                future
                    .map(move |result| {
                        if let Ok(markup) = &result {
                            cache.put(&key, markup);
                        }
                        result
                    })
                    .boxed_local(),
            ),
        }
    }
}
