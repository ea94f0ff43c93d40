//! Browser seam used by the site sessions.
//!
//! `Renderer` owns a browser process, `RenderContext` is one tab in it. The
//! only implementation drives Chromium through chromiumoxide.

pub mod chromium;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

/// Returned (inside `anyhow::Error`) when a page does not load in time.
#[derive(Debug, Clone, Copy)]
pub struct NavigationTimeout {
    pub timeout_ms: u64,
}

impl fmt::Display for NavigationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "navigation timed out after {}ms", self.timeout_ms)
    }
}

impl std::error::Error for NavigationTimeout {}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a blank tab.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    async fn shutdown(&self) -> Result<()>;
}

/// One tab. Scripts run against whatever page was loaded last.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url`, failing with [`NavigationTimeout`] after `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()>;
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    async fn get_html(&self) -> Result<String>;
    async fn close(self: Box<Self>) -> Result<()>;
}
