//! External rendering engines.
//!
//! An engine turns a graph description into SVG markup. Layout is entirely
//! the engine's business; this crate only sequences and splices results.

mod cache;
mod command;

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::EngineError;
use crate::theme::Theme;

pub use cache::CachingEngine;
pub use command::{CommandEngine, CommandsConfig};

pub type EngineFuture = LocalBoxFuture<'static, Result<String, EngineError>>;

/// One render invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderRequest {
    /// Identifier the engine may embed in generated element ids.
    pub render_id: String,
    pub description: String,
    /// `None` for theme-independent grammars.
    pub theme: Option<Theme>,
}

/// Engine-global settings applied through [`RenderEngine::configure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default = "default_security_level")]
    pub security_level: String,
    #[serde(default)]
    pub use_max_width: bool,
    /// Descriptions longer than this many bytes are rejected.
    #[serde(default = "default_max_text_size")]
    pub max_text_size: usize,
    /// Theme used when a request carries none.
    #[serde(default)]
    pub theme: Option<Theme>,
}

fn default_security_level() -> String {
    "loose".to_string()
}
fn default_max_text_size() -> usize {
    1_000_000
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            security_level: default_security_level(),
            use_max_width: false,
            max_text_size: default_max_text_size(),
            theme: None,
        }
    }
}

impl EngineOptions {
    /// Initialization object in the shape mermaid-style engines read from a
    /// config file.
    pub fn engine_config(&self, theme: Theme) -> serde_json::Value {
        json!({
            "theme": theme.engine_theme(),
            "securityLevel": self.security_level,
            "maxTextSize": self.max_text_size,
            "flowchart": { "useMaxWidth": self.use_max_width },
        })
    }

    pub fn check_size(&self, description: &str) -> Result<(), EngineError> {
        if description.len() > self.max_text_size {
            return Err(EngineError::TextTooLarge {
                len: description.len(),
                max: self.max_text_size,
            });
        }
        Ok(())
    }
}

pub trait RenderEngine {
    fn configure(&self, options: &EngineOptions);

    /// Starts a render. The work is issued before this returns; the future
    /// only delivers the result.
    fn render(&self, request: RenderRequest) -> EngineFuture;
}

impl<E: RenderEngine + ?Sized> RenderEngine for Rc<E> {
    fn configure(&self, options: &EngineOptions) {
        (**self).configure(options)
    }

    fn render(&self, request: RenderRequest) -> EngineFuture {
        (**self).render(request)
    }
}
