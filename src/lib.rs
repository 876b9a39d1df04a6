//! Interactive diagram surfaces and hover tooltips for a retained page model.
//!
//! A [`Page`] mounts hooks onto elements by their `data-hook` attribute:
//! diagrams rendered by an external engine (with pan/zoom and link
//! interception), tooltip surfaces served by one page-wide hover dispatcher,
//! a theme toggle and auto-dismissing flash messages.

pub mod channel;
pub mod config;
pub mod diagram;
pub mod dom;
pub mod engine;
pub mod error;
pub mod flash;
pub mod hook;
pub mod page;
pub mod theme;
pub mod timer;
pub mod tooltip;
pub mod xml;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{InteractionChannel, OutboundEvent};
pub use config::Config;
pub use diagram::{DiagramGrammar, DiagramHook, RenderOutcome, RenderPhase};
pub use error::{EngineError, Error, Result};
pub use page::{Page, PageBuilder};
pub use theme::{Theme, ThemeBridge};
pub use tooltip::{HoverDispatcher, TooltipRegistry};
