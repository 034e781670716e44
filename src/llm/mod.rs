//! Text generation: the capability the repair loop asks for fixes.

pub mod client;
pub mod models;

pub use client::OpenRouterGenerator;
pub use models::{ModelSettings, Usage, DEFAULT_MODEL};

/// Turns a prompt into generated text.
///
/// Implementations may block for as long as they like; the repair loop does
/// not time them out. An `Err` ends the session it happened in.
pub trait Generator {
    fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

impl<F> Generator for F
where
    F: Fn(&str) -> anyhow::Result<String>,
{
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self(prompt)
    }
}
