use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// Anything that feeds BPM samples into the controller's inbox.
///
/// Sources run on their own task and only ever publish; they never touch
/// controller state.
#[async_trait]
pub trait BpmSource: Send {
    /// Short name used in logs and status output
    fn name(&self) -> &'static str;

    /// Begin producing samples
    async fn start(&mut self) -> Result<()>;

    /// Stop producing samples and release resources. Safe to call repeatedly.
    async fn stop(&mut self);

    /// Get the source's status
    fn status(&self) -> HashMap<String, String>;
}
