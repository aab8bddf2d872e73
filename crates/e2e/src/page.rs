//! Counter page object

use tracing::debug;

use crate::commands::Commands;
use crate::error::E2eResult;

/// Counter display; text is the canonical decimal value
pub const COUNTER: &str = "#counter";
pub const INCREMENT_BUTTON: &str = "#increment-btn";
pub const DECREMENT_BUTTON: &str = "#decrement-btn";

/// Intention-revealing operations over the counter selector contract.
///
/// Nothing observed is cached: every assertion re-queries the live page.
pub struct CounterPage<'a> {
    commands: &'a Commands,
}

impl<'a> CounterPage<'a> {
    pub fn new(commands: &'a Commands) -> Self {
        Self { commands }
    }

    pub async fn visit(&self) -> E2eResult<()> {
        self.commands.visit("/").await
    }

    pub async fn assert_value(&self, n: u64) -> E2eResult<()> {
        self.commands.should_have_text(COUNTER, &n.to_string()).await
    }

    pub async fn increment_by(&self, times: u32) -> E2eResult<()> {
        self.click_times(INCREMENT_BUTTON, times).await
    }

    pub async fn decrement_by(&self, times: u32) -> E2eResult<()> {
        self.click_times(DECREMENT_BUTTON, times).await
    }

    async fn click_times(&self, selector: &str, times: u32) -> E2eResult<()> {
        debug!("{} x{}", selector, times);
        for _ in 0..times {
            self.commands.click(selector, false).await?;
        }
        Ok(())
    }
}
