use std::{io, process::Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::ActuationError;

/// Drives the maglock. One logical command is in flight at a time.
#[async_trait]
pub trait Actuator: Send {
    /// Replaces whatever process currently holds the line, even when `locked`
    /// equals the last requested value.
    async fn set_locked(&mut self, locked: bool) -> Result<(), ActuationError>;

    /// Stops the current line-setting process, if any.
    async fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioLine {
    pub program: String,
    pub chip: String,
    pub line: u32,
}

/// Holds the line by keeping a `gpioset` (libgpiod v2) process alive.
pub struct GpiosetActuator {
    target: GpioLine,
    current: Option<Child>,
}

impl GpiosetActuator {
    pub fn new(target: GpioLine) -> Self {
        Self {
            target,
            current: None,
        }
    }

    fn args(&self, locked: bool) -> Vec<String> {
        let value = if locked { 1 } else { 0 };
        vec![
            "-c".to_string(),
            self.target.chip.clone(),
            format!("{}={value}", self.target.line),
        ]
    }

    async fn stop_current(&mut self) {
        let Some(mut child) = self.current.take() else {
            return;
        };
        if let Err(error) = child.kill().await {
            debug!(%error, "previous line-setting process already gone");
        }
    }

    #[cfg(test)]
    fn has_process(&self) -> bool {
        self.current.is_some()
    }

    #[cfg(test)]
    fn process_id(&self) -> Option<u32> {
        self.current.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Actuator for GpiosetActuator {
    async fn set_locked(&mut self, locked: bool) -> Result<(), ActuationError> {
        self.stop_current().await;

        let child = Command::new(&self.target.program)
            .args(self.args(locked))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                if source.kind() == io::ErrorKind::NotFound {
                    warn!(
                        program = %self.target.program,
                        "line-setting program not found; is gpiod installed? try: sudo apt install gpiod"
                    );
                }
                ActuationError::Spawn {
                    program: self.target.program.clone(),
                    chip: self.target.chip.clone(),
                    line: self.target.line,
                    source,
                }
            })?;
        self.current = Some(child);

        info!(
            chip = %self.target.chip,
            line = self.target.line,
            "maglock {}",
            if locked { "LOCKED" } else { "UNLOCKED" }
        );
        Ok(())
    }

    async fn release(&mut self) {
        self.stop_current().await;
    }
}

#[cfg(test)]
#[path = "tests/actuator_tests.rs"]
mod tests;
