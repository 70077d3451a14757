//! Interactive sampling loop.
//!
//! Each iteration suspends once, awaiting the next line from an
//! [`IndexSource`]. `-1` or end of input ends the loop; anything that is not
//! a dataset index is reported and the user is prompted again.

use crate::config::ExperimentConfig;
use crate::error::{LayoutError, TrainerError};
use crate::render::{LayoutRenderer, RenderRequest, SampleKind};
use crate::trainers::Trainer;
use crate::types::SampleRequest;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

pub const PROMPT: &str = "enter the index number (or -1 to quit): ";

/// Sentinel index that ends the sampling loop.
pub const QUIT_INDEX: i64 = -1;

/// Supplier of raw input lines for the sampling loop.
#[async_trait]
pub trait IndexSource: Send {
    /// Show `prompt` and wait for the next line; `None` at end of input.
    async fn next_line(&mut self, prompt: &str) -> Result<Option<String>, LayoutError>;
}

/// Pre-scripted lines; ends when empty.
#[async_trait]
impl IndexSource for VecDeque<String> {
    async fn next_line(&mut self, _prompt: &str) -> Result<Option<String>, LayoutError> {
        Ok(self.pop_front())
    }
}

/// Prompts on a writer and reads lines from a buffered reader.
pub struct PromptedLines<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> PromptedLines<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl PromptedLines<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Prompt on stdout, read from stdin.
    pub fn stdio() -> Self {
        Self::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }
}

#[async_trait]
impl<R, W> IndexSource for PromptedLines<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn next_line(&mut self, prompt: &str) -> Result<Option<String>, LayoutError> {
        self.writer.write_all(prompt.as_bytes()).await?;
        self.writer.flush().await?;

        // Raw bytes: undecodable input is reported as an invalid line.
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).trim_end().to_string()))
    }
}

/// Interpretation of one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Index(u64),
    Quit,
    Invalid(String),
}

pub fn parse_index(line: &str) -> PromptOutcome {
    let trimmed = line.trim();
    match trimmed.parse::<i64>() {
        Ok(QUIT_INDEX) => PromptOutcome::Quit,
        Ok(n) if n >= 0 => PromptOutcome::Index(n as u64),
        _ => PromptOutcome::Invalid(trimmed.to_string()),
    }
}

/// What a finished sampling loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplingSummary {
    /// Indices sampled, in order.
    pub sampled: Vec<u64>,
    pub invalid_inputs: usize,
}

/// One interactive sampling loop bound to a trainer and renderer.
pub struct SamplingSession<'a> {
    trainer: &'a dyn Trainer,
    renderer: &'a dyn LayoutRenderer,
    config: &'a ExperimentConfig,
    workdir_label: String,
}

impl<'a> SamplingSession<'a> {
    pub fn new(
        trainer: &'a dyn Trainer,
        renderer: &'a dyn LayoutRenderer,
        config: &'a ExperimentConfig,
        workdir_label: impl Into<String>,
    ) -> Self {
        Self {
            trainer,
            renderer,
            config,
            workdir_label: workdir_label.into(),
        }
    }

    pub async fn run(&self, input: &mut dyn IndexSource) -> Result<SamplingSummary, LayoutError> {
        let mut summary = SamplingSummary::default();
        loop {
            let Some(line) = input.next_line(PROMPT).await? else {
                info!("Input closed, leaving sampling loop");
                break;
            };
            match parse_index(&line) {
                PromptOutcome::Quit => {
                    info!("Received quit index, leaving sampling loop");
                    break;
                }
                PromptOutcome::Invalid(raw) => {
                    warn!(input = %raw, "Expected a non-negative dataset index or -1");
                    summary.invalid_inputs += 1;
                }
                PromptOutcome::Index(idx) => {
                    self.sample_and_render(idx).await?;
                    summary.sampled.push(idx);
                }
            }
        }
        Ok(summary)
    }

    /// Sample index `idx` and render the last refinement step next to the
    /// reference layout.
    pub async fn sample_and_render(&self, idx: u64) -> Result<(), LayoutError> {
        let sampling = &self.config.sampling;
        let output = self
            .trainer
            .sample(&SampleRequest {
                conditional: sampling.conditional,
                iterative_nums: sampling.iterative_nums.clone(),
                idx,
            })
            .await?;

        let inferred = output
            .generated
            .first()
            .and_then(|steps| steps.last())
            .cloned()
            .ok_or(TrainerError::EmptySample {
                idx,
                what: "generated layout",
            })?;
        let real = output
            .real
            .first()
            .cloned()
            .ok_or(TrainerError::EmptySample {
                idx,
                what: "reference layout",
            })?;

        for (kind, prefix, data) in [
            (SampleKind::Inferred, "infer", inferred),
            (SampleKind::Real, "real", real),
        ] {
            self.renderer.render(&RenderRequest {
                data,
                dataset: self.config.dataset,
                border_size: sampling.border_size,
                thickness: sampling.thickness,
                label: format!("{prefix}{idx}_{}", self.workdir_label),
                kind,
                idx,
                image_link: output.image_link.clone(),
            })?;
        }
        Ok(())
    }
}
