use std::fmt::{Display, Formatter};
use std::sync::Arc;

use frame_bus::{
    Bitrate, BitrateSink, Decoder, EncodeTransform, Encoder, FrameSource, LogReporter,
    PipelineError, Reporter, tee,
};
use tokio_util::sync::CancellationToken;

use crate::config::{BranchConfig, PipeConfig};

/// How a branch ended.
#[derive(Debug, Clone)]
pub enum BranchOutcome {
    Bitrate(Bitrate),
    Failed(PipelineError),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BranchReport {
    pub name: String,
    pub outcome: BranchOutcome,
}

impl BranchReport {
    pub fn bitrate(&self) -> Option<Bitrate> {
        match self.outcome {
            BranchOutcome::Bitrate(bitrate) => Some(bitrate),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            BranchOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for BranchReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            BranchOutcome::Bitrate(bitrate) => write!(f, "{}: {}", self.name, bitrate),
            BranchOutcome::Failed(e) => write!(f, "{}: failed: {}", self.name, e),
            BranchOutcome::Cancelled => write!(f, "{}: cancelled", self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipeSummary {
    // frames the source produced
    pub frames: u64,
    pub branches: Vec<BranchReport>,
    // frames still held once every branch finished; 0 unless something leaked
    pub leaked: u64,
}

impl PipeSummary {
    pub fn branch(&self, name: &str) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.name == name)
    }

    pub fn failed(&self) -> usize {
        self.branches.iter().filter(|b| b.error().is_some()).count()
    }
}

impl Display for PipeSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} frames", self.frames)?;
        for branch in &self.branches {
            write!(f, "; {}", branch)?;
        }
        Ok(())
    }
}

/// Source ─► tee ─► one encode/measure task per configured branch.
pub struct Pipe {
    config: PipeConfig,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl Pipe {
    pub fn new(config: PipeConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(LogReporter),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Plays `decoder` through every branch and waits for all of them.
    ///
    /// `make_encoder` is called once per branch before anything is pulled.
    /// Branch failures are part of the summary; only setup errors are
    /// returned as `Err`.
    pub async fn run<F>(&self, decoder: Box<dyn Decoder>, mut make_encoder: F) -> anyhow::Result<PipeSummary>
    where
        F: FnMut(&BranchConfig) -> anyhow::Result<Box<dyn Encoder>>,
    {
        self.config.validate()?;
        let encoders = self
            .config
            .branches
            .iter()
            .map(|branch| {
                make_encoder(branch)
                    .map_err(|e| anyhow::anyhow!("encoder for branch {}: {:#}", branch.name, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let rate = self.config.frame_rate();
        let source = FrameSource::new(decoder, rate).with_reporter(self.reporter.clone());
        let ledger = source.ledger();
        let stats = source.stats();
        log::info!(
            "Pipe: starting {} branches at {} fps",
            self.config.branches.len(),
            rate
        );

        let outputs = tee(source.into_stream(), self.config.branches.len());
        let mut tasks = Vec::with_capacity(outputs.len());
        for ((branch, encoder), output) in self.config.branches.iter().zip(encoders).zip(outputs) {
            let mut options = branch.encoder.clone();
            options.framerate.get_or_insert(rate);
            let transform =
                EncodeTransform::new(&branch.name, output.into_stream(), encoder, &options);
            let sink = BitrateSink::new(&branch.name).with_reporter(self.reporter.clone());
            let handle = tokio::spawn(sink.run(transform.into_stream()));
            tasks.push((branch.name.clone(), handle));
        }

        let mut branches = Vec::with_capacity(tasks.len());
        for (name, mut handle) in tasks {
            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = self.cancel.cancelled() => {
                    handle.abort();
                    handle.await
                }
            };
            let outcome = match joined {
                Ok(Ok(bitrate)) => BranchOutcome::Bitrate(bitrate),
                Ok(Err(e)) => {
                    log::warn!("Pipe: branch {} failed: {}", name, e);
                    BranchOutcome::Failed(e)
                }
                Err(e) if e.is_cancelled() => {
                    log::info!("Pipe: branch {} cancelled", name);
                    BranchOutcome::Cancelled
                }
                Err(e) => {
                    log::error!("Pipe: branch {} panicked: {}", name, e);
                    BranchOutcome::Failed(PipelineError::encode(
                        &name,
                        anyhow::anyhow!("branch task panicked: {}", e),
                    ))
                }
            };
            branches.push(BranchReport { name, outcome });
        }

        let leaked = ledger.live();
        if leaked != 0 {
            log::warn!("Pipe: {} frames still held after all branches ended", leaked);
        }
        Ok(PipeSummary {
            frames: stats.frames_produced(),
            branches,
            leaked,
        })
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
