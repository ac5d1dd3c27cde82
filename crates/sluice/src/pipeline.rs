//! Builder wiring stages onto an in-memory pipe

use crate::exchange::Exchange;
use crate::pipe::{memory::MemoryPipe, Pipe};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Stage = Box<dyn FnOnce(Exchange) + Send>;

/// Builder assembling a pipeline stage by stage.
///
/// Stages are ordered: requests visit them first-to-last, responses
/// last-to-first. Each stage closure runs once at build time and
/// receives the exchange controller for its point, on which it
/// registers its listeners.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Append a stage to the pipeline
    pub fn stage(mut self, setup: impl FnOnce(Exchange) + Send + 'static) -> Self {
        self.stages.push(Box::new(setup));
        self
    }

    /// Wire all stages onto a fresh in-memory pipe.
    ///
    /// The client owns the head point; the last stage is the effective
    /// transport, expected to answer requests or throw.
    pub fn build(self) -> Pipeline {
        let pipe = Arc::new(MemoryPipe::new(self.stages.len() + 1));
        debug!(points = pipe.points(), "building pipeline");

        let client = Exchange::new(point(&pipe, 0));
        for (index, setup) in self.stages.into_iter().enumerate() {
            setup(client.sibling(point(&pipe, index + 1)));
        }
        Pipeline { pipe, client }
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages.len())
            .finish()
    }
}

fn point(pipe: &Arc<MemoryPipe>, index: usize) -> Arc<dyn Pipe> {
    Arc::new(pipe.handle(index))
}

/// A built pipeline: an in-memory pipe with its stages attached and a
/// client controller at the head
pub struct Pipeline {
    pipe: Arc<MemoryPipe>,
    client: Exchange,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The exchange controller at the head of the pipeline
    pub fn client(&self) -> &Exchange {
        &self.client
    }

    /// Number of points on the underlying pipe, the client's included
    pub fn points(&self) -> usize {
        self.pipe.points()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("points", &self.pipe.points())
            .finish()
    }
}
