//! Composable event pipeline.
//!
//! A pipeline is a chain of stages. Each stage receives an input value and
//! returns `Some(output)` to keep the chain going or `None` to stop it for
//! this event. Stopping is a normal outcome (a filter doing its job), not an
//! error.
//!
//! ```text
//! event ──► [stage 1] ──► [stage 2] ──► ... ──► Option<output>
//!                │
//!                └── None short-circuits the rest
//! ```
//!
//! Internally a pipeline is one composed closure, so appending stages costs
//! nothing at process time beyond the calls themselves.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::event::{Level, LogEvent};

/// A single processing step.
///
/// `process` must not block: stages run inline on whatever thread pushed the
/// event. Stages that do real I/O hand the event off internally and return
/// immediately.
pub trait Stage {
    type Input;
    type Output;

    /// Process one value. `None` stops propagation for this value.
    fn process(&self, input: Self::Input) -> Option<Self::Output>;
}

/// A composed chain of stages from `I` to `O`.
///
/// Cheap to clone; clones share the same underlying chain.
pub struct Pipeline<I, O> {
    run: Arc<dyn Fn(I) -> Option<O> + Send + Sync>,
}

impl<I, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<I: 'static, O: 'static> Pipeline<I, O> {
    /// Build a pipeline from a closure. Returning `None` stops propagation.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(I) -> Option<O> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// Build a single-stage pipeline.
    pub fn from_stage<S>(stage: S) -> Self
    where
        S: Stage<Input = I, Output = O> + Send + Sync + 'static,
    {
        Self::new(move |input| stage.process(input))
    }

    /// Run one value through the chain.
    pub fn process(&self, input: I) -> Option<O> {
        (self.run)(input)
    }

    /// Append a total function. A plain function never stops propagation.
    pub fn map<T, F>(self, f: F) -> Pipeline<I, T>
    where
        T: 'static,
        F: Fn(O) -> T + Send + Sync + 'static,
    {
        Pipeline::new(move |input| (self.run)(input).map(&f))
    }

    /// Append a stage whose input is this pipeline's output.
    pub fn then<S>(self, stage: S) -> Pipeline<I, S::Output>
    where
        S: Stage<Input = O> + Send + Sync + 'static,
        S::Output: 'static,
    {
        Pipeline::new(move |input| (self.run)(input).and_then(|out| stage.process(out)))
    }

    /// Append another pipeline. Composition is associative.
    pub fn chain<T: 'static>(self, other: Pipeline<O, T>) -> Pipeline<I, T> {
        Pipeline::new(move |input| (self.run)(input).and_then(|out| other.process(out)))
    }
}

/// Passes every value through unchanged.
pub struct IdentityStage<T> {
    _marker: PhantomData<T>,
}

impl<T> IdentityStage<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for IdentityStage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Stage for IdentityStage<T> {
    type Input = T;
    type Output = T;

    fn process(&self, input: T) -> Option<T> {
        Some(input)
    }
}

/// Drops events less severe than the configured threshold.
///
/// Severity ranks grow downward (fatal=3 ... debug=7), so an event passes
/// when its rank is at or below the threshold's. Filtered events are dropped
/// silently: no log line, no counter.
pub struct ThresholdFilter {
    threshold: Level,
}

impl ThresholdFilter {
    pub fn new(threshold: Level) -> Self {
        Self { threshold }
    }
}

impl Stage for ThresholdFilter {
    type Input = LogEvent;
    type Output = LogEvent;

    fn process(&self, event: LogEvent) -> Option<LogEvent> {
        if event.level.severity() <= self.threshold.severity() {
            Some(event)
        } else {
            None
        }
    }
}

/// Fan-out: feed each consumer pipeline a copy of the input, then run the
/// producer and return its result.
///
/// Consumers run first, in the order they were attached, and their outputs
/// are discarded. A consumer stopping internally only ends its own
/// sub-pipeline; the remaining consumers and the producer still run.
pub struct Branch<I, O> {
    consumers: Vec<Box<dyn Fn(I) + Send + Sync>>,
    producer: Pipeline<I, O>,
}

impl<I: Clone + 'static, O: 'static> Branch<I, O> {
    /// Start a branch around the pipeline whose result is passed downstream.
    pub fn new(producer: Pipeline<I, O>) -> Self {
        Self {
            consumers: Vec::new(),
            producer,
        }
    }

    /// Attach a side pipeline. Attachment order is execution order.
    pub fn consumer<C: 'static>(mut self, consumer: Pipeline<I, C>) -> Self {
        self.consumers.push(Box::new(move |input| {
            let _ = consumer.process(input);
        }));
        self
    }
}

impl<I: Clone + 'static, O: 'static> Stage for Branch<I, O> {
    type Input = I;
    type Output = O;

    fn process(&self, input: I) -> Option<O> {
        for consumer in &self.consumers {
            consumer(input.clone());
        }
        self.producer.process(input)
    }
}
