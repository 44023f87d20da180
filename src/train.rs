use crate::{
    checkpoint::{self, CheckpointPolicy, CheckpointWriter},
    common::*,
    config::Config,
    dataset::{BatchSource, StyleContentBatch},
    model::{Encoder, StyleTransferInit, StyleTransferModel, StyleTransferOutput},
    objective::{LossRecord, StyleTransferLoss},
    preview,
    tracker::{MetricsRecord, MetricsSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainState {
    Init,
    Running,
    Checkpointed,
    Previewed,
    Done,
}

#[derive(Debug, Clone)]
pub struct TrainerInit {
    pub model: StyleTransferInit,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub style_weight: f64,
    pub logging_interval: NonZeroUsize,
    pub preview_interval: NonZeroUsize,
    pub preview_capacity: usize,
    pub output_dir: PathBuf,
    pub checkpoint_policy: CheckpointPolicy,
    pub resume_from: Option<PathBuf>,
}

impl TrainerInit {
    pub fn from_config(config: &Config) -> Self {
        let Config {
            model, training, logging, ..
        } = config;

        Self {
            model: StyleTransferInit {
                adain_eps: model.adain_eps,
                ..Default::default()
            },
            learning_rate: training.learning_rate,
            max_iter: training.max_iter,
            style_weight: training.style_weight,
            logging_interval: logging.logging_interval,
            preview_interval: logging.preview_interval,
            preview_capacity: logging.preview_capacity.get(),
            output_dir: logging.output_dir.clone(),
            checkpoint_policy: logging.checkpoint_policy,
            resume_from: training.resume_from.clone(),
        }
    }

    pub fn build(self, encoder: Encoder) -> Fallible<Trainer> {
        let Self {
            model: model_init,
            learning_rate,
            max_iter,
            style_weight,
            logging_interval,
            preview_interval,
            preview_capacity,
            output_dir,
            checkpoint_policy,
            resume_from,
        } = self;

        let device = encoder.device();
        let encoder_params = encoder.num_parameters();
        let eps = model_init.adain_eps;

        let mut vs = VarStore::new(device);
        let model = model_init.build(encoder, vs.root());

        let start_iteration = match &resume_from {
            Some(path) => {
                checkpoint::load(&mut vs, path)?;
                let iteration = model.iteration() as usize + 1;
                info!(
                    "resumed from {}, starting at iteration {}",
                    path.display(),
                    iteration
                );
                iteration
            }
            None => 0,
        };

        let decoder_params: i64 = vs
            .trainable_variables()
            .iter()
            .map(|tensor| tensor.numel() as i64)
            .sum();
        info!(
            "encoder: {} frozen parameters, decoder: {} trainable parameters",
            encoder_params, decoder_params
        );

        let optimizer = Adam::default().build(&vs, learning_rate)?;

        Ok(Trainer {
            vs,
            model,
            optimizer,
            loss_fn: StyleTransferLoss::new(style_weight, eps),
            checkpoint: CheckpointWriter::new(&output_dir, checkpoint_policy),
            sink: None,
            history: vec![],
            state: TrainState::Init,
            device,
            start_iteration,
            last_iteration: None,
            max_iter,
            logging_interval: logging_interval.get(),
            preview_interval: preview_interval.get(),
            preview_capacity,
            output_dir,
        })
    }
}

/// Drives the decoder optimization.
///
/// The optimizer is built over the trainer's own variable store, which only holds the
/// decoder and the iteration buffer. The encoder keeps its frozen store to itself.
pub struct Trainer {
    vs: VarStore,
    model: StyleTransferModel,
    optimizer: nn::Optimizer,
    loss_fn: StyleTransferLoss,
    checkpoint: CheckpointWriter,
    sink: Option<Box<dyn MetricsSink>>,
    history: Vec<LossRecord>,
    state: TrainState,
    device: Device,
    start_iteration: usize,
    last_iteration: Option<usize>,
    max_iter: usize,
    logging_interval: usize,
    preview_interval: usize,
    preview_capacity: usize,
    output_dir: PathBuf,
}

impl Trainer {
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: MetricsSink + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Runs one optimization step on a batch drawn from `source`.
    pub fn step(&mut self, source: &mut dyn BatchSource) -> Fallible<LossRecord> {
        self.state = TrainState::Running;

        let StyleContentBatch { style, content } = source.get()?;
        let style = style.to_device(self.device);
        let content = content.to_device(self.device);

        let StyleTransferOutput {
            target,
            style_snapshot,
            output_features,
            output_snapshot,
            ..
        } = self.model.forward_t(&content, &style, true)?;

        let losses = self.loss_fn.compute(
            &output_features,
            &target,
            &output_snapshot,
            &style_snapshot,
        )?;
        let record = losses.record();
        ensure!(record.is_finite(), "non-finite loss {:?}", record);

        self.optimizer.zero_grad();
        losses.loss.backward();
        self.optimizer.step();

        self.history.push(record);
        Ok(record)
    }

    /// Trains until `max_iter` or until `shutdown` is raised between two iterations,
    /// then writes the final checkpoint and the loss history.
    pub fn run(
        &mut self,
        source: &mut dyn BatchSource,
        mut preview_source: Option<&mut dyn BatchSource>,
        shutdown: &AtomicBool,
    ) -> Fallible<()> {
        let global_instant = Instant::now();
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create output dir {}", self.output_dir.display())
        })?;

        for iteration in self.start_iteration..self.max_iter {
            if shutdown.load(Ordering::SeqCst) {
                warn!("interrupted before iteration {}", iteration);
                break;
            }

            let step_instant = Instant::now();
            let record = self
                .step(source)
                .with_context(|| format!("training step {} failed", iteration))?;
            self.last_iteration = Some(iteration);
            debug!(
                "iter: {}\tstep_elapsed: {}ms\tloss: {:.5}",
                iteration,
                step_instant.elapsed().as_millis(),
                record.loss
            );

            if iteration % self.logging_interval == 0 {
                info!(
                    "iter: {}\tglobal_elapsed: {}s\tloss: {:.5}\tcontent_loss: {:.5}\tstyle_loss: {:.5}",
                    iteration,
                    global_instant.elapsed().as_secs(),
                    record.loss,
                    record.content_loss,
                    record.style_loss,
                );
                if let Some(sink) = self.sink.as_mut() {
                    sink.log(&MetricsRecord {
                        iter: iteration,
                        losses: record,
                    });
                }

                if let Err(err) = self.save_checkpoint(iteration) {
                    error!("checkpoint at iteration {} failed: {:?}", iteration, err);
                }
            }

            if iteration % self.preview_interval == 0 {
                if let Some(preview_source) = preview_source.as_deref_mut() {
                    if let Err(err) = self.preview(iteration, preview_source) {
                        warn!("preview at iteration {} failed: {:?}", iteration, err);
                    }
                }
            }
        }

        // the buffer holds the last completed iteration, so a fresh run stopped before
        // its first step has nothing to record
        let final_iteration = self
            .last_iteration
            .or_else(|| self.start_iteration.checked_sub(1));
        match final_iteration {
            Some(iteration) => {
                let path = self.save_checkpoint(iteration)?;
                info!("saved final checkpoint {}", path.display());
            }
            None => warn!("no iteration completed, skipping the final checkpoint"),
        }

        self.save_history()?;
        self.state = TrainState::Done;
        Ok(())
    }

    pub fn save_checkpoint(&mut self, iteration: usize) -> Fallible<PathBuf> {
        self.model.set_iteration(iteration);
        let path = self.checkpoint.save(&self.vs, iteration)?;
        self.state = TrainState::Checkpointed;
        Ok(path)
    }

    /// Stylizes one draw of `source` in evaluation mode and saves the triplet grid.
    pub fn preview(&mut self, iteration: usize, source: &mut dyn BatchSource) -> Fallible<PathBuf> {
        source.reshuffle();
        let StyleContentBatch { style, content } = source.get()?;
        let style = style.to_device(self.device);
        let content = content.to_device(self.device);

        let output = tch::no_grad(|| self.model.stylize(&content, &style, false))?;
        let image = preview::render_preview(&style, &content, &output, self.preview_capacity)?;

        let path = preview::preview_path(&self.output_dir, iteration);
        image
            .save(&path)
            .with_context(|| format!("failed to save preview {}", path.display()))?;
        self.state = TrainState::Previewed;
        Ok(path)
    }

    fn save_history(&self) -> Fallible<()> {
        let path = self.output_dir.join("history.json");
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, &self.history)?;
        Ok(())
    }

    pub fn model(&self) -> &StyleTransferModel {
        &self.model
    }

    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    pub fn history(&self) -> &[LossRecord] {
        &self.history
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn start_iteration(&self) -> usize {
        self.start_iteration
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        self.checkpoint.policy()
    }
}
