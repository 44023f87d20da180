use adain_rs::{
    common::*,
    config::Config,
    dataset::{DataStore, StyleContentDataset},
    model::Encoder,
    tracker::JsonLinesSink,
    train::TrainerInit,
};

lazy_static::lazy_static! {
    static ref SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
}

/// Train an arbitrary style transfer decoder with adaptive instance normalization.
#[derive(FromArgs)]
struct Args {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
}

fn main() -> Fallible<()> {
    pretty_env_logger::init();

    // Set signal handler
    ctrlc::set_handler(|| {
        warn!("Interrupted by user, stopping after the current iteration");
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    })?;

    // Parse arguments
    let args: Args = argh::from_env();

    // load config
    let config = Config::open(&args.config)?;
    let device = config.training.device;
    info!("using device {:?}", device);

    if let Some(seed) = config.training.seed {
        tch::manual_seed(seed as i64);
    }

    // init output dir
    fs::create_dir_all(&config.logging.output_dir)?;

    // Load dataset
    info!("Loading dataset");
    let (mut datastore, mut preview_datastore) = {
        let dataset = &config.dataset;

        let train_dataset = StyleContentDataset::open(
            &dataset.style_dir,
            &dataset.content_dir,
            dataset.image_size,
        )?;
        let preview_dataset = StyleContentDataset::open(
            dataset.preview_dir.join("style"),
            dataset.preview_dir.join("content"),
            dataset.image_size,
        )?;
        let preview_size = preview_dataset.len();

        let datastore = DataStore::new(
            train_dataset,
            config.training.batch_size.get(),
            true,
            device,
            config.training.seed,
        );
        let preview_datastore =
            DataStore::new(preview_dataset, preview_size, false, device, config.training.seed);
        (datastore, preview_datastore)
    };

    // init model
    let encoder = Encoder::new(device, Some(&config.model.encoder_weights))?;
    let mut trainer = TrainerInit::from_config(&config).build(encoder)?;
    if let Some(path) = &config.logging.metrics_file {
        trainer = trainer.with_sink(JsonLinesSink::create(path)?);
    }

    info!(
        "training from iteration {} to {}, {:?} checkpoints in {}",
        trainer.start_iteration(),
        config.training.max_iter,
        trainer.checkpoint_policy(),
        config.logging.output_dir.display()
    );
    trainer.run(
        &mut datastore,
        Some(&mut preview_datastore),
        &SHUTDOWN_FLAG,
    )?;

    info!("finished after {} iterations", trainer.history().len());
    Ok(())
}
