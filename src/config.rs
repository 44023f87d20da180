use crate::{checkpoint::CheckpointPolicy, common::*, model::params};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = text.parse()?;
        Ok(config)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(text: &str) -> Fallible<Self> {
        let config: Self = json5::from_str(text)?;
        ensure!(
            config.training.learning_rate > 0.0,
            "learning_rate must be positive"
        );
        ensure!(
            config.training.style_weight >= 0.0,
            "style_weight must be non-negative"
        );
        ensure!(config.model.adain_eps > 0.0, "adain_eps must be positive");
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub style_dir: PathBuf,
    pub content_dir: PathBuf,
    /// Must contain `style` and `content` sub-directories.
    pub preview_dir: PathBuf,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub encoder_weights: PathBuf,
    #[serde(default = "default_adain_eps")]
    pub adain_eps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(
        serialize_with = "serialize_device",
        deserialize_with = "deserialize_device",
        default = "default_device"
    )]
    pub device: Device,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    pub style_weight: f64,
    pub seed: Option<u64>,
    pub resume_from: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_logging_interval")]
    pub logging_interval: NonZeroUsize,
    #[serde(default = "default_preview_interval")]
    pub preview_interval: NonZeroUsize,
    #[serde(default)]
    pub checkpoint_policy: CheckpointPolicy,
    #[serde(default = "default_preview_capacity")]
    pub preview_capacity: NonZeroUsize,
    pub metrics_file: Option<PathBuf>,
}

fn default_image_size() -> u32 {
    params::IMAGE_SIZE
}

fn default_adain_eps() -> f64 {
    params::ADAIN_EPS
}

fn default_learning_rate() -> f64 {
    params::LEARNING_RATE
}

fn default_max_iter() -> usize {
    params::MAX_ITER
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(params::BATCH_SIZE).unwrap()
}

fn default_logging_interval() -> NonZeroUsize {
    NonZeroUsize::new(params::LOGGING_INTERVAL).unwrap()
}

fn default_preview_interval() -> NonZeroUsize {
    NonZeroUsize::new(params::PREVIEW_INTERVAL).unwrap()
}

fn default_preview_capacity() -> NonZeroUsize {
    NonZeroUsize::new(params::PREVIEW_CAPACITY).unwrap()
}

fn default_device() -> Device {
    Device::cuda_if_available()
}

fn serialize_device<S>(device: &Device, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = match device {
        Device::Cpu => "cpu".into(),
        Device::Cuda(n) => format!("cuda({})", n),
        other => format!("{:?}", other).to_lowercase(),
    };
    text.serialize(serializer)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<Device, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    parse_device(&name).map_err(D::Error::custom)
}

pub fn parse_device(name: &str) -> Result<Device, String> {
    let device = match name {
        "cpu" => Device::Cpu,
        "mps" => Device::Mps,
        "cuda" => Device::Cuda(0),
        _ => {
            let prefix = "cuda(";
            let suffix = ")";
            if name.starts_with(prefix) && name.ends_with(suffix) {
                let number: usize = name[(prefix.len())..(name.len() - suffix.len())]
                    .parse()
                    .map_err(|_err| format!("invalid device name {}", name))?;
                Device::Cuda(number)
            } else {
                return Err(format!("invalid device name {}", name));
            }
        }
    };
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
        // image folders
        dataset: {
            style_dir: "data/style",
            content_dir: "data/content",
            preview_dir: "data/preview",
        },
        model: {
            encoder_weights: "weights/vgg19.safetensors",
        },
        training: {
            device: "cpu",
            max_iter: 500,
            style_weight: 10.0,
            seed: 42,
        },
        logging: {
            output_dir: "outputs",
            checkpoint_policy: "versioned",
            metrics_file: "outputs/metrics.jsonl",
        },
    }"#;

    #[test]
    fn parse_example_config() {
        let config = EXAMPLE.parse::<Config>().unwrap();

        assert_eq!(config.dataset.image_size, 256);
        assert_eq!(config.model.adain_eps, params::ADAIN_EPS);
        assert_eq!(config.training.device, Device::Cpu);
        assert_eq!(config.training.learning_rate, 1e-4);
        assert_eq!(config.training.max_iter, 500);
        assert_eq!(config.training.batch_size.get(), 8);
        assert_eq!(config.training.style_weight, 10.0);
        assert_eq!(config.training.seed, Some(42));
        assert_eq!(config.training.resume_from, None);
        assert_eq!(config.logging.logging_interval.get(), 100);
        assert_eq!(config.logging.preview_interval.get(), 1000);
        assert_eq!(config.logging.checkpoint_policy, CheckpointPolicy::Versioned);
        assert_eq!(config.logging.preview_capacity.get(), 16);
    }

    #[test]
    fn style_weight_is_required() {
        let text = EXAMPLE.replace("style_weight: 10.0,", "");
        assert!(text.parse::<Config>().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let text = EXAMPLE.replace(
            r#"output_dir: "outputs","#,
            r#"output_dir: "outputs", logging_interval: 0,"#,
        );
        assert!(text.parse::<Config>().is_err());
    }

    #[test]
    fn parse_device_names() {
        assert_eq!(parse_device("cpu").unwrap(), Device::Cpu);
        assert_eq!(parse_device("cuda(1)").unwrap(), Device::Cuda(1));
        assert!(parse_device("cuda(x)").is_err());
        assert!(parse_device("tpu").is_err());
    }
}
