use crate::{common::*, objective::LossRecord};

/// Flat key/value record sent to an experiment tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub iter: usize,
    #[serde(flatten)]
    pub losses: LossRecord,
}

/// Fire-and-forget metrics sink. Failures are reported by the sink itself and never
/// reach the training loop.
pub trait MetricsSink {
    fn log(&mut self, record: &MetricsRecord);
}

/// Appends one JSON object per record to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open metrics file {}", path.display()))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    fn write(&mut self, record: &MetricsRecord) -> Fallible<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl MetricsSink for JsonLinesSink {
    fn log(&mut self, record: &MetricsRecord) {
        if let Err(err) = self.write(record) {
            warn!(
                "failed to write metrics to {}: {:?}",
                self.path.display(),
                err
            );
        }
    }
}
