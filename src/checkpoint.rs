use crate::common::*;

/// How checkpoints accumulate in the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// A single `model.ot`, overwritten on every save.
    Rolling,
    /// One `model-<iteration>.ot` per save.
    Versioned,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self::Rolling
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    policy: CheckpointPolicy,
}

impl CheckpointWriter {
    pub fn new<P>(dir: P, policy: CheckpointPolicy) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            dir: dir.as_ref().to_owned(),
            policy,
        }
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    pub fn path_for(&self, iteration: usize) -> PathBuf {
        match self.policy {
            CheckpointPolicy::Rolling => self.dir.join("model.ot"),
            CheckpointPolicy::Versioned => self.dir.join(format!("model-{:0>8}.ot", iteration)),
        }
    }

    /// Writes `vs` next to the destination and renames it into place, so an interrupted
    /// write never clobbers the previous checkpoint.
    pub fn save(&self, vs: &VarStore, iteration: usize) -> Fallible<PathBuf> {
        let path = self.path_for(iteration);
        let tmp_path = path.with_extension("ot.tmp");

        vs.save(&tmp_path)
            .with_context(|| format!("failed to write checkpoint {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "failed to move checkpoint {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        debug!("saved checkpoint {}", path.display());
        Ok(path)
    }
}

pub fn load<P>(vs: &mut VarStore, path: P) -> Fallible<()>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    vs.load(path)
        .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_store(value: f64) -> VarStore {
        let vs = VarStore::new(Device::Cpu);
        let _ = vs.root().var("weight", &[2, 2], nn::Init::Const(value));
        vs
    }

    fn weight(vs: &VarStore) -> f64 {
        vs.variables()["weight"].mean(Kind::Float).double_value(&[])
    }

    #[test]
    fn rolling_checkpoint_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::new(dir.path(), CheckpointPolicy::Rolling);

        let first = writer.save(&var_store(1.0), 0).unwrap();
        let second = writer.save(&var_store(2.0), 100).unwrap();
        assert_eq!(first, second);

        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);

        let mut restored = var_store(0.0);
        load(&mut restored, &second).unwrap();
        assert_eq!(weight(&restored), 2.0);
    }

    #[test]
    fn versioned_checkpoints_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::new(dir.path(), CheckpointPolicy::Versioned);

        writer.save(&var_store(1.0), 0).unwrap();
        writer.save(&var_store(2.0), 100).unwrap();

        let mut names = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["model-00000000.ot", "model-00000100.ot"]);
    }

    #[test]
    fn failed_write_keeps_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::new(dir.path(), CheckpointPolicy::Rolling);
        let path = writer.save(&var_store(1.0), 0).unwrap();

        let missing = CheckpointWriter::new(dir.path().join("missing"), CheckpointPolicy::Rolling);
        assert!(missing.save(&var_store(3.0), 1).is_err());

        let mut restored = var_store(0.0);
        load(&mut restored, &path).unwrap();
        assert_eq!(weight(&restored), 1.0);
    }
}
