use {
    anyhow::{
        Context,
        Result,
    },
    serde::{
        de::DeserializeOwned,
        Serialize,
    },
    std::{
        fs::{
            read_to_string,
            File,
        },
        io::Write,
        path::Path,
    },
};


/// Write any serializable config as pretty RON.
pub fn write_config<C: Serialize, P: AsRef<Path>>(
    config: &C,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    File::create(path)
        .with_context(|| format!("cannot create config file {}", path.display()))?
        .write_all(
            ron::ser::to_string_pretty(
                config,
                ron::ser::PrettyConfig::default(),
            )?.as_bytes()
        )?;
    Ok(())
}

/// Read a config back from a RON file.
pub fn read_config<C: DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> Result<C> {
    let path = path.as_ref();
    let contents = read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    ron::from_str(&contents)
        .with_context(|| format!("cannot parse config file {}", path.display()))
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::configs::{
            SAC_Config,
            TrainConfig,
        },
        tempfile::tempdir,
    };

    #[test]
    fn configs_survive_a_trip_through_ron() {
        let dir = tempdir().unwrap();

        let mut train = TrainConfig::new(10, 20, 5, dir.path().join("run"));
        train.set_apply_reset(true);
        write_config(&train, dir.path().join("train.ron")).unwrap();
        let read: TrainConfig = read_config(dir.path().join("train.ron")).unwrap();
        assert_eq!(read, train);

        let sac = SAC_Config { alpha: 0.05, ..Default::default() };
        write_config(&sac, dir.path().join("sac.ron")).unwrap();
        let read: SAC_Config = read_config(dir.path().join("sac.ron")).unwrap();
        assert_eq!(read, sac);
    }

    #[test]
    fn missing_config_names_the_path() {
        let err = read_config::<TrainConfig, _>("does/not/exist.ron").unwrap_err();
        assert!(format!("{err}").contains("does/not/exist.ron"));
    }
}
