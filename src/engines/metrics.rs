use {
    super::Phase,
    anyhow::{
        Context,
        Result,
    },
    polars::prelude::{
        DataFrame,
        NamedFrom,
        ParquetWriter,
        Series,
    },
    std::{
        fs::File,
        path::Path,
    },
    tracing::warn,
};


/// What one training or evaluation iteration achieved.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub phase: Phase,
    // Mean over instances of the unscaled reward summed over the rollout.
    pub mean_return: f32,
    pub successes: usize,
    pub buffer_len: usize,
    pub updates: usize,
    // Loss means over this iteration's updates, NaN if there were none.
    pub q1_loss: f32,
    pub q2_loss: f32,
    pub policy_loss: f32,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsLog {
    records: Vec<IterationRecord>,
}

impl MetricsLog {
    pub fn record(
        &mut self,
        record: IterationRecord,
    ) {
        warn!(
            "iteration {} ({}): mean return {:.3}, {} successes, buffer {}, {} updates, q1 {:.4}, q2 {:.4}, policy {:.4}",
            record.iteration,
            record.phase,
            record.mean_return,
            record.successes,
            record.buffer_len,
            record.updates,
            record.q1_loss,
            record.q2_loss,
            record.policy_loss,
        );
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One row per iteration.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let column_u64 = |f: fn(&IterationRecord) -> usize| {
            self.records.iter().map(|r| f(r) as u64).collect::<Vec<u64>>()
        };
        let column_f32 = |f: fn(&IterationRecord) -> f32| {
            self.records.iter().map(f).collect::<Vec<f32>>()
        };
        let phases: Vec<String> = self.records.iter().map(|r| r.phase.to_string()).collect();

        Ok(DataFrame::new(vec![
            Series::new("iteration", &column_u64(|r: &IterationRecord| r.iteration)),
            Series::new("phase", &phases),
            Series::new("mean_return", &column_f32(|r: &IterationRecord| r.mean_return)),
            Series::new("successes", &column_u64(|r: &IterationRecord| r.successes)),
            Series::new("buffer_len", &column_u64(|r: &IterationRecord| r.buffer_len)),
            Series::new("updates", &column_u64(|r: &IterationRecord| r.updates)),
            Series::new("q1_loss", &column_f32(|r: &IterationRecord| r.q1_loss)),
            Series::new("q2_loss", &column_f32(|r: &IterationRecord| r.q2_loss)),
            Series::new("policy_loss", &column_f32(|r: &IterationRecord| r.policy_loss)),
        ])?)
    }

    pub fn write_parquet(
        &self,
        path: &Path,
    ) -> Result<()> {
        let mut df = self.to_dataframe()?;
        ParquetWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )
        .finish(&mut df)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        polars::prelude::{
            ParquetReader,
            SerReader,
        },
        tempfile::tempdir,
    };

    fn record(iteration: usize) -> IterationRecord {
        IterationRecord {
            iteration,
            phase: if iteration == 0 { Phase::Warmup } else { Phase::Online },
            mean_return: iteration as f32,
            successes: 0,
            buffer_len: 10 * iteration,
            updates: iteration,
            q1_loss: 0.5,
            q2_loss: 0.25,
            policy_loss: -1.0,
        }
    }

    #[test]
    fn one_row_per_iteration() {
        let mut log = MetricsLog::default();
        (0..3).for_each(|i| log.record(record(i)));

        let df = log.to_dataframe().unwrap();
        assert_eq!(df.shape(), (3, 9));
        assert_eq!(log.records()[2], record(2));
    }

    #[test]
    fn parquet_file_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.parquet");
        let mut log = MetricsLog::default();
        (0..4).for_each(|i| log.record(record(i)));
        log.write_parquet(&path).unwrap();

        let df = ParquetReader::new(File::open(&path).unwrap()).finish().unwrap();
        assert_eq!(df.height(), 4);
        assert_eq!(df.get_column_names()[2], "mean_return");
    }
}
