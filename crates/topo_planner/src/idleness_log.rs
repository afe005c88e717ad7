//! Idleness statistics written once, at shutdown.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::destinations::DestinationStats;
use crate::PlannerResult;

#[derive(Debug, Serialize)]
pub struct IdlenessReport {
    pub run_id: Uuid,
    pub environment: String,
    pub robots: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub destinations: Vec<DestinationReport>,
}

#[derive(Debug, Serialize)]
pub struct DestinationReport {
    pub name: String,
    pub visits: usize,
    pub samples: Vec<f64>,
    pub mean_idleness: Option<f64>,
    pub max_idleness: Option<f64>,
    pub final_idleness: f64,
}

impl From<&DestinationStats> for DestinationReport {
    fn from(stats: &DestinationStats) -> Self {
        let visits = stats.samples.len();
        let mean_idleness = (visits > 0).then(|| stats.samples.iter().sum::<f64>() / visits as f64);
        let max_idleness = stats.samples.iter().copied().reduce(f64::max);
        Self {
            name: stats.name.clone(),
            visits,
            samples: stats.samples.clone(),
            mean_idleness,
            max_idleness,
            final_idleness: stats.final_idleness,
        }
    }
}

pub struct IdlenessLogger {
    dump_dir: PathBuf,
    environment: String,
    robots: usize,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl IdlenessLogger {
    pub fn new(dump_dir: impl Into<PathBuf>, environment: impl Into<String>, robots: usize) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            environment: environment.into(),
            robots,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn report(&self, stats: &[DestinationStats], elapsed: Duration) -> IdlenessReport {
        IdlenessReport {
            run_id: self.run_id,
            environment: self.environment.clone(),
            robots: self.robots,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: elapsed.as_secs_f64(),
            destinations: stats.iter().map(DestinationReport::from).collect(),
        }
    }

    /// `idleness_<environment>_<n>robots_<start timestamp>.json`
    pub fn file_name(&self) -> String {
        format!(
            "idleness_{}_{}robots_{}.json",
            self.environment,
            self.robots,
            self.started_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Writes the report into the dump directory, creating it if needed.
    /// Returns the path of the written file.
    pub fn write(&self, stats: &[DestinationStats], elapsed: Duration) -> PlannerResult<PathBuf> {
        fs::create_dir_all(&self.dump_dir)?;
        let path = self.dump_dir.join(self.file_name());
        write_report(&path, &self.report(stats, elapsed))?;
        tracing::info!(path = %path.display(), run_id = %self.run_id, "Idleness statistics saved");
        Ok(path)
    }
}

fn write_report(path: &Path, report: &IdlenessReport) -> PlannerResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    Ok(())
}
