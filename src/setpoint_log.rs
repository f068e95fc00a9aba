use std::{fs::File, io::Write, path::Path};

use anyhow::Result;

use crate::scheduler::PlaybackTick;
use crate::trajectory::Waypoint;

/// Writes one CSV row per emitted setpoint.
pub struct SetpointCsvWriter {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

impl SetpointCsvWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Self::from_writer(Box::new(file))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record([
            "tick", "elapsed", "index", "pos_n", "pos_e", "pos_d", "yaw", "vel_n", "vel_e",
            "vel_d", "yaw_rate",
        ])?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, tick: &PlaybackTick, waypoint: &Waypoint) -> Result<()> {
        let position = &waypoint.position;
        let velocity = &waypoint.velocity;
        self.writer.write_record(&[
            format!("{}", tick.tick),
            format!("{}", tick.elapsed),
            format!("{}", tick.index),
            format!("{}", position.north_m),
            format!("{}", position.east_m),
            format!("{}", position.down_m),
            format!("{}", position.yaw_deg),
            format!("{}", velocity.north_m_s),
            format!("{}", velocity.east_m_s),
            format!("{}", velocity.down_m_s),
            format!("{}", velocity.yaw_rate_deg_s),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
