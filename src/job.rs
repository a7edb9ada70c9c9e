//! `job`
//!
//! The motion primitives that make up a job, and the finished program that
//! gets handed to the print host.

use serde::{Deserialize, Serialize};

/// A single instruction from the geometry pipeline.
///
/// Coordinates are in pixels at the resolution of the enclosing [`JobPart`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorCommand {
    /// Travel to a point without cutting.
    MoveTo {
        /// Horizontal position, in pixels.
        x: f64,
        /// Vertical position, in pixels.
        y: f64,
    },
    /// Cut in a straight line to a point.
    LineTo {
        /// Horizontal position, in pixels.
        x: f64,
        /// Vertical position, in pixels.
        y: f64,
    },
    /// Set the laser power for following cuts, as a percentage.
    SetPower(f64),
    /// Set the speed for following cuts, as a percentage of the maximum speed.
    SetSpeed(f64),
}

/// A run of commands sharing a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPart {
    /// Pixels per inch of every coordinate in `commands`.
    pub resolution: f64,
    /// The commands, in the order they must be executed.
    pub commands: Vec<VectorCommand>,
}

/// A design that has been broken down into ordered motion primitives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The name of the job, used to derive the uploaded filename.
    pub name: String,
    /// The parts of the job, in order.
    pub parts: Vec<JobPart>,
}

impl Job {
    /// The filename suggested to the print host for this job.
    ///
    /// # Returns
    /// The job name with a `.gcode` extension, or `job.gcode` for an unnamed job.
    #[must_use]
    pub fn filename(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            "job.gcode".to_string()
        } else {
            format!("{name}.gcode")
        }
    }
}

/// A complete G-code program ready to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArtifact {
    /// The full program text.
    payload: String,
    /// The filename to store the program under on the host.
    filename: String,
}

impl JobArtifact {
    /// Creates a new [`JobArtifact`].
    ///
    /// # Arguments
    /// * `payload`: The program text.
    /// * `filename`: The filename to suggest to the print host. Not escaped; must not contain `"` or line breaks.
    #[must_use]
    pub fn new(payload: String, filename: String) -> Self {
        JobArtifact { payload, filename }
    }

    /// Gets the program text.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Gets the filename to suggest to the print host.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename() {
        let mut job = Job {
            name: "York Hackspace Logo".to_string(),
            parts: vec![],
        };
        assert_eq!(job.filename(), "York Hackspace Logo.gcode");

        job.name = "   ".to_string();
        assert_eq!(job.filename(), "job.gcode", "blank name");
    }

    #[test]
    fn test_job_from_json() {
        let job: Job = serde_json::from_str(
            r#"{
                "name": "square",
                "parts": [{
                    "resolution": 500.0,
                    "commands": [
                        {"move_to": {"x": 0.0, "y": 0.0}},
                        {"set_power": 80.0},
                        {"line_to": {"x": 100.0, "y": 0.0}}
                    ]
                }]
            }"#,
        )
        .expect("failed to parse job");

        assert_eq!(
            job.parts[0].commands,
            vec![
                VectorCommand::MoveTo { x: 0.0, y: 0.0 },
                VectorCommand::SetPower(80.0),
                VectorCommand::LineTo { x: 100.0, y: 0.0 },
            ]
        );
    }
}
