//! `config`
//!
//! The settings for an OctoPrint-hosted GRBL laser.

use std::{fmt, fs, io, path::Path};

use serde::{Deserialize, Serialize};

/// The upload resource of an OctoPi image on the local network.
pub const DEFAULT_UPLOAD_URL: &str = "http://octopi.local/api/files/local";

/// Lines sent before every job by any G-code driver: millimetres, absolute positioning.
pub const GENERIC_PRE_JOB_GCODE: [&str; 2] = ["G21", "G90"];
/// Lines sent after every job by any G-code driver: return to the origin.
pub const GENERIC_POST_JOB_GCODE: [&str; 1] = ["G0 X0 Y0"];

/// GRBL command to enable the laser.
pub const LASER_ON: &str = "M3";
/// GRBL command to disable the laser.
pub const LASER_OFF: &str = "M5";

/// Errors that can occur while loading or saving a [`DriverConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    Io(io::Error),
    /// The file did not contain a valid configuration.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "could not access config file: {err}"),
            ConfigError::Parse(err) => write!(f, "invalid config file: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

/// Everything the driver needs to know to generate and deliver a job.
///
/// The host application mutates one of these and takes a copy of it before
/// each job, so every field is owned.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DriverConfig {
    /// Absolute URL of the print host's file upload resource.
    pub upload_url: String,
    /// Sent verbatim as the `X-Api-Key` header. May be empty.
    pub api_key: String,
    /// Whether the host should start the job as soon as it is uploaded.
    pub autoplay: bool,
    /// Whether rapid moves force the laser power to zero.
    pub blank_laser_during_rapids: bool,
    /// Whether to mirror X about the bed width.
    pub flip_x: bool,
    /// Whether to mirror Y about the bed height.
    pub flip_y: bool,
    /// Width of the bed, in mm.
    pub bed_width: f64,
    /// Height of the bed, in mm.
    pub bed_height: f64,
    /// Speed of rapid moves, in mm/min. GRBL ignores this.
    pub travel_speed: f64,
    /// Speed of a 100% speed cut, in mm/min.
    pub max_speed: f64,
    /// `S` value for 100% laser power.
    pub spindle_max: f64,
    /// Lines sent before the job.
    pub pre_job_gcode: Vec<String>,
    /// Lines sent after the job.
    pub post_job_gcode: Vec<String>,
    /// How long to wait for the print host to accept an upload, in seconds.
    pub upload_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let mut pre_job_gcode: Vec<String> =
            GENERIC_PRE_JOB_GCODE.iter().map(ToString::to_string).collect();
        pre_job_gcode.push(LASER_ON.to_string());

        // the laser must be off before returning home
        let mut post_job_gcode = vec![LASER_OFF.to_string()];
        post_job_gcode.extend(GENERIC_POST_JOB_GCODE.iter().map(ToString::to_string));

        DriverConfig {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_key: String::new(),
            autoplay: false,
            blank_laser_during_rapids: true,
            flip_x: false,
            flip_y: false,
            bed_width: 250.0,
            bed_height: 280.0,
            travel_speed: 3600.0,
            max_speed: 1200.0,
            spindle_max: 1.0,
            pre_job_gcode,
            post_job_gcode,
            upload_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("upload_url", &self.upload_url)
            .field("api_key", &"<redacted>")
            .field("autoplay", &self.autoplay)
            .field("blank_laser_during_rapids", &self.blank_laser_during_rapids)
            .field("flip_x", &self.flip_x)
            .field("flip_y", &self.flip_y)
            .field("bed_width", &self.bed_width)
            .field("bed_height", &self.bed_height)
            .field("travel_speed", &self.travel_speed)
            .field("max_speed", &self.max_speed)
            .field("spindle_max", &self.spindle_max)
            .field("pre_job_gcode", &self.pre_job_gcode)
            .field("post_job_gcode", &self.post_job_gcode)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .finish()
    }
}

impl DriverConfig {
    /// Reads a configuration from a JSON file.
    ///
    /// Fields missing from the file take their default values.
    ///
    /// # Arguments
    /// * `path`: The file to read.
    ///
    /// # Errors
    /// A [`ConfigError`] if the file can't be read or isn't a valid configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
        log::debug!("Loaded driver config from {}", path.display());
        Ok(config)
    }

    /// Writes this configuration to a JSON file, replacing it if it exists.
    ///
    /// # Arguments
    /// * `path`: The file to write.
    ///
    /// # Errors
    /// A [`ConfigError`] if the file can't be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Parse)?;
        fs::write(path, contents).map_err(ConfigError::Io)
    }
}
