//! `driver`
//!
//! A G-code driver is a configuration plus a dialect to write moves in and
//! a transport to deliver the finished program over.

use std::{
    fmt,
    io::{self, Write},
};

use crate::{
    config::DriverConfig,
    gcode::{Grbl, MotionDialect, MotionState},
    job::{Job, JobArtifact, VectorCommand},
    properties::{PropertyError, PropertyValue},
    upload::{parse_upload_url, OctoPrintUpload, Transport, UploadError},
};

/// The name of the OctoPrint + GRBL driver, as shown to the user.
pub const MODEL_NAME: &str = "OctoPrint+Grbl Gcode Driver";

/// Errors that can occur when sending a job.
#[derive(Debug)]
pub enum SendJobError {
    /// The program could not be written.
    Emit(io::Error),
    /// The job name can't be used as a filename in the upload form.
    InvalidFilename(String),
    /// The program could not be delivered.
    Upload(UploadError),
}

impl fmt::Display for SendJobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendJobError::Emit(err) => write!(f, "error while emitting G-code: {err}"),
            SendJobError::InvalidFilename(filename) => {
                write!(f, "filename {filename:?} contains a quote or line break")
            }
            SendJobError::Upload(err) => write!(f, "error during upload: {err}"),
        }
    }
}

impl std::error::Error for SendJobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendJobError::Emit(err) => Some(err),
            SendJobError::InvalidFilename(_) => None,
            SendJobError::Upload(err) => Some(err),
        }
    }
}

impl From<io::Error> for SendJobError {
    fn from(err: io::Error) -> Self {
        SendJobError::Emit(err)
    }
}

impl From<UploadError> for SendJobError {
    fn from(err: UploadError) -> Self {
        SendJobError::Upload(err)
    }
}

/// A G-code driver.
#[derive(Debug, Clone)]
pub struct Driver<D, T> {
    /// The settings for jobs sent with this driver.
    config: DriverConfig,
    /// How moves are written.
    dialect: D,
    /// How programs are delivered.
    transport: T,
}

/// A GRBL controller whose jobs are uploaded through OctoPrint.
pub type OctoPrintGrbl = Driver<Grbl, OctoPrintUpload>;

impl OctoPrintGrbl {
    /// Creates an OctoPrint + GRBL driver with the default configuration.
    #[must_use]
    pub fn octoprint_grbl() -> Self {
        Driver::new(DriverConfig::default(), Grbl, OctoPrintUpload)
    }
}

impl Default for OctoPrintGrbl {
    fn default() -> Self {
        Self::octoprint_grbl()
    }
}

impl<D: MotionDialect, T: Transport> Driver<D, T> {
    /// Creates a new [`Driver`].
    ///
    /// # Arguments
    /// * `config`: The settings for jobs.
    /// * `dialect`: How moves are written.
    /// * `transport`: How programs are delivered.
    pub fn new(config: DriverConfig, dialect: D, transport: T) -> Self {
        Driver {
            config,
            dialect,
            transport,
        }
    }

    /// Gets the driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Gets the driver configuration for changing.
    pub fn config_mut(&mut self) -> &mut DriverConfig {
        &mut self.config
    }

    /// Gets the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the names of every property of this driver.
    pub fn property_keys(&self) -> Vec<&'static str> {
        DriverConfig::property_keys()
    }

    /// Reads a property by name.
    ///
    /// # Errors
    /// See [`DriverConfig::property`].
    pub fn property(&self, key: &str) -> Result<PropertyValue, PropertyError> {
        self.config.property(key)
    }

    /// Changes a property by name.
    ///
    /// # Errors
    /// See [`DriverConfig::set_property`].
    pub fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<(), PropertyError> {
        self.config.set_property(key, value)
    }

    /// Takes a copy of this driver to run one job with.
    ///
    /// Changes made to either copy afterwards are not seen by the other.
    #[must_use]
    pub fn snapshot(&self) -> Self
    where
        D: Clone,
        T: Clone,
    {
        self.clone()
    }

    /// Writes the complete program for a job.
    ///
    /// # Arguments
    /// * `job`: The job to write.
    /// * `out`: Where to write the program.
    ///
    /// # Errors
    /// Any error from writing to `out`.
    pub fn write_job(&self, job: &Job, out: &mut dyn Write) -> io::Result<()> {
        let mut state = MotionState::default();

        for line in self.dialect.pre_job(&self.config.pre_job_gcode) {
            writeln!(out, "{line}")?;
        }

        for part in &job.parts {
            for command in &part.commands {
                match *command {
                    VectorCommand::MoveTo { x, y } => self.dialect.rapid(
                        out,
                        &mut state,
                        &self.config,
                        x,
                        y,
                        part.resolution,
                    )?,
                    VectorCommand::LineTo { x, y } => self.dialect.cut(
                        out,
                        &mut state,
                        &self.config,
                        x,
                        y,
                        part.resolution,
                    )?,
                    VectorCommand::SetPower(power) => state.requested_power = power,
                    VectorCommand::SetSpeed(speed) => state.requested_speed = speed,
                }
            }
        }

        for line in self.dialect.post_job(&self.config.post_job_gcode) {
            writeln!(out, "{line}")?;
        }

        out.flush()
    }

    /// Generates the program for a job.
    ///
    /// # Arguments
    /// * `job`: The job to generate.
    ///
    /// # Errors
    /// [`SendJobError::InvalidFilename`] if the job name contains `"` or a line break,
    /// [`SendJobError::Emit`] if the program could not be written.
    pub fn build_artifact(&self, job: &Job) -> Result<JobArtifact, SendJobError> {
        let filename = job.filename();
        if filename.contains(['"', '\r', '\n']) {
            return Err(SendJobError::InvalidFilename(filename));
        }

        let mut payload: Vec<u8> = Vec::new();
        self.write_job(job, &mut payload)?;
        let payload = String::from_utf8(payload)
            .map_err(|err| SendJobError::Emit(io::Error::new(io::ErrorKind::InvalidData, err)))?;
        Ok(JobArtifact::new(payload, filename))
    }

    /// Delivers a finished program and asks for it to be started.
    ///
    /// # Arguments
    /// * `artifact`: The program to deliver.
    ///
    /// # Errors
    /// [`SendJobError::Upload`] if the program was not accepted.
    pub fn upload(&self, artifact: &JobArtifact) -> Result<(), SendJobError> {
        let url = parse_upload_url(&self.config.upload_url)?;
        self.transport.upload(&url, artifact, &self.config)?;
        self.transport.play(artifact.filename())?;
        Ok(())
    }

    /// Generates the program for a job and delivers it.
    ///
    /// The program is only sent once it is complete.
    ///
    /// # Arguments
    /// * `job`: The job to send.
    ///
    /// # Errors
    /// A [`SendJobError`] if the program could not be written or was not accepted.
    pub fn send_job(&self, job: &Job) -> Result<(), SendJobError> {
        let artifact = self.build_artifact(job)?;
        log::info!(
            "Sending job {:?} ({} lines)",
            job.name,
            artifact.payload().lines().count()
        );
        self.upload(&artifact).map_err(|err| {
            log::error!("Failed to send job {:?}: {err}", job.name);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use reqwest::Url;

    use super::*;
    use crate::job::JobPart;

    /// Transport that remembers what it was asked to do.
    #[derive(Default)]
    struct Recorder {
        /// Uploaded `(url, artifact)` pairs.
        uploads: RefCell<Vec<(Url, JobArtifact)>>,
        /// Filenames passed to `play`.
        played: RefCell<Vec<String>>,
        /// Status to fail uploads with, if any.
        fail_with: Option<reqwest::StatusCode>,
    }

    impl Transport for Recorder {
        fn upload(
            &self,
            url: &Url,
            artifact: &JobArtifact,
            _config: &DriverConfig,
        ) -> Result<(), UploadError> {
            self.uploads
                .borrow_mut()
                .push((url.clone(), artifact.clone()));
            match self.fail_with {
                Some(status) => Err(UploadError::UnexpectedStatus(status)),
                None => Ok(()),
            }
        }

        fn play(&self, filename: &str) -> Result<(), UploadError> {
            self.played.borrow_mut().push(filename.to_string());
            Ok(())
        }
    }

    /// A square with one rapid in and one rapid home.
    fn square() -> Job {
        Job {
            name: "square".to_string(),
            parts: vec![JobPart {
                resolution: 500.0,
                commands: vec![
                    VectorCommand::MoveTo { x: 500.0, y: 500.0 },
                    VectorCommand::SetPower(50.0),
                    VectorCommand::SetSpeed(50.0),
                    VectorCommand::LineTo { x: 1000.0, y: 500.0 },
                    VectorCommand::LineTo {
                        x: 1000.0,
                        y: 1000.0,
                    },
                    VectorCommand::MoveTo { x: 0.0, y: 0.0 },
                ],
            }],
        }
    }

    /// Generates the program text for a job.
    fn program<D: MotionDialect, T: Transport>(driver: &Driver<D, T>, job: &Job) -> String {
        driver
            .build_artifact(job)
            .expect("writing to memory can't fail")
            .payload()
            .to_string()
    }

    #[test]
    fn test_program() {
        let driver = OctoPrintGrbl::octoprint_grbl();
        insta::assert_snapshot!(program(&driver, &square()).trim_end(), @r"
G21
G90
M3
G0 X25.400000 Y25.400000 S0
G1 X50.800000 Y25.400000 S0.500000 F600
G1 X50.800000 Y50.800000
G0 X0.000000 Y0.000000 S0
M5
G0 X0 Y0
");
    }

    #[test]
    fn test_framing_with_empty_sequences() {
        let mut driver = OctoPrintGrbl::octoprint_grbl();
        driver.config_mut().pre_job_gcode.clear();
        driver.config_mut().post_job_gcode = vec!["G0 X0 Y0".to_string()];

        let program = program(&driver, &square());
        let lines: Vec<&str> = program.lines().collect();

        let laser_on = lines.iter().position(|l| *l == "M3").expect("M3 missing");
        let first_move = lines
            .iter()
            .position(|l| l.starts_with("G0") || l.starts_with("G1"))
            .expect("no moves");
        assert!(laser_on < first_move, "M3 comes before any move");

        assert_eq!(lines[lines.len() - 2..], ["M5", "G0 X0 Y0"], "M5 before going home");
    }

    #[test]
    fn test_flip_twice_is_identical() {
        let mut driver = OctoPrintGrbl::octoprint_grbl();
        let original = program(&driver, &square());

        driver
            .set_property("Flip X Axis", true.into())
            .expect("flip x is settable");
        let flipped = program(&driver, &square());
        assert_ne!(flipped, original, "flipping changes the program");

        driver
            .set_property("Flip X Axis", false.into())
            .expect("flip x is settable");
        assert_eq!(program(&driver, &square()), original);
    }

    #[test]
    fn test_rapids_never_carry_power() {
        let driver = OctoPrintGrbl::octoprint_grbl();
        for line in program(&driver, &square()).lines() {
            if line.starts_with("G0 ") && line.contains(" S") {
                assert!(line.ends_with(" S0"), "rapid with power: {line}");
            }
        }
    }

    #[test]
    fn test_api_key_not_in_program() {
        let mut driver = OctoPrintGrbl::octoprint_grbl();
        driver
            .set_property("OctoPrint API key", "SECRETKEY".into())
            .expect("API key is settable");
        assert!(!program(&driver, &square()).contains("SECRETKEY"));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut driver = OctoPrintGrbl::octoprint_grbl();
        let snapshot = driver.snapshot();

        driver
            .set_property("OctoPrint API key", "changed".into())
            .expect("API key is settable");
        driver.config_mut().pre_job_gcode.push("G28".to_string());

        assert_eq!(snapshot.config(), &DriverConfig::default());
        assert_ne!(driver.config(), snapshot.config());
    }

    #[test]
    fn test_send_job_uploads_once_then_plays() {
        let driver = Driver::new(DriverConfig::default(), Grbl, Recorder::default());
        driver.send_job(&square()).expect("recorder accepts");

        let uploads = driver.transport().uploads.borrow();
        assert_eq!(uploads.len(), 1, "exactly one upload");
        let (url, artifact) = &uploads[0];
        assert_eq!(url.as_str(), "http://octopi.local/api/files/local");
        assert_eq!(artifact.filename(), "square.gcode");
        assert!(artifact.payload().starts_with("G21\nG90\nM3\n"), "framed");
        assert_eq!(*driver.transport().played.borrow(), ["square.gcode"]);
    }

    #[test]
    fn test_names_that_would_break_the_form() {
        let driver = Driver::new(DriverConfig::default(), Grbl, Recorder::default());
        for name in [
            "logo\"\r\nContent-Type: text/html\r\n\r\nx",
            "quoted \"logo\"",
            "two\nlines",
            "carriage\rreturn",
        ] {
            let job = Job {
                name: name.to_string(),
                ..square()
            };
            assert!(
                matches!(
                    driver.build_artifact(&job),
                    Err(SendJobError::InvalidFilename(_))
                ),
                "{name:?} should be rejected"
            );
            assert!(driver.send_job(&job).is_err(), "{name:?} should not be sent");
        }
        assert!(driver.transport().uploads.borrow().is_empty(), "nothing sent");

        let job = Job {
            name: "logo (v2) 'final'".to_string(),
            ..square()
        };
        let artifact = driver.build_artifact(&job).expect("ordinary names are fine");
        assert_eq!(artifact.filename(), "logo (v2) 'final'.gcode");
    }

    #[test]
    fn test_send_job_failures() {
        let driver = Driver::new(
            DriverConfig::default(),
            Grbl,
            Recorder {
                fail_with: Some(reqwest::StatusCode::OK),
                ..Default::default()
            },
        );
        let err = driver.send_job(&square()).expect_err("200 is not 201");
        assert!(matches!(
            err,
            SendJobError::Upload(UploadError::UnexpectedStatus(reqwest::StatusCode::OK))
        ));
        assert!(err.to_string().starts_with("error during upload"), "{err}");
        assert!(driver.transport().played.borrow().is_empty(), "not played");

        let config = DriverConfig {
            upload_url: "not a url".to_string(),
            ..Default::default()
        };
        let driver = Driver::new(config, Grbl, Recorder::default());
        assert!(matches!(
            driver.send_job(&square()),
            Err(SendJobError::Upload(UploadError::InvalidUrl { .. }))
        ));
        assert!(driver.transport().uploads.borrow().is_empty(), "nothing sent");
    }
}
