//! `octogrbl`
//!
//! Generates G-code for GRBL laser cutters and hands it to an OctoPrint
//! print host, which stores the job and optionally starts it.

pub mod config;
pub mod driver;
pub mod gcode;
pub mod job;
pub mod properties;
pub mod units;
pub mod upload;

pub use config::DriverConfig;
pub use driver::{Driver, OctoPrintGrbl, SendJobError, MODEL_NAME};
pub use job::{Job, JobArtifact, JobPart, VectorCommand};
pub use properties::{Property, PropertyError, PropertyValue};
pub use upload::{OctoPrintUpload, Transport, UploadError};
