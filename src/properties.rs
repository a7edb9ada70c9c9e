//! `properties`
//!
//! Exposes a [`DriverConfig`] to the host application as a set of named
//! properties.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DriverConfig;

/// Settings the host application can read and change on this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// [`DriverConfig::bed_width`].
    BedWidth,
    /// [`DriverConfig::bed_height`].
    BedHeight,
    /// [`DriverConfig::flip_x`].
    FlipX,
    /// [`DriverConfig::flip_y`].
    FlipY,
    /// [`DriverConfig::upload_url`].
    UploadUrl,
    /// [`DriverConfig::autoplay`].
    Autoplay,
    /// [`DriverConfig::max_speed`].
    MaxSpeed,
    /// [`DriverConfig::pre_job_gcode`].
    PreJobGcode,
    /// [`DriverConfig::post_job_gcode`].
    PostJobGcode,
    /// [`DriverConfig::blank_laser_during_rapids`].
    BlankLaserDuringRapids,
    /// [`DriverConfig::spindle_max`].
    SpindleMax,
    /// [`DriverConfig::api_key`].
    ApiKey,
}

/// Every property, in the order the host application should show them.
pub const PROPERTIES: [Property; 12] = [
    Property::BedWidth,
    Property::BedHeight,
    Property::FlipX,
    Property::FlipY,
    Property::UploadUrl,
    Property::Autoplay,
    Property::MaxSpeed,
    Property::PreJobGcode,
    Property::PostJobGcode,
    Property::BlankLaserDuringRapids,
    Property::SpindleMax,
    Property::ApiKey,
];

/// Properties of a generic G-code driver that make no sense when uploading over HTTP.
pub const HIDDEN_PROPERTIES: [&str; 10] = [
    "IP/Hostname",
    "COM Port",
    "Baud Rate (Serial)",
    "Lineend (CR,LF,CRLF)",
    "Board Identification String (startsWith)",
    "Wait for OK after each line (interactive mode)",
    "Travel (non-cutting) speed (in mm/min)",
    "Seconds to wait for board reset (Serial)",
    "Milliseconds to wait for response",
    "Upload method",
];

impl Property {
    /// Gets the name the host application knows this property by.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Property::BedWidth => "Laserbed width",
            Property::BedHeight => "Laserbed height",
            Property::FlipX => "Flip X Axis",
            Property::FlipY => "Flip Y Axis",
            Property::UploadUrl => "HTTP Upload URL",
            Property::Autoplay => "Start immediately",
            Property::MaxSpeed => "Max speed (in mm/min)",
            Property::PreJobGcode => "Pre-Job GCode (comma separated)",
            Property::PostJobGcode => "Post-Job GCode (comma separated)",
            Property::BlankLaserDuringRapids => "Force laser off during G0 moves",
            Property::SpindleMax => "S value for 100% laser power",
            Property::ApiKey => "OctoPrint API key",
        }
    }

    /// Looks up a property by name.
    ///
    /// # Arguments
    /// * `key`: The name of the property.
    ///
    /// # Returns
    /// The property, or `None` if this driver has no property of that name.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        PROPERTIES.into_iter().find(|property| property.key() == key)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The value of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// An on/off setting.
    Flag(bool),
    /// A numeric setting.
    Number(f64),
    /// A text setting.
    Text(String),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Flag(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// Errors that can occur when reading or changing a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyError {
    /// No property has this name.
    Unknown(String),
    /// A generic driver has this property, but this driver does not use it.
    NotApplicable(String),
    /// The value is the wrong kind for the property.
    WrongType {
        /// The property being set.
        property: Property,
        /// The value it was given.
        value: PropertyValue,
    },
    /// The value is the right kind but not allowed.
    Invalid {
        /// The property being set.
        property: Property,
        /// Why the value isn't allowed.
        reason: String,
    },
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyError::Unknown(key) => write!(f, "unknown property {key:?}"),
            PropertyError::NotApplicable(key) => {
                write!(f, "property {key:?} does not apply to HTTP upload")
            }
            PropertyError::WrongType { property, value } => {
                write!(f, "property {:?} can't be set to {value:?}", property.key())
            }
            PropertyError::Invalid { property, reason } => {
                write!(f, "invalid value for property {:?}: {reason}", property.key())
            }
        }
    }
}

impl std::error::Error for PropertyError {}

/// Splits comma separated G-code into lines, dropping empty items.
fn split_gcode(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Resolves a property name, telling hidden generic properties apart from unknown ones.
fn resolve(key: &str) -> Result<Property, PropertyError> {
    Property::from_key(key).ok_or_else(|| {
        if HIDDEN_PROPERTIES.contains(&key) {
            PropertyError::NotApplicable(key.to_string())
        } else {
            PropertyError::Unknown(key.to_string())
        }
    })
}

/// Reads a flag, accepting `"true"` and `"false"` as text.
fn as_flag(property: Property, value: PropertyValue) -> Result<bool, PropertyError> {
    match value {
        PropertyValue::Flag(flag) => Ok(flag),
        PropertyValue::Text(text) => {
            let flag = match text.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            };
            flag.ok_or(PropertyError::WrongType {
                property,
                value: PropertyValue::Text(text),
            })
        }
        PropertyValue::Number(_) => Err(PropertyError::WrongType { property, value }),
    }
}

/// Reads a strictly positive number, accepting it as text.
fn as_positive_number(property: Property, value: PropertyValue) -> Result<f64, PropertyError> {
    let number = match value {
        PropertyValue::Number(number) => number,
        PropertyValue::Text(ref text) => text
            .trim()
            .parse()
            .map_err(|_| PropertyError::WrongType {
                property,
                value: value.clone(),
            })?,
        PropertyValue::Flag(_) => return Err(PropertyError::WrongType { property, value }),
    };

    if number.is_finite() && number > 0.0 {
        Ok(number)
    } else {
        Err(PropertyError::Invalid {
            property,
            reason: format!("{number} is not a positive number"),
        })
    }
}

/// Reads text.
fn as_text(property: Property, value: PropertyValue) -> Result<String, PropertyError> {
    match value {
        PropertyValue::Text(text) => Ok(text),
        value => Err(PropertyError::WrongType { property, value }),
    }
}

impl DriverConfig {
    /// Gets the names of every property this driver exposes.
    #[must_use]
    pub fn property_keys() -> Vec<&'static str> {
        PROPERTIES.into_iter().map(Property::key).collect()
    }

    /// Reads a property by name.
    ///
    /// # Arguments
    /// * `key`: The name of the property.
    ///
    /// # Errors
    /// A [`PropertyError`] if this driver has no such property.
    pub fn property(&self, key: &str) -> Result<PropertyValue, PropertyError> {
        Ok(match resolve(key)? {
            Property::BedWidth => self.bed_width.into(),
            Property::BedHeight => self.bed_height.into(),
            Property::FlipX => self.flip_x.into(),
            Property::FlipY => self.flip_y.into(),
            Property::UploadUrl => self.upload_url.clone().into(),
            Property::Autoplay => self.autoplay.into(),
            Property::MaxSpeed => self.max_speed.into(),
            Property::PreJobGcode => self.pre_job_gcode.join(",").into(),
            Property::PostJobGcode => self.post_job_gcode.join(",").into(),
            Property::BlankLaserDuringRapids => self.blank_laser_during_rapids.into(),
            Property::SpindleMax => self.spindle_max.into(),
            Property::ApiKey => self.api_key.clone().into(),
        })
    }

    /// Changes a property by name.
    ///
    /// # Arguments
    /// * `key`: The name of the property.
    /// * `value`: The new value.
    ///
    /// # Errors
    /// A [`PropertyError`] if this driver has no such property or the value doesn't suit it.
    /// The configuration is unchanged on error.
    pub fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<(), PropertyError> {
        let property = resolve(key)?;
        match property {
            Property::BedWidth => self.bed_width = as_positive_number(property, value)?,
            Property::BedHeight => self.bed_height = as_positive_number(property, value)?,
            Property::FlipX => self.flip_x = as_flag(property, value)?,
            Property::FlipY => self.flip_y = as_flag(property, value)?,
            Property::UploadUrl => self.upload_url = as_text(property, value)?.trim().to_string(),
            Property::Autoplay => self.autoplay = as_flag(property, value)?,
            Property::MaxSpeed => self.max_speed = as_positive_number(property, value)?,
            Property::PreJobGcode => self.pre_job_gcode = split_gcode(&as_text(property, value)?),
            Property::PostJobGcode => {
                self.post_job_gcode = split_gcode(&as_text(property, value)?);
            }
            Property::BlankLaserDuringRapids => {
                self.blank_laser_during_rapids = as_flag(property, value)?;
            }
            Property::SpindleMax => self.spindle_max = as_positive_number(property, value)?,
            Property::ApiKey => self.api_key = as_text(property, value)?,
        }
        Ok(())
    }
}
