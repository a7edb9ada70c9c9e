//! `gcode`
//!
//! Turns motion commands into lines of G-code for a particular firmware.

use std::io::{self, Write};

use crate::{
    config::{DriverConfig, LASER_OFF, LASER_ON},
    units::{flip, px_to_mm},
};

/// What the machine was last told, so that unchanged words can be left off.
///
/// One of these lives for the duration of a single job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    /// Power requested for following cuts, as a percentage.
    pub requested_power: f64,
    /// Speed requested for following cuts, as a percentage.
    pub requested_speed: f64,
    /// The last `S` value the machine was given, if any.
    pub current_power: Option<f64>,
    /// The last feed rate the machine was given in mm/min, if any.
    ///
    /// Rapids set this to the travel speed even though GRBL ignores `F` on
    /// `G0` and keeps the previous `G1` feed, so a cut whose feed equals the
    /// travel speed will not repeat its `F` word after a rapid.
    pub current_speed: Option<f64>,
}

impl Default for MotionState {
    fn default() -> Self {
        MotionState {
            requested_power: 100.0,
            requested_speed: 100.0,
            current_power: None,
            current_speed: None,
        }
    }
}

/// A flavour of G-code understood by a family of firmware.
pub trait MotionDialect {
    /// Writes a single rapid (non-cutting) move.
    ///
    /// # Arguments
    /// * `out`: Where to write the line.
    /// * `state`: The motion state of the current job.
    /// * `config`: The driver configuration for the current job.
    /// * `x`: Target horizontal position, in pixels.
    /// * `y`: Target vertical position, in pixels.
    /// * `resolution`: Pixels per inch.
    ///
    /// # Errors
    /// Any error from writing to `out`.
    fn rapid(
        &self,
        out: &mut dyn Write,
        state: &mut MotionState,
        config: &DriverConfig,
        x: f64,
        y: f64,
        resolution: f64,
    ) -> io::Result<()>;

    /// Writes a single cutting move at the requested power and speed.
    ///
    /// # Arguments
    /// See [`MotionDialect::rapid`].
    ///
    /// # Errors
    /// Any error from writing to `out`.
    fn cut(
        &self,
        out: &mut dyn Write,
        state: &mut MotionState,
        config: &DriverConfig,
        x: f64,
        y: f64,
        resolution: f64,
    ) -> io::Result<()>;

    /// Gets the lines to send before a job.
    ///
    /// # Arguments
    /// * `configured`: The pre-job lines from the configuration.
    fn pre_job(&self, configured: &[String]) -> Vec<String> {
        configured.to_vec()
    }

    /// Gets the lines to send after a job.
    ///
    /// # Arguments
    /// * `configured`: The post-job lines from the configuration.
    fn post_job(&self, configured: &[String]) -> Vec<String> {
        configured.to_vec()
    }
}

/// Converts a pixel position into a machine position in mm, applying any flips.
///
/// # Returns
/// `(x, y)` in mm.
fn machine_position(config: &DriverConfig, x: f64, y: f64, resolution: f64) -> (f64, f64) {
    (
        flip(px_to_mm(x, resolution), config.bed_width, config.flip_x),
        flip(px_to_mm(y, resolution), config.bed_height, config.flip_y),
    )
}

/// Whether a line of G-code is the given command, ignoring case and surrounding space.
fn is_command(line: &str, command: &str) -> bool {
    line.trim().eq_ignore_ascii_case(command)
}

/// The GRBL dialect.
///
/// GRBL runs `G0` at its configured maximum rate and discards any `F` word,
/// and it does not gate the laser during `G0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grbl;

impl MotionDialect for Grbl {
    fn rapid(
        &self,
        out: &mut dyn Write,
        state: &mut MotionState,
        config: &DriverConfig,
        x: f64,
        y: f64,
        resolution: f64,
    ) -> io::Result<()> {
        let (x, y) = machine_position(config, x, y, resolution);
        state.current_speed = Some(config.travel_speed);
        if config.blank_laser_during_rapids {
            state.current_power = Some(0.0);
            writeln!(out, "G0 X{x:.6} Y{y:.6} S0")
        } else {
            writeln!(out, "G0 X{x:.6} Y{y:.6}")
        }
    }

    fn cut(
        &self,
        out: &mut dyn Write,
        state: &mut MotionState,
        config: &DriverConfig,
        x: f64,
        y: f64,
        resolution: f64,
    ) -> io::Result<()> {
        let (x, y) = machine_position(config, x, y, resolution);
        let mut line = format!("G1 X{x:.6} Y{y:.6}");

        let power = state.requested_power / 100.0 * config.spindle_max;
        if state.current_power != Some(power) {
            line.push_str(&format!(" S{power:.6}"));
            state.current_power = Some(power);
        }

        let speed = state.requested_speed / 100.0 * config.max_speed;
        if state.current_speed != Some(speed) {
            line.push_str(&format!(" F{speed:.0}"));
            state.current_speed = Some(speed);
        }

        writeln!(out, "{line}")
    }

    fn pre_job(&self, configured: &[String]) -> Vec<String> {
        let mut lines = configured.to_vec();
        if !lines.last().is_some_and(|line| is_command(line, LASER_ON)) {
            lines.push(LASER_ON.to_string());
        }
        lines
    }

    fn post_job(&self, configured: &[String]) -> Vec<String> {
        let mut lines = configured.to_vec();
        if !lines.first().is_some_and(|line| is_command(line, LASER_OFF)) {
            lines.insert(0, LASER_OFF.to_string());
        }
        lines
    }
}
