//! Pixel-to-data calibration.
//!
//! This module provides the [`Calibrator`] struct, which turns pixel coordinates
//! picked from a chart image into data-space values. Two modes are supported:
//!
//! - **Linear**: an independent scale-and-offset map per axis ([`AxisMap`]),
//!   fitted from two X-axis and two Y-axis control points.
//! - **Perspective**: a single [`Homography`] fitted from four corner
//!   correspondences, for photographed or skewed charts.
//!
//! Either axis may be logarithmic. Log axes are fitted in `log10` space and
//! mapped back with `10^x` after the transform.
//!
//! A few numeric edge cases are handled softly instead of failing:
//!
//! - a pixel delta with magnitude below [`MIN_PIXEL_DELTA`] is clamped to it
//!   ([`clamp_pixel_delta`]);
//! - a non-positive value on a log axis is used as-is ([`linearize`]);
//! - a log-axis result too large for `f64` becomes `+inf` ([`delinearize`]).

use crate::geometry::{GeometryError, Homography, CORRESPONDENCE_COUNT};
use log::{debug, info, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

/// Number of control point pairs both calibration modes require.
pub const CONTROL_POINT_COUNT: usize = CORRESPONDENCE_COUNT;

/// Smallest pixel delta used when fitting a linear axis.
pub const MIN_PIXEL_DELTA: f64 = 1e-5;

/// `log10(f64::MAX)`; larger exponents overflow when delinearized.
pub const MAX_LOG10: f64 = 308.254_715_559_916_7;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error(
        "Need exactly 4 control point pairs, got {pixel_count} pixel and {value_count} value points"
    )]
    Configuration {
        pixel_count: usize,
        value_count: usize,
    },
    #[error("Degenerate calibration geometry: {0}")]
    DegenerateGeometry(String),
    #[error("Invalid calibration parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CalibrationError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<GeometryError> for CalibrationError {
    fn from(err: GeometryError) -> Self {
        CalibrationError::DegenerateGeometry(err.to_string())
    }
}

/// Which kind of transform a [`Calibrator`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    Linear,
    Perspective,
}

/// Per-axis affine map `value = offset + pixel * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisMap {
    pub scale: f64,
    pub offset: f64,
}

impl AxisMap {
    /// `value = pixel`.
    pub const IDENTITY: AxisMap = AxisMap {
        scale: 1.0,
        offset: 0.0,
    };

    /// Fits the map through `(px1, val1)` and `(px2, val2)`.
    ///
    /// The pixel delta goes through [`clamp_pixel_delta`], so coincident pixel
    /// positions give a very steep but finite scale instead of a division by zero.
    /// The returned flag is set when that clamp was applied.
    pub fn fit(px1: f64, px2: f64, val1: f64, val2: f64) -> (Self, bool) {
        let (delta, clamped) = clamp_pixel_delta(px2 - px1);
        let scale = (val2 - val1) / delta;
        let map = AxisMap {
            scale,
            offset: val1 - px1 * scale,
        };
        (map, clamped)
    }

    pub fn apply(&self, pixel: f64) -> f64 {
        self.offset + pixel * self.scale
    }

    /// Pixel position of a (linearized) value; non-finite for a zero scale.
    pub fn invert(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}

impl Default for AxisMap {
    fn default() -> Self {
        AxisMap::IDENTITY
    }
}

/// The fitted transform, in linear (not yet delogged) value space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Linear { x: AxisMap, y: AxisMap },
    Perspective(Homography),
}

impl Transform {
    pub fn mode(&self) -> CalibrationMode {
        match self {
            Transform::Linear { .. } => CalibrationMode::Linear,
            Transform::Perspective(_) => CalibrationMode::Perspective,
        }
    }

    /// Applies the transform without undoing any log scaling.
    pub fn apply(&self, px: f64, py: f64) -> Point2<f64> {
        match self {
            Transform::Linear { x, y } => Point2::new(x.apply(px), y.apply(py)),
            Transform::Perspective(h) => h.apply(px, py),
        }
    }

    /// Maps a linear-space value back to its pixel position.
    ///
    /// A homography without an inverse gives `NaN` for both coordinates.
    pub fn invert(&self, x: f64, y: f64) -> Point2<f64> {
        match self {
            Transform::Linear { x: map_x, y: map_y } => {
                Point2::new(map_x.invert(x), map_y.invert(y))
            }
            Transform::Perspective(h) => match h.inverse() {
                Some(inverse) => inverse.apply(x, y),
                None => Point2::new(f64::NAN, f64::NAN),
            },
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::Linear {
            x: AxisMap::IDENTITY,
            y: AxisMap::IDENTITY,
        }
    }
}

/// Clamps a pixel delta whose magnitude is below [`MIN_PIXEL_DELTA`] to
/// `±MIN_PIXEL_DELTA`, keeping its sign (zero clamps to the positive side).
///
/// Returns the delta to use and whether it was clamped.
pub fn clamp_pixel_delta(delta: f64) -> (f64, bool) {
    if delta.abs() < MIN_PIXEL_DELTA {
        (MIN_PIXEL_DELTA.copysign(delta), true)
    } else {
        (delta, false)
    }
}

/// Moves a value into the space the transform is fitted in.
///
/// On a log axis a strictly positive value becomes `log10(value)`. Zero and
/// negative values have no logarithm and pass through unchanged.
pub fn linearize(value: f64, log_scale: bool) -> f64 {
    if log_scale && value > 0.0 {
        value.log10()
    } else {
        value
    }
}

/// Inverse of [`linearize`] for mapped values: `10^value` on a log axis.
///
/// Exponents above [`MAX_LOG10`] saturate to `f64::INFINITY`.
pub fn delinearize(value: f64, log_scale: bool) -> f64 {
    if !log_scale {
        return value;
    }
    if value > MAX_LOG10 {
        return f64::INFINITY;
    }
    10f64.powf(value)
}

/// Axis readings typed in for the calibration points.
///
/// `x1`/`x2` are the values at the two X-axis points, `y1`/`y2` at the two
/// Y-axis points. In perspective mode `y2` is the top edge and `y1` the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisValues {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl AxisValues {
    /// Value points for [`Calibrator::set_linear_calibration`]:
    /// `[(x1, 0), (x2, 0), (0, y1), (0, y2)]`.
    pub fn linear_points(&self) -> [Point2<f64>; CONTROL_POINT_COUNT] {
        [
            Point2::new(self.x1, 0.0),
            Point2::new(self.x2, 0.0),
            Point2::new(0.0, self.y1),
            Point2::new(0.0, self.y2),
        ]
    }

    /// Value corners for [`Calibrator::set_perspective_calibration`] in
    /// top-left, top-right, bottom-right, bottom-left order.
    pub fn perspective_corners(&self) -> [Point2<f64>; CONTROL_POINT_COUNT] {
        [
            Point2::new(self.x1, self.y2),
            Point2::new(self.x2, self.y2),
            Point2::new(self.x2, self.y1),
            Point2::new(self.x1, self.y1),
        ]
    }
}

/// Persisted form of a [`Calibrator`].
///
/// Only the control points and flags are stored; the transform is re-fitted on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDocument {
    pub pixel_points: Vec<[f64; 2]>,
    pub graph_points: Vec<[f64; 2]>,
    pub is_log_x: bool,
    pub is_log_y: bool,
    pub is_perspective: bool,
}

/// Maps pixel coordinates to data values.
///
/// A fresh calibrator is uncalibrated and maps every pixel to itself. Each
/// `set_*_calibration` call replaces the whole state, or leaves it untouched
/// when it fails.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point2;
/// use plot_digitizer::calibration::Calibrator;
///
/// let pixels = [
///     Point2::new(100.0, 200.0),
///     Point2::new(300.0, 200.0),
///     Point2::new(100.0, 200.0),
///     Point2::new(100.0, 100.0),
/// ];
/// let values = [
///     Point2::new(1.0, 0.0),
///     Point2::new(100.0, 0.0),
///     Point2::new(1.0, 0.0),
///     Point2::new(1.0, 1.0),
/// ];
///
/// let mut calibrator = Calibrator::new();
/// calibrator
///     .set_linear_calibration(&pixels, &values, true, false)
///     .unwrap();
///
/// let data = calibrator.map_pixel_to_data(200.0, 150.0);
/// assert!((data.x - 10.0).abs() < 1e-9);
/// assert!((data.y - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Calibrator {
    pixel_points: Vec<Point2<f64>>,
    value_points: Vec<Point2<f64>>,
    log_x: bool,
    log_y: bool,
    transform: Transform,
}

impl Calibrator {
    /// Creates an uncalibrated calibrator (identity mapping).
    pub fn new() -> Self {
        Self::default()
    }

    /// Fits a per-axis linear calibration.
    ///
    /// Points 0 and 1 define the X axis through their X components; points 2
    /// and 3 define the Y axis through their Y components. The other component
    /// of each point is ignored.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::Configuration`] unless exactly 4 pixel and 4 value
    ///   points are given. The previous calibration is kept in that case.
    pub fn set_linear_calibration(
        &mut self,
        pixel_points: &[Point2<f64>],
        value_points: &[Point2<f64>],
        log_x: bool,
        log_y: bool,
    ) -> Result<(), CalibrationError> {
        let (pixels, values) = control_points(pixel_points, value_points)?;

        let val_x1 = linearize_logged(values[0].x, log_x, "X");
        let val_x2 = linearize_logged(values[1].x, log_x, "X");
        let val_y1 = linearize_logged(values[2].y, log_y, "Y");
        let val_y2 = linearize_logged(values[3].y, log_y, "Y");

        let (px_x1, px_x2) = (pixels[0].x, pixels[1].x);
        let (px_y1, px_y2) = (pixels[2].y, pixels[3].y);
        let (x, x_clamped) = AxisMap::fit(px_x1, px_x2, val_x1, val_x2);
        let (y, y_clamped) = AxisMap::fit(px_y1, px_y2, val_y1, val_y2);
        let clamps = [
            ("X", x_clamped, px_x2 - px_x1),
            ("Y", y_clamped, px_y2 - px_y1),
        ];
        for (axis, clamped, delta) in clamps {
            if clamped {
                warn!("{axis} axis pixel delta {delta} is below {MIN_PIXEL_DELTA}; clamping");
            }
        }

        info!(
            "Linear calibration: x = {} + px * {}, y = {} + py * {} (log_x: {}, log_y: {})",
            x.offset, x.scale, y.offset, y.scale, log_x, log_y
        );

        self.replace(pixels, values, log_x, log_y, Transform::Linear { x, y });
        Ok(())
    }

    /// Fits a perspective calibration from four corner correspondences.
    ///
    /// Corner order is free as long as `pixel_points[i]` and `value_points[i]`
    /// describe the same corner; inconsistent winding is not detected.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::Configuration`] unless exactly 4 pixel and 4 value points are given.
    /// * [`CalibrationError::DegenerateGeometry`] if the corners cannot define a homography
    ///   (three of them collinear, or a singular system).
    ///
    /// The previous calibration is kept on any error.
    pub fn set_perspective_calibration(
        &mut self,
        pixel_points: &[Point2<f64>],
        value_points: &[Point2<f64>],
        log_x: bool,
        log_y: bool,
    ) -> Result<(), CalibrationError> {
        let (pixels, values) = control_points(pixel_points, value_points)?;

        let linear_values = values.map(|v| {
            Point2::new(
                linearize_logged(v.x, log_x, "X"),
                linearize_logged(v.y, log_y, "Y"),
            )
        });

        let homography = Homography::from_correspondences(&pixels, &linear_values)?;
        info!(
            "Perspective calibration (log_x: {}, log_y: {}): H = {}",
            log_x,
            log_y,
            homography.matrix()
        );

        self.replace(
            pixels,
            values,
            log_x,
            log_y,
            Transform::Perspective(homography),
        );
        Ok(())
    }

    /// Maps a pixel position to data values using the current calibration.
    ///
    /// Log axes are delinearized with [`delinearize`], so an overflowing result
    /// is `+inf` rather than an error. In perspective mode a pixel on the
    /// homography's line at infinity maps to `NaN`.
    pub fn map_pixel_to_data(&self, px: f64, py: f64) -> Point2<f64> {
        let linear = self.transform.apply(px, py);
        Point2::new(
            delinearize(linear.x, self.log_x),
            delinearize(linear.y, self.log_y),
        )
    }

    /// Maps a run of integer pixel points, preserving order.
    pub fn map_points(&self, pixels: &[Point2<i32>]) -> Vec<Point2<f64>> {
        pixels
            .iter()
            .map(|p| self.map_pixel_to_data(p.x as f64, p.y as f64))
            .collect()
    }

    /// Maps data values back to the pixel position they would be read from,
    /// e.g. to overlay a series on its image.
    ///
    /// Log axes are linearized with [`linearize`] first, so non-positive values
    /// on a log axis are used as they are.
    pub fn map_data_to_pixel(&self, x: f64, y: f64) -> Point2<f64> {
        self.transform
            .invert(linearize(x, self.log_x), linearize(y, self.log_y))
    }

    /// Whether a calibration has been set since creation.
    pub fn is_calibrated(&self) -> bool {
        !self.pixel_points.is_empty()
    }

    pub fn mode(&self) -> CalibrationMode {
        self.transform.mode()
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn pixel_points(&self) -> &[Point2<f64>] {
        &self.pixel_points
    }

    pub fn value_points(&self) -> &[Point2<f64>] {
        &self.value_points
    }

    pub fn log_x(&self) -> bool {
        self.log_x
    }

    pub fn log_y(&self) -> bool {
        self.log_y
    }

    /// Control points and flags in their persisted form.
    pub fn to_document(&self) -> CalibrationDocument {
        CalibrationDocument {
            pixel_points: self.pixel_points.iter().map(|p| [p.x, p.y]).collect(),
            graph_points: self.value_points.iter().map(|p| [p.x, p.y]).collect(),
            is_log_x: self.log_x,
            is_log_y: self.log_y,
            is_perspective: self.mode() == CalibrationMode::Perspective,
        }
    }

    /// Rebuilds a calibrator by re-running the matching setup call.
    ///
    /// A document with no control points at all yields an uncalibrated calibrator.
    ///
    /// # Errors
    ///
    /// Whatever the setup call returns for the stored points.
    pub fn from_document(doc: &CalibrationDocument) -> Result<Self, CalibrationError> {
        let mut calibrator = Calibrator::new();
        if doc.pixel_points.is_empty() && doc.graph_points.is_empty() {
            debug!("Calibration document has no control points; staying uncalibrated");
            return Ok(calibrator);
        }

        let pixels = to_points(&doc.pixel_points);
        let values = to_points(&doc.graph_points);
        if doc.is_perspective {
            calibrator.set_perspective_calibration(&pixels, &values, doc.is_log_x, doc.is_log_y)?;
        } else {
            calibrator.set_linear_calibration(&pixels, &values, doc.is_log_x, doc.is_log_y)?;
        }
        Ok(calibrator)
    }

    /// Loads a calibration profile from a YAML file.
    ///
    /// Expected layout:
    ///
    /// ```yaml
    /// calibration:
    ///   mode: linear        # or perspective
    ///   log_x: false
    ///   log_y: false
    ///   pixel_points: [[50, 250], [450, 250], [50, 250], [50, 50]]
    ///   value_points: [[0, 0], [10, 0], [0, 0], [0, 1]]
    /// ```
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] if the YAML cannot be parsed.
    /// * [`CalibrationError::InvalidParams`] for missing or mistyped fields.
    /// * Any error of the setup call for the loaded points.
    ///
    /// # Related
    /// * [`Calibrator::save_to_yaml()`]
    pub fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs.first().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML file has no documents".to_string())
        })?;
        let node = &doc["calibration"];

        let mode = node["mode"].as_str().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'mode' or not a string".to_string())
        })?;
        let log_x = node["log_x"].as_bool().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'log_x' or not a boolean".to_string())
        })?;
        let log_y = node["log_y"].as_bool().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'log_y' or not a boolean".to_string())
        })?;
        let pixel_points = yaml_points(&node["pixel_points"], "pixel_points")?;
        let value_points = yaml_points(&node["value_points"], "value_points")?;

        let mut calibrator = Calibrator::new();
        match mode {
            "linear" => {
                calibrator.set_linear_calibration(&pixel_points, &value_points, log_x, log_y)?
            }
            "perspective" => {
                calibrator.set_perspective_calibration(&pixel_points, &value_points, log_x, log_y)?
            }
            other => {
                return Err(CalibrationError::InvalidParams(format!(
                    "Unknown calibration mode '{other}', expected 'linear' or 'perspective'"
                )))
            }
        }

        info!("Loaded {:?} calibration profile from {}", calibrator.mode(), path);
        Ok(calibrator)
    }

    /// Saves the control points and flags as a YAML calibration profile.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if the calibrator is not calibrated.
    /// * [`CalibrationError::YamlError`] if serialization fails.
    /// * [`CalibrationError::IOError`] if the file cannot be written.
    ///
    /// # Related
    /// * [`Calibrator::load_from_yaml()`]
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        if !self.is_calibrated() {
            return Err(CalibrationError::InvalidParams(
                "Cannot save an uncalibrated profile".to_string(),
            ));
        }

        let doc = self.to_document();
        let yaml = serde_yaml::Value::Mapping(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("calibration".to_string()),
            serde_yaml::Value::Mapping(serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("mode".to_string()),
                    serde_yaml::to_value(self.mode())
                        .map_err(|e| CalibrationError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("log_x".to_string()),
                    serde_yaml::Value::Bool(self.log_x),
                ),
                (
                    serde_yaml::Value::String("log_y".to_string()),
                    serde_yaml::Value::Bool(self.log_y),
                ),
                (
                    serde_yaml::Value::String("pixel_points".to_string()),
                    serde_yaml::to_value(&doc.pixel_points)
                        .map_err(|e| CalibrationError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("value_points".to_string()),
                    serde_yaml::to_value(&doc.graph_points)
                        .map_err(|e| CalibrationError::YamlError(e.to_string()))?,
                ),
            ])),
        )]));

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CalibrationError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        info!("Saved {:?} calibration profile to {}", self.mode(), path);
        Ok(())
    }

    fn replace(
        &mut self,
        pixels: [Point2<f64>; CONTROL_POINT_COUNT],
        values: [Point2<f64>; CONTROL_POINT_COUNT],
        log_x: bool,
        log_y: bool,
        transform: Transform,
    ) {
        self.pixel_points = pixels.to_vec();
        self.value_points = values.to_vec();
        self.log_x = log_x;
        self.log_y = log_y;
        self.transform = transform;
    }
}

/// Checks the control point count and copies both sets into fixed arrays.
fn control_points(
    pixel_points: &[Point2<f64>],
    value_points: &[Point2<f64>],
) -> Result<
    (
        [Point2<f64>; CONTROL_POINT_COUNT],
        [Point2<f64>; CONTROL_POINT_COUNT],
    ),
    CalibrationError,
> {
    let count_error = || CalibrationError::Configuration {
        pixel_count: pixel_points.len(),
        value_count: value_points.len(),
    };
    let pixels: [Point2<f64>; CONTROL_POINT_COUNT] =
        pixel_points.try_into().map_err(|_| count_error())?;
    let values: [Point2<f64>; CONTROL_POINT_COUNT] =
        value_points.try_into().map_err(|_| count_error())?;
    Ok((pixels, values))
}

fn linearize_logged(value: f64, log_scale: bool, axis: &str) -> f64 {
    if log_scale && value <= 0.0 {
        warn!("Log {axis} axis value {value} is not positive; using it unlogged");
    }
    linearize(value, log_scale)
}

fn to_points(raw: &[[f64; 2]]) -> Vec<Point2<f64>> {
    raw.iter().map(|p| Point2::new(p[0], p[1])).collect()
}

fn yaml_number(value: &Yaml) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

fn yaml_points(node: &Yaml, field: &str) -> Result<Vec<Point2<f64>>, CalibrationError> {
    let items = node.as_vec().ok_or_else(|| {
        CalibrationError::InvalidParams(format!("YAML missing '{field}' or not an array"))
    })?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let invalid = || {
                CalibrationError::InvalidParams(format!(
                    "Invalid {field}[{i}]: expected a pair of numbers"
                ))
            };
            let pair = item.as_vec().ok_or_else(invalid)?;
            if pair.len() != 2 {
                return Err(invalid());
            }
            let x = yaml_number(&pair[0]).ok_or_else(invalid)?;
            let y = yaml_number(&pair[1]).ok_or_else(invalid)?;
            Ok(Point2::new(x, y))
        })
        .collect()
}
