//! Plot Digitizer Library
//!
//! Pixel-to-data calibration for digitizing data series out of chart images.
//! This library provides:
//! - Linear (per-axis affine) calibration with optional base-10 log axes
//! - Perspective calibration through a four-corner homography
//! - Series bookkeeping that keeps raw pixel points next to their mapped values
//! - Project persistence (JSON), calibration profiles (YAML) and CSV export
//!
//! Point extraction from the image itself is left to the caller: anything that
//! yields pixel coordinates can feed [`Calibrator::map_pixel_to_data`].

pub mod calibration;
pub mod geometry;
pub mod project;
pub mod series;

// Re-export commonly used types
pub use calibration::{
    AxisMap, AxisValues, CalibrationDocument, CalibrationError, CalibrationMode, Calibrator,
    Transform,
};

pub use geometry::{GeometryError, Homography};

pub use project::{CsvTable, ObserverId, Project, ProjectDocument, ProjectError, ProjectEvent};

pub use series::{LineType, Series, SeriesDocument, SeriesError};
