//! Digitizing project: one image, one calibration, any number of series.
//!
//! [`Project`] is the aggregate the rest of an application works against. It
//! owns the [`Calibrator`] and the ordered [`Series`] list, exports them as
//! CSV, persists them as a JSON [`ProjectDocument`], and tells registered
//! observers about every mutation through a [`ProjectEvent`].
//!
//! Loading a new image drops all series and resets the calibration, since
//! control points picked on the previous image no longer apply.

use crate::calibration::{CalibrationDocument, CalibrationError, Calibrator};
use crate::series::{Series, SeriesDocument};
use log::{debug, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;

#[derive(thiserror::Error, Debug)]
pub enum ProjectError {
    #[error("Corrupt project document: {0}")]
    CorruptProject(String),
    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("CSV error: {0}")]
    CsvError(String),
}

impl From<std::io::Error> for ProjectError {
    fn from(err: std::io::Error) -> Self {
        ProjectError::IOError(err.to_string())
    }
}

impl From<csv::Error> for ProjectError {
    fn from(err: csv::Error) -> Self {
        ProjectError::CsvError(err.to_string())
    }
}

/// What changed in a [`Project`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectEvent {
    ImageChanged,
    DataCleared,
    SeriesAdded(usize),
    SeriesRemoved(usize),
    CalibrationUpdated,
    Loaded,
}

/// Handle returned by [`Project::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&ProjectEvent)>;

/// Persisted form of a [`Project`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    // Required even though it may be null.
    #[serde(deserialize_with = "Option::deserialize")]
    pub image_path: Option<String>,
    pub calibration: CalibrationDocument,
    pub series_list: Vec<SeriesDocument>,
}

/// A rectangular table of strings, ready for a CSV writer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Default)]
pub struct Project {
    image_path: Option<String>,
    calibration: Calibrator,
    series_list: Vec<Series>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("image_path", &self.image_path)
            .field("calibration", &self.calibration)
            .field("series_list", &self.series_list)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_path(&self) -> Option<&str> {
        self.image_path.as_deref()
    }

    pub fn calibration(&self) -> &Calibrator {
        &self.calibration
    }

    pub fn series_list(&self) -> &[Series] {
        &self.series_list
    }

    pub fn series(&self, index: usize) -> Option<&Series> {
        self.series_list.get(index)
    }

    /// Switches to a new image, dropping all series and the calibration.
    pub fn set_image(&mut self, path: impl Into<String>) {
        let path = path.into();
        info!("Loading image {path}; clearing series and calibration");
        self.image_path = Some(path);
        self.reset_data();
        self.notify(&ProjectEvent::ImageChanged);
    }

    /// Drops all series and resets the calibration.
    pub fn clear_data(&mut self) {
        self.reset_data();
        self.notify(&ProjectEvent::DataCleared);
    }

    /// Appends a series and returns its index.
    pub fn add_series(&mut self, series: Series) -> usize {
        debug!("Adding {series}");
        self.series_list.push(series);
        let index = self.series_list.len() - 1;
        self.notify(&ProjectEvent::SeriesAdded(index));
        index
    }

    /// Maps `pixels` with the current calibration and appends the result.
    ///
    /// An uncalibrated project maps with the identity transform.
    pub fn add_series_from_pixels(
        &mut self,
        name: impl Into<String>,
        pixels: Vec<Point2<i32>>,
    ) -> usize {
        let series = Series::from_pixels(name, pixels, &self.calibration);
        self.add_series(series)
    }

    /// Removes the series at `index`. Out-of-range indices are ignored.
    pub fn remove_series(&mut self, index: usize) -> Option<Series> {
        if index >= self.series_list.len() {
            return None;
        }
        let removed = self.series_list.remove(index);
        self.notify(&ProjectEvent::SeriesRemoved(index));
        Some(removed)
    }

    /// Sets a linear calibration and notifies observers.
    ///
    /// Existing series keep the values they were mapped with.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::Calibration`] wrapping the calibrator's error; nothing changes.
    pub fn update_calibration(
        &mut self,
        pixel_points: &[Point2<f64>],
        value_points: &[Point2<f64>],
        log_x: bool,
        log_y: bool,
    ) -> Result<(), ProjectError> {
        self.calibration
            .set_linear_calibration(pixel_points, value_points, log_x, log_y)?;
        self.notify(&ProjectEvent::CalibrationUpdated);
        Ok(())
    }

    /// Sets a perspective calibration and notifies observers.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::Calibration`] wrapping the calibrator's error; nothing changes.
    pub fn update_perspective_calibration(
        &mut self,
        pixel_points: &[Point2<f64>],
        value_points: &[Point2<f64>],
        log_x: bool,
        log_y: bool,
    ) -> Result<(), ProjectError> {
        self.calibration
            .set_perspective_calibration(pixel_points, value_points, log_x, log_y)?;
        self.notify(&ProjectEvent::CalibrationUpdated);
        Ok(())
    }

    /// Replaces the calibration with an already fitted one, e.g. a loaded profile.
    pub fn set_calibrator(&mut self, calibrator: Calibrator) {
        self.calibration = calibrator;
        self.notify(&ProjectEvent::CalibrationUpdated);
    }

    /// Wide CSV layout: a `{name}_X`, `{name}_Y` column pair per series.
    ///
    /// There are as many rows as the longest series has points; shorter
    /// series leave their cells empty. No series gives an empty table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nalgebra::Point2;
    /// use plot_digitizer::project::Project;
    ///
    /// let mut project = Project::new();
    /// project.add_series_from_pixels("a", vec![Point2::new(1, 2), Point2::new(3, 4)]);
    /// project.add_series_from_pixels("b", vec![Point2::new(5, 6)]);
    ///
    /// let table = project.csv_rows();
    /// assert_eq!(table.header, ["a_X", "a_Y", "b_X", "b_Y"]);
    /// assert_eq!(table.rows[1], ["3", "4", "", ""]);
    /// ```
    pub fn csv_rows(&self) -> CsvTable {
        if self.series_list.is_empty() {
            return CsvTable::default();
        }

        let header = self
            .series_list
            .iter()
            .flat_map(|s| [format!("{}_X", s.name), format!("{}_Y", s.name)])
            .collect();

        let max_len = self.series_list.iter().map(Series::len).max().unwrap_or(0);
        let rows = (0..max_len)
            .map(|i| {
                self.series_list
                    .iter()
                    .flat_map(|s| match s.data_points().get(i) {
                        Some(p) => [p.x.to_string(), p.y.to_string()],
                        None => [String::new(), String::new()],
                    })
                    .collect::<Vec<String>>()
            })
            .collect();

        CsvTable { header, rows }
    }

    /// Long CSV layout: `series,X,Y` with one row per point, series in order.
    pub fn long_csv_rows(&self) -> CsvTable {
        if self.series_list.is_empty() {
            return CsvTable::default();
        }

        let rows = self
            .series_list
            .iter()
            .flat_map(|s| {
                s.data_points()
                    .iter()
                    .map(move |p| vec![s.name.clone(), p.x.to_string(), p.y.to_string()])
            })
            .collect();

        CsvTable {
            header: vec!["series".to_string(), "X".to_string(), "Y".to_string()],
            rows,
        }
    }

    /// Writes `table` as CSV. An empty table writes nothing.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::CsvError`] or [`ProjectError::IOError`] if writing fails.
    pub fn write_csv<W: Write>(table: &CsvTable, writer: W) -> Result<(), ProjectError> {
        if table.header.is_empty() {
            return Ok(());
        }
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&table.header)?;
        for row in &table.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Writes [`Project::csv_rows`] to `path`.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::IOError`] if the file cannot be created.
    /// * [`ProjectError::CsvError`] if writing fails.
    pub fn export_csv(&self, path: &str) -> Result<(), ProjectError> {
        let table = self.csv_rows();
        let file = File::create(path)?;
        Self::write_csv(&table, file)?;
        info!(
            "Exported {} series ({} rows) to {}",
            self.series_list.len(),
            table.rows.len(),
            path
        );
        Ok(())
    }

    pub fn to_document(&self) -> ProjectDocument {
        ProjectDocument {
            image_path: self.image_path.clone(),
            calibration: self.calibration.to_document(),
            series_list: self.series_list.iter().map(Series::to_document).collect(),
        }
    }

    /// Builds a project from a document, re-fitting the calibration.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::CorruptProject`] if the calibration cannot be re-fitted
    ///   or a series has mismatched point arrays.
    pub fn from_document(doc: &ProjectDocument) -> Result<Self, ProjectError> {
        let calibration = Calibrator::from_document(&doc.calibration)
            .map_err(|e| ProjectError::CorruptProject(format!("calibration: {e}")))?;
        let series_list = doc
            .series_list
            .iter()
            .map(|s| {
                Series::from_document(s)
                    .map_err(|e| ProjectError::CorruptProject(format!("series '{}': {e}", s.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Project {
            image_path: doc.image_path.clone(),
            calibration,
            series_list,
            ..Project::default()
        })
    }

    /// # Errors
    ///
    /// * [`ProjectError::CorruptProject`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProjectError> {
        serde_json::to_string_pretty(&self.to_document())
            .map_err(|e| ProjectError::CorruptProject(e.to_string()))
    }

    /// Replaces image, calibration and series with the contents of `json`.
    ///
    /// Observers stay registered and receive [`ProjectEvent::Loaded`]. On any
    /// error the project is left as it was.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::CorruptProject`] for malformed JSON, missing fields or
    ///   a calibration that cannot be re-fitted.
    pub fn load_json(&mut self, json: &str) -> Result<(), ProjectError> {
        let doc: ProjectDocument =
            serde_json::from_str(json).map_err(|e| ProjectError::CorruptProject(e.to_string()))?;
        let loaded = Project::from_document(&doc)?;

        self.image_path = loaded.image_path;
        self.calibration = loaded.calibration;
        self.series_list = loaded.series_list;
        self.notify(&ProjectEvent::Loaded);
        Ok(())
    }

    /// Saves the project as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// * [`ProjectError::IOError`] if the file cannot be written.
    pub fn save_project(&self, path: &str) -> Result<(), ProjectError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        info!(
            "Saved project with {} series to {}",
            self.series_list.len(),
            path
        );
        Ok(())
    }

    /// Loads a project file into this project; see [`Project::load_json`].
    ///
    /// # Errors
    ///
    /// * [`ProjectError::IOError`] if the file cannot be read.
    /// * [`ProjectError::CorruptProject`] if its contents are invalid.
    pub fn load_project(&mut self, path: &str) -> Result<(), ProjectError> {
        let json = fs::read_to_string(path)?;
        self.load_json(&json)?;
        info!(
            "Loaded project with {} series from {}",
            self.series_list.len(),
            path
        );
        Ok(())
    }

    /// Registers a callback run synchronously after every mutation.
    pub fn add_observer<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&ProjectEvent) + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    fn reset_data(&mut self) {
        self.series_list.clear();
        self.calibration = Calibrator::new();
    }

    fn notify(&self, event: &ProjectEvent) {
        for (_, callback) in &self.observers {
            callback(event);
        }
    }
}
