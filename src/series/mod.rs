//! Extracted data series.
//!
//! A [`Series`] keeps the pixel points produced by a point extractor next to
//! the data values they were mapped to, index for index. Style metadata
//! (color, [`LineType`], gap fill) is carried along for display and
//! persistence only.

use crate::calibration::Calibrator;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Color given to new series.
pub const DEFAULT_COLOR: &str = "#ff0000";

/// Gap-fill distance given to new series, in pixels.
pub const DEFAULT_GAP_FILL: u32 = 3;

#[derive(thiserror::Error, Debug)]
pub enum SeriesError {
    #[error("Pixel and data point counts differ: {pixels} pixels, {values} values")]
    LengthMismatch { pixels: usize, values: usize },
    #[error("Invalid pixel point on line {line}: {reason}")]
    InvalidPixel { line: u64, reason: String },
    #[error("CSV error: {0}")]
    CsvError(String),
}

impl From<csv::Error> for SeriesError {
    fn from(err: csv::Error) -> Self {
        SeriesError::CsvError(err.to_string())
    }
}

/// How the series' line was classified during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    #[default]
    Auto,
    Manual,
    Solid,
}

/// Persisted form of a [`Series`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDocument {
    pub name: String,
    pub color: String,
    pub raw_pixels: Vec<[i32; 2]>,
    #[serde(with = "data_point_serde")]
    pub data_points: Vec<[f64; 2]>,
    pub line_type: LineType,
    pub gap_fill: u32,
}

/// JSON has no literal for non-finite numbers, so log-axis overflow (`inf`)
/// and points on the line at infinity (`nan`) are stored as strings.
mod data_point_serde {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Component {
        Number(f64),
        Text(String),
    }

    fn encode(value: f64) -> Component {
        if value.is_finite() {
            Component::Number(value)
        } else if value.is_nan() {
            Component::Text("nan".to_string())
        } else if value > 0.0 {
            Component::Text("inf".to_string())
        } else {
            Component::Text("-inf".to_string())
        }
    }

    fn decode<E: de::Error>(component: Component) -> Result<f64, E> {
        match component {
            Component::Number(value) => Ok(value),
            Component::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(E::custom(format!("invalid data value '{other}'"))),
            },
        }
    }

    pub fn serialize<S: Serializer>(points: &[[f64; 2]], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<[Component; 2]> = points
            .iter()
            .map(|p| [encode(p[0]), encode(p[1])])
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<[f64; 2]>, D::Error> {
        Vec::<[Component; 2]>::deserialize(deserializer)?
            .into_iter()
            .map(|[x, y]| Ok([decode(x)?, decode(y)?]))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub color: String,
    pub line_type: LineType,
    pub gap_fill: u32,
    raw_pixels: Vec<Point2<i32>>,
    data_points: Vec<Point2<f64>>,
}

impl Series {
    /// Creates an empty series with default style.
    pub fn new(name: impl Into<String>) -> Self {
        Series {
            name: name.into(),
            color: DEFAULT_COLOR.to_string(),
            line_type: LineType::default(),
            gap_fill: DEFAULT_GAP_FILL,
            raw_pixels: Vec::new(),
            data_points: Vec::new(),
        }
    }

    /// Creates a series by mapping `pixels` through `calibrator`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nalgebra::Point2;
    /// use plot_digitizer::calibration::Calibrator;
    /// use plot_digitizer::series::Series;
    ///
    /// let series = Series::from_pixels(
    ///     "raw",
    ///     vec![Point2::new(3, 4), Point2::new(5, 6)],
    ///     &Calibrator::new(),
    /// );
    /// assert_eq!(series.len(), 2);
    /// assert_eq!(series.data_points()[1], Point2::new(5.0, 6.0));
    /// ```
    pub fn from_pixels(
        name: impl Into<String>,
        pixels: Vec<Point2<i32>>,
        calibrator: &Calibrator,
    ) -> Self {
        let data_points = calibrator.map_points(&pixels);
        Series {
            raw_pixels: pixels,
            data_points,
            ..Series::new(name)
        }
    }

    /// Replaces both point arrays at once.
    ///
    /// # Errors
    ///
    /// * [`SeriesError::LengthMismatch`] if the arrays differ in length; the
    ///   series is left unchanged.
    pub fn set_data(
        &mut self,
        pixels: Vec<Point2<i32>>,
        data_points: Vec<Point2<f64>>,
    ) -> Result<(), SeriesError> {
        if pixels.len() != data_points.len() {
            return Err(SeriesError::LengthMismatch {
                pixels: pixels.len(),
                values: data_points.len(),
            });
        }
        self.raw_pixels = pixels;
        self.data_points = data_points;
        Ok(())
    }

    pub fn raw_pixels(&self) -> &[Point2<i32>] {
        &self.raw_pixels
    }

    pub fn data_points(&self) -> &[Point2<f64>] {
        &self.data_points
    }

    pub fn len(&self) -> usize {
        self.data_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }

    pub fn to_document(&self) -> SeriesDocument {
        SeriesDocument {
            name: self.name.clone(),
            color: self.color.clone(),
            raw_pixels: self.raw_pixels.iter().map(|p| [p.x, p.y]).collect(),
            data_points: self.data_points.iter().map(|p| [p.x, p.y]).collect(),
            line_type: self.line_type,
            gap_fill: self.gap_fill,
        }
    }

    /// # Errors
    ///
    /// * [`SeriesError::LengthMismatch`] if the stored arrays differ in length.
    pub fn from_document(doc: &SeriesDocument) -> Result<Self, SeriesError> {
        let mut series = Series {
            color: doc.color.clone(),
            line_type: doc.line_type,
            gap_fill: doc.gap_fill,
            ..Series::new(doc.name.clone())
        };
        series.set_data(
            doc.raw_pixels.iter().map(|p| Point2::new(p[0], p[1])).collect(),
            doc.data_points
                .iter()
                .map(|p| Point2::new(p[0], p[1]))
                .collect(),
        )?;
        Ok(series)
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Series '{}' ({} points)", self.name, self.len())
    }
}

/// Reads `x,y` pixel rows, as written by a point extractor.
///
/// There is no header row; blank lines and lines starting with `#` are
/// skipped. Fractional coordinates are rounded to the nearest pixel.
///
/// # Errors
///
/// * [`SeriesError::InvalidPixel`] for a row without two numeric fields.
/// * [`SeriesError::CsvError`] if the input is not readable CSV.
pub fn read_pixel_points<R: Read>(reader: R) -> Result<Vec<Point2<i32>>, SeriesError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut points = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != 2 {
            return Err(SeriesError::InvalidPixel {
                line,
                reason: format!("expected 2 fields, found {}", record.len()),
            });
        }
        let x = parse_coordinate(&record[0], line)?;
        let y = parse_coordinate(&record[1], line)?;
        points.push(Point2::new(x, y));
    }
    Ok(points)
}

fn parse_coordinate(field: &str, line: u64) -> Result<i32, SeriesError> {
    if let Ok(v) = field.parse::<i32>() {
        return Ok(v);
    }
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() && v.abs() <= i32::MAX as f64 => Ok(v.round() as i32),
        _ => Err(SeriesError::InvalidPixel {
            line,
            reason: format!("'{field}' is not a pixel coordinate"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_new_series_defaults() {
        let series = Series::new("Sine");
        assert_eq!(series.name, "Sine");
        assert_eq!(series.color, "#ff0000");
        assert_eq!(series.line_type, LineType::Auto);
        assert_eq!(series.gap_fill, 3);
        assert!(series.is_empty());
        assert_eq!(series.to_string(), "Series 'Sine' (0 points)");
    }

    #[test]
    fn test_set_data_replaces_both() {
        let mut series = Series::new("a");
        series
            .set_data(
                vec![Point2::new(1, 2), Point2::new(3, 4)],
                vec![Point2::new(0.1, 0.2), Point2::new(0.3, 0.4)],
            )
            .unwrap();
        series
            .set_data(vec![Point2::new(9, 9)], vec![Point2::new(9.5, 9.5)])
            .unwrap();
        assert_eq!(series.raw_pixels(), &[Point2::new(9, 9)]);
        assert_eq!(series.data_points(), &[Point2::new(9.5, 9.5)]);
    }

    #[test]
    fn test_set_data_length_mismatch_is_atomic() {
        let mut series = Series::new("a");
        series
            .set_data(vec![Point2::new(1, 2)], vec![Point2::new(0.1, 0.2)])
            .unwrap();
        let err = series
            .set_data(vec![Point2::new(1, 2), Point2::new(3, 4)], vec![])
            .unwrap_err();
        assert!(matches!(
            err,
            SeriesError::LengthMismatch {
                pixels: 2,
                values: 0
            }
        ));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_from_pixels_uses_calibration() {
        let mut calibrator = Calibrator::new();
        calibrator
            .set_linear_calibration(
                &[
                    Point2::new(50.0, 250.0),
                    Point2::new(450.0, 250.0),
                    Point2::new(50.0, 250.0),
                    Point2::new(50.0, 50.0),
                ],
                &[
                    Point2::new(0.0, 0.0),
                    Point2::new(10.0, 0.0),
                    Point2::new(0.0, 0.0),
                    Point2::new(0.0, 1.0),
                ],
                false,
                false,
            )
            .unwrap();

        let series = Series::from_pixels(
            "Sine",
            vec![Point2::new(250, 150), Point2::new(50, 250)],
            &calibrator,
        );
        assert_eq!(series.raw_pixels().len(), series.data_points().len());
        assert_abs_diff_eq!(series.data_points()[0].x, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(series.data_points()[0].y, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(series.data_points()[1].x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_document_round_trip() {
        let mut series = Series::new("Blue");
        series.color = "#0000ff".to_string();
        series.line_type = LineType::Solid;
        series.gap_fill = 7;
        series
            .set_data(vec![Point2::new(10, 20)], vec![Point2::new(1.5, -2.0)])
            .unwrap();

        let json = serde_json::to_string(&series.to_document()).unwrap();
        assert!(json.contains("\"line_type\":\"solid\""));
        let doc: SeriesDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(Series::from_document(&doc).unwrap(), series);
    }

    #[test]
    fn test_document_non_finite_values_round_trip() {
        let mut series = Series::new("overflow");
        series
            .set_data(
                vec![Point2::new(1, 1), Point2::new(2, 2)],
                vec![
                    Point2::new(f64::INFINITY, 3.0),
                    Point2::new(f64::NAN, f64::NEG_INFINITY),
                ],
            )
            .unwrap();

        let json = serde_json::to_string(&series.to_document()).unwrap();
        assert!(json.contains(r#""data_points":[["inf",3.0],["nan","-inf"]]"#));

        let doc: SeriesDocument = serde_json::from_str(&json).unwrap();
        let restored = Series::from_document(&doc).unwrap();
        let points = restored.data_points();
        assert_eq!(points[0], Point2::new(f64::INFINITY, 3.0));
        assert!(points[1].x.is_nan());
        assert_eq!(points[1].y, f64::NEG_INFINITY);
    }

    #[test]
    fn test_document_rejects_unknown_data_value() {
        let json = r##"{"name":"a","color":"#ff0000","raw_pixels":[[1,2]],"data_points":[["huge",1]],"line_type":"auto","gap_fill":3}"##;
        assert!(serde_json::from_str::<SeriesDocument>(json).is_err());
        let json = r##"{"name":"a","color":"#ff0000","raw_pixels":[[1,2]],"data_points":[[null,1]],"line_type":"auto","gap_fill":3}"##;
        assert!(serde_json::from_str::<SeriesDocument>(json).is_err());
    }

    #[test]
    fn test_document_missing_field_rejected() {
        let json = r##"{"name":"a","color":"#ff0000","raw_pixels":[],"data_points":[],"line_type":"auto"}"##;
        assert!(serde_json::from_str::<SeriesDocument>(json).is_err());
    }

    #[test]
    fn test_read_pixel_points() {
        let input = "# extracted\n10,20\n 30 , 40 \n\n12.6,7.2\n";
        let points = read_pixel_points(input.as_bytes()).unwrap();
        assert_eq!(
            points,
            vec![Point2::new(10, 20), Point2::new(30, 40), Point2::new(13, 7)]
        );
    }

    #[test]
    fn test_read_pixel_points_sample() {
        let file = std::fs::File::open("samples/pixels.csv").unwrap();
        let points = read_pixel_points(file).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], Point2::new(50, 250));
    }

    #[test]
    fn test_read_pixel_points_rejects_bad_rows() {
        assert!(matches!(
            read_pixel_points("1,2\nabc,4\n".as_bytes()),
            Err(SeriesError::InvalidPixel { .. })
        ));
        assert!(matches!(
            read_pixel_points("1,2,3\n".as_bytes()),
            Err(SeriesError::InvalidPixel { .. })
        ));
    }

    #[test]
    fn test_read_pixel_points_empty_input() {
        assert!(read_pixel_points("".as_bytes()).unwrap().is_empty());
    }
}
