//! Plot digitizer command line.
//!
//! Pixel points come from an external extractor as `x,y` CSV rows; this tool
//! calibrates, maps them to data values, and manages project files.
//!
//! Usage:
//! ```bash
//! plot-digitizer calibrate \
//!   --pixel 50,250 --pixel 450,250 --pixel 50,250 --pixel 50,50 \
//!   --axes 0,10,0,1 --output profile.yaml
//! plot-digitizer map --profile profile.yaml --input pixels.csv
//! plot-digitizer add-series --project sine.json --profile profile.yaml \
//!   --image sine.png --name Sine --input pixels.csv
//! plot-digitizer export --project sine.json --output sine.csv
//! ```

use clap::{Args, Parser, Subcommand};
use log::info;
use nalgebra::Point2;
use plot_digitizer::calibration::{AxisValues, CalibrationMode, Calibrator};
use plot_digitizer::project::Project;
use plot_digitizer::series::{read_pixel_points, Series};
use std::fs::File;
use std::io;
use std::path::Path;

/// Pixel-to-data calibration for chart digitizing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a calibration from four control points and save it as a YAML profile
    Calibrate(CalibrateArgs),
    /// Map pixel points through a calibration profile and print CSV
    Map(MapArgs),
    /// Map pixel points and append them as a series to a project file
    AddSeries(AddSeriesArgs),
    /// Export all series of a project as CSV
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Pixel control point "x,y"; give exactly four
    #[arg(long = "pixel", value_parser = parse_point, required = true)]
    pixels: Vec<Point2<f64>>,

    /// Value control point "x,y"; give exactly four, or use --axes
    #[arg(long = "value", value_parser = parse_point, conflicts_with = "axes")]
    values: Vec<Point2<f64>>,

    /// Axis readings "x1,x2,y1,y2" expanded into the four value points
    #[arg(long, value_parser = parse_axes)]
    axes: Option<AxisValues>,

    /// Fit a four-corner homography (pixels in TL, TR, BR, BL order with --axes)
    #[arg(long)]
    perspective: bool,

    /// X axis is logarithmic
    #[arg(long)]
    log_x: bool,

    /// Y axis is logarithmic
    #[arg(long)]
    log_y: bool,

    /// Where to write the YAML profile
    #[arg(short, long)]
    output: String,
}

#[derive(Args, Debug)]
struct MapArgs {
    /// YAML calibration profile
    #[arg(short, long)]
    profile: String,

    /// CSV of "x,y" pixel points (stdin if omitted)
    #[arg(short, long)]
    input: Option<String>,

    /// Series name used for the column headers
    #[arg(short, long, default_value = "series")]
    name: String,
}

#[derive(Args, Debug)]
struct AddSeriesArgs {
    /// Project file; created if it does not exist
    #[arg(long)]
    project: String,

    /// Series name
    #[arg(short, long)]
    name: String,

    /// CSV of "x,y" pixel points
    #[arg(short, long)]
    input: String,

    /// Image the points were extracted from; switching images clears the project
    #[arg(long)]
    image: Option<String>,

    /// YAML calibration profile to apply before mapping
    #[arg(short, long)]
    profile: Option<String>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Project file
    #[arg(long)]
    project: String,

    /// Output CSV (stdout if omitted)
    #[arg(short, long)]
    output: Option<String>,

    /// One "series,X,Y" row per point instead of column pairs
    #[arg(long)]
    long: bool,
}

fn parse_numbers(s: &str, count: usize) -> Result<Vec<f64>, String> {
    let numbers = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("'{}': {}", part.trim(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if numbers.len() != count {
        return Err(format!("expected {count} comma-separated numbers, got {}", numbers.len()));
    }
    Ok(numbers)
}

fn parse_point(s: &str) -> Result<Point2<f64>, String> {
    let n = parse_numbers(s, 2)?;
    Ok(Point2::new(n[0], n[1]))
}

fn parse_axes(s: &str) -> Result<AxisValues, String> {
    let n = parse_numbers(s, 4)?;
    Ok(AxisValues {
        x1: n[0],
        x2: n[1],
        y1: n[2],
        y2: n[3],
    })
}

fn calibrate(args: &CalibrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let values = match &args.axes {
        Some(axes) if args.perspective => axes.perspective_corners().to_vec(),
        Some(axes) => axes.linear_points().to_vec(),
        None => args.values.clone(),
    };

    let mut calibrator = Calibrator::new();
    if args.perspective {
        calibrator.set_perspective_calibration(&args.pixels, &values, args.log_x, args.log_y)?;
    } else {
        calibrator.set_linear_calibration(&args.pixels, &values, args.log_x, args.log_y)?;
    }
    calibrator.save_to_yaml(&args.output)?;

    println!(
        "Saved {:?} calibration to {}",
        calibrator.mode(),
        args.output
    );
    Ok(())
}

fn read_pixels(input: Option<&str>) -> Result<Vec<Point2<i32>>, Box<dyn std::error::Error>> {
    let pixels = match input {
        Some(path) => read_pixel_points(File::open(path)?)?,
        None => read_pixel_points(io::stdin().lock())?,
    };
    info!("Read {} pixel points", pixels.len());
    Ok(pixels)
}

fn map(args: &MapArgs) -> Result<(), Box<dyn std::error::Error>> {
    let calibrator = Calibrator::load_from_yaml(&args.profile)?;
    let pixels = read_pixels(args.input.as_deref())?;

    let mut project = Project::new();
    project.add_series(Series::from_pixels(args.name.clone(), pixels, &calibrator));
    Project::write_csv(&project.csv_rows(), io::stdout().lock())?;
    Ok(())
}

fn add_series(args: &AddSeriesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut project = Project::new();
    if Path::new(&args.project).exists() {
        project.load_project(&args.project)?;
    }

    if let Some(image) = &args.image {
        if project.image_path() != Some(image.as_str()) {
            project.set_image(image.clone());
        }
    }

    if let Some(profile) = &args.profile {
        project.set_calibrator(Calibrator::load_from_yaml(profile)?);
    }

    if !project.calibration().is_calibrated() {
        return Err(format!(
            "project {} has no calibration; pass --profile",
            args.project
        )
        .into());
    }

    let pixels = read_pixels(Some(args.input.as_str()))?;
    let index = project.add_series_from_pixels(args.name.clone(), pixels);
    project.save_project(&args.project)?;

    let mode = match project.calibration().mode() {
        CalibrationMode::Linear => "linear",
        CalibrationMode::Perspective => "perspective",
    };
    if let Some(series) = project.series(index) {
        println!("Added {series} to {} ({mode} calibration)", args.project);
    }
    Ok(())
}

fn export(args: &ExportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut project = Project::new();
    project.load_project(&args.project)?;

    let table = if args.long {
        project.long_csv_rows()
    } else {
        project.csv_rows()
    };

    match &args.output {
        Some(path) => {
            Project::write_csv(&table, File::create(path)?)?;
            println!(
                "Exported {} series ({} rows) to {}",
                project.series_list().len(),
                table.rows.len(),
                path
            );
        }
        None => Project::write_csv(&table, io::stdout().lock())?,
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Calibrate(args) => calibrate(args),
        Command::Map(args) => map(args),
        Command::AddSeries(args) => add_series(args),
        Command::Export(args) => export(args),
    }
}
