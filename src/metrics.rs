use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use ndarray::{s, Array3, Axis, Ix4};
use serde::Serialize;

use crate::{
    error::{Result, TrainErr},
    params::Tensor,
};

/// Images per grid row.
const GRID_NROW: usize = 8;
/// Pixels between grid cells.
const GRID_PADDING: usize = 2;

/// Receives named training metrics.
pub trait MetricSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()>;

    /// `image` is laid out as `(channels, height, width)`.
    fn add_image(&mut self, name: &str, image: &Array3<f32>, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Forwards scalars to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        log::debug!(metric = name, step = step, value = value; "scalar");
        Ok(())
    }

    fn add_image(&mut self, name: &str, image: &Array3<f32>, step: u64) -> Result<()> {
        log::debug!(metric = name, step = step, shape:? = image.shape(); "image");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event<'a> {
    Scalar {
        name: &'a str,
        step: u64,
        value: f64,
    },
    Image {
        name: &'a str,
        step: u64,
        shape: &'a [usize],
        data: &'a [f32],
    },
}

/// Appends one JSON object per event to a file.
pub struct JsonlSink {
    out: BufWriter<File>,
}

impl JsonlSink {
    /// Creates (or truncates) the event file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Opens the event file at `path` for appending, creating it if needed.
    /// Events from earlier runs are kept.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    fn write(&mut self, event: &Event<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl MetricSink for JsonlSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        self.write(&Event::Scalar { name, step, value })
    }

    fn add_image(&mut self, name: &str, image: &Array3<f32>, step: u64) -> Result<()> {
        let contiguous = image.as_standard_layout();
        let data = contiguous.as_slice().unwrap_or_default();
        self.write(&Event::Image {
            name,
            step,
            shape: image.shape(),
            data,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub scalars: Vec<(String, f64, u64)>,
    pub images: Vec<(String, Vec<usize>, u64)>,
}

impl MemorySink {
    /// All values recorded under `name`, in write order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.scalars
            .iter()
            .filter(|(n, ..)| n == name)
            .map(|&(_, v, _)| v)
            .collect()
    }
}

impl MetricSink for MemorySink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        self.scalars.push((name.to_string(), value, step));
        Ok(())
    }

    fn add_image(&mut self, name: &str, image: &Array3<f32>, step: u64) -> Result<()> {
        self.images.push((name.to_string(), image.shape().to_vec(), step));
        Ok(())
    }
}

/// Tiles a batch of images into one `(channels, height, width)` grid.
///
/// Accepts `(n, c, h, w)` or single-channel `(n, h, w)` batches.
///
/// # Errors
/// `ShapeMismatch` for tensors of any other rank.
pub fn make_grid(batch: &Tensor) -> Result<Array3<f32>> {
    let images = match batch.ndim() {
        4 => batch.view(),
        3 => batch.view().insert_axis(Axis(1)),
        n => {
            return Err(TrainErr::ShapeMismatch {
                what: "image batch rank",
                got: n,
                expected: 4,
            })
        }
    };
    let images = images
        .into_dimensionality::<Ix4>()
        .map_err(|_| TrainErr::ShapeMismatch {
            what: "image batch rank",
            got: batch.ndim(),
            expected: 4,
        })?;

    let (n, c, h, w) = images.dim();
    let xmaps = GRID_NROW.min(n).max(1);
    let ymaps = n.div_ceil(xmaps);
    let (cell_h, cell_w) = (h + GRID_PADDING, w + GRID_PADDING);

    let mut grid = Array3::<f32>::zeros((
        c,
        cell_h * ymaps + GRID_PADDING,
        cell_w * xmaps + GRID_PADDING,
    ));

    for (k, image) in images.outer_iter().enumerate() {
        let (y, x) = (k / xmaps, k % xmaps);
        let top = y * cell_h + GRID_PADDING;
        let left = x * cell_w + GRID_PADDING;
        grid.slice_mut(s![.., top..top + h, left..left + w])
            .assign(&image);
    }

    Ok(grid)
}
