//! Multi-image merge compositor.
//!
//! Merges several partial renders of the same scene (different machines or
//! sample counts) into one output. Channel names are reassembled into
//! render layers and passes, each pass classified by how it combines:
//! depth-like data is copied, debug counters are summed, everything else is
//! averaged weighted by per-layer sample counts. The output is written to a
//! temporary file and renamed over the target, so a failed merge never
//! leaves a partial file behind.

mod time;

pub use time::{human_readable_from_seconds, human_readable_to_seconds};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::io::{ChannelFormat, ImageIo, ImageReader, ImageSpec, OpenConfig};
use crate::pixel::TexelSliceMut;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no input file paths specified")]
    NoInput,

    #[error("no output file path specified")]
    NoOutput,

    #[error("couldn't open file: {0}")]
    Open(PathBuf),

    #[error("merging deep images is not supported")]
    DeepNotSupported,

    #[error("images do not have matching size and data layout")]
    LayoutMismatch,

    #[error("could not find a render layer for merging")]
    NoLayers,

    #[error("failed to parse samples metadata: {0}")]
    SampleMetadata(String),

    #[error("no sample number specified in the file for layer {0}")]
    MissingSamples(String),

    #[error("failed to read image: {0}")]
    Read(PathBuf),

    #[error("failed to write to file {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("failed to move merged image to {path}: {message}")]
    Rename { path: PathBuf, message: String },
}

/// How one channel folds into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeOp {
    /// Another file already owns this channel.
    Nop,
    Copy,
    Sum,
    /// Sample-weighted average.
    Average,
}

/// Behavior switches for the merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeParams {
    /// When several files carry the same copy-class channel (Depth, object
    /// indexes, ...), keep the first file's values. Off, the last file
    /// wins instead.
    pub copy_first_writer_wins: bool,
}

impl Default for MergeParams {
    fn default() -> Self {
        MergeParams {
            copy_first_writer_wins: true,
        }
    }
}

struct MergePass {
    /// Full channel name as stored in the file.
    channel_name: String,
    format: ChannelFormat,
    op: MergeOp,
    /// Channel offset in the input image.
    offset: usize,
    /// Channel offset in the merged image.
    merge_offset: usize,
}

struct MergeLayer {
    name: String,
    passes: Vec<MergePass>,
    /// Samples used to render this layer.
    samples: u32,
}

struct MergeInput {
    reader: Box<dyn ImageReader>,
    filepath: PathBuf,
    layers: Vec<MergeLayer>,
}

/// The compositor: set `input` and `output`, then [`ImageMerger::run`].
pub struct ImageMerger {
    pub input: Vec<PathBuf>,
    pub output: PathBuf,
    pub params: MergeParams,
    io: Arc<dyn ImageIo>,
}

impl ImageMerger {
    pub fn new(io: Arc<dyn ImageIo>) -> ImageMerger {
        ImageMerger {
            input: Vec::new(),
            output: PathBuf::new(),
            params: MergeParams::default(),
            io,
        }
    }

    pub fn run(&self) -> Result<(), MergeError> {
        if self.input.is_empty() {
            return Err(MergeError::NoInput);
        }
        if self.output.as_os_str().is_empty() {
            return Err(MergeError::NoOutput);
        }

        let mut images = self.open_images()?;

        let mut channel_total_samples = Vec::new();
        let out_spec =
            merge_channels_metadata(&mut images, self.params, &mut channel_total_samples);

        let out_pixels = merge_pixels(&mut images, &out_spec, &channel_total_samples)?;

        // Input handles are closed here; overwriting one of the inputs with
        // the merged result is safe.
        drop(images);

        save_output(self.io.as_ref(), &self.output, &out_spec, &out_pixels)
    }

    fn open_images(&self) -> Result<Vec<MergeInput>, MergeError> {
        let mut images: Vec<MergeInput> = Vec::new();

        for filepath in &self.input {
            let reader = self
                .io
                .open(filepath, OpenConfig::default())
                .map_err(|_| MergeError::Open(filepath.clone()))?;

            let layers = parse_channels(reader.spec())?;
            if layers.is_empty() {
                return Err(MergeError::NoLayers);
            }
            if reader.spec().deep {
                return Err(MergeError::DeepNotSupported);
            }

            if let Some(first) = images.first() {
                let base = first.reader.spec();
                let spec = reader.spec();
                if base.width != spec.width
                    || base.height != spec.height
                    || base.depth != spec.depth
                    || base.format != spec.format
                    || base.deep != spec.deep
                {
                    return Err(MergeError::LayoutMismatch);
                }
            }

            images.push(MergeInput {
                reader,
                filepath: filepath.clone(),
                layers,
            });
        }

        Ok(images)
    }
}

/// Classify a pass by name.
fn parse_channel_operation(pass_name: &str) -> MergeOp {
    if pass_name == "Depth"
        || pass_name == "IndexMA"
        || pass_name == "IndexOB"
        || pass_name.starts_with("Crypto")
    {
        MergeOp::Copy
    } else if pass_name.starts_with("Debug BVH")
        || pass_name.starts_with("Debug Ray")
        || pass_name.starts_with("Debug Render Time")
    {
        MergeOp::Sum
    } else {
        MergeOp::Average
    }
}

/// Split at the last dot: `(before, after)`.
fn split_last_dot(name: &str) -> Option<(&str, &str)> {
    name.rfind('.').map(|pos| (&name[..pos], &name[pos + 1..]))
}

/// Separate a channel name into its naming hierarchy.
/// Multi-view format: `RenderLayer.Pass.View.Channel`,
/// otherwise: `RenderLayer.Pass.Channel`.
fn parse_channel_name(name: &str, multiview: bool) -> Option<(String, String, String)> {
    let (rest, channel) = split_last_dot(name)?;
    let (rest, view) = if multiview {
        let (rest, view) = split_last_dot(rest)?;
        (rest, Some(view))
    } else {
        (rest, None)
    };
    let (renderlayer, pass) = split_last_dot(rest)?;

    let renderlayer = match view {
        Some(view) => format!("{renderlayer}.{view}"),
        None => renderlayer.to_string(),
    };

    Some((renderlayer, pass.to_string(), channel.to_string()))
}

/// Group a file's channels into render layers with per-layer sample counts.
/// Channels that do not parse land in the unnamed layer, which always
/// counts as one sample.
fn parse_channels(spec: &ImageSpec) -> Result<Vec<MergeLayer>, MergeError> {
    let multiview = spec.is_multiview();

    let mut file_layers: BTreeMap<String, Vec<MergePass>> = BTreeMap::new();
    for (i, channel_name) in spec.channel_names.iter().enumerate() {
        let format = spec.channel_format(i);
        let (layer_name, op) = match parse_channel_name(channel_name, multiview) {
            Some((layer, pass, _channel)) => (layer, parse_channel_operation(&pass)),
            None => (String::new(), parse_channel_operation(channel_name)),
        };

        file_layers.entry(layer_name).or_default().push(MergePass {
            channel_name: channel_name.clone(),
            format,
            op,
            offset: i,
            merge_offset: i,
        });
    }

    let mut layers = Vec::new();
    for (name, passes) in file_layers {
        let samples = if name.is_empty() {
            1
        } else {
            let key = format!("cycles.{name}.samples");
            match spec.attribute(&key) {
                Some(value) => value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| MergeError::SampleMetadata(value.to_string()))?,
                None => return Err(MergeError::MissingSamples(name)),
            }
        };
        if samples < 1 {
            return Err(MergeError::MissingSamples(name));
        }

        layers.push(MergeLayer {
            name,
            passes,
            samples,
        });
    }

    Ok(layers)
}

fn merge_render_time(
    out_spec: &mut ImageSpec,
    images: &[MergeInput],
    name: &str,
    average: bool,
) {
    let mut seconds = 0.0;
    for image in images {
        if let Some(value) = image.reader.spec().attribute(name) {
            seconds += human_readable_to_seconds(value);
        }
    }
    if average {
        seconds /= images.len() as f64;
    }
    out_spec.set_attribute(name, human_readable_from_seconds(seconds));
}

fn merge_layer_render_time(
    out_spec: &mut ImageSpec,
    images: &[MergeInput],
    layer_name: &str,
    time_name: &str,
    average: bool,
) {
    merge_render_time(
        out_spec,
        images,
        &format!("cycles.{layer_name}.{time_name}"),
        average,
    );
}

/// Build the output spec: union of all pass channels with per-channel total
/// sample counts, and merged render-time metadata.
fn merge_channels_metadata(
    images: &mut [MergeInput],
    params: MergeParams,
    channel_total_samples: &mut Vec<u32>,
) -> ImageSpec {
    let mut out_spec = images[0].reader.spec().clone();
    out_spec.channels = 0;
    out_spec.channel_formats.clear();
    out_spec.channel_names.clear();

    for image in images.iter_mut() {
        for layer in image.layers.iter_mut() {
            for pass in layer.passes.iter_mut() {
                match out_spec
                    .channel_names
                    .iter()
                    .position(|name| name == &pass.channel_name)
                {
                    Some(existing) => {
                        pass.merge_offset = existing;
                        channel_total_samples[existing] += layer.samples;
                        // First image wins for channels that can't be
                        // averaged or summed.
                        if pass.op == MergeOp::Copy && params.copy_first_writer_wins {
                            pass.op = MergeOp::Nop;
                        }
                    }
                    None => {
                        pass.merge_offset = out_spec.channels;
                        channel_total_samples.push(layer.samples);
                        out_spec.channel_names.push(pass.channel_name.clone());
                        out_spec.channel_formats.push(pass.format);
                        out_spec.channels += 1;
                    }
                }
            }
        }
    }

    merge_render_time(&mut out_spec, images, "RenderTime", false);

    let mut layer_num_samples: BTreeMap<String, u32> = BTreeMap::new();
    for image in images.iter() {
        for layer in &image.layers {
            if !layer.name.is_empty() {
                *layer_num_samples.entry(layer.name.clone()).or_insert(0) += layer.samples;
            }
        }
    }

    for (name, samples) in &layer_num_samples {
        out_spec.set_attribute(format!("cycles.{name}.samples"), samples.to_string());
        merge_layer_render_time(&mut out_spec, images, name, "total_time", false);
        merge_layer_render_time(&mut out_spec, images, name, "render_time", false);
        merge_layer_render_time(&mut out_spec, images, name, "synchronization_time", true);
    }

    out_spec
}

fn merge_pixels(
    images: &mut [MergeInput],
    out_spec: &ImageSpec,
    channel_total_samples: &[u32],
) -> Result<Vec<f32>, MergeError> {
    let num_pixels = out_spec.pixel_count();
    let out_channels = out_spec.channels;
    let mut out_pixels = vec![0.0f32; num_pixels * out_channels];

    for image in images.iter_mut() {
        // Read all channels at once; interleaved storage makes that far
        // cheaper than per-channel reads.
        let in_channels = image.reader.spec().channels;
        let mut pixels = vec![0.0f32; num_pixels * in_channels];
        image
            .reader
            .read_pixels(TexelSliceMut::F32(&mut pixels))
            .map_err(|_| MergeError::Read(image.filepath.clone()))?;

        for layer in &image.layers {
            for pass in &layer.passes {
                let offset = pass.offset;
                let merge_offset = pass.merge_offset;

                match pass.op {
                    MergeOp::Nop => {}
                    MergeOp::Copy => {
                        for i in 0..num_pixels {
                            out_pixels[i * out_channels + merge_offset] =
                                pixels[i * in_channels + offset];
                        }
                    }
                    MergeOp::Sum => {
                        for i in 0..num_pixels {
                            out_pixels[i * out_channels + merge_offset] +=
                                pixels[i * in_channels + offset];
                        }
                    }
                    MergeOp::Average => {
                        // Weights from sample metadata, per output channel
                        // since not all files carry the same channels.
                        let total = channel_total_samples[merge_offset];
                        let weight = layer.samples as f32 / total as f32;
                        for i in 0..num_pixels {
                            out_pixels[i * out_channels + merge_offset] +=
                                weight * pixels[i * in_channels + offset];
                        }
                    }
                }
            }
        }
    }

    Ok(out_pixels)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_temp_path(output: &Path) -> PathBuf {
    let extension = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let unique = format!(
        "{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".merge-tmp-{unique}{extension}"));
    PathBuf::from(name)
}

/// Write to a temporary next to the output and rename over it, so the
/// previous output survives any write failure.
fn save_output(
    io: &dyn ImageIo,
    output: &Path,
    spec: &ImageSpec,
    pixels: &[f32],
) -> Result<(), MergeError> {
    let tmp_path = unique_temp_path(output);
    debug!(path = %tmp_path.display(), "writing merged image");

    let result = io
        .create_writer(&tmp_path)
        .and_then(|mut writer| writer.write_image(spec, pixels));

    if let Err(error) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(MergeError::Write {
            path: tmp_path,
            message: error.to_string(),
        });
    }

    if let Err(error) = std::fs::rename(&tmp_path, output) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(MergeError::Rename {
            path: output.to_path_buf(),
            message: error.to_string(),
        });
    }

    Ok(())
}
