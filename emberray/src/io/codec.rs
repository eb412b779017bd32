//! Default [`ImageIo`] backed by the `image` codec crate.
//!
//! Covers the common 2D formats (PNG, JPEG, TIFF, ...). Depth is always 1,
//! there are no multi-layer channels and no deep data; renderers that need
//! those plug in their own [`ImageIo`].

use std::path::{Path, PathBuf};

use half::f16;
use image::{DynamicImage, ImageFormat};

use super::{ChannelFormat, ImageIo, ImageReader, ImageSpec, ImageWriter, IoError, OpenConfig};
use crate::pixel::TexelSliceMut;

#[derive(Debug, Default)]
pub struct CodecImageIo;

impl ImageIo for CodecImageIo {
    fn open(&self, path: &Path, config: OpenConfig) -> Result<Box<dyn ImageReader>, IoError> {
        let reader = image::ImageReader::open(path)
            .map_err(|err| IoError::Open {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
            .with_guessed_format()
            .map_err(|err| IoError::Open {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let format = reader
            .format()
            .ok_or_else(|| IoError::DecoderUnavailable(path.to_path_buf()))?;

        let image = reader.decode().map_err(|err| IoError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        Ok(Box::new(CodecReader {
            path: path.to_path_buf(),
            spec: spec_from_image(&image),
            format_name: format_name(format),
            image,
            associate_alpha: !config.unassociated_alpha,
        }))
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn ImageWriter>, IoError> {
        Ok(Box::new(CodecWriter {
            path: path.to_path_buf(),
        }))
    }
}

struct CodecReader {
    path: PathBuf,
    spec: ImageSpec,
    format_name: &'static str,
    image: DynamicImage,
    associate_alpha: bool,
}

impl ImageReader for CodecReader {
    fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    fn format_name(&self) -> &str {
        self.format_name
    }

    fn read_pixels(&mut self, out: TexelSliceMut<'_>) -> Result<(), IoError> {
        let channels = self.spec.channels;
        let count = self.spec.pixel_count() * channels;
        if out.len() < count {
            return Err(IoError::Read {
                path: self.path.clone(),
                message: format!("buffer holds {} elements, image needs {count}", out.len()),
            });
        }

        match out {
            TexelSliceMut::U8(buf) => {
                let raw = match channels {
                    1 => self.image.to_luma8().into_raw(),
                    2 => self.image.to_luma_alpha8().into_raw(),
                    3 => self.image.to_rgb8().into_raw(),
                    _ => self.image.to_rgba8().into_raw(),
                };
                buf[..count].copy_from_slice(&raw);
                if self.associate_alpha {
                    premultiply_u8(&mut buf[..count], channels);
                }
            }
            TexelSliceMut::U16(buf) => {
                let raw = match channels {
                    1 => self.image.to_luma16().into_raw(),
                    2 => self.image.to_luma_alpha16().into_raw(),
                    3 => self.image.to_rgb16().into_raw(),
                    _ => self.image.to_rgba16().into_raw(),
                };
                buf[..count].copy_from_slice(&raw);
                if self.associate_alpha {
                    premultiply_u16(&mut buf[..count], channels);
                }
            }
            TexelSliceMut::F32(buf) => {
                let raw = raw_f32(&self.image, channels);
                buf[..count].copy_from_slice(&raw);
                if self.associate_alpha {
                    premultiply_f32(&mut buf[..count], channels);
                }
            }
            TexelSliceMut::F16(buf) => {
                let mut raw = raw_f32(&self.image, channels);
                if self.associate_alpha {
                    premultiply_f32(&mut raw, channels);
                }
                for (dst, src) in buf[..count].iter_mut().zip(raw) {
                    *dst = f16::from_f32(src);
                }
            }
        }

        Ok(())
    }
}

fn raw_f32(image: &DynamicImage, channels: usize) -> Vec<f32> {
    match channels {
        1 => image.to_luma32f().into_raw(),
        2 => image.to_luma_alpha32f().into_raw(),
        3 => image.to_rgb32f().into_raw(),
        _ => image.to_rgba32f().into_raw(),
    }
}

fn premultiply_u8(pixels: &mut [u8], channels: usize) {
    let alpha = match channels {
        2 => 1,
        4 => 3,
        _ => return,
    };
    for px in pixels.chunks_exact_mut(channels) {
        let a = u16::from(px[alpha]);
        for c in px[..alpha].iter_mut() {
            *c = ((u16::from(*c) * a + 127) / 255) as u8;
        }
    }
}

fn premultiply_u16(pixels: &mut [u16], channels: usize) {
    let alpha = match channels {
        2 => 1,
        4 => 3,
        _ => return,
    };
    for px in pixels.chunks_exact_mut(channels) {
        let a = u32::from(px[alpha]);
        for c in px[..alpha].iter_mut() {
            *c = ((u32::from(*c) * a + 32767) / 65535) as u16;
        }
    }
}

fn premultiply_f32(pixels: &mut [f32], channels: usize) {
    let alpha = match channels {
        2 => 1,
        4 => 3,
        _ => return,
    };
    for px in pixels.chunks_exact_mut(channels) {
        let a = px[alpha];
        for c in px[..alpha].iter_mut() {
            *c *= a;
        }
    }
}

fn spec_from_image(image: &DynamicImage) -> ImageSpec {
    let (channels, format) = match image {
        DynamicImage::ImageLuma8(_) => (1, ChannelFormat::U8),
        DynamicImage::ImageLumaA8(_) => (2, ChannelFormat::U8),
        DynamicImage::ImageRgb8(_) => (3, ChannelFormat::U8),
        DynamicImage::ImageRgba8(_) => (4, ChannelFormat::U8),
        DynamicImage::ImageLuma16(_) => (1, ChannelFormat::U16),
        DynamicImage::ImageLumaA16(_) => (2, ChannelFormat::U16),
        DynamicImage::ImageRgb16(_) => (3, ChannelFormat::U16),
        DynamicImage::ImageRgba16(_) => (4, ChannelFormat::U16),
        DynamicImage::ImageRgb32F(_) => (3, ChannelFormat::F32),
        DynamicImage::ImageRgba32F(_) => (4, ChannelFormat::F32),
        _ => (image.color().channel_count() as usize, ChannelFormat::U8),
    };

    let names: &[&str] = match channels {
        1 => &["Y"],
        2 => &["Y", "A"],
        3 => &["R", "G", "B"],
        _ => &["R", "G", "B", "A"],
    };

    ImageSpec {
        width: image.width() as usize,
        height: image.height() as usize,
        depth: 1,
        channels,
        format,
        channel_names: names.iter().map(|n| n.to_string()).collect(),
        ..ImageSpec::default()
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Tga => "tga",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        ImageFormat::Hdr => "hdr",
        ImageFormat::OpenExr => "exr",
        ImageFormat::Pnm => "pnm",
        ImageFormat::Qoi => "qoi",
        _ => "image",
    }
}

struct CodecWriter {
    path: PathBuf,
}

impl ImageWriter for CodecWriter {
    fn write_image(&mut self, spec: &ImageSpec, pixels: &[f32]) -> Result<(), IoError> {
        let count = spec.pixel_count() * spec.channels;
        if pixels.len() < count {
            return Err(IoError::Write {
                path: self.path.clone(),
                message: format!("buffer holds {} floats, spec needs {count}", pixels.len()),
            });
        }
        let (width, height) = (spec.width as u32, spec.height as u32);

        let result = match (spec.format, spec.channels) {
            (ChannelFormat::U8, channels) => {
                let buf: Vec<u8> = pixels[..count]
                    .iter()
                    .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                    .collect();
                let color = match channels {
                    1 => image::ColorType::L8,
                    3 => image::ColorType::Rgb8,
                    4 => image::ColorType::Rgba8,
                    other => {
                        return Err(IoError::Unsupported(format!(
                            "{other}-channel 8-bit output"
                        )))
                    }
                };
                image::save_buffer(&self.path, &buf, width, height, color)
            }
            (ChannelFormat::F32 | ChannelFormat::F16, 3) => {
                let buf = image::Rgb32FImage::from_raw(width, height, pixels[..count].to_vec())
                    .expect("buffer length checked above");
                DynamicImage::ImageRgb32F(buf).save(&self.path)
            }
            (ChannelFormat::F32 | ChannelFormat::F16, 4) => {
                let buf = image::Rgba32FImage::from_raw(width, height, pixels[..count].to_vec())
                    .expect("buffer length checked above");
                DynamicImage::ImageRgba32F(buf).save(&self.path)
            }
            (format, channels) => {
                return Err(IoError::Unsupported(format!(
                    "{channels}-channel {format:?} output"
                )))
            }
        };

        result.map_err(|err| IoError::Write {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }
}
