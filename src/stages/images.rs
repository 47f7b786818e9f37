//! Image optimization (`images`) and sprite sheets (`images:sprite`).
//!
//! The optimizer is picked once per run: the local [`Standard`] re-encoder by
//! default, the remote [`Tinify`] service with `--option advanced`.

use std::fs;

use anyhow::Context;
use camino::Utf8Path;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;

use crate::config::Config;
use crate::engine::{Completion, Options, TaskContext, TaskResult};
use crate::error::ConfigError;
use crate::notice::Notice;
use crate::stages::{Invocation, collect_sources, command_for, run_command};

/// Shrinks image files in place.
pub trait ImageOptimizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extensions of the files this optimizer accepts.
    fn extensions(&self) -> &'static [&'static str];

    /// Optimize the image at `path` in place, returning the number of bytes
    /// saved.
    fn optimize(&self, path: &Utf8Path) -> anyhow::Result<u64>;
}

/// Pick the optimizer for this invocation.
pub fn select(config: &Config, options: &Options) -> Result<Box<dyn ImageOptimizer>, ConfigError> {
    if options.advanced {
        let key = config.tinify_key()?;
        tinify(key)
    } else {
        standard()
    }
}

#[cfg(feature = "tinify")]
fn tinify(key: &str) -> Result<Box<dyn ImageOptimizer>, ConfigError> {
    Ok(Box::new(Tinify::new(key)))
}

#[cfg(not(feature = "tinify"))]
fn tinify(_: &str) -> Result<Box<dyn ImageOptimizer>, ConfigError> {
    Err(ConfigError::FeatureDisabled("tinify"))
}

#[cfg(feature = "images")]
fn standard() -> Result<Box<dyn ImageOptimizer>, ConfigError> {
    Ok(Box::new(Standard::default()))
}

#[cfg(not(feature = "images"))]
fn standard() -> Result<Box<dyn ImageOptimizer>, ConfigError> {
    Err(ConfigError::FeatureDisabled("images"))
}

pub fn run(ctx: &TaskContext<'_>) -> TaskResult {
    if !ctx.options.advanced {
        Notice::info(
            "Default options passed to images task.\n\
             To change that, add command arguments to this task ---> kobo [images / build / build:server] --option advanced.",
        )
        .title("images")
        .emit();
    }

    let optimizer = match select(ctx.config, ctx.options) {
        Ok(optimizer) => optimizer,
        Err(err) => return Ok(Completion::Refused(err)),
    };

    let saved = optimize_dir(optimizer.as_ref(), &ctx.config.directory.dist)?;
    tracing::info!(optimizer = optimizer.name(), saved, "images optimized");

    Ok(Completion::Done)
}

/// Optimize every image under `<dist>/images` accepted by `optimizer`, in
/// parallel. Returns the total number of bytes saved.
pub fn optimize_dir(optimizer: &dyn ImageOptimizer, dist: &Utf8Path) -> anyhow::Result<u64> {
    let patterns: Vec<String> = optimizer
        .extensions()
        .iter()
        .map(|ext| format!("images/**/*.{ext}"))
        .collect();
    let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();

    let files = collect_sources(dist, &patterns)?;

    files
        .par_iter()
        .map(|file| {
            optimizer
                .optimize(file)
                .with_context(|| format!("couldn't optimize {file}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map(|saved| saved.into_iter().sum())
}

/// Local re-encoder: PNG at maximum compression, JPEG at a fixed quality.
/// A file is only replaced when the result is smaller.
#[cfg(feature = "images")]
#[derive(Debug, Clone)]
pub struct Standard {
    pub jpeg_quality: u8,
}

#[cfg(feature = "images")]
impl Default for Standard {
    fn default() -> Self {
        Self { jpeg_quality: 85 }
    }
}

#[cfg(feature = "images")]
impl ImageOptimizer for Standard {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg", "png"]
    }

    fn optimize(&self, path: &Utf8Path) -> anyhow::Result<u64> {
        use std::io::Cursor;

        use image::codecs::jpeg::JpegEncoder;
        use image::codecs::png::{CompressionType, FilterType, PngEncoder};
        use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};

        let source = fs::read(path)?;
        let reader = ImageReader::new(Cursor::new(&source)).with_guessed_format()?;
        let format = reader.format();
        let img = reader.decode()?;
        let (width, height) = (img.width(), img.height());

        let mut encoded = Vec::new();
        match format {
            Some(ImageFormat::Png) => {
                let rgba = img.to_rgba8();
                PngEncoder::new_with_quality(&mut encoded, CompressionType::Best, FilterType::Adaptive)
                    .write_image(&rgba, width, height, ExtendedColorType::Rgba8)?;
            }
            Some(ImageFormat::Jpeg) => {
                let rgb = img.to_rgb8();
                JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality)
                    .write_image(&rgb, width, height, ExtendedColorType::Rgb8)?;
            }
            other => {
                tracing::debug!(%path, ?other, "unsupported format, skipping");
                return Ok(0);
            }
        }

        if encoded.len() >= source.len() {
            return Ok(0);
        }

        fs::write(path, &encoded)?;
        Ok((source.len() - encoded.len()) as u64)
    }
}

/// Remote optimizer backed by the TinyPNG API.
#[cfg(feature = "tinify")]
pub struct Tinify {
    client: reqwest::blocking::Client,
    key: String,
    endpoint: String,
}

#[cfg(feature = "tinify")]
#[derive(serde::Deserialize)]
struct Shrink {
    output: ShrinkOutput,
}

#[cfg(feature = "tinify")]
#[derive(serde::Deserialize)]
struct ShrinkOutput {
    url: String,
}

#[cfg(feature = "tinify")]
impl Tinify {
    pub const ENDPOINT: &'static str = "https://api.tinify.com/shrink";

    pub fn new(key: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            key: key.into(),
            endpoint: Self::ENDPOINT.into(),
        }
    }
}

#[cfg(feature = "tinify")]
impl ImageOptimizer for Tinify {
    fn name(&self) -> &'static str {
        "tinify"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "png"]
    }

    fn optimize(&self, path: &Utf8Path) -> anyhow::Result<u64> {
        let source = fs::read(path)?;
        let size = source.len();

        let shrink: Shrink = self
            .client
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.key))
            .body(source)
            .send()?
            .error_for_status()?
            .json()?;

        let optimized = self
            .client
            .get(&shrink.output.url)
            .basic_auth("api", Some(&self.key))
            .send()?
            .error_for_status()?
            .bytes()?;

        fs::write(path, &optimized)?;
        Ok(size.saturating_sub(optimized.len()) as u64)
    }
}

/// File names of a generated sprite sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteNames {
    /// Stylesheet partial, `_sprite` by default.
    pub css_name: String,
    /// Image base name: the stylesheet name without its leading `_`.
    pub img_name: String,
}

impl SpriteNames {
    pub fn new(name: Option<&str>) -> Self {
        let css_name = name.unwrap_or("_sprite").to_string();
        let img_name = css_name.strip_prefix('_').unwrap_or(&css_name).to_string();

        Self { css_name, img_name }
    }

    /// Path of the image as referenced from the compiled stylesheet.
    pub fn img_path(&self) -> String {
        format!("../images/{}.png", self.img_name)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpriteLocals<'a> {
    img_name: String,
    css_name: String,
    img_path: String,
    css_out: &'a str,
}

pub fn run_sprite(ctx: &TaskContext<'_>) -> TaskResult {
    let name = ctx.options.sprite_name.as_deref();

    if name.is_none() {
        Notice::info(
            "Default options passed to images:sprite task.\n\
             To change that, add command arguments to this task ---> kobo images:sprite --name [_FILE_NAME].",
        )
        .title("images:sprite")
        .emit();
    }

    let Some(spec) = command_for(ctx, "images:sprite") else {
        return Ok(Completion::Done);
    };

    let names = SpriteNames::new(name);
    let work = &ctx.config.directory.work;
    let sources = collect_sources(
        work,
        &[
            "images/sprites_sources/**/*.jpg",
            "images/sprites_sources/**/*.png",
            "images/sprites_sources/**/*.gif",
        ],
    )?;

    if sources.is_empty() {
        tracing::info!("no sprite sources found");
        return Ok(Completion::Done);
    }

    let img_out = work.join(format!("images/{}.png", names.img_name));
    let css_out = work.join(format!("sass/components/sprites/{}.scss", names.css_name));
    fs::create_dir_all(work.join("sass/components/sprites"))?;

    let locals = serde_json::to_string(&SpriteLocals {
        img_name: format!("{}.png", names.img_name),
        css_name: format!("{}.scss", names.css_name),
        img_path: names.img_path(),
        css_out: css_out.as_str(),
    })?;

    run_command(
        spec,
        &Invocation {
            file: None,
            files: &sources,
            out: Some(&img_out),
            locals: Some(&locals),
            input: None,
        },
    )?;

    Ok(Completion::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_names_default() {
        let names = SpriteNames::new(None);
        assert_eq!(names.css_name, "_sprite");
        assert_eq!(names.img_name, "sprite");
        assert_eq!(names.img_path(), "../images/sprite.png");
    }

    #[test]
    fn sprite_names_strip_one_underscore() {
        assert_eq!(SpriteNames::new(Some("_icons")).img_name, "icons");
        assert_eq!(SpriteNames::new(Some("icons")).img_name, "icons");
        assert_eq!(SpriteNames::new(Some("__icons")).img_name, "_icons");
    }

    #[test]
    fn advanced_without_key_is_refused() {
        let options = Options {
            advanced: true,
            ..Options::default()
        };

        let err = select(&Config::default(), &options).err().unwrap();
        assert!(matches!(err, ConfigError::MissingApiKey(_)));
    }

    #[cfg(feature = "images")]
    #[test]
    fn standard_is_the_default() {
        let optimizer = select(&Config::default(), &Options::default()).unwrap();
        assert_eq!(optimizer.name(), "standard");
    }

    #[cfg(feature = "tinify")]
    #[test]
    fn advanced_with_key_uses_tinify() {
        let mut config = Config::default();
        config.api_keys.tinify = "secret".into();
        let options = Options {
            advanced: true,
            ..Options::default()
        };

        assert_eq!(select(&config, &options).unwrap().name(), "tinify");
    }

    #[cfg(feature = "images")]
    #[test]
    fn standard_optimizes_only_images() {
        use image::{ImageBuffer, Rgba};

        let dir = tempfile::tempdir().unwrap();
        let dist = camino::Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(dist.join("images")).unwrap();

        let img = ImageBuffer::from_pixel(64, 64, Rgba([200u8, 10, 10, 255]));
        img.save(dist.join("images/red.png")).unwrap();
        fs::write(dist.join("images/notes.txt"), "not an image").unwrap();

        let before = fs::metadata(dist.join("images/red.png")).unwrap().len();
        let saved = optimize_dir(&Standard::default(), &dist).unwrap();
        let after = fs::metadata(dist.join("images/red.png")).unwrap().len();

        assert_eq!(before - after, saved);
        assert_eq!(fs::read_to_string(dist.join("images/notes.txt")).unwrap(), "not an image");
    }
}
