use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use super::{Adapter, Completion, Extensions, Job, write_output};
use crate::core::Hash32;
use crate::error::AdapterError;
use crate::source::{SourceFile, Sources};

/// Lossless-ish optimization of raster images with the `image` crate.
///
/// PNG files are re-encoded with a compression effort picked from the
/// task's `compression_level` (0..=7), JPEG files are re-encoded with a
/// quality derived from it. GIF files, and any image whose re-encoded form
/// would be larger than the original, are copied as they are.
///
/// Optimized images are kept in a content-addressed cache, so unchanged
/// images are only ever processed once.
#[derive(Debug, Clone)]
pub struct Images {
    cache: Option<Utf8PathBuf>,
}

impl Images {
    pub fn new() -> Self {
        Self { cache: None }
    }

    pub fn cached(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            cache: Some(dir.into()),
        }
    }
}

impl Default for Images {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for Images {
    fn name(&self) -> &'static str {
        "image"
    }

    fn produces(&self, sources: &Sources) -> Extensions {
        Extensions::from_sources(sources)
    }

    fn writes_nested(&self, sources: &Sources) -> bool {
        sources.is_recursive()
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        let level = job.options.compression_level.min(7);
        let files = job.sources.expand()?;

        files
            .par_iter()
            .map(|file| {
                let path = job.dest.join(&file.rel);
                self.build_image(file, &path, level)?;
                Ok(path)
            })
            .collect::<Result<Vec<_>, AdapterError>>()
            .map(|written| Completion { written })
    }
}

impl Images {
    fn build_image(&self, file: &SourceFile, dest: &Utf8Path, level: u8) -> Result<(), AdapterError> {
        let buffer = fs::read(&file.path)?;

        let Some(cache) = &self.cache else {
            let data = optimize(&file.path, &buffer, level)?;
            return write_output(dest, data);
        };

        let ext = file.path.extension().unwrap_or_default().to_ascii_lowercase();
        let hash = Hash32::hash_parts([buffer.as_slice(), &[level][..]]).to_hex();
        let path_cache = cache.join("img").join(hash).with_extension(&ext);

        // If this hash exists it means the work is already done.
        if !path_cache.exists() {
            let data = optimize(&file.path, &buffer, level)?;
            write_output(&path_cache, data)?;
        }

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }

        // A previous run may have linked the very same cache file here.
        if dest.exists() {
            fs::remove_file(dest)?;
        }

        // hard link with fallback to copy
        if fs::hard_link(&path_cache, dest).is_err() {
            fs::copy(&path_cache, dest)?;
        }

        Ok(())
    }
}

fn optimize(path: &Utf8Path, buffer: &[u8], level: u8) -> Result<Vec<u8>, AdapterError> {
    let ext = path.extension().unwrap_or_default().to_ascii_lowercase();

    let out = match ext.as_str() {
        "png" => encode_png(buffer, level),
        "jpg" | "jpeg" => encode_jpeg(buffer, level),
        _ => return Ok(buffer.to_vec()),
    }
    .map_err(|e| AdapterError::input(path, e))?;

    if out.len() < buffer.len() {
        Ok(out)
    } else {
        Ok(buffer.to_vec())
    }
}

fn encode_png(buffer: &[u8], level: u8) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory(buffer)?;

    let compression = match level {
        0..=2 => CompressionType::Fast,
        3..=5 => CompressionType::Default,
        _ => CompressionType::Best,
    };

    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive).write_image(
        img.as_bytes(),
        img.width(),
        img.height(),
        img.color().into(),
    )?;

    Ok(out)
}

fn encode_jpeg(buffer: &[u8], level: u8) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory(buffer)?;
    let rgb = img.to_rgb8();
    let quality = 100 - 2 * level;

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::adapter::testing::{Project, prod};

    fn png(project: &Project, rel: &str) -> Utf8PathBuf {
        let path = project.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 0]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn optimized_png_is_still_a_png() {
        let project = Project::new();
        png(&project, "src/img/photo.png");

        let done = project
            .apply(&Images::new(), &["src/img/**/*.png"], "build/img", &prod())
            .unwrap();

        assert_eq!(done.written.len(), 1);
        let out = image::open(project.root.join("build/img/photo.png")).unwrap();
        assert_eq!((out.width(), out.height()), (32, 32));
    }

    #[test]
    fn gif_is_copied_verbatim() {
        let project = Project::new();
        project.write("src/img/anim.gif", b"GIF89a-not-really");

        project
            .apply(&Images::new(), &["src/img/**/*.gif"], "build/img", &prod())
            .unwrap();

        assert_eq!(project.read("build/img/anim.gif"), "GIF89a-not-really");
    }

    #[test]
    fn broken_png_names_the_file() {
        let project = Project::new();
        let broken = project.write("src/img/broken.png", b"not a png");

        let err = project
            .apply(&Images::new(), &["src/img/*.png"], "build/img", &prod())
            .unwrap_err();

        assert_eq!(err.file(), Some(broken.as_path()));
    }

    #[test]
    fn cache_is_reused() {
        let project = Project::new();
        png(&project, "src/img/nested/photo.png");
        let images = Images::cached(project.root.join(".cache"));

        project
            .apply(&images, &["src/img/**/*.png"], "build/img", &prod())
            .unwrap();

        let cached: Vec<_> = fs::read_dir(project.root.join(".cache/img")).unwrap().collect();
        assert_eq!(cached.len(), 1);

        fs::remove_dir_all(project.root.join("build")).unwrap();
        project
            .apply(&images, &["src/img/**/*.png"], "build/img", &prod())
            .unwrap();

        assert!(project.exists("build/img/nested/photo.png"));
        let cached: Vec<_> = fs::read_dir(project.root.join(".cache/img")).unwrap().collect();
        assert_eq!(cached.len(), 1);
    }
}
