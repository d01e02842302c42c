use super::{Library, LibraryError};
use chrono::{DateTime, NaiveDateTime, Utc};
use image::{DynamicImage, ImageEncoder, codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};

impl Library {
    /// Derives the bounded-size JPEG preview for an original, correcting for
    /// the embedded EXIF orientation. Re-entrant: an up-to-date thumbnail is
    /// left alone, a stale or missing one is regenerated.
    pub async fn generate_thumbnail(
        &self,
        principal: &str,
        filename: &str,
    ) -> Result<PathBuf, LibraryError> {
        let original = self.original_path(principal, filename);
        let dest = self.thumbnail_path(principal, filename);

        let original_modified = tokio::fs::metadata(&original).await?.modified()?;
        if let Ok(dest_metadata) = tokio::fs::metadata(&dest).await
            && let Ok(dest_modified) = dest_metadata.modified()
            && dest_modified >= original_modified
        {
            return Ok(dest);
        }

        tokio::fs::create_dir_all(self.thumbnails_dir(principal)).await?;

        let max_width = self.thumbnails.width;
        let max_height = self.thumbnails.height;
        let quality = self.thumbnails.quality;
        let original_clone = original.clone();
        let dest_clone = dest.clone();

        tokio::task::spawn_blocking(move || {
            process_thumbnail(&original_clone, &dest_clone, max_width, max_height, quality)
        })
        .await
        .map_err(|e| LibraryError::IoError(std::io::Error::other(e)))??;

        debug!("Generated thumbnail for {} / {}", principal, filename);
        Ok(dest)
    }

    /// Shot date for an original. EXIF capture time wins; a file without one
    /// falls back to the filesystem creation time when the filesystem reports
    /// a real one, and to the last-modified time otherwise.
    pub async fn extract_shot_date(&self, path: &Path) -> Result<DateTime<Utc>, LibraryError> {
        if let Some(date) = extract_exif_date(path) {
            return Ok(date);
        }

        let metadata = tokio::fs::metadata(path).await?;

        if let Ok(created) = metadata.created()
            && created > SystemTime::UNIX_EPOCH
        {
            return Ok(DateTime::<Utc>::from(created));
        }

        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }
}

fn process_thumbnail(
    original: &Path,
    dest: &Path,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<(), LibraryError> {
    let file = std::fs::File::open(original)?;
    let decoder = image::ImageReader::new(std::io::BufReader::new(file)).with_guessed_format()?;
    let img = decoder.decode()?;
    let img = apply_exif_orientation(original, img);

    let (orig_width, orig_height) = (img.width(), img.height());

    // Don't upscale - if requested dimensions are larger than original, use original
    let final_width = max_width.min(orig_width);
    let final_height = max_height.min(orig_height);

    let resized = if final_width != orig_width || final_height != orig_height {
        img.resize(final_width, final_height, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG doesn't support alpha channel, so convert to RGB
    let rgb_image = resized.to_rgb8();
    let output = std::fs::File::create(dest)?;
    let encoder = JpegEncoder::new_with_quality(output, quality);
    encoder.write_image(
        &rgb_image,
        rgb_image.width(),
        rgb_image.height(),
        image::ExtendedColorType::Rgb8,
    )?;

    Ok(())
}

/// Rotates/flips decoded pixels upright per the EXIF orientation tag, so the
/// emitted thumbnail needs no orientation metadata of its own.
fn apply_exif_orientation(path: &Path, img: DynamicImage) -> DynamicImage {
    let orientation = match rexif::parse_file(path) {
        Ok(exif) => exif
            .entries
            .iter()
            .find(|e| e.tag == rexif::ExifTag::Orientation)
            .and_then(|e| match &e.value {
                rexif::TagValue::U16(values) => values.first().copied(),
                _ => None,
            }),
        Err(e) => {
            trace!("No EXIF data for {}: {}", path.display(), e);
            None
        }
    };

    match orientation {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

fn extract_exif_date(path: &Path) -> Option<DateTime<Utc>> {
    let exif = match rexif::parse_file(path) {
        Ok(exif) => exif,
        Err(e) => {
            trace!("No EXIF data for {}: {}", path.display(), e);
            return None;
        }
    };

    // Try different date fields in order of preference
    let date_fields = [
        rexif::ExifTag::DateTimeOriginal,
        rexif::ExifTag::DateTimeDigitized,
        rexif::ExifTag::DateTime,
    ];

    for field in &date_fields {
        if let Some(entry) = exif.entries.iter().find(|e| e.tag == *field)
            && let Some(date) = parse_exif_datetime(&entry.value_more_readable)
        {
            debug!("Found capture date in {:?}: {:?}", field, date);
            return Some(date);
        }
    }

    None
}

fn parse_exif_datetime(datetime_str: &str) -> Option<DateTime<Utc>> {
    // EXIF datetime format: "2005:07:30 07:22:46"
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y:%m:%d %H:%M:%S") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
    }

    // Try alternative formats
    let formats = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];
    for format in &formats {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(datetime_str, format) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
        }
    }

    // Date-only values get midnight
    let date_formats = ["%Y:%m:%d", "%Y-%m-%d", "%Y/%m/%d"];
    for format in &date_formats {
        let with_time = format!("{} 00:00:00", datetime_str);
        let format_with_time = format!("{} %H:%M:%S", format);
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(&with_time, &format_with_time) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::super::Library;
    use super::*;
    use tempfile::TempDir;

    fn test_library(temp_dir: &TempDir) -> Library {
        let mut config = crate::Config::default();
        config.storage.root_directory = temp_dir.path().to_path_buf();
        Library::new(config.storage, config.thumbnails)
    }

    fn create_test_image(path: &Path, width: u32, height: u32) {
        use image::{ImageBuffer, Rgb};

        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_parse_exif_datetime_formats() {
        let parsed = parse_exif_datetime("2005:07:30 07:22:46").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2005-07-30T07:22:46+00:00");

        let parsed = parse_exif_datetime("2024-01-15 10:00:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T10:00:00+00:00");

        let parsed = parse_exif_datetime("2024:01:15").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T00:00:00+00:00");

        assert!(parse_exif_datetime("not a date").is_none());
    }

    #[tokio::test]
    async fn test_shot_date_falls_back_to_file_times_without_exif() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let path = temp_dir.path().join("plain.jpg");
        create_test_image(&path, 32, 32);

        let shot_date = library.extract_shot_date(&path).await.unwrap();

        // An image-crate JPEG carries no EXIF block, so the date must come
        // from the filesystem: birth time where the platform reports one past
        // the epoch, last-modified otherwise.
        let metadata = std::fs::metadata(&path).unwrap();
        let expected = match metadata.created() {
            Ok(created) if created > SystemTime::UNIX_EPOCH => created,
            _ => metadata.modified().unwrap(),
        };
        assert_eq!(shot_date, DateTime::<Utc>::from(expected));
    }

    #[tokio::test]
    async fn test_thumbnail_bounded_and_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let originals = library.originals_dir("alice");
        std::fs::create_dir_all(&originals).unwrap();
        create_test_image(&originals.join("big.jpg"), 900, 600);

        let thumb = library.generate_thumbnail("alice", "big.jpg").await.unwrap();
        let (w1, h1) = image::image_dimensions(&thumb).unwrap();
        assert!(w1 <= 300 && h1 <= 300);

        // Repeated generation yields the same dimensions
        std::fs::remove_file(&thumb).unwrap();
        let thumb = library.generate_thumbnail("alice", "big.jpg").await.unwrap();
        let (w2, h2) = image::image_dimensions(&thumb).unwrap();
        assert_eq!((w1, h1), (w2, h2));
    }

    #[tokio::test]
    async fn test_thumbnail_never_upscales() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let originals = library.originals_dir("alice");
        std::fs::create_dir_all(&originals).unwrap();
        create_test_image(&originals.join("small.jpg"), 40, 20);

        let thumb = library
            .generate_thumbnail("alice", "small.jpg")
            .await
            .unwrap();
        let (w, h) = image::image_dimensions(&thumb).unwrap();
        assert_eq!((w, h), (40, 20));
    }

    #[tokio::test]
    async fn test_thumbnail_of_corrupt_input_is_codec_error() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(&temp_dir);

        let originals = library.originals_dir("alice");
        std::fs::create_dir_all(&originals).unwrap();
        std::fs::write(originals.join("broken.jpg"), b"not an image").unwrap();

        let err = library
            .generate_thumbnail("alice", "broken.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::CodecError(_)));
    }
}
