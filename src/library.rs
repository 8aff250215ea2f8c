//! Whole-photo operations spanning the store and the two file areas.
//!
//! `originals/` holds uploads as received; `display/` holds the converted
//! bitmaps. Both the rotation engine and the HTTP handlers go through
//! [`PhotoLibrary`], so it is the only code touching those directories.
//! File writes are not transactional with row updates: re-converting simply
//! overwrites the bitmap and re-marks the row.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::{Database, Photo, PhotoKey, StoreStats};
use crate::display::DisplaySink;
use crate::error::{Error, Result};
use crate::transcode::{self, Dimensions};

/// The panel, shared between the rotation engine and on-demand requests.
pub type SharedSink = Arc<Mutex<Box<dyn DisplaySink>>>;

pub struct PhotoLibrary {
    db: Arc<Database>,
    sink: SharedSink,
    originals_dir: PathBuf,
    display_dir: PathBuf,
    target: Dimensions,
    allowed_extensions: Vec<String>,
}

/// Store statistics plus the number of photos waiting for conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryStatus {
    pub stats: StoreStats,
    pub pending_conversions: u64,
}

impl PhotoLibrary {
    pub fn new(db: Arc<Database>, sink: Box<dyn DisplaySink>, config: &Config) -> Result<Self> {
        let library = Self {
            db,
            sink: Arc::new(Mutex::new(sink)),
            originals_dir: config.originals_dir(),
            display_dir: config.display_dir(),
            target: config.display.dimensions(),
            allowed_extensions: config
                .upload
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
        };
        std::fs::create_dir_all(&library.originals_dir)?;
        std::fs::create_dir_all(&library.display_dir)?;
        Ok(library)
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn originals_dir(&self) -> &Path {
        &self.originals_dir
    }

    pub fn display_dir(&self) -> &Path {
        &self.display_dir
    }

    // ========================================================================
    // Filename checks
    // ========================================================================

    /// Whether the extension is on the upload allow-list (case-insensitive).
    pub fn allowed_file(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            }
            _ => false,
        }
    }

    /// Reject anything that is not a plain file name inside the photo areas.
    pub fn validate_filename(filename: &str) -> Result<()> {
        let valid = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\', '\0'])
            && !filename.starts_with('.');
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidFilename(filename.to_string()))
        }
    }

    fn check_upload_name(&self, filename: &str) -> Result<()> {
        Self::validate_filename(filename)?;
        if !self.allowed_file(filename) {
            return Err(Error::UnsupportedType(filename.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Store a new upload. The row is inserted first so the store decides
    /// uniqueness; if the file can not be written the row is removed again.
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<Photo> {
        self.check_upload_name(filename)?;

        let original_path = self.originals_dir.join(filename);
        let id = self.db.insert(filename, &original_path)?;

        if let Err(e) = tokio::fs::write(&original_path, bytes).await {
            tracing::error!(filename, error = %e, "Error saving upload");
            if let Err(cleanup) = self.db.delete(PhotoKey::Id(id)) {
                tracing::error!(photo_id = id, error = %cleanup, "Failed to remove row of unsaved upload");
            }
            return Err(e.into());
        }

        tracing::info!(filename, bytes = bytes.len(), "Saved upload");
        self.db.get(PhotoKey::Id(id))
    }

    /// Path of an uploaded original, for serving it back.
    pub fn original_path(&self, filename: &str) -> Result<PathBuf> {
        self.check_upload_name(filename)?;
        let path = self.originals_dir.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NotFound(filename.to_string()))
        }
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    /// Where the bitmap for `photo` goes: `{stem}.bmp`, or `{stem}-{id}.bmp`
    /// (then `{stem}-{id}-{n}.bmp`) when another photo already owns that
    /// name. The store claims the path atomically.
    fn display_path_for(&self, photo: &Photo) -> Result<PathBuf> {
        let stem = Path::new(&photo.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| photo.filename.clone());
        let id = photo.id;
        let dir = self.display_dir.clone();

        let candidates = std::iter::once(format!("{}.bmp", stem))
            .chain(std::iter::once(format!("{}-{}.bmp", stem, id)))
            .chain((1u64..).map(move |n| format!("{}-{}-{}.bmp", stem, id, n)))
            .map(move |name| dir.join(name));

        self.db.reserve_display_path(photo.id, candidates)
    }

    /// Transcode one photo and mark it converted. Safe to repeat: the bitmap
    /// is overwritten and the row re-marked.
    pub async fn convert_photo(&self, photo: &Photo) -> Result<Photo> {
        let input = photo.original_path.clone();
        let output = self.display_path_for(photo)?;
        let target = self.target;

        let output_for_task = output.clone();
        tokio::task::spawn_blocking(move || transcode::convert_file(&input, &output_for_task, target))
            .await
            .map_err(|e| Error::conversion(&photo.filename, e))??;

        self.db.mark_converted(photo.id, &output)?;
        tracing::info!(filename = %photo.filename, output = %output.display(), "Converted photo");
        self.db.get(PhotoKey::Id(photo.id))
    }

    /// On-demand conversion by filename.
    pub async fn convert(&self, filename: &str) -> Result<Photo> {
        Self::validate_filename(filename)?;
        let photo = self.db.get(filename)?;
        self.convert_photo(&photo).await
    }

    // ========================================================================
    // Display
    // ========================================================================

    /// Show one photo on the panel and count the display. Converts first when
    /// the photo has no usable bitmap yet.
    pub async fn display_photo(&self, photo: &Photo) -> Result<Photo> {
        let has_bitmap = photo.converted
            && photo.display_path.as_deref().is_some_and(Path::is_file);
        let photo = if has_bitmap {
            photo.clone()
        } else {
            tracing::info!(filename = %photo.filename, "No bitmap yet, converting before display");
            self.convert_photo(photo).await?
        };

        let bitmap_path = photo
            .display_path
            .clone()
            .ok_or_else(|| Error::RenderFailed(format!("{} has no bitmap", photo.filename)))?;
        let bitmap = tokio::fs::read(&bitmap_path).await.map_err(|e| {
            Error::RenderFailed(format!("cannot read {}: {}", bitmap_path.display(), e))
        })?;

        self.render(bitmap).await?;
        tracing::info!(photo_id = photo.id, filename = %photo.filename, "Displayed photo");

        let recorded = self
            .db
            .record_display(photo.id)
            .and_then(|()| self.db.get(PhotoKey::Id(photo.id)));
        match recorded {
            Ok(shown) => Ok(shown),
            Err(Error::NotFound(_)) => {
                tracing::warn!(
                    photo_id = photo.id,
                    filename = %photo.filename,
                    "Photo deleted while it was being displayed"
                );
                Ok(Photo {
                    display_count: photo.display_count + 1,
                    last_displayed: Some(chrono::Utc::now()),
                    ..photo
                })
            }
            Err(e) => Err(e),
        }
    }

    /// On-demand display by filename.
    pub async fn display(&self, filename: &str) -> Result<Photo> {
        Self::validate_filename(filename)?;
        let photo = self.db.get(filename)?;
        self.display_photo(&photo).await
    }

    /// Hand a bitmap to the sink on the blocking pool; one render at a time.
    /// The panel is put to sleep after every successful render.
    async fn render(&self, bitmap: Vec<u8>) -> Result<()> {
        let mut sink = self.sink.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            sink.render(&bitmap)?;
            if let Err(e) = sink.sleep() {
                tracing::warn!(sink = sink.name(), error = %e, "Failed to put display to sleep");
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::RenderFailed(format!("render task failed: {}", e)))?
    }

    /// Blank the panel and power it down, e.g. before the process exits.
    /// Failures are logged only.
    pub async fn power_down_display(&self) {
        let mut sink = self.sink.clone().lock_owned().await;
        let result = tokio::task::spawn_blocking(move || {
            if let Err(e) = sink.clear() {
                tracing::warn!(sink = sink.name(), error = %e, "Failed to clear display");
            }
            if let Err(e) = sink.sleep() {
                tracing::warn!(sink = sink.name(), error = %e, "Failed to put display to sleep");
            }
        })
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Display power-down task failed");
        }
    }

    // ========================================================================
    // Removal and status
    // ========================================================================

    /// Remove the row, the original and the bitmap. Returns false when
    /// neither a row nor an original existed.
    pub async fn delete(&self, filename: &str) -> Result<bool> {
        Self::validate_filename(filename)?;

        let photo = match self.db.get(filename) {
            Ok(photo) => Some(photo),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let removed_row = self.db.delete(filename)?;

        let original = photo
            .as_ref()
            .map(|p| p.original_path.clone())
            .unwrap_or_else(|| self.originals_dir.join(filename));
        let removed_original = remove_if_present(&original).await?;

        if let Some(bitmap) = photo.as_ref().and_then(|p| p.display_path.as_ref()) {
            remove_if_present(bitmap).await?;
        }

        if removed_row || removed_original {
            tracing::info!(filename, "Deleted photo");
        }
        Ok(removed_row || removed_original)
    }

    pub fn status(&self) -> Result<LibraryStatus> {
        Ok(LibraryStatus {
            stats: self.db.stats()?,
            pending_conversions: self.db.pending_conversions()?,
        })
    }
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
