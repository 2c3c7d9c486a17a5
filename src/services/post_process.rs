use camino::{Utf8Path, Utf8PathBuf};
use std::io;

use crate::models::PostAction;

/// What happened to the source file after a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Kept,
    Deleted,
    Moved(Utf8PathBuf),
    /// The upload still counts as successful; the file stays where it was
    Failed(String),
}

impl PostOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PostOutcome::Failed(_))
    }
}

/// Apply the configured post-upload action to `path`.
///
/// Delete takes precedence over move at configuration time, so `action` is
/// already the single effective choice. Errors are logged and reported as
/// [`PostOutcome::Failed`]; they never turn the upload into a failure.
pub async fn apply_post_action(action: &PostAction, path: &Utf8Path) -> PostOutcome {
    match action {
        PostAction::None => PostOutcome::Kept,
        PostAction::Delete => match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!("Deleted processed file: {}", path);
                PostOutcome::Deleted
            }
            Err(e) => {
                tracing::error!("Error deleting {}: {}", path, e);
                PostOutcome::Failed(e.to_string())
            }
        },
        PostAction::MoveTo(dir) => match move_into(path, dir).await {
            Ok(destination) => {
                tracing::info!("Moved processed file to: {}", destination);
                PostOutcome::Moved(destination)
            }
            Err(e) => {
                tracing::error!("Error moving {} to {}: {}", path, dir, e);
                PostOutcome::Failed(e.to_string())
            }
        },
    }
}

async fn move_into(path: &Utf8Path, dir: &Utf8Path) -> io::Result<Utf8PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("No file name in {}", path))
    })?;

    let destination = unique_destination(dir, file_name);
    tokio::fs::rename(path, &destination).await?;
    Ok(destination)
}

/// Pick a name inside `dir` that does not collide with an existing entry.
///
/// `report.xml` becomes `report_1.xml`, `report_2.xml`, ... as needed. Names
/// without an extension get the bare counter suffix.
pub fn unique_destination(dir: &Utf8Path, file_name: &str) -> Utf8PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Utf8Path::new(file_name);
    let stem = as_path.file_stem().unwrap_or(file_name);
    let extension = as_path.extension();

    let mut counter: u32 = 1;
    loop {
        let name = match extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
