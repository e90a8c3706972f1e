//! Upload stage: owns the transfer session for its whole lifetime.

use std::io;

use camino::Utf8Path;

use crate::archive::{ARCHIVE_NAME, Archive};
use crate::config::DeployConfig;
use crate::session::{
    SessionConnector, SessionTarget, TransferError, TransferSession, join_remote,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ArtifactKind {
    Directory,
    File,
}

fn artifact_kind(from: &Utf8Path) -> Result<ArtifactKind, TransferError> {
    let metadata = from.metadata().map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => TransferError::LocalPathMissing {
            path: from.to_path_buf(),
        },
        _ => TransferError::Local {
            path: from.to_string(),
            message: err.to_string(),
        },
    })?;
    if metadata.is_dir() {
        Ok(ArtifactKind::Directory)
    } else if metadata.is_file() {
        Ok(ArtifactKind::File)
    } else {
        Err(TransferError::UnsupportedFileType {
            path: from.to_path_buf(),
        })
    }
}

/// Uploads the artifact, plus the archive when one was produced.
///
/// A directory is uploaded as a whole tree. `exclude` patterns only narrow
/// the archive; excluded entries are still sent by the tree upload.
///
/// The local path and remote target are checked before a session is opened.
/// Once opened, the transfer session is closed before returning on every
/// path.
///
/// # Errors
///
/// Returns [`TransferError`] when preconditions fail, the session cannot be
/// opened, an upload fails, or the session cannot be closed.
pub async fn upload<C: SessionConnector>(
    connector: &C,
    config: &DeployConfig,
    target: &SessionTarget,
    archive: Option<&Archive>,
) -> Result<(), TransferError> {
    let from = config.from.as_path();
    let kind = artifact_kind(from)?;
    let to = config
        .to
        .as_deref()
        .ok_or(TransferError::MissingDestination)?;

    let mut session = connector
        .connect_transfer(target)
        .await
        .map_err(TransferError::Connect)?;
    log::info!("Connected to transfer session.");

    let transferred = send(&mut session, from, kind, to, archive).await;
    let closed = session.close().await;
    log::info!("Transfer session closed.");

    match (transferred, closed) {
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                log::warn!("{close_err}");
            }
            log::error!("Upload failed: {err}");
            Err(err)
        }
        (Ok(()), closed) => {
            closed?;
            log::info!("Upload completed successfully.");
            Ok(())
        }
    }
}

async fn send<T: TransferSession>(
    session: &mut T,
    from: &Utf8Path,
    kind: ArtifactKind,
    to: &str,
    archive: Option<&Archive>,
) -> Result<(), TransferError> {
    match kind {
        ArtifactKind::Directory => {
            log::info!("Uploading directory: {from} to {to}");
            session.upload_tree(from, to).await?;
        }
        ArtifactKind::File => {
            let name = from.file_name().unwrap_or(from.as_str());
            let remote = join_remote(to, name);
            log::info!("Uploading file: {from} to {remote}");
            session.upload_file(from, &remote).await?;
        }
    }

    if let Some(archive) = archive {
        let remote = join_remote(to, ARCHIVE_NAME);
        log::info!("Uploading archive: {} to {remote}", archive.path());
        session.upload_file(archive.path(), &remote).await?;
    }
    Ok(())
}
