use super::{StorageBackend, UploadError};
use crate::config::NasProtocol;
use async_trait::async_trait;
use ssh2::Session;
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::{debug, info, instrument, warn};

/// NAS adapter: uploads over FTP or SFTP with password authentication.
///
/// Every destination path is rooted under the configured base folder, and
/// missing remote directories are created segment by segment before the
/// transfer. Both protocols are blocking; the work runs on the blocking
/// thread pool.
pub struct NasBackend {
    host: String,
    port: u16,
    user: String,
    pass: String,
    protocol: NasProtocol,
    base_folder: String,
}

impl NasBackend {
    pub fn new(
        host: String,
        port: u16,
        user: String,
        pass: String,
        protocol: NasProtocol,
        base_folder: String,
    ) -> Self {
        Self {
            host,
            port,
            user,
            pass,
            protocol,
            base_folder,
        }
    }

    /// Root the destination under the base folder and split off the leaf.
    /// `acme/ord_1/model/123.jpg` -> (`base/acme/ord_1/model`, `123.jpg`).
    fn resolve_target(&self, path: &str) -> (String, String) {
        let relative = path.trim().trim_start_matches('/');
        let base = self.base_folder.trim().trim_matches('/');

        let (dir_part, leaf) = match relative.rsplit_once('/') {
            Some((dir, leaf)) => (dir, leaf),
            None => ("", relative),
        };

        let folder = match (base.is_empty(), dir_part.is_empty()) {
            (true, _) => dir_part.to_string(),
            (false, true) => base.to_string(),
            (false, false) => format!("{base}/{dir_part}"),
        };

        (folder, leaf.to_string())
    }

    fn ftp_upload(&self, local: PathBuf, folder: String, leaf: String) -> Result<String, UploadError> {
        let mut ftp = FtpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| UploadError::Transfer(format!("ftp connect: {e}")))?;
        ftp.login(&self.user, &self.pass)
            .map_err(|e| UploadError::Auth(format!("ftp login: {e}")))?;

        ftp.transfer_type(FileType::Binary)
            .map_err(|e| UploadError::Transfer(format!("ftp binary mode: {e}")))?;
        ftp.set_mode(Mode::Passive);

        // Create the directory chain; an existing segment just becomes cwd
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            if ftp.cwd(segment).is_err() {
                ftp.mkdir(segment)
                    .map_err(|e| UploadError::RemoteDir(format!("mkdir {segment}: {e}")))?;
                ftp.cwd(segment)
                    .map_err(|e| UploadError::RemoteDir(format!("cwd {segment}: {e}")))?;
            }
        }

        let mut file = std::fs::File::open(&local)?;
        ftp.put_file(&leaf, &mut file)
            .map_err(|e| UploadError::Transfer(format!("ftp store {leaf}: {e}")))?;

        let _ = ftp.quit();

        Ok(format!(
            "ftp://{}:{}/{}/{}",
            self.host, self.port, folder, leaf
        ))
    }

    fn sftp_session(&self) -> Result<Session, UploadError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| UploadError::Transfer(format!("sftp connect: {e}")))?;

        let mut session =
            Session::new().map_err(|e| UploadError::Transfer(format!("sftp session: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| UploadError::Transfer(format!("sftp handshake: {e}")))?;
        session
            .userauth_password(&self.user, &self.pass)
            .map_err(|e| UploadError::Auth(format!("sftp auth: {e}")))?;

        Ok(session)
    }

    fn sftp_upload(&self, local: PathBuf, folder: String, leaf: String) -> Result<String, UploadError> {
        let session = self.sftp_session()?;
        let sftp = session
            .sftp()
            .map_err(|e| UploadError::Transfer(format!("sftp channel: {e}")))?;

        // Create the directory chain relative to the login directory
        let mut current = PathBuf::new();
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            current.push(segment);
            if sftp.stat(&current).is_err() {
                sftp.mkdir(&current, 0o755)
                    .map_err(|e| UploadError::RemoteDir(format!("mkdir {segment}: {e}")))?;
            }
        }

        let bytes = std::fs::read(&local)?;
        let remote = current.join(&leaf);
        let mut remote_file = sftp
            .create(&remote)
            .map_err(|e| UploadError::Transfer(format!("sftp create {leaf}: {e}")))?;
        remote_file
            .write_all(&bytes)
            .map_err(|e| UploadError::Transfer(format!("sftp write {leaf}: {e}")))?;

        Ok(format!(
            "sftp://{}:{}/{}/{}",
            self.host, self.port, folder, leaf
        ))
    }

    fn probe(&self) -> bool {
        match self.protocol {
            NasProtocol::Ftp => {
                let connected = FtpStream::connect((self.host.as_str(), self.port))
                    .and_then(|mut ftp| {
                        ftp.login(&self.user, &self.pass)?;
                        let _ = ftp.quit();
                        Ok(())
                    });
                match connected {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "ftp connectivity probe failed");
                        false
                    }
                }
            }
            NasProtocol::Sftp => match self.sftp_session() {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "sftp connectivity probe failed");
                    false
                }
            },
        }
    }

    fn clone_for_blocking(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            pass: self.pass.clone(),
            protocol: self.protocol,
            base_folder: self.base_folder.clone(),
        }
    }
}

#[async_trait]
impl StorageBackend for NasBackend {
    #[instrument(skip(self, file), fields(path = %path, protocol = ?self.protocol))]
    async fn upload(&self, file: &Path, path: &str) -> Result<String, UploadError> {
        let (folder, leaf) = self.resolve_target(path);
        debug!(folder = %folder, leaf = %leaf, "uploading to NAS");

        let this = self.clone_for_blocking();
        let local = file.to_path_buf();
        let url = tokio::task::spawn_blocking(move || match this.protocol {
            NasProtocol::Ftp => this.ftp_upload(local, folder, leaf),
            NasProtocol::Sftp => this.sftp_upload(local, folder, leaf),
        })
        .await
        .map_err(|e| UploadError::Transfer(format!("blocking task: {e}")))??;

        info!(url = %url, "file uploaded to NAS");
        Ok(url)
    }

    async fn test_connection(&self) -> bool {
        let this = self.clone_for_blocking();
        tokio::task::spawn_blocking(move || this.probe())
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> NasBackend {
        NasBackend::new(
            "nas.local".into(),
            21,
            "user".into(),
            "pass".into(),
            NasProtocol::Ftp,
            base.into(),
        )
    }

    #[test]
    fn target_is_rooted_under_base_folder() {
        let (folder, leaf) = backend("shared/line_1").resolve_target("acme/ord_1/model/123.jpg");
        assert_eq!(folder, "shared/line_1/acme/ord_1/model");
        assert_eq!(leaf, "123.jpg");
    }

    #[test]
    fn bare_filename_lands_in_base_folder() {
        let (folder, leaf) = backend("shared").resolve_target("123.jpg");
        assert_eq!(folder, "shared");
        assert_eq!(leaf, "123.jpg");
    }

    #[test]
    fn empty_base_folder_keeps_relative_path() {
        let (folder, leaf) = backend("").resolve_target("/acme/123.jpg");
        assert_eq!(folder, "acme");
        assert_eq!(leaf, "123.jpg");
    }
}
