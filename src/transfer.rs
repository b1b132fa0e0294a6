//! File transfers on behalf of a caller
//!
//! Fetching a PPD or the service configuration into a caller-named file (and
//! sending one back) must not let the caller read or write paths they could
//! not touch themselves. The local file is therefore opened with the
//! caller's identity, not the gateway's, and only the open happens while
//! impersonating.

use crate::session::Session;
use crate::transport::Channel;
use crate::validate::Role;
use nix::unistd::{self, Gid, Uid, User};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use tracing::{debug, error};

/// Temporarily adopts a caller's uid, gid and supplementary groups.
/// Restores the original identity when dropped; the process must not talk
/// to the service while a guard is alive, so keep the scope tight.
struct ImpersonationGuard {
    saved_euid: Uid,
    saved_egid: Gid,
    saved_groups: Vec<Gid>,
    active: bool,
}

impl ImpersonationGuard {
    fn assume(uid: u32) -> io::Result<Self> {
        let saved_euid = unistd::geteuid();
        let saved_egid = unistd::getegid();
        let saved_groups = unistd::getgroups().map_err(io::Error::from)?;

        let target = Uid::from_raw(uid);
        if target == saved_euid {
            // Already the right identity, nothing to switch.
            return Ok(Self {
                saved_euid,
                saved_egid,
                saved_groups,
                active: false,
            });
        }

        let user = User::from_uid(target)
            .map_err(io::Error::from)?
            .ok_or_else(|| io::Error::other(format!("unknown uid {uid}")))?;

        let mut guard = Self {
            saved_euid,
            saved_egid,
            saved_groups,
            active: false,
        };

        // Group identity first: once the euid changes we may no longer have
        // the privilege to change groups.
        unistd::setegid(user.gid).map_err(io::Error::from)?;
        guard.active = true;

        let name = CString::new(user.name.as_str())
            .map_err(|_| io::Error::other("user name contains NUL"))?;
        if let Err(e) = unistd::initgroups(&name, user.gid) {
            guard.restore();
            return Err(e.into());
        }
        if let Err(e) = unistd::seteuid(target) {
            guard.restore();
            return Err(e.into());
        }

        debug!("impersonating uid {uid} ({})", user.name);
        Ok(guard)
    }

    fn restore(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        // Failing to drop the caller identity would leave the gateway
        // running with the wrong credentials for every later request.
        if let Err(e) = unistd::seteuid(self.saved_euid) {
            error!("could not restore euid: {e}");
        }
        if let Err(e) = unistd::setgroups(&self.saved_groups) {
            error!("could not restore supplementary groups: {e}");
        }
        if let Err(e) = unistd::setegid(self.saved_egid) {
            error!("could not restore egid: {e}");
        }
    }
}

impl Drop for ImpersonationGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Open `filename` for writing with the caller's identity. The file must
/// already exist: creation is up to the caller, so the gateway never plants
/// files in directories the caller cannot write to.
fn open_for_caller_write(filename: &str, uid: u32) -> io::Result<File> {
    let _guard = ImpersonationGuard::assume(uid)?;
    let file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(false)
        .custom_flags(libc::O_NOFOLLOW)
        .open(filename)?;
    ensure_regular(&file, filename)?;
    Ok(file)
}

/// Open `filename` for reading with the caller's identity.
fn open_for_caller_read(filename: &str, uid: u32) -> io::Result<File> {
    let _guard = ImpersonationGuard::assume(uid)?;
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(filename)?;
    ensure_regular(&file, filename)?;
    Ok(file)
}

fn ensure_regular(file: &File, filename: &str) -> io::Result<()> {
    let metadata = file.metadata()?;
    if metadata.file_type().is_file() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "File \"{filename}\" is not a regular file."
        )))
    }
}

impl<C: Channel> Session<C> {
    /// Download a service resource into a caller-owned file. The file is
    /// opened as the caller; the service talk happens with the gateway
    /// identity. A failed first attempt is retried once after reconnecting,
    /// which covers the service dropping an idle connection.
    pub async fn file_get(&mut self, resource: &str, filename: &str, uid: u32) -> bool {
        if !self.check(Role::Resource, Some(resource))
            || !self.check(Role::Filename, Some(filename))
        {
            return false;
        }

        let mut file = match open_for_caller_write(filename, uid) {
            Ok(file) => file,
            Err(e) => {
                self.set_internal_status(Some(format!(
                    "Cannot open \"{filename}\" for writing: {e}"
                )));
                return false;
            }
        };

        let (status, body) = match self.fetch(resource).await {
            Some(result) => result,
            None => {
                if !self.reconnect().await {
                    return false;
                }
                match self.fetch(resource).await {
                    Some(result) => result,
                    None => return false,
                }
            }
        };

        self.set_status_from_http(status);
        if status != 200 {
            return false;
        }

        if let Err(e) = file.write_all(&body).and_then(|()| file.flush()) {
            self.set_internal_status(Some(format!("Cannot write \"{filename}\": {e}")));
            return false;
        }
        true
    }

    /// Upload a caller-owned file to a service resource. The service
    /// restarts itself after accepting a configuration file, so the
    /// connection is re-established unconditionally afterwards.
    pub async fn file_put(&mut self, resource: &str, filename: &str, uid: u32) -> bool {
        if !self.check(Role::Resource, Some(resource))
            || !self.check(Role::Filename, Some(filename))
        {
            return false;
        }

        let mut body = Vec::new();
        match open_for_caller_read(filename, uid) {
            Ok(mut file) => {
                if let Err(e) = file.read_to_end(&mut body) {
                    self.set_internal_status(Some(format!("Cannot read \"{filename}\": {e}")));
                    return false;
                }
            }
            Err(e) => {
                self.set_internal_status(Some(format!(
                    "Cannot open \"{filename}\" for reading: {e}"
                )));
                return false;
            }
        }

        let status = self.store(resource, &body).await;

        self.reconnect().await;

        match status {
            Some(status) => {
                self.set_status_from_http(status);
                status == 200 || status == 201
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedChannel;
    use std::io::Write as _;

    fn own_uid() -> u32 {
        unistd::geteuid().as_raw()
    }

    #[tokio::test]
    async fn test_file_get_writes_fetched_body() {
        let target = tempfile::NamedTempFile::new().unwrap();

        let mut channel = ScriptedChannel::default();
        channel.fetches.push_back(Ok((200, b"*PPD-Adobe\n".to_vec())));
        let mut session = Session::new(channel, "root");

        let path = target.path().to_str().unwrap().to_string();
        assert!(session.file_get("/printers/p.ppd", &path, own_uid()).await);
        assert_eq!(std::fs::read(target.path()).unwrap(), b"*PPD-Adobe\n");
    }

    #[tokio::test]
    async fn test_file_get_refuses_missing_file() {
        let mut session = Session::new(ScriptedChannel::default(), "root");
        let ok = session
            .file_get("/printers/p.ppd", "/nonexistent/out.ppd", own_uid())
            .await;
        assert!(!ok);
        assert!(session
            .last_status_string()
            .starts_with("Cannot open \"/nonexistent/out.ppd\""));
    }

    #[tokio::test]
    async fn test_file_get_retries_once_after_reconnect() {
        let target = tempfile::NamedTempFile::new().unwrap();

        let mut channel = ScriptedChannel::default();
        channel
            .fetches
            .push_back(Err(io::Error::other("connection reset")));
        channel.fetches.push_back(Ok((200, b"data".to_vec())));
        let mut session = Session::new(channel, "root");

        let path = target.path().to_str().unwrap().to_string();
        assert!(session.file_get("/printers/p.ppd", &path, own_uid()).await);
        assert_eq!(session.channel_for_tests().reconnect_attempts, 1);
        assert_eq!(std::fs::read(target.path()).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_file_get_surfaces_http_failure() {
        let target = tempfile::NamedTempFile::new().unwrap();

        let mut channel = ScriptedChannel::default();
        channel.fetches.push_back(Ok((404, Vec::new())));
        let mut session = Session::new(channel, "root");

        let path = target.path().to_str().unwrap().to_string();
        assert!(!session.file_get("/printers/p.ppd", &path, own_uid()).await);
        assert_eq!(session.last_status_string(), "HTTP 404 Not Found");
    }

    #[tokio::test]
    async fn test_file_put_sends_body_and_reconnects() {
        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(b"MaxJobs 100\n").unwrap();

        let mut channel = ScriptedChannel::default();
        channel.stores.push_back(Ok(201));
        let mut session = Session::new(channel, "root");

        let path = source.path().to_str().unwrap().to_string();
        assert!(
            session
                .file_put("/admin/conf/cupsd.conf", &path, own_uid())
                .await
        );

        let channel = session.channel_for_tests();
        assert_eq!(channel.stored[0].0, "/admin/conf/cupsd.conf");
        assert_eq!(channel.stored[0].1, b"MaxJobs 100\n");
        // the service restarts after a config upload
        assert_eq!(channel.reconnect_attempts, 1);
    }

    #[tokio::test]
    async fn test_file_put_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(ScriptedChannel::default(), "root");

        let path = dir.path().to_str().unwrap().to_string();
        assert!(
            !session
                .file_put("/admin/conf/cupsd.conf", &path, own_uid())
                .await
        );
        assert!(session.last_status_string().starts_with("Cannot open"));
    }

    #[tokio::test]
    async fn test_invalid_resource_never_touches_the_filesystem() {
        let mut session = Session::new(ScriptedChannel::default(), "root");
        let long = "r".repeat(513);
        assert!(!session.file_get(&long, "/tmp/out", own_uid()).await);
        assert_eq!(
            session.last_status_string(),
            format!("\"{long}\" is not a valid resource.")
        );
    }
}
