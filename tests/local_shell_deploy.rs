//! Repeated deployments against a local shell standing in for the remote host.
//!
//! The connector below runs remote commands through `sh -c` and copies
//! uploads into a temporary "remote" directory, so the real pipeline acts on a
//! real filesystem.
#![cfg(unix)]

#[path = "common/workspace.rs"]
mod workspace;

use std::fs::{copy, create_dir_all, read_dir, read_to_string};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use ssh_deploy::session::{OutputSink, SessionFuture};
use ssh_deploy::{
    CommandSession, DeployConfig, DeployOptions, Deployer, ExitInfo, HookCommand,
    ProcessCommandRunner, RemoteCommandOutput, SessionConnector, SessionError, SessionTarget,
    TransferError, TransferSession,
};
use workspace::{Workspace, write_file};

#[derive(Clone, Copy, Debug, Default)]
struct LocalShellConnector;

struct LocalShellSession;

struct LocalCopySession;

impl SessionConnector for LocalShellConnector {
    type Command = LocalShellSession;
    type Transfer = LocalCopySession;

    fn connect_command<'a>(
        &'a self,
        _target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Command, SessionError> {
        Box::pin(async { Ok(LocalShellSession) })
    }

    fn connect_transfer<'a>(
        &'a self,
        _target: &'a SessionTarget,
    ) -> SessionFuture<'a, Self::Transfer, SessionError> {
        Box::pin(async { Ok(LocalCopySession) })
    }
}

impl CommandSession for LocalShellSession {
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        on_output: OutputSink<'a>,
    ) -> SessionFuture<'a, RemoteCommandOutput, SessionError> {
        Box::pin(async move {
            let output = Command::new("sh")
                .args(["-c", command])
                .output()
                .map_err(|err| SessionError::Channel {
                    message: err.to_string(),
                })?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            on_output(&stdout);
            let exit = output
                .status
                .code()
                .and_then(|code| u32::try_from(code).ok())
                .map_or(ExitInfo::Unknown, ExitInfo::Status);
            Ok(RemoteCommandOutput {
                exit,
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn close(&mut self) -> SessionFuture<'_, (), SessionError> {
        Box::pin(async { Ok(()) })
    }
}

fn copy_error(local: &Utf8Path, remote: &Utf8Path, err: &std::io::Error) -> TransferError {
    TransferError::Upload {
        local: local.to_string(),
        remote: remote.to_string(),
        message: err.to_string(),
    }
}

fn copy_tree(local: &Utf8Path, remote: &Utf8Path) -> Result<(), TransferError> {
    create_dir_all(remote).map_err(|err| copy_error(local, remote, &err))?;
    for entry in read_dir(local).map_err(|err| copy_error(local, remote, &err))? {
        let entry = entry.map_err(|err| copy_error(local, remote, &err))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .unwrap_or_else(|path| panic!("non-UTF-8 path {}", path.display()));
        let name = path.file_name().unwrap_or_default();
        let target = remote.join(name);
        if path.is_dir() {
            copy_tree(&path, &target)?;
        } else {
            copy(&path, &target).map_err(|err| copy_error(&path, &target, &err))?;
        }
    }
    Ok(())
}

impl TransferSession for LocalCopySession {
    fn upload_file<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError> {
        Box::pin(async move {
            let remote = Utf8Path::new(remote);
            copy(local, remote)
                .map(drop)
                .map_err(|err| copy_error(local, remote, &err))
        })
    }

    fn upload_tree<'a>(
        &'a mut self,
        local: &'a Utf8Path,
        remote: &'a str,
    ) -> SessionFuture<'a, (), TransferError> {
        Box::pin(async move { copy_tree(local, Utf8Path::new(remote)) })
    }

    fn close(&mut self) -> SessionFuture<'_, (), TransferError> {
        Box::pin(async { Ok(()) })
    }
}

fn listing(root: &Utf8Path) -> Vec<String> {
    let mut entries: Vec<String> = walk(root)
        .into_iter()
        .map(|path| {
            path.strip_prefix(root)
                .unwrap_or_else(|err| panic!("strip prefix: {err}"))
                .to_string()
        })
        .collect();
    entries.sort();
    entries
}

fn walk(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut found = Vec::new();
    for entry in read_dir(dir).unwrap_or_else(|err| panic!("read {dir}: {err}")) {
        let entry = entry.unwrap_or_else(|err| panic!("read entry in {dir}: {err}"));
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .unwrap_or_else(|path| panic!("non-UTF-8 path {}", path.display()));
        if path.is_dir() {
            found.extend(walk(&path));
        } else {
            found.push(path);
        }
    }
    found
}

#[tokio::test]
async fn repeated_deploys_converge_on_the_same_remote_tree() {
    let local = Workspace::new();
    local.write_file("dist/index.html", "<html>v1</html>");
    local.write_file("dist/assets/app.js", "console.log('v1');");
    let remote = Workspace::new();
    let target = remote.root.join("www");
    create_dir_all(&target).unwrap_or_else(|err| panic!("create remote target: {err}"));
    let marker = remote.root.join("after-hook.log");

    let options = DeployOptions {
        host: Some(String::from("localhost")),
        username: Some(String::from("tester")),
        password: Some(String::from("unused")),
        from: Some(local.dist()),
        to: Some(target.to_string()),
        zip: Some(false),
        cover: Some(false),
        after: Some(HookCommand::Single(format!("echo deployed >> {marker}"))),
        ..DeployOptions::default()
    };
    let config = DeployConfig::resolve(options)
        .unwrap_or_else(|err| panic!("options should resolve: {err}"));
    let deployer = Deployer::new(config, LocalShellConnector, ProcessCommandRunner);

    deployer
        .execute()
        .await
        .unwrap_or_else(|err| panic!("first deploy should succeed: {err}"));
    let first = listing(&target);

    write_file(&target.join("stale.txt"), "left over from an older release");
    deployer
        .execute()
        .await
        .unwrap_or_else(|err| panic!("second deploy should succeed: {err}"));

    assert_eq!(listing(&target), first);
    assert_eq!(first, vec!["assets/app.js", "index.html"]);
    assert_eq!(
        read_to_string(target.join("index.html")).unwrap_or_default(),
        "<html>v1</html>"
    );
    assert_eq!(
        read_to_string(&marker).unwrap_or_default(),
        "deployed\ndeployed\n"
    );
}
