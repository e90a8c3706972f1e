//! Behavioural coverage for a full deployment against recording sessions.

#[path = "common/workspace.rs"]
mod workspace;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use ssh_deploy::archive::{TAR_VERSION_COMMAND, remove_command};
use ssh_deploy::test_support::{RecordingConnector, ScriptedRunner, SessionEvent};
use ssh_deploy::{
    DeployConfig, DeployError, DeployOptions, Deployer, ExitInfo, HookCommand, Stage, StageError,
};
use workspace::Workspace;

const TARGET: &str = "/var/www/app";

#[fixture]
fn site() -> Workspace {
    Workspace::new().with_site()
}

fn options(workspace: &Workspace) -> DeployOptions {
    DeployOptions {
        host: Some(String::from("deploy.example.com")),
        username: Some(String::from("www")),
        password: Some(String::from("secret")),
        from: Some(workspace.dist()),
        to: Some(String::from(TARGET)),
        zip: Some(true),
        exclude: Some(vec![String::from("node_modules"), String::from(".git")]),
        before: Some(HookCommand::Single(String::from("systemctl stop site"))),
        after: Some(HookCommand::List(vec![
            String::from("chown -R www:www /var/www/app"),
            String::from("systemctl start site"),
        ])),
        cover: Some(false),
        ..DeployOptions::default()
    }
}

fn deployer(
    options: DeployOptions,
    connector: &RecordingConnector,
    runner: ScriptedRunner,
) -> Deployer<RecordingConnector, ScriptedRunner> {
    let config = DeployConfig::resolve(options)
        .unwrap_or_else(|err| panic!("options should resolve: {err}"));
    Deployer::new(config, connector.clone(), runner)
}

fn gnu_runner(connector: &RecordingConnector) -> ScriptedRunner {
    let runner = ScriptedRunner::recording_into(&connector.log());
    runner.push_gnu_tar_version();
    runner.push_success();
    runner.push_success();
    runner
}

#[rstest]
#[tokio::test]
async fn zipped_deploy_runs_every_stage_in_order(site: Workspace) {
    let connector = RecordingConnector::new();
    let runner = gnu_runner(&connector);

    let report = deployer(options(&site), &connector, runner)
        .execute()
        .await
        .unwrap_or_else(|err| panic!("deployment should succeed: {err}"));
    assert!(report.elapsed.as_millis() < 60_000);

    let events = connector.events();
    let create = events
        .iter()
        .find_map(|event| match event {
            SessionEvent::Local(command) if command.starts_with("tar -czvf") => {
                Some(command.clone())
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("archive command should run: {events:?}"));
    assert!(
        create.contains("--exclude=node_modules --exclude=.git --exclude=deploy.tgz"),
        "archive command: {create}"
    );

    let expected = vec![
        SessionEvent::OpenSession,
        SessionEvent::Local(String::from(TAR_VERSION_COMMAND)),
        SessionEvent::Local(create),
        SessionEvent::Exec(String::from("systemctl stop site")),
        SessionEvent::Exec(String::from("cd /var/www/app && rm -fr *")),
        SessionEvent::OpenTransfer,
        SessionEvent::UploadTree {
            local: site.dist(),
            remote: String::from(TARGET),
        },
        SessionEvent::UploadFile {
            local: Utf8PathBuf::from("deploy.tgz"),
            remote: String::from("/var/www/app/deploy.tgz"),
        },
        SessionEvent::CloseTransfer,
        SessionEvent::Exec(String::from(
            "cd /var/www/app && tar -xzvf deploy.tgz && rm /var/www/app/deploy.tgz",
        )),
        SessionEvent::Exec(String::from("chown -R www:www /var/www/app")),
        SessionEvent::Exec(String::from("systemctl start site")),
        SessionEvent::Local(remove_command()),
        SessionEvent::CloseSession,
    ];
    assert_eq!(events, expected);
}

#[rstest]
#[tokio::test]
async fn bsd_tar_omits_gnu_flags(site: Workspace) {
    let connector = RecordingConnector::new();
    let runner = ScriptedRunner::recording_into(&connector.log());
    runner.push_bsd_tar_version();
    runner.push_success();
    runner.push_success();

    deployer(options(&site), &connector, runner.clone())
        .execute()
        .await
        .unwrap_or_else(|err| panic!("deployment should succeed: {err}"));

    let create = runner
        .commands()
        .into_iter()
        .find(|command| command.starts_with("tar -czvf"))
        .unwrap_or_else(|| panic!("archive command should run"));
    assert!(!create.contains("--ignore-failed-read"), "archive command: {create}");
    assert!(!create.contains("--exclude=deploy.tgz"), "archive command: {create}");
}

#[rstest]
#[tokio::test]
async fn failing_after_hook_leaves_local_archive_and_closes_once(site: Workspace) {
    let connector = RecordingConnector::new();
    connector.fail_command("chown", ExitInfo::Status(1));
    let runner = gnu_runner(&connector);

    let err = deployer(options(&site), &connector, runner.clone())
        .execute()
        .await
        .expect_err("after hook should fail");

    assert_eq!(err.stage(), Some(Stage::AfterHooks));
    assert!(matches!(
        err,
        DeployError::Stage {
            source: StageError::RemoteCommand { .. },
            ..
        }
    ));
    assert!(!runner.commands().contains(&remove_command()));
    assert!(
        !connector
            .executed_commands()
            .contains(&String::from("systemctl start site"))
    );
    assert_eq!(connector.count(&SessionEvent::CloseSession), 1);
}

#[rstest]
#[tokio::test]
async fn covering_deploy_keeps_remote_files(site: Workspace) {
    let connector = RecordingConnector::new();
    let runner = gnu_runner(&connector);

    deployer(
        DeployOptions {
            cover: Some(true),
            ..options(&site)
        },
        &connector,
        runner,
    )
    .execute()
    .await
    .unwrap_or_else(|err| panic!("deployment should succeed: {err}"));

    assert!(
        !connector
            .executed_commands()
            .iter()
            .any(|command| command.contains("rm -fr"))
    );
}

#[rstest]
#[tokio::test]
async fn transfer_close_failure_fails_the_upload(site: Workspace) {
    let connector = RecordingConnector::new();
    connector.fail_transfer_close();
    let runner = gnu_runner(&connector);

    let err = deployer(options(&site), &connector, runner)
        .execute()
        .await
        .expect_err("transfer close failure should surface");

    assert_eq!(err.stage(), Some(Stage::Upload));
    assert_eq!(connector.count(&SessionEvent::CloseTransfer), 1);
    assert_eq!(connector.count(&SessionEvent::CloseSession), 1);
}
