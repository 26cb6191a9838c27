use assert_cmd::Command;
use predicates::prelude::*;

fn bot() -> Command {
    Command::cargo_bin("sucesos-bot").unwrap()
}

#[test]
fn help_lists_the_subcommands() {
    bot()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("single"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("setup"));
}

#[test]
fn single_rejects_a_malformed_url() {
    bot()
        .args(["single", "not-a-url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid URL format"));
}

#[test]
fn single_rejects_a_non_twitter_url() {
    bot()
        .args(["single", "https://youtube.com/watch?v=abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("twitter.com or x.com"));
}

#[test]
fn help_lists_the_global_logging_flags() {
    bot()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--quiet"));
}

#[test]
fn quiet_is_accepted_after_a_subcommand() {
    let dir = tempfile::tempdir().unwrap();

    bot()
        .args(["config", "--quiet"])
        .env_remove("TWITTER_BEARER_TOKEN")
        .env("DATA_DIR", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Twitter account:"));
}

#[test]
fn config_masks_the_bearer_token() {
    let dir = tempfile::tempdir().unwrap();

    bot()
        .arg("config")
        .env_remove("TWITTER_BEARER_TOKEN")
        .env_remove("TWITTER_USERNAME")
        .env("DATA_DIR", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Twitter account: @EmergenciasMad"))
        .stdout(predicate::str::contains("Bearer token: not set"));
}

#[test]
fn run_requires_a_bearer_token() {
    let dir = tempfile::tempdir().unwrap();

    bot()
        .args(["run", "--once"])
        .env_remove("TWITTER_BEARER_TOKEN")
        .env("DATA_DIR", dir.path())
        .env("DOWNLOADS_DIR", dir.path().join("downloads"))
        .env("PROCESSED_DIR", dir.path().join("processed"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("TWITTER_BEARER_TOKEN"));
}
