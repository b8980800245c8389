//! CLI argument parsing tests for nft-rules.
//!
//! These only exercise argument handling; clap rejects the input before any
//! socket is opened.

use assert_cmd::Command;
use predicates::prelude::*;

fn nft_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nft-rules"))
}

mod global_flags {
    use super::*;

    #[test]
    fn test_help() {
        nft_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("nf_tables rule tool"));
    }

    #[test]
    fn test_version() {
        nft_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("nft-rules"));
    }

    #[test]
    fn test_invalid_subcommand() {
        nft_cmd()
            .arg("flush")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }
}

mod list_command {
    use super::*;

    #[test]
    fn test_list_help() {
        nft_cmd()
            .args(["list", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--family"))
            .stdout(predicate::str::contains("--json"));
    }

    #[test]
    fn test_ls_alias() {
        nft_cmd().args(["ls", "--help"]).assert().success();
    }

    #[test]
    fn test_extra_positional() {
        nft_cmd()
            .args(["list", "input", "output"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unexpected argument"));
    }
}

mod add_command {
    use super::*;

    #[test]
    fn test_add_help() {
        nft_cmd()
            .args(["add", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--proto"))
            .stdout(predicate::str::contains("--dport"));
    }

    #[test]
    fn test_missing_required() {
        nft_cmd()
            .args(["add", "--table", "filter"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--chain"));
    }

    #[test]
    fn test_port_must_be_numeric() {
        nft_cmd()
            .args([
                "add", "--table", "filter", "--chain", "input", "--proto", "tcp", "--dport",
                "ssh",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }

    #[test]
    fn test_json_is_list_only() {
        nft_cmd()
            .args([
                "add", "--json", "--table", "filter", "--chain", "input", "--proto", "tcp",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unexpected argument"));
    }

    #[test]
    fn test_port_out_of_range() {
        nft_cmd()
            .args([
                "add", "--table", "filter", "--chain", "input", "--proto", "tcp", "--dport",
                "70000",
            ])
            .assert()
            .failure();
    }
}
