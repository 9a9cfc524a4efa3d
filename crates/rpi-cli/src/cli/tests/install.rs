//! Tests for the install and serve subcommands.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use std::path::Path;

#[test]
fn cli_parse_install_defaults() {
    match parse(&["rpi", "install", "http://nas.local/games/a.pkg"]) {
        CliCommand::Install {
            url,
            disk_cache,
            background,
            out,
            port,
        } => {
            assert_eq!(url, "http://nas.local/games/a.pkg");
            assert!(!disk_cache);
            assert!(!background);
            assert!(out.is_none());
            assert_eq!(port, 0);
        }
        _ => panic!("expected Install"),
    }
}

#[test]
fn cli_parse_install_flags() {
    match parse(&[
        "rpi",
        "install",
        "file:///srv/bundle.zip",
        "--disk-cache",
        "--background",
        "--out",
        "/tmp/pkgs",
        "--port",
        "9000",
    ]) {
        CliCommand::Install {
            url,
            disk_cache,
            background,
            out,
            port,
        } => {
            assert_eq!(url, "file:///srv/bundle.zip");
            assert!(disk_cache);
            assert!(background);
            assert_eq!(out.as_deref(), Some(Path::new("/tmp/pkgs")));
            assert_eq!(port, 9000);
        }
        _ => panic!("expected Install with flags"),
    }
}

#[test]
fn cli_parse_install_requires_url() {
    assert!(Cli::try_parse_from(["rpi", "install"]).is_err());
}

#[test]
fn cli_parse_serve() {
    match parse(&["rpi", "serve"]) {
        CliCommand::Serve {
            port,
            bind_all,
            out,
        } => {
            assert!(port.is_none());
            assert!(!bind_all);
            assert!(out.is_none());
        }
        _ => panic!("expected Serve"),
    }
}

#[test]
fn cli_parse_serve_overrides() {
    match parse(&["rpi", "serve", "--port", "12800", "--bind-all", "--out", "mirror"]) {
        CliCommand::Serve {
            port,
            bind_all,
            out,
        } => {
            assert_eq!(port, Some(12800));
            assert!(bind_all);
            assert_eq!(out.as_deref(), Some(Path::new("mirror")));
        }
        _ => panic!("expected Serve with overrides"),
    }
}

#[test]
fn cli_parse_serve_rejects_bad_port() {
    assert!(Cli::try_parse_from(["rpi", "serve", "--port", "70000"]).is_err());
}
