//! Command-line configuration for the upload server

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use upstitch_engine::UploadConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";
pub const DEFAULT_TEMP_DIR: &str = "./uploads-tmp";
pub const DEFAULT_UPLOAD_PATH: &str = "/upload";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub upload_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Route the upload endpoint is served on
    pub upload_path: String,
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn command() -> Command {
        Command::new("upstitch-server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Chunked file upload receiver")
            .arg(
                Arg::new("bind")
                    .long("bind")
                    .value_name("ADDR")
                    .help("Bind address")
                    .value_parser(value_parser!(SocketAddr))
                    .default_value(DEFAULT_BIND),
            )
            .arg(
                Arg::new("upload-dir")
                    .long("upload-dir")
                    .value_name("PATH")
                    .help("Directory for assembled files and stored parts")
                    .value_parser(value_parser!(PathBuf))
                    .default_value(DEFAULT_UPLOAD_DIR),
            )
            .arg(
                Arg::new("temp-dir")
                    .long("temp-dir")
                    .value_name("PATH")
                    .help("Staging directory for multipart file fields")
                    .value_parser(value_parser!(PathBuf))
                    .default_value(DEFAULT_TEMP_DIR),
            )
            .arg(
                Arg::new("upload-path")
                    .long("upload-path")
                    .value_name("ROUTE")
                    .help("HTTP path of the upload endpoint")
                    .default_value(DEFAULT_UPLOAD_PATH),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Emit logs as JSON lines")
                    .action(ArgAction::SetTrue),
            )
    }

    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let bind = *matches
            .get_one::<SocketAddr>("bind")
            .context("missing bind address")?;
        let upload_dir = matches
            .get_one::<PathBuf>("upload-dir")
            .context("missing upload directory")?
            .clone();
        let temp_dir = matches
            .get_one::<PathBuf>("temp-dir")
            .context("missing temp directory")?
            .clone();
        let upload_path = matches
            .get_one::<String>("upload-path")
            .context("missing upload path")?
            .clone();

        if !upload_path.starts_with('/') {
            anyhow::bail!("upload path must start with '/': {}", upload_path);
        }

        Ok(ServerConfig {
            bind,
            upload_dir,
            temp_dir,
            upload_path,
            json_logs: matches.get_flag("json-logs"),
        })
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig::new(&self.upload_dir, &self.temp_dir)
    }
}
