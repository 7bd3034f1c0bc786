use std::fs::File;
use std::path::{Path, PathBuf};

use clap::Parser;
use models::{Error, ErrorKind, ResultExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::format::SnapshotFormat;
use crate::runtime::StartupArgs;

pub const CONFIG_PATH: &str = "/etc/snapshot-creator/config.yaml";
pub const CONFIG_PATH_LOCAL: &str = ".snapshot-creator/config.yaml";

pub fn local_config_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        Some(Path::new(&home).join(CONFIG_PATH_LOCAL))
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IoFormat {
    Json,
    #[default]
    Yaml,
}
impl IoFormat {
    pub fn from_extension(path: &Path) -> Result<Self, Error> {
        match path.extension().and_then(|s| s.to_str()) {
            None | Some("yaml") | Some("yml") => Ok(IoFormat::Yaml),
            Some("json") => Ok(IoFormat::Json),
            Some(ext) => Err(Error::new(
                models::eyre!("unknown config format: {ext}"),
                ErrorKind::Deserialization,
            )),
        }
    }
    pub fn from_reader<R: std::io::Read, T: DeserializeOwned>(&self, reader: R) -> Result<T, Error> {
        match self {
            IoFormat::Json => serde_json::from_reader(reader).with_kind(ErrorKind::Deserialization),
            IoFormat::Yaml => serde_yaml::from_reader(reader).with_kind(ErrorKind::Deserialization),
        }
    }
}

pub trait ContextConfig: DeserializeOwned + Default {
    fn next(&mut self) -> Option<PathBuf>;
    fn merge_with(&mut self, other: Self);
    fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let format = IoFormat::from_extension(path)?;
        format.from_reader(
            File::open(path).with_ctx(|_| (ErrorKind::Filesystem, path.display().to_string()))?,
        )
    }
    fn load_path_rec(&mut self, path: Option<impl AsRef<Path>>) -> Result<(), Error> {
        if let Some(path) = path.filter(|p| p.as_ref().exists()) {
            let mut other = Self::from_path(path)?;
            let path = other.next();
            self.merge_with(other);
            self.load_path_rec(path)?;
        }
        Ok(())
    }
}

/// Options for `snapshot-creator generate`.
///
/// Values given on the command line win over values from config files.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Parser)]
#[serde(rename_all = "kebab-case")]
#[serde(default)]
#[command(rename_all = "kebab-case")]
pub struct GenerateConfig {
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// File to write the generated source to; stdout when absent
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[arg(long = "namespace")]
    pub namespace: Option<String>,
    #[arg(long = "instance-class")]
    pub instance_class: Option<String>,
    /// Script evaluated in the main context after the built-in bootstrap
    #[arg(long = "bootstrap")]
    pub bootstrap: Vec<PathBuf>,
    #[arg(long = "v8-flags")]
    pub v8_flags: Option<String>,
    #[arg(long = "exec-arg", allow_hyphen_values = true)]
    pub exec_args: Vec<String>,
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
    /// Runtime arguments recorded into the snapshot
    #[arg(last = true)]
    pub args: Vec<String>,
}
impl ContextConfig for GenerateConfig {
    fn next(&mut self) -> Option<PathBuf> {
        self.config.take()
    }
    fn merge_with(&mut self, other: Self) {
        self.output = self.output.take().or(other.output);
        self.namespace = self.namespace.take().or(other.namespace);
        self.instance_class = self.instance_class.take().or(other.instance_class);
        if self.bootstrap.is_empty() {
            self.bootstrap = other.bootstrap;
        }
        self.v8_flags = self.v8_flags.take().or(other.v8_flags);
        if self.exec_args.is_empty() {
            self.exec_args = other.exec_args;
        }
        self.log_file = self.log_file.take().or(other.log_file);
        if self.args.is_empty() {
            self.args = other.args;
        }
    }
}
impl GenerateConfig {
    pub fn load(mut self) -> Result<Self, Error> {
        let path = self.next();
        self.load_path_rec(path)?;
        self.load_path_rec(local_config_path())?;
        self.load_path_rec(Some(CONFIG_PATH))?;
        Ok(self)
    }

    pub fn snapshot_format(&self) -> SnapshotFormat {
        let mut format = SnapshotFormat::default();
        if let Some(namespace) = &self.namespace {
            format.namespace = namespace.clone();
        }
        if let Some(instance_class) = &self.instance_class {
            format.instance_class = instance_class.clone();
        }
        format
    }

    pub fn startup_args(&self) -> StartupArgs {
        StartupArgs::new(self.args.clone(), self.exec_args.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "snapshot-creator-config-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn cli_parsing() {
        let config = GenerateConfig::parse_from([
            "generate",
            "-o",
            "out/snapshot.cc",
            "--exec-arg",
            "--expose-internals",
            "--namespace",
            "embedder",
            "--",
            "node",
            "--version",
        ]);
        assert_eq!(config.output, Some(PathBuf::from("out/snapshot.cc")));
        assert_eq!(config.exec_args, vec!["--expose-internals"]);
        assert_eq!(config.args, vec!["node", "--version"]);
        assert_eq!(config.snapshot_format().namespace, "embedder");
        assert_eq!(
            config.startup_args(),
            StartupArgs::new(
                vec!["node".to_owned(), "--version".to_owned()],
                vec!["--expose-internals".to_owned()]
            )
        );
    }

    #[test]
    fn file_values_fill_gaps_only() {
        let path = scratch(
            "config.yaml",
            "output: from-file.cc\nnamespace: file-ns\nexec-args:\n  - --trace\nargs:\n  - node\n",
        );
        let mut config = GenerateConfig {
            namespace: Some("cli-ns".to_owned()),
            ..Default::default()
        };
        config.load_path_rec(Some(&path)).unwrap();
        assert_eq!(config.output, Some(PathBuf::from("from-file.cc")));
        assert_eq!(config.namespace.as_deref(), Some("cli-ns"));
        assert_eq!(config.exec_args, vec!["--trace"]);
        assert_eq!(config.args, vec!["node"]);
    }

    #[test]
    fn chained_config_files() {
        let inner = scratch("inner.json", r#"{"instance-class":"MainInstance"}"#);
        let outer = scratch(
            "outer.yaml",
            &format!("config: {}\nv8-flags: --predictable\n", inner.display()),
        );
        let mut config = GenerateConfig::default();
        config.load_path_rec(Some(&outer)).unwrap();
        assert_eq!(config.v8_flags.as_deref(), Some("--predictable"));
        assert_eq!(config.instance_class.as_deref(), Some("MainInstance"));
        assert_eq!(config.snapshot_format().instance_class, "MainInstance");
    }

    #[test]
    fn unknown_extension() {
        let err = IoFormat::from_extension(Path::new("config.ini")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deserialization);
    }
}
