//! File manager command dispatcher.
//!
//! Turns a named command plus parameters into filesystem calls and a JSON
//! response shaped for web file manager clients.  Node ids in requests are
//! decoded with [`crate::codec`]; an id that does not decode, or that
//! belongs to another bucket, is reported as "File not found".
//!
//! [`Dispatcher::run`] never fails: any error becomes a response holding
//! only an `error` key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use metrics::counter;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::{AuditRecord, AuditSink, AuditStatus};
use crate::codec;
use crate::config::{parse_size, ConnectorConfig};
use crate::errors::StoreError;
use crate::metrics::COMMANDS_TOTAL;
use crate::vfs::{BucketFs, NodeInfo};

/// Protocol version reported on `open` with `init=1`.
pub const API_VERSION: &str = "2.0";

/// JSON object returned for every command.
pub type Response = Map<String, Value>;

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Largest accepted upload in bytes.
    pub upload_max_size: u64,
    /// `upload_max_size` as configured, echoed to clients.
    pub upload_max_size_label: String,
    pub link_expiry_secs: u64,
    pub disabled: Vec<String>,
}

impl ConnectorSettings {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, StoreError> {
        let upload_max_size = parse_size(&config.upload_max_size).ok_or_else(|| {
            StoreError::Configuration(format!(
                "connector.upload_max_size is not a size: {}",
                config.upload_max_size
            ))
        })?;
        Ok(Self {
            upload_max_size,
            upload_max_size_label: config.upload_max_size.clone(),
            link_expiry_secs: config.link_expiry_seconds,
            disabled: config.disabled.clone(),
        })
    }
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            upload_max_size: 32 << 20,
            upload_max_size_label: "32M".to_string(),
            link_expiry_secs: crate::buckets::DEFAULT_LINK_EXPIRY_SECS,
            disabled: ConnectorConfig::default().disabled,
        }
    }
}

/// A file attached to an `upload` command.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub data: Bytes,
}

/// One command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    pub cmd: String,
    pub target: Option<String>,
    pub targets: Vec<String>,
    pub params: HashMap<String, String>,
    pub uploads: Vec<UploadedFile>,
    pub user_id: Option<String>,
}

impl CommandRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.target = Some(id.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("1" | "true"))
    }
}

/// Why a command failed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("File not found")]
    NotFound,

    #[error("Not a directory")]
    NotADirectory,

    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Upload {name} exceeds the maximum size of {limit} bytes")]
    UploadTooLarge { name: String, limit: u64 },

    #[error("{0}")]
    Store(StoreError),

    /// Some targets were deleted before a later delete failed.
    #[error("rm incomplete: removed [{}] before failing: {source}", .removed.join(", "))]
    RemoveIncomplete {
        removed: Vec<String>,
        source: StoreError,
    },

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else {
            Self::Store(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Open,
    Tree,
    Parents,
    Ls,
    Mkdir,
    Mkfile,
    Rm,
    Rename,
    Upload,
    Get,
    Put,
    File,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Tree => "tree",
            Self::Parents => "parents",
            Self::Ls => "ls",
            Self::Mkdir => "mkdir",
            Self::Mkfile => "mkfile",
            Self::Rm => "rm",
            Self::Rename => "rename",
            Self::Upload => "upload",
            Self::Get => "get",
            Self::Put => "put",
            Self::File => "file",
        }
    }

    /// Commands that change the bucket or hand out its contents.
    fn is_audited(self) -> bool {
        !matches!(self, Self::Open | Self::Tree | Self::Parents | Self::Ls)
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "open" => Self::Open,
            "tree" => Self::Tree,
            "parents" => Self::Parents,
            "ls" => Self::Ls,
            "mkdir" => Self::Mkdir,
            "mkfile" => Self::Mkfile,
            "rm" => Self::Rm,
            "rename" => Self::Rename,
            "upload" => Self::Upload,
            "get" => Self::Get,
            "put" => Self::Put,
            "file" => Self::File,
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        })
    }
}

fn nodes_value(nodes: &[NodeInfo]) -> Result<Value, CommandError> {
    Ok(serde_json::to_value(nodes)?)
}

/// Runs file manager commands against one bucket.
pub struct Dispatcher {
    fs: BucketFs,
    settings: ConnectorSettings,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Dispatcher {
    pub fn new(fs: BucketFs, settings: ConnectorSettings) -> Self {
        Self {
            fs,
            settings,
            audit: None,
        }
    }

    /// Report audited commands to `sink`.
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn fs(&self) -> &BucketFs {
        &self.fs
    }

    /// Execute `request` and build its response.
    pub async fn run(&self, request: CommandRequest) -> Response {
        let (label, outcome) = match request.cmd.parse::<Command>() {
            Ok(command) => {
                let outcome = self.execute(command, &request).await;
                if command.is_audited() {
                    self.audit(command, &request, outcome.as_ref().err());
                }
                (command.as_str(), outcome)
            }
            Err(e) => ("unknown", Err(e)),
        };

        let status = if outcome.is_ok() { "ok" } else { "error" };
        counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);

        match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!("Command {} failed: {}", request.cmd, e);
                let mut response = Response::new();
                response.insert("error".to_string(), Value::String(e.to_string()));
                response
            }
        }
    }

    async fn execute(
        &self,
        command: Command,
        request: &CommandRequest,
    ) -> Result<Response, CommandError> {
        match command {
            Command::Open => self.open(request).await,
            Command::Tree => self.tree(request).await,
            Command::Parents => self.parents(request).await,
            Command::Ls => self.ls(request).await,
            Command::Mkdir => self.mkdir(request).await,
            Command::Mkfile => self.mkfile(request).await,
            Command::Rm => self.rm(request).await,
            Command::Rename => self.rename(request).await,
            Command::Upload => self.upload(request).await,
            Command::Get => self.get(request).await,
            Command::Put => self.put(request).await,
            Command::File => self.file(request).await,
        }
    }

    // ── Target resolution ─────────────────────────────────────────────

    /// Decode `id` into a path in this dispatcher's bucket.
    fn decode_id(&self, id: &str) -> Result<String, CommandError> {
        if codec::scope_of(id) != Some(self.fs.bucket()) {
            return Err(CommandError::NotFound);
        }
        codec::decode(id).ok_or(CommandError::NotFound)
    }

    fn target_path(&self, request: &CommandRequest) -> Result<String, CommandError> {
        let id = request
            .target
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(CommandError::MissingParameter("target"))?;
        self.decode_id(id)
    }

    fn required<'a>(request: &'a CommandRequest, key: &'static str) -> Result<&'a str, CommandError> {
        request.get(key).ok_or(CommandError::MissingParameter(key))
    }

    /// Directory node at `path`, failing for files.
    async fn directory(&self, path: &str) -> Result<NodeInfo, CommandError> {
        let node = self.fs.info(path).await?;
        if !node.is_dir() {
            return Err(CommandError::NotADirectory);
        }
        Ok(node)
    }

    // ── Commands ──────────────────────────────────────────────────────

    async fn open(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = match request.target.as_deref() {
            None | Some("") => String::new(),
            Some(id) => self.decode_id(id)?,
        };
        let cwd = self.directory(&path).await?;

        let mut files = vec![cwd.clone()];
        files.extend(self.fs.list(&path, false).await?);
        if request.flag("tree") {
            if !path.is_empty() {
                files.push(self.fs.info("").await?);
            }
            for node in self.fs.list("", true).await? {
                if !files.iter().any(|f| f.id == node.id) {
                    files.push(node);
                }
            }
        }

        let mut response = Response::new();
        if request.flag("init") {
            response.insert("api".into(), json!(API_VERSION));
            response.insert("netDrivers".into(), json!([]));
        }
        let display_path = format!("{}/{}", self.fs.bucket(), path.trim_end_matches('/'));
        response.insert("cwd".into(), serde_json::to_value(&cwd)?);
        response.insert("files".into(), nodes_value(&files)?);
        response.insert(
            "uplMaxSize".into(),
            json!(self.settings.upload_max_size_label),
        );
        response.insert(
            "options".into(),
            json!({
                "separator": "/",
                "path": display_path.trim_end_matches('/'),
                "disabled": self.settings.disabled,
                "uploadMaxSize": self.settings.upload_max_size,
            }),
        );
        Ok(response)
    }

    async fn tree(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        let mut nodes = vec![self.directory(&path).await?];
        nodes.extend(self.fs.list(&path, true).await?);

        let mut response = Response::new();
        response.insert("tree".into(), nodes_value(&nodes)?);
        Ok(response)
    }

    async fn parents(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        let chain = self.fs.parents(&path).await?;

        let mut response = Response::new();
        response.insert("tree".into(), nodes_value(&chain)?);
        Ok(response)
    }

    async fn ls(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        self.directory(&path).await?;
        let names: Vec<String> = self
            .fs
            .list(&path, false)
            .await?
            .into_iter()
            .map(|node| node.name)
            .collect();

        let mut response = Response::new();
        response.insert("list".into(), json!(names));
        Ok(response)
    }

    async fn mkdir(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let parent = self.target_path(request)?;
        let name = Self::required(request, "name")?;
        let node = self.fs.make_directory(&parent, name).await?;

        let mut response = Response::new();
        response.insert("added".into(), nodes_value(&[node])?);
        Ok(response)
    }

    async fn mkfile(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let parent = self.target_path(request)?;
        let name = Self::required(request, "name")?;
        let node = self.fs.make_file(&parent, name).await?;

        let mut response = Response::new();
        response.insert("added".into(), nodes_value(&[node])?);
        Ok(response)
    }

    async fn rm(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let ids: Vec<&str> = if request.targets.is_empty() {
            request.target.as_deref().into_iter().collect()
        } else {
            request.targets.iter().map(String::as_str).collect()
        };
        if ids.is_empty() {
            return Err(CommandError::MissingParameter("targets"));
        }
        // Decode and stat everything up front so a bad id or an unreachable
        // store deletes nothing.
        let paths = ids
            .iter()
            .map(|id| self.decode_id(id))
            .collect::<Result<Vec<_>, _>>()?;
        if paths.iter().any(|path| path.is_empty()) {
            return Err(StoreError::object("remove", "cannot remove the root directory").into());
        }
        let mut present = Vec::with_capacity(paths.len());
        for path in &paths {
            if self.fs.key_exists(path).await? {
                present.push(path);
            }
        }

        let mut removed = Vec::with_capacity(present.len());
        for path in present {
            match self.fs.remove(path).await {
                Ok(Some(id)) => removed.push(id),
                Ok(None) => {}
                Err(source) if removed.is_empty() => return Err(source.into()),
                Err(source) => {
                    warn!(
                        "rm in {} stopped after removing {} of the targets: {}",
                        self.fs.bucket(),
                        removed.len(),
                        source
                    );
                    return Err(CommandError::RemoveIncomplete { removed, source });
                }
            }
        }

        let mut response = Response::new();
        response.insert("removed".into(), json!(removed));
        Ok(response)
    }

    async fn rename(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        let name = Self::required(request, "name")?;
        let old_id = self.fs.id_of(&path);
        let node = self.fs.rename(&path, name).await?;

        let mut response = Response::new();
        response.insert("added".into(), nodes_value(&[node])?);
        response.insert("removed".into(), json!([old_id]));
        Ok(response)
    }

    async fn upload(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let parent = self.target_path(request)?;
        if request.uploads.is_empty() {
            return Err(CommandError::MissingParameter("upload"));
        }
        if let Some(big) = request
            .uploads
            .iter()
            .find(|f| f.data.len() as u64 > self.settings.upload_max_size)
        {
            return Err(CommandError::UploadTooLarge {
                name: big.name.clone(),
                limit: self.settings.upload_max_size,
            });
        }

        // Keep whatever each upload replaces so a failure can put it back.
        let mut previous: Vec<(String, Option<Bytes>)> = Vec::with_capacity(request.uploads.len());
        for file in &request.uploads {
            let path = BucketFs::file_path(&parent, &file.name)?;
            let prior = match self.fs.read(&path).await {
                Ok(data) => Some(data),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            previous.push((path, prior));
        }

        let mut added: Vec<NodeInfo> = Vec::with_capacity(request.uploads.len());
        for file in &request.uploads {
            match self.fs.upload(&parent, &file.name, file.data.clone()).await {
                Ok(node) => added.push(node),
                Err(e) => {
                    self.roll_back(&previous[..added.len()]).await;
                    return Err(e.into());
                }
            }
        }

        let mut response = Response::new();
        response.insert("added".into(), nodes_value(&added)?);
        Ok(response)
    }

    /// Best-effort undo of the files written earlier in a failed upload:
    /// replaced files get their old contents back, new files are removed.
    async fn roll_back(&self, written: &[(String, Option<Bytes>)]) {
        for (path, prior) in written.iter().rev() {
            let outcome = match prior {
                Some(data) => self.fs.write(path, data.clone()).await.map(|_| ()),
                None => self.fs.remove(path).await.map(|_| ()),
            };
            if let Err(e) = outcome {
                warn!(
                    "Could not roll back partial upload of {}/{}: {}",
                    self.fs.bucket(),
                    path,
                    e
                );
            }
        }
    }

    async fn get(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        let data = self.fs.read(&path).await?;
        let content = match std::str::from_utf8(&data) {
            Ok(text) => text.to_string(),
            Err(_) => format!(
                "data:application/octet-stream;base64,{}",
                STANDARD.encode(&data)
            ),
        };

        let mut response = Response::new();
        response.insert("content".into(), Value::String(content));
        Ok(response)
    }

    async fn put(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        let content = Self::required(request, "content")?;
        let node = self
            .fs
            .write(&path, Bytes::copy_from_slice(content.as_bytes()))
            .await?;

        let mut response = Response::new();
        response.insert("changed".into(), nodes_value(&[node])?);
        Ok(response)
    }

    async fn file(&self, request: &CommandRequest) -> Result<Response, CommandError> {
        let path = self.target_path(request)?;
        let url = self
            .fs
            .direct_link(&path, self.settings.link_expiry_secs)
            .await?;

        let mut response = Response::new();
        response.insert("url".into(), Value::String(url));
        response.insert("inline".into(), Value::Bool(!request.flag("download")));
        Ok(response)
    }

    // ── Audit ─────────────────────────────────────────────────────────

    fn audit(&self, command: Command, request: &CommandRequest, error: Option<&CommandError>) {
        let Some(sink) = &self.audit else {
            return;
        };

        let mut record = AuditRecord::new(self.fs.bucket(), command.as_str());
        record.user_id = request.user_id.clone();
        record.object_name = match command {
            Command::Rm if !request.targets.is_empty() => Some(
                request
                    .targets
                    .iter()
                    .filter_map(|id| codec::decode(id))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Command::Upload => Some(
                request
                    .uploads
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => request.target.as_deref().and_then(codec::decode),
        };
        record.size = match command {
            Command::Upload => Some(request.uploads.iter().map(|f| f.data.len() as u64).sum()),
            Command::Put => request.get("content").map(|c| c.len() as u64),
            _ => None,
        };
        if let Some(e) = error {
            record.status = AuditStatus::Failure;
            record.error = Some(e.to_string());
        }

        if let Err(e) = sink.record(&record) {
            warn!("Failed to record audit entry for {}: {}", command.as_str(), e);
        }
    }
}
