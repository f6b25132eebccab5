use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use multipost_core::model::{PayloadKind, PublishRequest};
use multipost_core::registry::PlatformRegistry;
use serde::Serialize;

use crate::{AppError, DisplayFallback, Result};

#[derive(Subcommand, Debug)]
pub enum RequestCommands {
    /// Validate a publish request against the registry without opening a browser
    Check(RequestCheckArgs),
}

#[derive(Args, Debug)]
pub struct RequestCheckArgs {
    /// JSON file holding the publish request
    #[arg(long)]
    pub request: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct RequestCheck {
    pub kind: PayloadKind,
    pub title: String,
    pub auto_publish: bool,
    pub ready: Vec<String>,
    pub unresolved: Vec<String>,
    pub kind_mismatch: Vec<String>,
}

pub fn read_request(path: &Path) -> Result<PublishRequest> {
    let raw = fs::read_to_string(path)?;
    PublishRequest::from_json(&raw)
        .map_err(|err| AppError::InvalidRequest(format!("{}: {err}", path.display())))
}

pub fn check(registry: &PlatformRegistry, request: &PublishRequest) -> RequestCheck {
    let kind = request.data.kind();
    let mut report = RequestCheck {
        kind,
        title: request.data.title().to_string(),
        auto_publish: request.auto_publish,
        ready: Vec::new(),
        unresolved: Vec::new(),
        kind_mismatch: Vec::new(),
    };
    for id in request.targets() {
        match registry.resolve(id) {
            None => report.unresolved.push(id.to_string()),
            Some(descriptor) if descriptor.kind != kind => report.kind_mismatch.push(id.to_string()),
            Some(_) => report.ready.push(id.to_string()),
        }
    }
    report
}

impl DisplayFallback for RequestCheck {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("kind: {}", self.kind),
            format!("title: {}", self.title),
            format!("auto publish: {}", self.auto_publish),
            format!("ready: {}", join_or_dash(&self.ready)),
        ];
        if !self.unresolved.is_empty() {
            lines.push(format!("unknown platforms: {}", self.unresolved.join(", ")));
        }
        if !self.kind_mismatch.is_empty() {
            lines.push(format!(
                "platforms not accepting {}: {}",
                self.kind,
                self.kind_mismatch.join(", ")
            ));
        }
        lines.join("\n")
    }
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}
