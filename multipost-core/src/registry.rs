use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::{PlatformEntry, PlatformsConfig};
use crate::model::PayloadKind;
use crate::platforms::{
    article_table, dynamic_table, video_table, PlatformRoutine, PublishControl, SelectorRoutine,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("platform {0} registered twice")]
    Duplicate(String),
    #[error("platform {id} has an invalid url {url}: {reason}")]
    InvalidUrl {
        id: String,
        url: String,
        reason: String,
    },
    #[error("platform {id} declares {declared} but its routine handles {routine}")]
    KindMismatch {
        id: String,
        declared: PayloadKind,
        routine: PayloadKind,
    },
    #[error("platform {id} is misconfigured: {reason}")]
    InvalidEntry { id: String, reason: String },
}

#[derive(Clone)]
pub struct PlatformDescriptor {
    pub id: String,
    pub kind: PayloadKind,
    pub name: String,
    pub platform_name: String,
    pub home_url: String,
    pub inject_url: String,
    pub favicon_url: Option<String>,
    pub iconify_icon: Option<String>,
    pub publish_control: PublishControl,
    pub routine: Arc<dyn PlatformRoutine>,
}

impl fmt::Debug for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("platform_name", &self.platform_name)
            .field("inject_url", &self.inject_url)
            .field("publish_control", &self.publish_control)
            .finish_non_exhaustive()
    }
}

impl PlatformDescriptor {
    pub fn from_entry(entry: &PlatformEntry) -> Result<Self, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidEntry {
            id: entry.id.clone(),
            reason,
        };
        let routine = SelectorRoutine::from_entry(entry.kind, &entry.selectors).map_err(invalid)?;
        let publish_control = entry.publish_control.parse().map_err(invalid)?;
        Ok(Self {
            id: entry.id.clone(),
            kind: entry.kind,
            name: entry.name.clone(),
            platform_name: entry.platform_name.clone(),
            home_url: entry.home_url.clone(),
            inject_url: entry.inject_url.clone(),
            favicon_url: entry.favicon_url.clone(),
            iconify_icon: entry.iconify_icon.clone(),
            publish_control,
            routine: Arc::new(routine),
        })
    }

    pub fn summary(&self) -> PlatformSummary {
        PlatformSummary {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            platform_name: self.platform_name.clone(),
            home_url: self.home_url.clone(),
            inject_url: self.inject_url.clone(),
            favicon_url: self.favicon_url.clone(),
            iconify_icon: self.iconify_icon.clone(),
            publish_control: self.publish_control,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        for url in [&self.home_url, &self.inject_url] {
            Url::parse(url).map_err(|err| RegistryError::InvalidUrl {
                id: self.id.clone(),
                url: url.clone(),
                reason: err.to_string(),
            })?;
        }
        let routine = self.routine.kind();
        if routine != self.kind {
            return Err(RegistryError::KindMismatch {
                id: self.id.clone(),
                declared: self.kind,
                routine,
            });
        }
        Ok(())
    }
}

/// Display metadata of a platform, without its routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformSummary {
    pub id: String,
    pub kind: PayloadKind,
    pub name: String,
    pub platform_name: String,
    pub home_url: String,
    pub inject_url: String,
    pub favicon_url: Option<String>,
    pub iconify_icon: Option<String>,
    pub publish_control: PublishControl,
}

/// Immutable lookup from platform id to descriptor.
///
/// Built once at startup; list order follows table order (dynamic, article,
/// video, then configured platforms).
#[derive(Debug, Clone)]
pub struct PlatformRegistry {
    descriptors: Vec<PlatformDescriptor>,
    index: HashMap<String, usize>,
}

impl PlatformRegistry {
    pub fn new<I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = PlatformDescriptor>,
    {
        let mut registry = Self {
            descriptors: Vec::new(),
            index: HashMap::new(),
        };
        for descriptor in descriptors {
            descriptor.validate()?;
            if registry.index.contains_key(&descriptor.id) {
                return Err(RegistryError::Duplicate(descriptor.id));
            }
            registry
                .index
                .insert(descriptor.id.clone(), registry.descriptors.len());
            registry.descriptors.push(descriptor);
        }
        Ok(registry)
    }

    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(builtin_descriptors())
    }

    /// Built-in tables merged with the platforms declared in configuration.
    pub fn with_custom(config: &PlatformsConfig) -> Result<Self, RegistryError> {
        let custom = config
            .platforms
            .iter()
            .map(PlatformDescriptor::from_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(builtin_descriptors().into_iter().chain(custom))
    }

    pub fn resolve(&self, id: &str) -> Option<&PlatformDescriptor> {
        self.index.get(id).map(|position| &self.descriptors[*position])
    }

    pub fn list(&self, kind: Option<PayloadKind>) -> Vec<&PlatformDescriptor> {
        self.descriptors
            .iter()
            .filter(|descriptor| kind.map_or(true, |kind| descriptor.kind == kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn builtin_descriptors() -> Vec<PlatformDescriptor> {
    let mut all = dynamic_table();
    all.extend(article_table());
    all.extend(video_table());
    all
}
