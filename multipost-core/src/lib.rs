pub mod browser;
pub mod config;
pub mod error;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod platforms;
pub mod registry;

pub use browser::{
    BrowserError, BrowserResult, ChromiumLauncher, ChromiumTabSurface, DomPoller, PageSession,
    RetryPolicy, TabId, TabSurface,
};
pub use config::{
    load_multipost_config, load_platforms_config, ConfigBundle, MultipostConfig, PlatformEntry,
    PlatformsConfig,
};
pub use error::{ConfigError, Result};
pub use media::MediaMaterializer;
pub use model::{
    ArticlePayload, ContentPayload, DynamicPayload, MediaRef, PageFile, PayloadKind,
    PublishRequest, VideoPayload,
};
pub use orchestrator::{
    Dispatch, DispatchReport, Orchestrator, PlatformOutcome, PlatformResult, TabBinding,
};
pub use platforms::{
    PlatformRoutine, PublishControl, PublishState, RoutineContext, RoutineError, RoutineReport,
    RoutineToolkit,
};
pub use registry::{PlatformDescriptor, PlatformRegistry, PlatformSummary, RegistryError};
