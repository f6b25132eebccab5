use clap::{Args, Subcommand};
use multipost_core::model::PayloadKind;
use multipost_core::registry::{PlatformRegistry, PlatformSummary};
use serde::Serialize;

use crate::DisplayFallback;

#[derive(Subcommand, Debug)]
pub enum PlatformCommands {
    /// List registered platforms
    List(PlatformListArgs),
}

#[derive(Args, Debug)]
pub struct PlatformListArgs {
    /// Only platforms accepting this payload kind (dynamic | article | video)
    #[arg(long)]
    pub kind: Option<PayloadKind>,
}

#[derive(Debug, Serialize)]
pub struct PlatformListing {
    pub platforms: Vec<PlatformSummary>,
}

pub fn list(registry: &PlatformRegistry, args: &PlatformListArgs) -> PlatformListing {
    PlatformListing {
        platforms: registry
            .list(args.kind)
            .into_iter()
            .map(|descriptor| descriptor.summary())
            .collect(),
    }
}

impl DisplayFallback for PlatformListing {
    fn display(&self) -> String {
        if self.platforms.is_empty() {
            return "no platforms registered".to_string();
        }
        self.platforms
            .iter()
            .map(|platform| {
                format!(
                    "{:<20} {:<8} {:<12} {}",
                    platform.id,
                    platform.kind.as_str(),
                    platform.platform_name,
                    platform.inject_url
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
